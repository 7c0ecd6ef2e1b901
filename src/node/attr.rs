use crate::wire::{AttrPayload, Timespec, VDIR, VREG};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn from_wire(vtype: i64) -> Option<Self> {
        match vtype {
            VREG => Some(NodeKind::File),
            VDIR => Some(NodeKind::Directory),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            NodeKind::File => VREG,
            NodeKind::Directory => VDIR,
        }
    }

    pub fn type_bits(self) -> u64 {
        match self {
            NodeKind::File => libc::S_IFREG as u64,
            NodeKind::Directory => libc::S_IFDIR as u64,
        }
    }

    pub fn is_dir(self) -> bool {
        self == NodeKind::Directory
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
        }
    }
}

/// Cached attributes of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttrs {
    pub kind: NodeKind,
    pub mode: u64,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl NodeAttrs {
    pub fn new(kind: NodeKind, mode: u64) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            mode: (mode & 0o7777) | kind.type_bits(),
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Fold a daemon-reported attribute record into the cache.
    pub fn apply(&mut self, payload: &AttrPayload) {
        self.mode = payload.mode;
        self.size = payload.size;
        if let Some(kind) = NodeKind::from_wire(payload.vtype) {
            self.kind = kind;
        }
        self.mtime = timespec_to_system_time(payload.mtime);
        self.atime = timespec_to_system_time(payload.atime);
        self.ctime = timespec_to_system_time(payload.ctime);
    }

    pub fn to_payload(&self) -> AttrPayload {
        AttrPayload {
            mode: self.mode,
            size: self.size,
            vtype: self.kind.to_wire(),
            mtime: system_time_to_timespec(self.mtime),
            atime: system_time_to_timespec(self.atime),
            ctime: system_time_to_timespec(self.ctime),
        }
    }

    pub fn permissions(&self) -> u64 {
        self.mode & 0o7777
    }
}

/// Times the platform cannot hold collapse to the epoch.
pub fn timespec_to_system_time(ts: Timespec) -> SystemTime {
    let nsec = ts.nsec.clamp(0, 999_999_999) as u32;
    let time = if ts.sec >= 0 {
        UNIX_EPOCH.checked_add(Duration::new(ts.sec as u64, nsec))
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(ts.sec.unsigned_abs()))
            .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nsec))))
    };
    time.unwrap_or(UNIX_EPOCH)
}

pub fn system_time_to_timespec(time: SystemTime) -> Timespec {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => Timespec {
            sec: d.as_secs() as i64,
            nsec: i64::from(d.subsec_nanos()),
        },
        Err(e) => {
            let d = e.duration();
            Timespec {
                sec: -(d.as_secs() as i64),
                nsec: 0,
            }
        }
    }
}
