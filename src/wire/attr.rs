use super::{get_i64, get_u64};
use crate::error::{DeferError, Result};

pub const ATTR_PAYLOAD_SIZE: usize = 9 * 8;

/// Wire type code of a regular file.
pub const VREG: i64 = 1;
/// Wire type code of a directory.
pub const VDIR: i64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: now.timestamp(),
            nsec: i64::from(now.timestamp_subsec_nanos()),
        }
    }
}

/// Attributes as carried by getattr responses and create/mkdir requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrPayload {
    pub mode: u64,
    pub size: u64,
    pub vtype: i64,
    pub mtime: Timespec,
    pub atime: Timespec,
    pub ctime: Timespec,
}

impl AttrPayload {
    pub fn to_bytes(&self) -> [u8; ATTR_PAYLOAD_SIZE] {
        let mut buf = [0u8; ATTR_PAYLOAD_SIZE];
        buf[0..8].copy_from_slice(&self.mode.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.size.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.vtype.to_ne_bytes());
        let mut at = 24;
        for ts in [self.mtime, self.atime, self.ctime] {
            buf[at..at + 8].copy_from_slice(&ts.sec.to_ne_bytes());
            buf[at + 8..at + 16].copy_from_slice(&ts.nsec.to_ne_bytes());
            at += 16;
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < ATTR_PAYLOAD_SIZE {
            return Err(DeferError::Io(format!(
                "attribute payload of {} bytes, expected {}",
                buf.len(),
                ATTR_PAYLOAD_SIZE
            )));
        }
        let ts = |at: usize| Timespec {
            sec: get_i64(buf, at),
            nsec: get_i64(buf, at + 8),
        };
        Ok(Self {
            mode: get_u64(buf, 0),
            size: get_u64(buf, 8),
            vtype: get_i64(buf, 16),
            mtime: ts(24),
            atime: ts(40),
            ctime: ts(56),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_follow_type_field() {
        let attr = AttrPayload {
            mode: 0o100644,
            size: 12,
            vtype: VREG,
            mtime: Timespec { sec: 7, nsec: 8 },
            atime: Timespec { sec: 9, nsec: 10 },
            ctime: Timespec { sec: 11, nsec: 12 },
        };
        let raw = attr.to_bytes();
        assert_eq!(get_i64(&raw, 24), 7);
        assert_eq!(get_i64(&raw, 32), 8);
        assert_eq!(get_i64(&raw, 64), 12);
        assert_eq!(AttrPayload::from_bytes(&raw).unwrap(), attr);
    }

    #[test]
    fn test_short_payload_rejected() {
        assert!(AttrPayload::from_bytes(&[0u8; ATTR_PAYLOAD_SIZE - 1]).is_err());
    }
}
