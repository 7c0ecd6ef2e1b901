//! Fixed-layout request/response messages exchanged with the daemon.
//!
//! Every integer is encoded in native byte order because both ends of a
//! channel always run on the same host. Strings live in fixed-size,
//! NUL-terminated fields.

pub mod attr;
pub mod listing;

pub use attr::{AttrPayload, Timespec, ATTR_PAYLOAD_SIZE, VDIR, VREG};
pub use listing::{decode_listing, encode_listing, listing_record_len};

use crate::error::{DeferError, Result};

pub const MAX_PATH: usize = 1024;
pub const MAX_NAME: usize = 255;
pub const MAX_SERVER: usize = 80;
pub const MAX_USER: usize = 40;
pub const MAX_PASS: usize = 40;

/// Default capacity of one channel buffer.
pub const DEVICE_BUFFER_SIZE: usize = 1024 * 1024;
pub const MAX_CHANNELS: usize = 10;
pub const LIVENESS_PROBE_SECS: u64 = 10;

/// Result code meaning "listing does not fit, retry with a larger buffer".
pub const MOREDATA: i64 = 240;

pub const MOUNT_OPTS_SIZE: usize = MAX_PATH + MAX_SERVER + MAX_USER + MAX_PASS;
pub const REQUEST_HEADER_SIZE: usize = 5 * 8 + MAX_PATH + MOUNT_OPTS_SIZE;
pub const RESPONSE_HEADER_SIZE: usize = 3 * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum RequestKind {
    Read = 1,
    ReadDir = 2,
    GetAttr = 3,
    Write = 4,
    Create = 5,
    Remove = 6,
    Mkdir = 7,
    Rmdir = 8,
}

impl RequestKind {
    pub fn from_u64(raw: u64) -> Option<Self> {
        let kind = match raw {
            1 => RequestKind::Read,
            2 => RequestKind::ReadDir,
            3 => RequestKind::GetAttr,
            4 => RequestKind::Write,
            5 => RequestKind::Create,
            6 => RequestKind::Remove,
            7 => RequestKind::Mkdir,
            8 => RequestKind::Rmdir,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestKind::Read => "read",
            RequestKind::ReadDir => "readdir",
            RequestKind::GetAttr => "getattr",
            RequestKind::Write => "write",
            RequestKind::Create => "create",
            RequestKind::Remove => "remove",
            RequestKind::Mkdir => "mkdir",
            RequestKind::Rmdir => "rmdir",
        };
        write!(f, "{}", name)
    }
}

/// Credentials and base path copied into every request of one mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOpts {
    pub base_path: String,
    pub server: String,
    pub user: String,
    pub pass: String,
}

impl MountOpts {
    pub fn new(base_path: &str, server: &str, user: &str, pass: &str) -> Result<Self> {
        check_field("base_path", base_path, MAX_PATH)?;
        check_field("server", server, MAX_SERVER)?;
        check_field("user", user, MAX_USER)?;
        check_field("pass", pass, MAX_PASS)?;
        Ok(Self {
            base_path: base_path.to_string(),
            server: server.to_string(),
            user: user.to_string(),
            pass: pass.to_string(),
        })
    }

    fn write_to(&self, buf: &mut [u8]) {
        let mut at = 0;
        for (value, width) in [
            (&self.base_path, MAX_PATH),
            (&self.server, MAX_SERVER),
            (&self.user, MAX_USER),
            (&self.pass, MAX_PASS),
        ] {
            put_cstr(&mut buf[at..at + width], value);
            at += width;
        }
    }

    fn read_from(buf: &[u8]) -> Self {
        let base_path = get_cstr(&buf[..MAX_PATH]);
        let server = get_cstr(&buf[MAX_PATH..MAX_PATH + MAX_SERVER]);
        let user_at = MAX_PATH + MAX_SERVER;
        let user = get_cstr(&buf[user_at..user_at + MAX_USER]);
        let pass = get_cstr(&buf[user_at + MAX_USER..MOUNT_OPTS_SIZE]);
        Self {
            base_path,
            server,
            user,
            pass,
        }
    }
}

fn check_field(field: &str, value: &str, width: usize) -> Result<()> {
    if value.len() >= width {
        if field == "base_path" {
            return Err(DeferError::PathTooLong);
        }
        return Err(DeferError::InvalidArgument(format!(
            "{} must be shorter than {} bytes",
            field, width
        )));
    }
    if value.as_bytes().contains(&0) {
        return Err(DeferError::InvalidArgument(format!(
            "{} contains a NUL byte",
            field
        )));
    }
    Ok(())
}

fn put_cstr(field: &mut [u8], value: &str) {
    field.fill(0);
    let n = value.len().min(field.len().saturating_sub(1));
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
}

fn get_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

pub(crate) fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(raw)
}

pub(crate) fn get_i64(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_ne_bytes(raw)
}

/// Raw request header, exactly as it sits at the start of a channel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub kind: u64,
    pub size: u64,
    pub offset: u64,
    pub payload_len: u64,
    pub flags: u64,
    pub path: String,
    pub mount: MountOpts,
}

impl RequestHeader {
    pub fn to_bytes(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.kind.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.size.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.offset.to_ne_bytes());
        buf[24..32].copy_from_slice(&self.payload_len.to_ne_bytes());
        buf[32..40].copy_from_slice(&self.flags.to_ne_bytes());
        put_cstr(&mut buf[40..40 + MAX_PATH], &self.path);
        self.mount.write_to(&mut buf[40 + MAX_PATH..]);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(DeferError::InvalidArgument(format!(
                "request of {} bytes is shorter than its header",
                buf.len()
            )));
        }
        Ok(Self {
            kind: get_u64(buf, 0),
            size: get_u64(buf, 8),
            offset: get_u64(buf, 16),
            payload_len: get_u64(buf, 24),
            flags: get_u64(buf, 32),
            path: get_cstr(&buf[40..40 + MAX_PATH]),
            mount: MountOpts::read_from(&buf[40 + MAX_PATH..REQUEST_HEADER_SIZE]),
        })
    }
}

/// Raw response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub kind: u64,
    pub result: i64,
    pub payload_len: u64,
}

impl ResponseHeader {
    pub fn to_bytes(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.kind.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.result.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.payload_len.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(DeferError::InvalidArgument(format!(
                "response of {} bytes is shorter than its header",
                buf.len()
            )));
        }
        Ok(Self {
            kind: get_u64(buf, 0),
            result: get_i64(buf, 8),
            payload_len: get_u64(buf, 16),
        })
    }
}

/// A request as built by the filesystem side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub path: String,
    pub offset: u64,
    pub size: u64,
    pub flags: u64,
    pub payload: Vec<u8>,
    pub mount: MountOpts,
}

impl Request {
    pub fn new(kind: RequestKind, path: impl Into<String>, mount: &MountOpts) -> Self {
        Self {
            kind,
            path: path.into(),
            offset: 0,
            size: 0,
            flags: 0,
            payload: Vec::new(),
            mount: mount.clone(),
        }
    }

    pub fn with_range(mut self, offset: u64, size: u64) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn encoded_len(&self) -> usize {
        REQUEST_HEADER_SIZE + self.payload.len()
    }

    pub fn header(&self) -> RequestHeader {
        RequestHeader {
            kind: self.kind.as_u64(),
            size: self.size,
            offset: self.offset,
            payload_len: self.payload.len() as u64,
            flags: self.flags,
            path: self.path.clone(),
            mount: self.mount.clone(),
        }
    }

    /// Serialize into the front of `buf`, returning the number of bytes used.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        if self.path.len() >= MAX_PATH {
            return Err(DeferError::PathTooLong);
        }
        let len = self.encoded_len();
        if len > buf.len() {
            return Err(DeferError::InvalidArgument(format!(
                "{} request needs {} bytes but the channel buffer holds {}",
                self.kind,
                len,
                buf.len()
            )));
        }
        buf[..REQUEST_HEADER_SIZE].copy_from_slice(&self.header().to_bytes());
        buf[REQUEST_HEADER_SIZE..len].copy_from_slice(&self.payload);
        Ok(len)
    }

    /// Parse a request fetched by the daemon. Unknown kinds are rejected
    /// with `Unsupported`; use [`RequestHeader::from_bytes`] to see the raw kind.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = RequestHeader::from_bytes(buf)?;
        let kind = RequestKind::from_u64(header.kind).ok_or_else(|| {
            DeferError::Unsupported(format!("request kind {}", header.kind))
        })?;
        let end = REQUEST_HEADER_SIZE
            .checked_add(header.payload_len as usize)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                DeferError::InvalidArgument(format!(
                    "payload of {} bytes overruns the {} byte request",
                    header.payload_len,
                    buf.len()
                ))
            })?;
        Ok(Self {
            kind,
            path: header.path,
            offset: header.offset,
            size: header.size,
            flags: header.flags,
            payload: buf[REQUEST_HEADER_SIZE..end].to_vec(),
            mount: header.mount,
        })
    }
}

/// A response as written back by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: u64,
    pub result: i64,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(kind: u64, payload: Vec<u8>) -> Self {
        Self {
            kind,
            result: 0,
            payload,
        }
    }

    pub fn error(kind: u64, result: i64) -> Self {
        Self {
            kind,
            result,
            payload: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.payload.len()
    }

    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if len > buf.len() {
            return Err(DeferError::InvalidArgument(format!(
                "response needs {} bytes but the buffer holds {}",
                len,
                buf.len()
            )));
        }
        let header = ResponseHeader {
            kind: self.kind,
            result: self.result,
            payload_len: self.payload.len() as u64,
        };
        buf[..RESPONSE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        buf[RESPONSE_HEADER_SIZE..len].copy_from_slice(&self.payload);
        Ok(len)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = ResponseHeader::from_bytes(buf)?;
        let end = RESPONSE_HEADER_SIZE
            .checked_add(header.payload_len as usize)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                DeferError::Io(format!(
                    "response payload of {} bytes overruns the {} byte buffer",
                    header.payload_len,
                    buf.len()
                ))
            })?;
        Ok(Self {
            kind: header.kind,
            result: header.result,
            payload: buf[RESPONSE_HEADER_SIZE..end].to_vec(),
        })
    }
}
