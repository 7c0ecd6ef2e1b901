use std::io;
use thiserror::Error;

use crate::wire::MOREDATA;

pub type Result<T> = std::result::Result<T, DeferError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeferError {
    #[error("Resource busy")]
    Busy,

    #[error("Not found")]
    NotFound,

    #[error("Interrupted")]
    Interrupted,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Name too long")]
    NameTooLong,

    #[error("Path too long")]
    PathTooLong,

    #[error("No channels configured")]
    NoChannelsConfigured,

    #[error("Listing does not fit in the channel buffer")]
    MoreData,

    #[error("Stale response discarded")]
    StaleResponse,

    #[error("Not a directory")]
    NotADirectory,

    #[error("Is a directory")]
    IsADirectory,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Daemon returned error {0}")]
    Remote(i64),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl DeferError {
    /// The errno this error is reported as on the wire or to a shell.
    pub fn errno(&self) -> i64 {
        let code = match self {
            DeferError::Busy => libc::EBUSY,
            DeferError::NotFound => libc::ENOENT,
            DeferError::Interrupted => libc::EINTR,
            DeferError::InvalidArgument(_) => libc::EINVAL,
            DeferError::Io(_) | DeferError::StaleResponse => libc::EIO,
            DeferError::OutOfMemory => libc::ENOMEM,
            DeferError::NameTooLong | DeferError::PathTooLong => libc::ENAMETOOLONG,
            DeferError::NoChannelsConfigured => libc::ENXIO,
            DeferError::MoreData => return MOREDATA,
            DeferError::NotADirectory => libc::ENOTDIR,
            DeferError::IsADirectory => libc::EISDIR,
            DeferError::Unsupported(_) => libc::ENOTSUP,
            DeferError::Remote(code) => return *code,
            DeferError::Config(_) | DeferError::Json(_) => libc::EINVAL,
        };
        i64::from(code)
    }

    /// Map a non-zero daemon result code back into the error taxonomy.
    pub fn from_errno(code: i64) -> Self {
        if code == MOREDATA {
            return DeferError::MoreData;
        }
        match i32::try_from(code) {
            Ok(libc::ENOENT) => DeferError::NotFound,
            Ok(libc::EBUSY) => DeferError::Busy,
            Ok(libc::EINTR) => DeferError::Interrupted,
            Ok(libc::EINVAL) => DeferError::InvalidArgument("rejected by daemon".to_string()),
            Ok(libc::EIO) => DeferError::Io("daemon reported an I/O error".to_string()),
            Ok(libc::ENOMEM) => DeferError::OutOfMemory,
            Ok(libc::ENAMETOOLONG) => DeferError::NameTooLong,
            Ok(libc::ENOTDIR) => DeferError::NotADirectory,
            Ok(libc::EISDIR) => DeferError::IsADirectory,
            _ => DeferError::Remote(code),
        }
    }
}

impl From<io::Error> for DeferError {
    fn from(err: io::Error) -> Self {
        DeferError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DeferError {
    fn from(err: serde_json::Error) -> Self {
        DeferError::Json(err.to_string())
    }
}

/// Map std::io::Error to the errno a daemon puts in a response.
pub fn io_error_to_errno(e: &io::Error) -> i64 {
    if let Some(code) = e.raw_os_error() {
        return i64::from(code);
    }

    let code = match e.kind() {
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::AlreadyExists => libc::EEXIST,
        io::ErrorKind::InvalidInput => libc::EINVAL,
        io::ErrorKind::InvalidData => libc::EINVAL,
        io::ErrorKind::TimedOut => libc::ETIMEDOUT,
        io::ErrorKind::Interrupted => libc::EINTR,
        io::ErrorKind::WriteZero => libc::ENOSPC,
        io::ErrorKind::OutOfMemory => libc::ENOMEM,
        io::ErrorKind::WouldBlock => libc::EAGAIN,
        io::ErrorKind::Unsupported => libc::ENOTSUP,
        _ => libc::EIO,
    };
    i64::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_round_trip_for_known_codes() {
        for err in [
            DeferError::NotFound,
            DeferError::Busy,
            DeferError::Interrupted,
            DeferError::OutOfMemory,
            DeferError::NameTooLong,
            DeferError::NotADirectory,
            DeferError::IsADirectory,
            DeferError::MoreData,
        ] {
            assert_eq!(DeferError::from_errno(err.errno()), err);
        }
    }

    #[test]
    fn test_unknown_errno_is_kept() {
        let err = DeferError::from_errno(i64::from(libc::EEXIST));
        assert_eq!(err, DeferError::Remote(i64::from(libc::EEXIST)));
        assert_eq!(err.errno(), i64::from(libc::EEXIST));
    }

    #[test]
    fn test_io_error_prefers_raw_os_error() {
        let err = io::Error::from_raw_os_error(libc::ENOTEMPTY);
        assert_eq!(io_error_to_errno(&err), i64::from(libc::ENOTEMPTY));

        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(io_error_to_errno(&err), i64::from(libc::ENOENT));
    }
}
