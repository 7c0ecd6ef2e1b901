//! Directory listing payload: `{ record_len: u64, name NUL }` records,
//! each padded to 8 bytes.

use super::get_u64;
use crate::error::{DeferError, Result};
use tracing::warn;

const RECORD_HEADER: usize = 8;

pub fn listing_record_len(name: &str) -> usize {
    (RECORD_HEADER + name.len() + 1 + 7) & !7
}

/// Pack `names` into a listing payload no larger than `capacity` bytes.
pub fn encode_listing<S: AsRef<str>>(names: &[S], capacity: usize) -> Result<Vec<u8>> {
    let total: usize = names.iter().map(|n| listing_record_len(n.as_ref())).sum();
    if total > capacity {
        return Err(DeferError::MoreData);
    }
    let mut buf = vec![0u8; total];
    let mut at = 0;
    for name in names {
        let name = name.as_ref();
        let reclen = listing_record_len(name);
        buf[at..at + RECORD_HEADER].copy_from_slice(&(reclen as u64).to_ne_bytes());
        buf[at + RECORD_HEADER..at + RECORD_HEADER + name.len()].copy_from_slice(name.as_bytes());
        at += reclen;
    }
    Ok(buf)
}

/// Unpack a listing payload. Parsing stops at the first malformed record.
pub fn decode_listing(payload: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut at = 0;
    while at + RECORD_HEADER <= payload.len() {
        let reclen = get_u64(payload, at) as usize;
        if reclen <= RECORD_HEADER || at + reclen > payload.len() {
            warn!(offset = at, reclen, "malformed listing record, ignoring the rest");
            break;
        }
        let field = &payload[at + RECORD_HEADER..at + reclen];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        if end == 0 {
            warn!(offset = at, "listing record with an empty name, ignoring the rest");
            break;
        }
        names.push(String::from_utf8_lossy(&field[..end]).into_owned());
        at += reclen;
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_len_is_padded() {
        assert_eq!(listing_record_len("a"), 16);
        assert_eq!(listing_record_len("abcdefg"), 16);
        assert_eq!(listing_record_len("abcdefgh"), 24);
    }

    #[test]
    fn test_listing_layout() {
        let buf = encode_listing(&["x", "yy"], 1024).unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(get_u64(&buf, 0), 16);
        assert_eq!(buf[8], b'x');
        assert_eq!(buf[9], 0);
        assert_eq!(decode_listing(&buf), vec!["x", "yy"]);
    }

    #[test]
    fn test_listing_over_capacity_is_more_data() {
        assert_eq!(encode_listing(&["a", "b"], 31), Err(DeferError::MoreData));
    }

    #[test]
    fn test_truncated_record_stops_parsing() {
        let mut buf = encode_listing(&["first", "second"], 1024).unwrap();
        buf.truncate(20);
        assert_eq!(decode_listing(&buf), vec!["first"]);

        let zero = [0u8; 16];
        assert!(decode_listing(&zero).is_empty());
    }
}
