//! Directory contents of one directory node.
//!
//! Entries are kept as a typed sequence. Record lengths follow the packed
//! `dirent64` layout produced by [`DirectoryBlock::encode`], and the block
//! length is the sum of those records.

use crate::error::{DeferError, Result};
use crate::wire::MAX_NAME;

/// `d_ino` + `d_off` + `d_reclen`.
const DIRENT_HEADER: usize = 8 + 8 + 2;

pub fn record_len(name: &str) -> usize {
    (DIRENT_HEADER + name.len() + 1 + 7) & !7
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBlock {
    entries: Vec<DirEntry>,
    len: usize,
}

impl DirectoryBlock {
    /// A fresh block holding `.` and `..`.
    pub fn new(self_id: u64, parent_id: u64) -> Self {
        let entries = vec![
            DirEntry {
                id: self_id,
                name: ".".to_string(),
            },
            DirEntry {
                id: parent_id,
                name: "..".to_string(),
            },
        ];
        let len = record_len(".") + record_len("..");
        Self { entries, len }
    }

    /// Total encoded length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn entry_exists(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn find_id_by_name(&self, name: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    /// True when nothing but `.` and `..` is present.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.name == "." || e.name == "..")
    }

    /// Append an entry, returning the new block length, or 0 if `name` was
    /// already present.
    pub fn add_entry(&mut self, name: &str, id: u64) -> Result<usize> {
        if name.len() > MAX_NAME {
            return Err(DeferError::NameTooLong);
        }
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(DeferError::InvalidArgument(format!(
                "invalid entry name {:?}",
                name
            )));
        }
        if self.entry_exists(name) {
            return Ok(0);
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(self.entries.len() + 1)
            .map_err(|_| DeferError::OutOfMemory)?;
        entries.extend(self.entries.iter().cloned());
        entries.push(DirEntry {
            id,
            name: name.to_string(),
        });
        self.entries = entries;
        self.len += record_len(name);
        self.check();
        Ok(self.len)
    }

    /// Drop the entry called `name`, keeping the order of the rest.
    pub fn remove_entry(&mut self, name: &str) -> Result<usize> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(DeferError::NotFound)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(self.entries.len() - 1)
            .map_err(|_| DeferError::OutOfMemory)?;
        entries.extend(
            self.entries
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos)
                .map(|(_, e)| e.clone()),
        );
        self.entries = entries;
        self.len -= record_len(name);
        self.check();
        Ok(self.len)
    }

    /// Pack the block as `dirent64` records: `d_ino`, `d_off`, `d_reclen`,
    /// then the NUL-terminated name, each record aligned to 8 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.len];
        let mut at = 0;
        for entry in &self.entries {
            let reclen = record_len(&entry.name);
            buf[at..at + 8].copy_from_slice(&entry.id.to_ne_bytes());
            buf[at + 8..at + 16].copy_from_slice(&(at as u64).to_ne_bytes());
            buf[at + 16..at + 18].copy_from_slice(&(reclen as u16).to_ne_bytes());
            buf[at + DIRENT_HEADER..at + DIRENT_HEADER + entry.name.len()]
                .copy_from_slice(entry.name.as_bytes());
            at += reclen;
        }
        buf
    }

    fn check(&self) {
        debug_assert_eq!(
            self.entries.iter().map(|e| record_len(&e.name)).sum::<usize>(),
            self.len,
            "directory block records do not add up to the block length"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_block_has_dot_entries() {
        let block = DirectoryBlock::new(5, 1);
        assert_eq!(block.find_id_by_name("."), Some(5));
        assert_eq!(block.find_id_by_name(".."), Some(1));
        assert_eq!(block.len(), 48);
        assert!(block.is_empty());
    }

    #[test]
    fn test_add_entry_then_find() {
        let mut block = DirectoryBlock::new(2, 1);
        let len = block.add_entry("f", 42).unwrap();
        assert_eq!(len, record_len(".") + record_len("..") + record_len("f"));
        assert_eq!(block.find_id_by_name("f"), Some(42));
        assert!(!block.is_empty());
    }

    #[test]
    fn test_add_entry_is_idempotent() {
        let mut block = DirectoryBlock::new(2, 1);
        block.add_entry("f", 42).unwrap();
        let before = block.len();
        assert_eq!(block.add_entry("f", 43).unwrap(), 0);
        assert_eq!(block.len(), before);
        assert_eq!(block.find_id_by_name("f"), Some(42));
    }

    #[test]
    fn test_remove_missing_entry_leaves_block_untouched() {
        let mut block = DirectoryBlock::new(2, 1);
        block.add_entry("keep", 3).unwrap();
        let bytes = block.encode();
        assert_eq!(block.remove_entry("nope"), Err(DeferError::NotFound));
        assert_eq!(block.encode(), bytes);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut block = DirectoryBlock::new(2, 1);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            block.add_entry(name, 10 + i as u64).unwrap();
        }
        block.remove_entry("b").unwrap();
        let names: Vec<&str> = block.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "a", "c"]);
    }

    #[test]
    fn test_encode_dirent_layout() {
        let mut block = DirectoryBlock::new(7, 1);
        block.add_entry("f", 42).unwrap();
        let raw = block.encode();
        assert_eq!(raw.len(), 72);
        // third record starts after two 24-byte records
        assert_eq!(&raw[48..56], &42u64.to_ne_bytes());
        assert_eq!(&raw[56..64], &48u64.to_ne_bytes());
        assert_eq!(&raw[64..66], &24u16.to_ne_bytes());
        assert_eq!(raw[66], b'f');
        assert_eq!(raw[67], 0);
    }

    #[test]
    fn test_name_limits() {
        let mut block = DirectoryBlock::new(2, 1);
        assert_eq!(
            block.add_entry(&"n".repeat(MAX_NAME + 1), 9),
            Err(DeferError::NameTooLong)
        );
        assert!(block.add_entry("a/b", 9).is_err());
        assert!(block.add_entry(&"n".repeat(MAX_NAME), 9).is_ok());
    }

    proptest! {
        #[test]
        fn prop_record_lengths_sum_to_block_len(
            ops in proptest::collection::vec((any::<bool>(), "[a-z]{1,12}"), 0..64)
        ) {
            let mut block = DirectoryBlock::new(2, 1);
            for (id, (add, name)) in ops.iter().enumerate() {
                if *add {
                    block.add_entry(name, id as u64 + 10).unwrap();
                } else {
                    let _ = block.remove_entry(name);
                }
                let sum: usize = block.entries().iter().map(|e| record_len(&e.name)).sum();
                prop_assert_eq!(sum, block.len());
                prop_assert_eq!(block.encode().len(), block.len());
                prop_assert!(block.entries().iter().all(|e| record_len(&e.name) % 8 == 0));
            }
        }
    }
}
