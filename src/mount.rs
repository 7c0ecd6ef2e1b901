//! Typed file operations on one mounted instance.
//!
//! Each operation marshals node state into a request, hands it to the
//! [`RequestDriver`], and folds the reply back into the [`NodeTable`].

use crate::driver::RequestDriver;
use crate::error::{DeferError, Result};
use crate::interrupt::Interrupt;
use crate::node::{DirEntry, Node, NodeAttrs, NodeKind, NodeRef, NodeTable, ROOT_ID};
use crate::wire::{
    decode_listing, AttrPayload, MountOpts, Request, RequestKind, Response, MAX_NAME, MAX_PATH,
    REQUEST_HEADER_SIZE,
};
use std::collections::HashSet;
use std::time::SystemTime;
use tracing::{debug, warn};

/// One mounted instance.
///
/// Every operation waits on the interrupt handed to [`Mount::new`]. Raising
/// it aborts the operations in progress and every later one; it is the
/// mount-wide abort. Cancelling a single call is done through
/// [`RequestDriver::perform`] with a token of its own.
pub struct Mount {
    opts: MountOpts,
    driver: RequestDriver,
    table: NodeTable,
    intr: Interrupt,
}

/// Split an absolute path into its components.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.len() >= MAX_PATH {
        return Err(DeferError::PathTooLong);
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| DeferError::InvalidArgument(format!("path {:?} is not absolute", path)))?;
    rest.split('/')
        .filter(|c| !c.is_empty())
        .map(|c| match c {
            "." | ".." => Err(DeferError::InvalidArgument(format!(
                "path {:?} contains {:?}",
                path, c
            ))),
            c if c.len() > MAX_NAME => Err(DeferError::NameTooLong),
            c => Ok(c),
        })
        .collect()
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME {
        return Err(DeferError::NameTooLong);
    }
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(DeferError::InvalidArgument(format!(
            "invalid name {:?}",
            name
        )));
    }
    Ok(())
}

fn require_dir(node: &Node) -> Result<()> {
    if node.kind().is_dir() {
        Ok(())
    } else {
        Err(DeferError::NotADirectory)
    }
}

fn require_file(node: &Node) -> Result<()> {
    if node.kind().is_dir() {
        Err(DeferError::IsADirectory)
    } else {
        Ok(())
    }
}

impl Mount {
    pub fn new(opts: MountOpts, driver: RequestDriver, intr: Interrupt) -> Result<Self> {
        let table = NodeTable::new();
        table.create(
            NodeKind::Directory,
            ROOT_ID,
            "/",
            ROOT_ID,
            NodeAttrs::new(NodeKind::Directory, 0o755),
        )?;
        Ok(Self {
            opts,
            driver,
            table,
            intr,
        })
    }

    pub fn opts(&self) -> &MountOpts {
        &self.opts
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    pub fn driver(&self) -> &RequestDriver {
        &self.driver
    }

    /// The mount-wide abort token. Once raised, requests fail with
    /// `Interrupted` for the rest of the mount's life.
    pub fn interrupt(&self) -> &Interrupt {
        &self.intr
    }

    pub fn root(&self) -> Result<NodeRef> {
        self.table.find_by_id(ROOT_ID).ok_or(DeferError::NotFound)
    }

    fn perform(&self, request: Request) -> Result<Response> {
        self.driver.perform(&request, &self.intr)
    }

    fn request(&self, kind: RequestKind, path: &str) -> Request {
        Request::new(kind, path, &self.opts)
    }

    fn fetch_attr(&self, path: &str) -> Result<AttrPayload> {
        let response = self.perform(self.request(RequestKind::GetAttr, path))?;
        AttrPayload::from_bytes(&response.payload)
    }

    fn cached(&self, id: Option<u64>, path: &str) -> Option<NodeRef> {
        id.and_then(|id| self.table.find_by_id(id))
            .filter(|n| n.path() == path)
            .or_else(|| self.table.find_by_path(path))
    }

    fn evict(&self, node: NodeRef) {
        let id = node.id();
        match self.table.remove(node) {
            Ok(()) => {}
            Err(DeferError::Busy) => debug!(id, "node still held, left in cache"),
            Err(e) => debug!(id, error = %e, "node eviction failed"),
        }
    }

    /// Read up to `size` bytes at `offset`.
    pub fn read(&self, node: &Node, offset: u64, size: usize) -> Result<Vec<u8>> {
        require_file(node)?;
        let size = size.min(self.driver.payload_capacity());
        let request = self
            .request(RequestKind::Read, node.path())
            .with_range(offset, size as u64);
        let mut data = self.perform(request)?.payload;
        data.truncate(size);
        node.content().attrs.atime = SystemTime::now();
        Ok(data)
    }

    /// Fetch the listing of `dir` and bring its directory block in line
    /// with it. New names get freshly allocated ids.
    pub fn readdir(&self, dir: &Node) -> Result<Vec<DirEntry>> {
        require_dir(dir)?;
        let request = self
            .request(RequestKind::ReadDir, dir.path())
            .with_range(0, self.driver.payload_capacity() as u64);
        let names = decode_listing(&self.perform(request)?.payload);
        let listed: HashSet<&str> = names.iter().map(String::as_str).collect();

        dir.with_dir(|block| {
            for name in &names {
                if name == "." || name == ".." || block.entry_exists(name) {
                    continue;
                }
                if name.len() > MAX_NAME || name.contains('/') {
                    warn!(dir = dir.path(), name = %name, "skipping unusable name");
                    continue;
                }
                block.add_entry(name, self.table.alloc_id())?;
            }
            let gone: Vec<String> = block
                .entries()
                .iter()
                .filter(|e| e.name != "." && e.name != ".." && !listed.contains(e.name.as_str()))
                .map(|e| e.name.clone())
                .collect();
            for name in gone {
                block.remove_entry(&name)?;
            }
            Ok(block.entries().to_vec())
        })
    }

    /// Refresh the cached attributes of `node`.
    pub fn getattr(&self, node: &Node) -> Result<NodeAttrs> {
        let payload = self.fetch_attr(node.path())?;
        let mut content = node.content();
        content.attrs.apply(&payload);
        Ok(content.attrs)
    }

    /// Resolve `name` inside `dir`, reusing a cached node when one exists.
    pub fn lookup(&self, dir: &Node, name: &str) -> Result<NodeRef> {
        require_dir(dir)?;
        match name {
            "." => return self.table.find_by_id(dir.id()).ok_or(DeferError::NotFound),
            ".." => {
                let parent = dir.with_dir(|b| b.find_id_by_name("..").ok_or(DeferError::NotFound))?;
                return self.table.find_by_id(parent).ok_or(DeferError::NotFound);
            }
            _ => check_name(name)?,
        }

        let path = join(dir.path(), name);
        let payload = match self.fetch_attr(&path) {
            Err(DeferError::NotFound) => {
                dir.with_dir(|b| Ok(b.remove_entry(name).ok()))?;
                if let Some(stale) = self.table.find_by_path(&path) {
                    self.evict(stale);
                }
                return Err(DeferError::NotFound);
            }
            other => other?,
        };
        let kind = NodeKind::from_wire(payload.vtype).ok_or_else(|| {
            DeferError::Io(format!("{} has unknown type {}", path, payload.vtype))
        })?;

        let known_id = dir.with_dir(|b| Ok(b.find_id_by_name(name)))?;
        let node = match self.cached(known_id, &path) {
            Some(node) if node.kind() == kind => node,
            other => {
                if let Some(stale) = other {
                    self.evict(stale);
                }
                let id = known_id
                    .filter(|&id| self.table.find_by_id(id).is_none())
                    .unwrap_or(0);
                self.table
                    .create(kind, id, &path, dir.id(), NodeAttrs::new(kind, 0))?
            }
        };
        node.content().attrs.apply(&payload);

        dir.with_dir(|b| {
            if b.find_id_by_name(name) != Some(node.id()) {
                b.remove_entry(name).ok();
                b.add_entry(name, node.id())?;
            }
            Ok(())
        })?;
        Ok(node)
    }

    /// Write `data` at `offset`, returning how much of it was sent. At most
    /// one channel buffer's worth goes out per call.
    pub fn write(&self, node: &Node, offset: u64, data: &[u8]) -> Result<usize> {
        require_file(node)?;
        let max = (self.driver.pool().buffer_size() - REQUEST_HEADER_SIZE) & !7;
        let len = data.len().min(max);
        let end = offset.checked_add(len as u64).ok_or_else(|| {
            DeferError::InvalidArgument(format!(
                "write of {} bytes at offset {} overflows the file size",
                len, offset
            ))
        })?;
        let mut payload = vec![0u8; (len + 7) & !7];
        payload[..len].copy_from_slice(&data[..len]);

        let request = self
            .request(RequestKind::Write, node.path())
            .with_range(offset, len as u64)
            .with_payload(payload);
        self.perform(request)?;

        let mut content = node.content();
        if end > content.attrs.size {
            content.attrs.size = end;
        }
        content.attrs.mtime = SystemTime::now();
        Ok(len)
    }

    pub fn create(&self, dir: &Node, name: &str, mode: u64) -> Result<NodeRef> {
        self.make(dir, name, mode, NodeKind::File)
    }

    pub fn mkdir(&self, dir: &Node, name: &str, mode: u64) -> Result<NodeRef> {
        self.make(dir, name, mode, NodeKind::Directory)
    }

    fn make(&self, dir: &Node, name: &str, mode: u64, kind: NodeKind) -> Result<NodeRef> {
        require_dir(dir)?;
        check_name(name)?;
        let path = join(dir.path(), name);
        let request_kind = match kind {
            NodeKind::File => RequestKind::Create,
            NodeKind::Directory => RequestKind::Mkdir,
        };

        let mut attrs = NodeAttrs::new(kind, mode);
        let request = self
            .request(request_kind, &path)
            .with_payload(attrs.to_payload().to_bytes().to_vec());
        let response = self.perform(request)?;
        if !response.payload.is_empty() {
            attrs.apply(&AttrPayload::from_bytes(&response.payload)?);
        }

        if let Some(stale) = self.table.find_by_path(&path) {
            self.evict(stale);
        }
        let node = self.table.create(kind, 0, &path, dir.id(), attrs)?;
        dir.with_dir(|b| {
            b.remove_entry(name).ok();
            b.add_entry(name, node.id())
        })?;
        Ok(node)
    }

    pub fn remove(&self, dir: &Node, name: &str) -> Result<()> {
        let node = self.lookup(dir, name)?;
        require_file(&node)?;
        self.perform(self.request(RequestKind::Remove, node.path()))?;
        dir.with_dir(|b| Ok(b.remove_entry(name).ok()))?;
        self.evict(node);
        Ok(())
    }

    pub fn rmdir(&self, dir: &Node, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(DeferError::InvalidArgument(format!(
                "cannot remove {:?}",
                name
            )));
        }
        let node = self.lookup(dir, name)?;
        require_dir(&node)?;
        if !node.with_dir(|b| Ok(b.is_empty()))? {
            debug!(path = node.path(), "cached block still lists entries, asking the daemon");
        }
        self.perform(self.request(RequestKind::Rmdir, node.path()))?;
        dir.with_dir(|b| Ok(b.remove_entry(name).ok()))?;
        self.evict(node);
        Ok(())
    }

    pub fn rename(&self, _from_dir: &Node, _from: &str, _to_dir: &Node, _to: &str) -> Result<()> {
        Err(DeferError::Unsupported("rename".to_string()))
    }

    /// Walk `path` from the root.
    pub fn resolve(&self, path: &str) -> Result<NodeRef> {
        let mut current = self.root()?;
        for name in split_path(path)? {
            current = self.lookup(&current, name)?;
        }
        Ok(current)
    }

    /// Resolve the directory holding `path` and return it with the last
    /// component.
    pub fn resolve_parent<'p>(&self, path: &'p str) -> Result<(NodeRef, &'p str)> {
        let mut components = split_path(path)?;
        let name = components.pop().ok_or_else(|| {
            DeferError::InvalidArgument("the root has no parent".to_string())
        })?;
        let mut current = self.root()?;
        for component in components {
            current = self.lookup(&current, component)?;
        }
        Ok((current, name))
    }

    /// Drop every cached node. Fails with `Busy` while any node is held.
    pub fn unmount(&self) -> Result<()> {
        if let Some(held) = self.table.nodes().iter().find(|n| n.holds() > 0) {
            debug!(path = held.path(), holds = held.holds(), "unmount refused");
            return Err(DeferError::Busy);
        }
        self.table.remove_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/", vec![])]
    #[case("/a", vec!["a"])]
    #[case("/a//b/", vec!["a", "b"])]
    fn test_split_path_accepts(#[case] path: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_path(path).unwrap(), expected);
    }

    #[rstest]
    #[case("relative")]
    #[case("/a/../b")]
    #[case("/./a")]
    fn test_split_path_rejects(#[case] path: &str) {
        assert!(matches!(
            split_path(path),
            Err(DeferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_split_path_limits() {
        let long_name = format!("/{}", "n".repeat(MAX_NAME + 1));
        assert_eq!(split_path(&long_name), Err(DeferError::NameTooLong));
        let long_path = "/a".repeat(MAX_PATH / 2);
        assert_eq!(split_path(&long_path), Err(DeferError::PathTooLong));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }
}
