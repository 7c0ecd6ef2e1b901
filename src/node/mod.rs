//! Node cache for one mounted instance.
//!
//! Nodes sit on a singly linked list hanging off a sentinel head. Every
//! link carries its own lock; traversals take the next link's lock before
//! letting go of the current one, so readers and removers only ever contend
//! pairwise. A node's attributes and directory block live behind a separate
//! content lock.
//!
//! `holds` counts outstanding [`NodeRef`]s. A node resting in the table has
//! no holds; [`NodeTable::remove`] consumes the caller's hold and unlinks the
//! node only if that hold was the last one.

pub mod attr;
pub mod dirent;

pub use attr::{NodeAttrs, NodeKind};
pub use dirent::{record_len, DirEntry, DirectoryBlock};

use crate::error::{DeferError, Result};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Id handed to the root directory of every table.
pub const ROOT_ID: u64 = 1;

#[derive(Default)]
struct Link {
    next: Option<Arc<Node>>,
}

pub struct NodeContent {
    pub attrs: NodeAttrs,
    pub dir: Option<DirectoryBlock>,
}

pub struct Node {
    id: u64,
    kind: NodeKind,
    path: String,
    holds: AtomicU64,
    link: Arc<RwLock<Link>>,
    content: Mutex<NodeContent>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("holds", &self.holds())
            .finish()
    }
}

impl Node {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn holds(&self) -> u64 {
        self.holds.load(Ordering::SeqCst)
    }

    /// Lock attributes and directory block.
    pub fn content(&self) -> MutexGuard<'_, NodeContent> {
        self.content.lock()
    }

    pub fn attrs(&self) -> NodeAttrs {
        self.content.lock().attrs
    }

    /// Run `f` on the directory block; `NotADirectory` for files.
    pub fn with_dir<T>(&self, f: impl FnOnce(&mut DirectoryBlock) -> Result<T>) -> Result<T> {
        let mut content = self.content.lock();
        let NodeContent { attrs, dir } = &mut *content;
        let block = dir.as_mut().ok_or(DeferError::NotADirectory)?;
        let before = block.len();
        let out = f(block)?;
        if block.len() != before {
            attrs.size = block.len() as u64;
            let now = std::time::SystemTime::now();
            attrs.mtime = now;
            attrs.atime = now;
        }
        Ok(out)
    }

    fn release(&self) {
        let _ = self
            .holds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| h.checked_sub(1));
    }
}

/// A held node. Dropping it gives the hold back.
pub struct NodeRef {
    node: Arc<Node>,
    armed: bool,
}

impl NodeRef {
    fn new(node: Arc<Node>) -> Self {
        Self { node, armed: true }
    }

    /// Take the hold over without giving it back on drop.
    fn into_arc(mut self) -> Arc<Node> {
        self.armed = false;
        Arc::clone(&self.node)
    }
}

impl std::ops::Deref for NodeRef {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.node.fmt(f)
    }
}

impl Clone for NodeRef {
    fn clone(&self) -> Self {
        self.node.holds.fetch_add(1, Ordering::SeqCst);
        Self::new(Arc::clone(&self.node))
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        if self.armed {
            self.node.release();
        }
    }
}

pub struct NodeTable {
    head: Arc<RwLock<Link>>,
    next_id: Mutex<u64>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            head: Arc::new(RwLock::new(Link::default())),
            next_id: Mutex::new(0),
        }
    }

    /// Reserve a fresh node id.
    pub fn alloc_id(&self) -> u64 {
        let mut next = self.next_id.lock();
        *next = next.wrapping_add(1);
        *next
    }

    /// Allocate a node and append it at the tail. A zero `explicit_id`
    /// draws the next id from the table; `parent_id` seeds `..` for
    /// directories (zero means the node is its own parent).
    pub fn create(
        &self,
        kind: NodeKind,
        explicit_id: u64,
        path: &str,
        parent_id: u64,
        attrs: NodeAttrs,
    ) -> Result<NodeRef> {
        let id = if explicit_id == 0 {
            self.alloc_id()
        } else {
            let mut next = self.next_id.lock();
            if explicit_id > *next {
                *next = explicit_id;
            }
            explicit_id
        };

        let dir = kind.is_dir().then(|| {
            let parent = if parent_id == 0 { id } else { parent_id };
            DirectoryBlock::new(id, parent)
        });
        let mut attrs = attrs;
        attrs.kind = kind;
        if let Some(block) = &dir {
            attrs.size = block.len() as u64;
        }

        let node = Arc::new(Node {
            id,
            kind,
            path: path.to_string(),
            holds: AtomicU64::new(1),
            link: Arc::new(RwLock::new(Link::default())),
            content: Mutex::new(NodeContent { attrs, dir }),
        });

        let mut prev = self.head.write_arc();
        loop {
            let next = match &prev.next {
                Some(next) => Arc::clone(next),
                None => break,
            };
            prev = next.link.write_arc();
        }
        prev.next = Some(Arc::clone(&node));
        debug!(id, path, %kind, "node created");
        Ok(NodeRef::new(node))
    }

    fn find(&self, matches: impl Fn(&Node) -> bool) -> Option<NodeRef> {
        let mut prev = self.head.read_arc();
        loop {
            let node = Arc::clone(prev.next.as_ref()?);
            let guard = node.link.read_arc();
            if matches(&node) {
                node.holds.fetch_add(1, Ordering::SeqCst);
                drop(guard);
                return Some(NodeRef::new(node));
            }
            prev = guard;
        }
    }

    pub fn find_by_id(&self, id: u64) -> Option<NodeRef> {
        self.find(|n| n.id == id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<NodeRef> {
        self.find(|n| n.path == path)
    }

    /// Give up `node`'s hold and unlink it if nobody else holds it.
    pub fn remove(&self, node: NodeRef) -> Result<()> {
        let target = node.into_arc();
        let mut prev = self.head.write_arc();
        loop {
            let next = match &prev.next {
                Some(next) => Arc::clone(next),
                None => {
                    target.release();
                    return Err(DeferError::NotFound);
                }
            };
            let mut cur = next.link.write_arc();
            if Arc::ptr_eq(&next, &target) {
                if target.holds() > 1 {
                    target.release();
                    return Err(DeferError::Busy);
                }
                prev.next = cur.next.take();
                target.holds.store(0, Ordering::SeqCst);
                target.content.lock().dir = None;
                debug!(id = target.id, path = %target.path, "node removed");
                return Ok(());
            }
            prev = cur;
        }
    }

    /// Unlink every node from the head. Stops with `Busy` at the first node
    /// that is still held.
    pub fn remove_all(&self) -> Result<()> {
        loop {
            let mut head = self.head.write_arc();
            let first = match &head.next {
                Some(first) => Arc::clone(first),
                None => return Ok(()),
            };
            let mut link = first.link.write_arc();
            if first.holds() > 0 {
                return Err(DeferError::Busy);
            }
            head.next = link.next.take();
            first.content.lock().dir = None;
        }
    }

    /// Snapshot of every node in list order, without taking holds.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut out = Vec::new();
        let mut prev = self.head.read_arc();
        while let Some(next) = prev.next.as_ref().map(Arc::clone) {
            let guard = next.link.read_arc();
            out.push(next);
            prev = guard;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.read().next.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_attrs() -> NodeAttrs {
        NodeAttrs::new(NodeKind::File, 0o644)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let table = NodeTable::new();
        let a = table.create(NodeKind::File, 0, "/a", 0, file_attrs()).unwrap();
        let b = table.create(NodeKind::File, 0, "/b", 0, file_attrs()).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let table = NodeTable::new();
        let n = table.create(NodeKind::File, 42, "/x", 0, file_attrs()).unwrap();
        assert_eq!(n.id(), 42);
        assert_eq!(table.alloc_id(), 43);
    }

    #[test]
    fn test_directory_gets_dot_entries() {
        let table = NodeTable::new();
        let dir = table
            .create(NodeKind::Directory, 0, "/a", 7, NodeAttrs::new(NodeKind::Directory, 0o755))
            .unwrap();
        let content = dir.content();
        let block = content.dir.as_ref().unwrap();
        assert_eq!(block.find_id_by_name("."), Some(dir.id()));
        assert_eq!(block.find_id_by_name(".."), Some(7));
        assert_eq!(content.attrs.size, block.len() as u64);
    }

    #[test]
    fn test_find_takes_a_hold() {
        let table = NodeTable::new();
        let created = table.create(NodeKind::File, 0, "/f", 0, file_attrs()).unwrap();
        assert_eq!(created.holds(), 1);
        let found = table.find_by_path("/f").unwrap();
        assert_eq!(found.holds(), 2);
        drop(found);
        drop(created);
        assert_eq!(table.nodes()[0].holds(), 0);
        assert!(table.find_by_path("/missing").is_none());
    }

    #[test]
    fn test_remove_busy_then_success() {
        let table = NodeTable::new();
        let node = table.create(NodeKind::File, 0, "/f", 0, file_attrs()).unwrap();
        let id = node.id();
        let other = table.find_by_id(id).unwrap();

        assert_eq!(table.remove(node), Err(DeferError::Busy));
        assert_eq!(other.holds(), 1);
        assert!(table.find_by_id(id).is_some());

        assert_eq!(table.remove(other), Ok(()));
        assert!(table.find_by_id(id).is_none());
        assert!(table.find_by_path("/f").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_preserves_neighbours() {
        let table = NodeTable::new();
        for p in ["/a", "/b", "/c"] {
            table.create(NodeKind::File, 0, p, 0, file_attrs()).unwrap();
        }
        let b = table.find_by_path("/b").unwrap();
        table.remove(b).unwrap();
        let paths: Vec<String> = table.nodes().iter().map(|n| n.path().to_string()).collect();
        assert_eq!(paths, vec!["/a", "/c"]);
    }

    #[test]
    fn test_remove_all_stops_on_held_node() {
        let table = NodeTable::new();
        table.create(NodeKind::File, 0, "/a", 0, file_attrs()).unwrap();
        let held = table.create(NodeKind::File, 0, "/b", 0, file_attrs()).unwrap();

        assert_eq!(table.remove_all(), Err(DeferError::Busy));
        assert_eq!(table.len(), 1);

        drop(held);
        table.remove_all().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_with_dir_updates_size() {
        let table = NodeTable::new();
        let dir = table
            .create(NodeKind::Directory, 0, "/d", 0, NodeAttrs::new(NodeKind::Directory, 0o755))
            .unwrap();
        let len = dir.with_dir(|b| b.add_entry("f", 9)).unwrap();
        assert_eq!(dir.attrs().size, len as u64);

        let file = table.create(NodeKind::File, 0, "/f", 0, file_attrs()).unwrap();
        assert!(matches!(
            file.with_dir(|b| b.add_entry("x", 1)),
            Err(DeferError::NotADirectory)
        ));
    }
}
