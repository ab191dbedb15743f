//! Parse-time path tree.
//!
//! Parsers drop `(path, header)` pairs into a [`PathTree`] as they decode
//! them. Once the archive has been read completely the tree is materialized
//! bottom-up into the immutable node arena an [`Archive`](super::Archive)
//! serves from. Holders are never visible outside the parsers.

use std::collections::{BTreeMap, HashMap, btree_map};

use super::{DataRange, EntryId, EntryPath, LinkTarget, Node, NodeData};
use crate::error::{Error, Result};

/// What a format decided a tree node should become.
pub(crate) enum Resolved<M> {
    Directory(M),
    File {
        range: DataRange,
        size: u64,
        metadata: M,
    },
    Symlink {
        target: LinkTarget,
        range: Option<DataRange>,
        metadata: M,
    },
}

/// How the materializer sees one tree node.
pub(crate) struct Holder<'a, H> {
    pub path: &'a EntryPath,
    /// `None` when no record named this path; it only exists as a parent.
    pub header: Option<H>,
    pub has_children: bool,
}

struct TreeNode<H> {
    header: Option<H>,
    children: BTreeMap<String, TreeNode<H>>,
}

impl<H> TreeNode<H> {
    fn empty() -> Self {
        Self {
            header: None,
            children: BTreeMap::new(),
        }
    }
}

pub(crate) struct PathTree<H> {
    root: TreeNode<H>,
    len: usize,
}

/// Deepest entry path accepted, in segments.
pub(crate) const MAX_DEPTH: usize = 1024;

/// Reject paths nested deeper than [`MAX_DEPTH`]. `offset` is where the
/// record naming `path` starts.
pub(crate) fn check_depth(path: &EntryPath, offset: u64) -> Result<()> {
    if path.depth() > MAX_DEPTH {
        return Err(Error::format_at(
            format!("entry path has {} segments, at most {MAX_DEPTH} are supported", path.depth()),
            offset,
        ));
    }
    Ok(())
}

/// The materialized node arena and its path index.
pub(crate) struct ArchiveTree<M> {
    pub nodes: Vec<Node<M>>,
    pub index: HashMap<EntryPath, EntryId>,
}

impl<H> PathTree<H> {
    pub fn new() -> Self {
        Self {
            root: TreeNode::empty(),
            len: 0,
        }
    }

    /// Record `header` at `path`, creating intermediate nodes on demand.
    ///
    /// Returns the header previously recorded at the same path. The root
    /// cannot carry a header; such records are handed straight back.
    pub fn insert(&mut self, path: &EntryPath, header: H) -> Option<H> {
        if path.is_root() {
            return Some(header);
        }
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(TreeNode::empty);
        }
        let previous = node.header.replace(header);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Number of paths that carry a header.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Build the arena. `resolve` runs once per node, children before their
    /// parent; a node with children must resolve to a directory.
    pub fn materialize<M, F>(self, mut resolve: F) -> Result<ArchiveTree<M>>
    where
        F: FnMut(Holder<'_, H>) -> Result<Resolved<M>>,
    {
        let mut slots = Vec::with_capacity(self.len() + 1);
        let mut stack = vec![Frame::enter(self.root, EntryPath::root(), None, &mut slots)];
        // Children are entered in name order before their parent resolves.
        while let Some(frame) = stack.last_mut() {
            match frame.pending.next() {
                Some((name, child)) => {
                    let parent = frame.id;
                    let child = Frame::enter(child, frame.path.child(&name), Some(parent), &mut slots);
                    frame.children.insert(name, child.id);
                    stack.push(child);
                }
                None => {
                    if let Some(frame) = stack.pop() {
                        frame.finish(&mut slots, &mut resolve)?;
                    }
                }
            }
        }

        let nodes = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::format("entry tree left an unresolved node"))?;
        let index = nodes
            .iter()
            .enumerate()
            .map(|(id, node)| (node.path.clone(), EntryId(id)))
            .collect();
        Ok(ArchiveTree { nodes, index })
    }
}

/// A node whose children are still being materialized.
struct Frame<H> {
    id: EntryId,
    path: EntryPath,
    parent: Option<EntryId>,
    header: Option<H>,
    has_children: bool,
    pending: btree_map::IntoIter<String, TreeNode<H>>,
    children: BTreeMap<String, EntryId>,
}

impl<H> Frame<H> {
    /// Ids are handed out on entry, in pre-order, so the arena ends up
    /// sorted by path.
    fn enter<M>(node: TreeNode<H>, path: EntryPath, parent: Option<EntryId>, slots: &mut Vec<Option<Node<M>>>) -> Self {
        let id = EntryId(slots.len());
        slots.push(None);
        Self {
            id,
            path,
            parent,
            header: node.header,
            has_children: !node.children.is_empty(),
            pending: node.children.into_iter(),
            children: BTreeMap::new(),
        }
    }

    fn finish<M, F>(self, slots: &mut [Option<Node<M>>], resolve: &mut F) -> Result<()>
    where
        F: FnMut(Holder<'_, H>) -> Result<Resolved<M>>,
    {
        let Frame {
            id,
            path,
            parent,
            header,
            has_children,
            children,
            ..
        } = self;
        let synthetic = header.is_none();
        let resolved = resolve(Holder {
            path: &path,
            header,
            has_children,
        })?;
        let (data, metadata) = match resolved {
            Resolved::Directory(metadata) => (
                NodeData::Directory {
                    children,
                    synthetic,
                },
                metadata,
            ),
            _ if has_children => {
                return Err(Error::format(format!(
                    "{path} has child entries but is not a directory"
                )));
            }
            Resolved::File {
                range,
                size,
                metadata,
            } => (NodeData::File { range, size }, metadata),
            Resolved::Symlink {
                target,
                range,
                metadata,
            } => (NodeData::Symlink { target, range }, metadata),
        };

        slots[id.0] = Some(Node {
            path,
            parent,
            metadata,
            data,
        });
        Ok(())
    }
}
