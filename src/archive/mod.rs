//! Format-independent archive model.
//!
//! An [`Archive`] is built once by a format parser and never changes after
//! that. It owns every entry in an arena, an index from normalized path to
//! entry, and the [`BackingStore`] that entry data is read from. Entries are
//! handed out as lightweight [`Entry`] handles borrowing the archive.
//!
//! ```no_run
//! use std::io::Read;
//! use runarc::TarArchive;
//!
//! # fn main() -> runarc::Result<()> {
//! let archive = TarArchive::open("backup.tar".as_ref())?;
//! if let Some(file) = archive.get("/etc/hosts")?.and_then(|e| e.as_file()) {
//!     let mut text = String::new();
//!     file.open()?.read_to_string(&mut text)?;
//!     println!("{text}");
//! }
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

mod filter;
mod path;
pub(crate) mod tree;

pub use filter::{And, EntryFilter, EntryFilterExt, Glob, KindFilter, NameGlob, Not, Or, PathGlob};
pub use path::EntryPath;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, Read};
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::io::{BackingStore, RangeReader};
use tree::ArchiveTree;

/// Format specific behavior attached to every entry.
///
/// The metadata decides how the stored bytes of a file or symlink turn into
/// content: Tar stores content verbatim, Zip runs it through the entry's
/// compression method.
pub trait EntryMetadata: fmt::Debug + Send + Sync {
    /// Sequential reader over the decoded content.
    fn open_stream(&self, raw: RangeReader) -> Result<Box<dyn Read + Send>>;

    /// Seekable reader over the decoded content, when the storage allows it.
    fn open_random_access(&self, raw: RangeReader) -> Result<RangeReader>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(pub(crate) usize);

/// A byte range inside the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub start: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
        })
    }
}

/// Where a symbolic link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Absolute(EntryPath),
    /// Relative to the directory containing the link.
    Relative(String),
}

impl LinkTarget {
    pub fn parse(target: &str) -> Self {
        if target.starts_with('/') {
            LinkTarget::Absolute(EntryPath::new(target))
        } else {
            LinkTarget::Relative(target.to_string())
        }
    }

    /// Absolute path of the target for a link living in `parent`.
    pub fn resolve(&self, parent: &EntryPath) -> EntryPath {
        match self {
            LinkTarget::Absolute(path) => path.clone(),
            LinkTarget::Relative(relative) => parent.join(relative),
        }
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Absolute(path) => path.fmt(f),
            LinkTarget::Relative(relative) => f.write_str(relative),
        }
    }
}

pub(crate) struct Node<M> {
    pub(crate) path: EntryPath,
    pub(crate) parent: Option<EntryId>,
    pub(crate) metadata: M,
    pub(crate) data: NodeData,
}

pub(crate) enum NodeData {
    Directory {
        children: BTreeMap<String, EntryId>,
        synthetic: bool,
    },
    File {
        range: DataRange,
        size: u64,
    },
    Symlink {
        target: LinkTarget,
        range: Option<DataRange>,
    },
}

/// An immutable, fully indexed archive.
///
/// Safe to share between threads; each read opens its own cursor into the
/// backing store.
pub struct Archive<M> {
    nodes: Vec<Node<M>>,
    index: HashMap<EntryPath, EntryId>,
    store: Arc<BackingStore>,
    comment: Option<String>,
}

impl<M: EntryMetadata> Archive<M> {
    pub(crate) fn from_tree(tree: ArchiveTree<M>, store: Arc<BackingStore>, comment: Option<String>) -> Self {
        debug!("indexed {} archive entries", tree.nodes.len());
        Self {
            nodes: tree.nodes,
            index: tree.index,
            store,
            comment,
        }
    }

    /// The root directory. Always present, even for an empty archive.
    pub fn root(&self) -> Result<DirectoryEntry<'_, M>> {
        self.store.check_open()?;
        Ok(DirectoryEntry(self.entry(EntryId(0))))
    }

    /// Look up an entry by path. The path is normalized first, so `a/b`,
    /// `/a/b/` and `./a/b` all name the same entry.
    pub fn get(&self, path: impl Into<EntryPath>) -> Result<Option<Entry<'_, M>>> {
        self.store.check_open()?;
        let path = path.into();
        Ok(self.index.get(&path).map(|id| self.entry(*id)))
    }

    /// Every entry, root included, in path order.
    pub fn entries(&self) -> Result<impl Iterator<Item = Entry<'_, M>> + '_> {
        self.store.check_open()?;
        Ok((0..self.nodes.len()).map(|id| self.entry(EntryId(id))))
    }

    /// Entries accepted by `filter`, in path order.
    pub fn filter<'a, F>(&'a self, filter: &'a F) -> Result<impl Iterator<Item = Entry<'a, M>> + 'a>
    where
        F: EntryFilter<M> + ?Sized,
    {
        Ok(self.entries()?.filter(move |entry| filter.matches(entry)))
    }

    /// Number of entries, root included.
    pub fn size(&self) -> Result<usize> {
        self.store.check_open()?;
        Ok(self.nodes.len())
    }

    /// Archive level comment, if the format has one.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Size of the backing archive file in bytes.
    pub fn archive_len(&self) -> u64 {
        self.store.size()
    }

    /// Release the backing file. Readers opened earlier fail from now on.
    /// Calling this more than once is harmless.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    fn entry(&self, id: EntryId) -> Entry<'_, M> {
        Entry { archive: self, id }
    }

    fn open_raw(&self, range: DataRange) -> Result<RangeReader> {
        self.store.open_range(range.start, range.len)
    }
}

impl<M> fmt::Debug for Archive<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("entries", &self.nodes.len())
            .field("len", &self.store.size())
            .field("closed", &self.store.is_closed())
            .finish()
    }
}

/// A handle to one entry of an [`Archive`].
pub struct Entry<'a, M> {
    archive: &'a Archive<M>,
    id: EntryId,
}

impl<M> Clone for Entry<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Entry<'_, M> {}

impl<'a, M: EntryMetadata> Entry<'a, M> {
    fn node(&self) -> &'a Node<M> {
        &self.archive.nodes[self.id.0]
    }

    pub fn kind(&self) -> EntryKind {
        match self.node().data {
            NodeData::Directory { .. } => EntryKind::Directory,
            NodeData::File { .. } => EntryKind::File,
            NodeData::Symlink { .. } => EntryKind::Symlink,
        }
    }

    /// Last path segment; empty for the root.
    pub fn name(&self) -> &'a str {
        self.node().path.name()
    }

    pub fn path(&self) -> &'a EntryPath {
        &self.node().path
    }

    /// The containing directory; `None` only for the root.
    pub fn parent(&self) -> Option<DirectoryEntry<'a, M>> {
        self.node().parent.map(|id| DirectoryEntry(self.archive.entry(id)))
    }

    pub fn metadata(&self) -> &'a M {
        &self.node().metadata
    }

    /// `true` for directories implied by a descendant path but never
    /// recorded in the archive itself.
    pub fn is_synthetic(&self) -> bool {
        matches!(self.node().data, NodeData::Directory { synthetic: true, .. })
    }

    pub fn as_file(&self) -> Option<FileEntry<'a, M>> {
        matches!(self.node().data, NodeData::File { .. }).then_some(FileEntry(*self))
    }

    pub fn as_directory(&self) -> Option<DirectoryEntry<'a, M>> {
        matches!(self.node().data, NodeData::Directory { .. }).then_some(DirectoryEntry(*self))
    }

    pub fn as_symlink(&self) -> Option<SymlinkEntry<'a, M>> {
        matches!(self.node().data, NodeData::Symlink { .. }).then_some(SymlinkEntry(*self))
    }

    pub fn archive(&self) -> &'a Archive<M> {
        self.archive
    }
}

impl<M: EntryMetadata> fmt::Debug for Entry<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", self.path())
            .field("kind", &self.kind())
            .field("metadata", self.metadata())
            .finish()
    }
}

macro_rules! entry_view {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<'a, M>(Entry<'a, M>);

        impl<M> Clone for $name<'_, M> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<M> Copy for $name<'_, M> {}

        impl<'a, M> Deref for $name<'a, M> {
            type Target = Entry<'a, M>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<'a, M> From<$name<'a, M>> for Entry<'a, M> {
            fn from(view: $name<'a, M>) -> Self {
                view.0
            }
        }

        impl<M: EntryMetadata> fmt::Debug for $name<'_, M> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entry_view!(
    /// A regular file entry.
    FileEntry
);
entry_view!(
    /// A directory entry and its children.
    DirectoryEntry
);
entry_view!(
    /// A symbolic link entry.
    SymlinkEntry
);

impl<'a, M: EntryMetadata> FileEntry<'a, M> {
    fn parts(&self) -> (DataRange, u64) {
        match self.node().data {
            NodeData::File { range, size } => (range, size),
            _ => unreachable!("FileEntry wraps a file node"),
        }
    }

    /// Where the stored (possibly compressed) bytes live.
    pub fn data_range(&self) -> DataRange {
        self.parts().0
    }

    /// Size of the content after decoding.
    pub fn size(&self) -> u64 {
        self.parts().1
    }

    /// Size of the content as stored in the archive.
    pub fn stored_size(&self) -> u64 {
        self.parts().0.len
    }

    /// Open a sequential reader over the content.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        let raw = self.archive.open_raw(self.data_range())?;
        self.metadata().open_stream(raw)
    }

    /// Open a seekable reader over the content.
    ///
    /// Fails with [`Error::Unsupported`](crate::Error::Unsupported) when the content is stored in a
    /// form that cannot be seeked, such as compressed Zip data.
    pub fn open_random_access(&self) -> Result<RangeReader> {
        let raw = self.archive.open_raw(self.data_range())?;
        self.metadata().open_random_access(raw)
    }

    /// Read the whole content into memory.
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.size()).unwrap_or(0).min(1 << 20));
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl<'a, M: EntryMetadata> DirectoryEntry<'a, M> {
    fn children_map(&self) -> &'a BTreeMap<String, EntryId> {
        match &self.node().data {
            NodeData::Directory { children, .. } => children,
            _ => unreachable!("DirectoryEntry wraps a directory node"),
        }
    }

    /// Child entries in name order.
    pub fn children(&self) -> impl Iterator<Item = Entry<'a, M>> + use<'a, M> {
        let archive = self.archive;
        self.children_map().values().map(move |id| archive.entry(*id))
    }

    pub fn child(&self, name: &str) -> Option<Entry<'a, M>> {
        self.children_map().get(name).map(|id| self.archive.entry(*id))
    }

    pub fn len(&self) -> usize {
        self.children_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children_map().is_empty()
    }
}

impl<'a, M: EntryMetadata> SymlinkEntry<'a, M> {
    fn parts(&self) -> (&'a LinkTarget, Option<DataRange>) {
        match &self.node().data {
            NodeData::Symlink { target, range } => (target, *range),
            _ => unreachable!("SymlinkEntry wraps a symlink node"),
        }
    }

    pub fn target(&self) -> &'a LinkTarget {
        self.parts().0
    }

    /// Absolute path the link points at.
    pub fn resolve(&self) -> EntryPath {
        let parent = self.path().parent().unwrap_or_default();
        self.target().resolve(&parent)
    }

    /// Open the stored link data, for formats that keep the target as entry
    /// content. Yields nothing for formats that keep it in the header.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        match self.parts().1 {
            Some(range) => {
                let raw = self.archive.open_raw(range)?;
                self.metadata().open_stream(raw)
            }
            None => {
                self.archive.store.check_open()?;
                Ok(Box::new(io::empty()))
            }
        }
    }
}
