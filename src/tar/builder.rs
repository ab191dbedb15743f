use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use tracing::{debug, warn};

use super::header::{TarFormat, TarHeader, TypeFlag, UstarFields};
use super::parser::TarParser;
use crate::archive::tree::{Holder, PathTree, Resolved, check_depth};
use crate::archive::{Archive, DataRange, EntryMetadata, LinkTarget};
use crate::error::{Error, Result};
use crate::io::{BackingStore, LocalFileReader, RangeReader, ReadAt};

/// A Tar archive.
pub type TarArchive = Archive<TarMetadata>;

const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

/// Options for reading Tar archives.
#[derive(Debug, Clone, Copy)]
pub struct TarOptions {
    /// Charset of entry names, link names and owner names.
    pub charset: &'static Encoding,
}

impl Default for TarOptions {
    fn default() -> Self {
        Self {
            charset: encoding_rs::UTF_8,
        }
    }
}

impl TarOptions {
    pub fn with_charset(mut self, charset: &'static Encoding) -> Self {
        self.charset = charset;
        self
    }
}

/// Metadata of a Tar entry, copied from its header.
#[derive(Debug, Clone, PartialEq)]
pub struct TarMetadata {
    pub type_flag: TypeFlag,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub mtime: DateTime<Utc>,
    /// Header checksum as stored; never verified.
    pub checksum: u32,
    pub format: TarFormat,
    pub ustar: Option<UstarFields>,
    pub pax: Option<BTreeMap<String, String>>,
}

impl TarMetadata {
    fn from_header(header: TarHeader) -> Self {
        Self {
            type_flag: header.type_flag,
            mode: header.mode,
            uid: header.uid,
            gid: header.gid,
            mtime: DateTime::from_timestamp(header.mtime, 0).unwrap_or_default(),
            checksum: header.checksum,
            format: header.format,
            ustar: header.ustar,
            pax: header.pax,
        }
    }

    /// Metadata for a directory that only exists because of its children.
    fn synthetic_directory(mtime: DateTime<Utc>) -> Self {
        Self {
            type_flag: TypeFlag::Directory,
            mode: DEFAULT_DIRECTORY_MODE,
            uid: 0,
            gid: 0,
            mtime,
            checksum: 0,
            format: TarFormat::V7,
            ustar: None,
            pax: None,
        }
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.ustar.as_ref().map(|u| u.uname.as_str()).filter(|n| !n.is_empty())
    }

    pub fn group_name(&self) -> Option<&str> {
        self.ustar.as_ref().map(|u| u.gname.as_str()).filter(|n| !n.is_empty())
    }

    /// A PAX variable from the entry's extended header.
    pub fn pax_var(&self, key: &str) -> Option<&str> {
        self.pax.as_ref()?.get(key).map(String::as_str)
    }
}

impl EntryMetadata for TarMetadata {
    fn open_stream(&self, raw: RangeReader) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(raw))
    }

    fn open_random_access(&self, raw: RangeReader) -> Result<RangeReader> {
        Ok(raw)
    }
}

/// A header together with where its data starts.
struct TarRecord {
    header: TarHeader,
    data_offset: u64,
}

impl Archive<TarMetadata> {
    /// Open and index a Tar file with default options.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &TarOptions::default())
    }

    pub fn open_with(path: &Path, options: &TarOptions) -> Result<Self> {
        let reader = LocalFileReader::new(path)?;
        debug!("indexing tar archive {}", path.display());
        Self::from_source(reader, options)
    }

    /// Index a Tar archive held by any positional source.
    pub fn from_source(source: impl ReadAt + 'static, options: &TarOptions) -> Result<Self> {
        let store = BackingStore::new(source);
        let archive_len = store.size();
        let now = Utc::now();

        let mut tree = PathTree::new();
        TarParser::new(store.open_range(0, archive_len)?, options.charset).parse(|header, data| {
            let path = header.path();
            if path.is_root() {
                debug!("ignoring tar entry {:?} naming the archive root", header.name);
                return Ok(header.size);
            }
            check_depth(&path, header.offset)?;
            let record = TarRecord {
                header: header.clone(),
                data_offset: data.offset(),
            };
            if tree.insert(&path, record).is_some() {
                debug!("{path} appears more than once, keeping the last copy");
            }
            Ok(header.size)
        })?;

        let tree = tree.materialize(|holder| resolve(holder, archive_len, now))?;
        Ok(Archive::from_tree(tree, store, None))
    }
}

fn resolve(holder: Holder<'_, TarRecord>, archive_len: u64, now: DateTime<Utc>) -> Result<Resolved<TarMetadata>> {
    let Some(TarRecord { header, data_offset }) = holder.header else {
        return Ok(Resolved::Directory(TarMetadata::synthetic_directory(now)));
    };

    if header.is_directory() {
        return Ok(Resolved::Directory(TarMetadata::from_header(header)));
    }
    if holder.has_children {
        return Err(Error::format_at(
            format!(
                "{} has child entries but its header says {:?}",
                holder.path, header.type_flag
            ),
            header.offset,
        ));
    }

    match header.type_flag {
        TypeFlag::Symlink => Ok(Resolved::Symlink {
            target: LinkTarget::parse(&header.link_name),
            range: None,
            metadata: TarMetadata::from_header(header),
        }),
        flag => {
            if !matches!(flag, TypeFlag::Regular | TypeFlag::Contiguous) {
                warn!(
                    "{}: unsupported tar entry type {:?}, treating it as a regular file",
                    holder.path, flag
                );
            }
            if data_offset.checked_add(header.size).is_none_or(|end| end > archive_len) {
                return Err(Error::format_at(
                    format!(
                        "data of {} ({} bytes) runs past the end of the archive",
                        holder.path, header.size
                    ),
                    header.offset,
                ));
            }
            let range = DataRange {
                start: data_offset,
                len: header.size,
            };
            Ok(Resolved::File {
                range,
                size: header.size,
                metadata: TarMetadata::from_header(header),
            })
        }
    }
}
