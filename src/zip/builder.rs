use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use encoding_rs::Encoding;
use tracing::{debug, warn};

use super::attributes::{ExternalAttributes, ExternalAttributesRegistry, MsDosAttributes, UnixEntityType};
use super::compression::{CompressionMethod, CompressionRegistry, Stored};
use super::extra::{ExtraField, ExtraFieldRegistry};
use super::parser::{CentralDirectoryEntry, LocalHeader, ZipParser, decode};
use super::structures::{GeneralPurposeFlags, HostSystem, InternalAttributes, VersionMadeBy, dos_datetime};
use crate::archive::tree::{Holder, PathTree, Resolved, check_depth};
use crate::archive::{Archive, DataRange, EntryMetadata, EntryPath, LinkTarget};
use crate::error::{Error, Result};
use crate::io::{BackingStore, LocalFileReader, RangeReader, ReadAt};

/// A Zip archive.
pub type ZipArchive = Archive<ZipMetadata>;

/// Longest symlink target read from entry data.
const MAX_LINK_TARGET: u64 = 64 * 1024;

/// Options for reading Zip archives.
///
/// The registries decide how compression methods, extra fields and
/// external attributes are interpreted; replace them to add or override
/// decoders.
#[derive(Debug, Clone)]
pub struct ZipOptions {
    /// Charset of entry names without the UTF-8 flag.
    pub file_name_charset: &'static Encoding,
    /// Charset of comments and symlink targets without the UTF-8 flag.
    pub text_charset: &'static Encoding,
    pub compression_methods: CompressionRegistry,
    pub extra_fields: ExtraFieldRegistry,
    pub external_attributes: ExternalAttributesRegistry,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            file_name_charset: encoding_rs::UTF_8,
            text_charset: encoding_rs::UTF_8,
            compression_methods: CompressionRegistry::default(),
            extra_fields: ExtraFieldRegistry::default(),
            external_attributes: ExternalAttributesRegistry::default(),
        }
    }
}

impl ZipOptions {
    pub fn with_file_name_charset(mut self, charset: &'static Encoding) -> Self {
        self.file_name_charset = charset;
        self
    }

    pub fn with_text_charset(mut self, charset: &'static Encoding) -> Self {
        self.text_charset = charset;
        self
    }

    /// Use one charset for names and text alike.
    pub fn with_charset(self, charset: &'static Encoding) -> Self {
        self.with_file_name_charset(charset).with_text_charset(charset)
    }

    pub fn with_compression_methods(mut self, registry: CompressionRegistry) -> Self {
        self.compression_methods = registry;
        self
    }

    pub fn with_extra_fields(mut self, registry: ExtraFieldRegistry) -> Self {
        self.extra_fields = registry;
        self
    }

    pub fn with_external_attributes(mut self, registry: ExternalAttributesRegistry) -> Self {
        self.external_attributes = registry;
        self
    }
}

/// Metadata of a Zip entry, merged from its central and local headers.
#[derive(Debug, Clone)]
pub struct ZipMetadata {
    pub version_made_by: VersionMadeBy,
    pub version_needed: u16,
    pub flags: GeneralPurposeFlags,
    pub compression: Arc<dyn CompressionMethod>,
    /// MS-DOS timestamp; `None` when the stored value is not a valid date.
    pub last_modified: Option<NaiveDateTime>,
    /// CRC-32 as stored; never verified.
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number_start: u16,
    pub internal_attributes: InternalAttributes,
    pub external_attributes: ExternalAttributes,
    pub central_extra_fields: Vec<ExtraField>,
    pub local_extra_fields: Vec<ExtraField>,
    pub comment: String,
}

impl ZipMetadata {
    fn new(central: CentralDirectoryEntry, local: LocalHeader, compression: Arc<dyn CompressionMethod>) -> Self {
        Self {
            version_made_by: central.version_made_by,
            version_needed: central.version_needed,
            flags: central.flags,
            compression,
            last_modified: dos_datetime(central.last_mod_date, central.last_mod_time),
            crc32: central.crc32,
            compressed_size: central.compressed_size,
            uncompressed_size: central.uncompressed_size,
            disk_number_start: central.disk_number_start,
            internal_attributes: central.internal_attributes,
            external_attributes: central.external_attributes,
            central_extra_fields: central.extra_fields,
            local_extra_fields: local.extra_fields,
            comment: central.comment,
        }
    }

    /// Metadata for a directory that only exists because of its children.
    fn synthetic_directory() -> Self {
        Self {
            version_made_by: VersionMadeBy {
                version: 10,
                host: HostSystem::MsDos,
            },
            version_needed: 10,
            flags: GeneralPurposeFlags::empty(),
            compression: Arc::new(Stored),
            last_modified: None,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number_start: 0,
            internal_attributes: InternalAttributes::empty(),
            external_attributes: ExternalAttributes::MsDos(MsDosAttributes::SUB_DIRECTORY),
            central_extra_fields: Vec::new(),
            local_extra_fields: Vec::new(),
            comment: String::new(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags
            .intersects(GeneralPurposeFlags::ENCRYPTED | GeneralPurposeFlags::STRONG_ENCRYPTION)
    }

    /// First extra field with `id`, local header before central directory.
    pub fn extra_field(&self, id: u16) -> Option<&ExtraField> {
        self.local_extra_fields
            .iter()
            .chain(&self.central_extra_fields)
            .find(|field| field.id() == id)
    }

    /// Best known modification time: an extra field timestamp if one exists,
    /// the MS-DOS timestamp read as UTC otherwise.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.local_extra_fields
            .iter()
            .chain(&self.central_extra_fields)
            .find_map(ExtraField::modified)
            .or_else(|| self.last_modified.map(|time| time.and_utc()))
    }

    pub fn unix_mode(&self) -> Option<u32> {
        self.external_attributes.unix_mode()
    }

    fn check_decodable(&self) -> Result<()> {
        if self.is_encrypted() {
            return Err(Error::unsupported("encrypted Zip entries"));
        }
        Ok(())
    }
}

impl EntryMetadata for ZipMetadata {
    fn open_stream(&self, raw: RangeReader) -> Result<Box<dyn Read + Send>> {
        self.check_decodable()?;
        if self.uncompressed_size == 0 {
            return Ok(Box::new(io::empty()));
        }
        let decoder = self.compression.decoder(raw, self.flags, self.uncompressed_size)?;
        Ok(Box::new(decoder.take(self.uncompressed_size)))
    }

    fn open_random_access(&self, raw: RangeReader) -> Result<RangeReader> {
        self.check_decodable()?;
        if !self.compression.supports_random_access() {
            return Err(Error::unsupported(format!(
                "random access to {} compressed entries",
                self.compression.name()
            )));
        }
        Ok(raw)
    }
}

struct ZipRecord {
    central: CentralDirectoryEntry,
    local: LocalHeader,
}

impl Archive<ZipMetadata> {
    /// Open and index a Zip file with default options.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &ZipOptions::default())
    }

    pub fn open_with(path: &Path, options: &ZipOptions) -> Result<Self> {
        let reader = LocalFileReader::new(path)?;
        debug!("indexing zip archive {}", path.display());
        Self::from_source(reader, options)
    }

    /// Index a Zip archive held by any positional source.
    pub fn from_source(source: impl ReadAt + 'static, options: &ZipOptions) -> Result<Self> {
        let store = BackingStore::new(source);
        let parser = ZipParser::new(&store, options);
        let (trailer, entries) = parser.list_files()?;

        let mut tree = PathTree::new();
        for central in entries {
            let path = EntryPath::new(&central.name);
            if path.is_root() {
                debug!("ignoring zip entry {:?} naming the archive root", central.name);
                continue;
            }
            check_depth(&path, central.offset)?;
            let local = parser.read_local_header(&central)?;
            if tree.insert(&path, ZipRecord { central, local }).is_some() {
                debug!("{path} appears more than once, keeping the last copy");
            }
        }

        let tree = tree.materialize(|holder| resolve(holder, &store, options))?;
        let comment = Some(trailer.comment).filter(|comment| !comment.is_empty());
        Ok(Archive::from_tree(tree, store, comment))
    }
}

fn resolve(
    holder: Holder<'_, ZipRecord>,
    store: &Arc<BackingStore>,
    options: &ZipOptions,
) -> Result<Resolved<ZipMetadata>> {
    let Some(ZipRecord { central, local }) = holder.header else {
        return Ok(Resolved::Directory(ZipMetadata::synthetic_directory()));
    };

    let path = holder.path;
    let header_offset = central.local_header_offset;
    let directory = central.directory;
    let entity_type = central.external_attributes.unix_entity_type();
    let target_charset = if central.flags.contains(GeneralPurposeFlags::UTF8) {
        encoding_rs::UTF_8
    } else {
        options.text_charset
    };
    let range = DataRange {
        start: local.data_offset,
        len: central.compressed_size,
    };
    let compression = options.compression_methods.lookup(central.compression_method);
    let metadata = ZipMetadata::new(central, local, compression);

    if directory || holder.has_children {
        if !directory && metadata.uncompressed_size > 0 {
            warn!(
                "{path} has child entries, its {} bytes of data are unreachable",
                metadata.uncompressed_size
            );
        }
        return Ok(Resolved::Directory(metadata));
    }

    if range.start.checked_add(range.len).is_none_or(|end| end > store.size()) {
        return Err(Error::format_at(
            format!("data of {path} ({} bytes) runs past the end of the archive", range.len),
            header_offset,
        ));
    }

    match entity_type {
        Some(UnixEntityType::Symlink) => match read_link_target(store, &metadata, range, target_charset) {
            Ok(target) => Ok(Resolved::Symlink {
                target: LinkTarget::parse(&target),
                range: Some(range),
                metadata,
            }),
            Err(Error::Unsupported(what)) => {
                warn!("{path}: cannot read symlink target ({what}), treating it as a regular file");
                Ok(file(range, metadata))
            }
            Err(err) => Err(err),
        },
        Some(UnixEntityType::Directory) => {
            if metadata.uncompressed_size > 0 {
                warn!(
                    "{path} is a directory, its {} bytes of data are unreachable",
                    metadata.uncompressed_size
                );
            }
            Ok(Resolved::Directory(metadata))
        }
        Some(UnixEntityType::File | UnixEntityType::Unknown(0)) | None => Ok(file(range, metadata)),
        Some(other) => {
            warn!("{path}: unsupported entry type ({other}), treating it as a regular file");
            Ok(file(range, metadata))
        }
    }
}

fn file(range: DataRange, metadata: ZipMetadata) -> Resolved<ZipMetadata> {
    Resolved::File {
        range,
        size: metadata.uncompressed_size,
        metadata,
    }
}

/// Zip keeps symlink targets as entry content, so they are decoded eagerly.
fn read_link_target(
    store: &Arc<BackingStore>,
    metadata: &ZipMetadata,
    range: DataRange,
    charset: &'static Encoding,
) -> Result<String> {
    let raw = store.open_range(range.start, range.len)?;
    let mut target = Vec::new();
    metadata
        .open_stream(raw)?
        .take(MAX_LINK_TARGET + 1)
        .read_to_end(&mut target)?;
    if target.len() as u64 > MAX_LINK_TARGET {
        return Err(Error::format_at(
            format!("symlink target longer than {MAX_LINK_TARGET} bytes"),
            range.start,
        ));
    }
    Ok(decode(&target, charset))
}
