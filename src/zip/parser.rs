//! Low-level Zip archive parser.
//!
//! This module decodes the binary Zip structures straight from a
//! [`BackingStore`].
//!
//! ## Parsing Strategy
//!
//! Zip files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) near the file's end
//! 2. Read the Central Directory to get metadata for all entries
//! 3. Read each entry's Local File Header to find where its data starts
//!
//! Entry data itself is never touched here.

use std::io::{self, BufReader, Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::Encoding;
use tracing::{debug, trace};

use super::ZipOptions;
use super::attributes::ExternalAttributes;
use super::extra::{ExtraField, FieldLocation};
use super::structures::*;
use crate::error::{Error, Result};
use crate::io::BackingStore;

/// Maximum Zip comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for the EOCD.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Anything shorter cannot be a Zip archive. The backward scan for the EOCD
/// starts this many bytes before the end of the file.
const MIN_ARCHIVE_SIZE: u64 = 18;

/// The EOCD record and what surrounds it.
#[derive(Debug, Clone)]
pub struct Trailer {
    pub eocd: EndOfCentralDirectory,
    /// Offset of the EOCD signature in the archive.
    pub offset: u64,
    pub comment: String,
}

/// One decoded Central Directory File Header.
#[derive(Debug, Clone)]
pub struct CentralDirectoryEntry {
    /// Entry name with any trailing `/` removed.
    pub name: String,
    /// The stored name ended with `/`.
    pub directory: bool,
    pub version_made_by: VersionMadeBy,
    pub version_needed: u16,
    pub flags: GeneralPurposeFlags,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number_start: u16,
    pub internal_attributes: InternalAttributes,
    pub external_attributes: ExternalAttributes,
    pub local_header_offset: u64,
    pub extra_fields: Vec<ExtraField>,
    pub comment: String,
    /// Offset of this record in the archive.
    pub offset: u64,
}

/// The parts of a Local File Header the index needs.
#[derive(Debug, Clone)]
pub struct LocalHeader {
    pub extra_fields: Vec<ExtraField>,
    /// Where the entry's stored bytes begin.
    pub data_offset: u64,
}

/// Low-level Zip parser over a shared backing store.
///
/// ```ignore
/// let parser = ZipParser::new(&store, &options);
/// let (trailer, entries) = parser.list_files()?;
/// for entry in &entries {
///     let local = parser.read_local_header(entry)?;
///     // Stored bytes live at local.data_offset..+entry.compressed_size
/// }
/// ```
pub struct ZipParser<'a> {
    store: &'a Arc<BackingStore>,
    options: &'a ZipOptions,
}

impl<'a> ZipParser<'a> {
    pub fn new(store: &'a Arc<BackingStore>, options: &'a ZipOptions) -> Self {
        Self { store, options }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Scans backwards through the last 64 KiB of the file, one byte at a
    /// time, for the EOCD signature. The first candidate (closest to the
    /// end) whose comment fits inside the file wins.
    ///
    /// # Errors
    ///
    /// A format error if the file is too short or no candidate qualifies,
    /// [`Error::Unsupported`] for multi-volume and Zip64 archives.
    pub fn find_eocd(&self) -> Result<Trailer> {
        let size = self.store.size();
        if size < MIN_ARCHIVE_SIZE {
            return Err(Error::format(format!("{size} bytes is too short for a Zip archive")));
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
        let search_start = size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.store.read_exact_at(search_start, &mut buf)?;

        let signature = EndOfCentralDirectory::SIGNATURE;
        let last = signature.len() - 1;
        let mut matched = 0;
        for i in (0..=buf.len() - MIN_ARCHIVE_SIZE as usize).rev() {
            // Compared back to front, so a full match leaves `i` on the first byte.
            if buf[i] == signature[last - matched] {
                matched += 1;
            } else {
                matched = usize::from(buf[i] == signature[last]);
            }
            if matched < signature.len() {
                continue;
            }
            matched = 0;
            if let Some(trailer) = self.eocd_candidate(&buf, i, search_start)? {
                return Ok(trailer);
            }
        }

        Err(Error::format("no End of Central Directory record found, not a Zip archive"))
    }

    fn eocd_candidate(&self, window: &[u8], pos: usize, window_start: u64) -> Result<Option<Trailer>> {
        let offset = window_start + pos as u64;
        let Some(record) = window.get(pos..pos + EndOfCentralDirectory::SIZE) else {
            trace!("EOCD signature at offset {offset} is too close to the end of the file");
            return Ok(None);
        };
        let eocd = EndOfCentralDirectory::from_bytes(record, offset)?;

        let comment_start = pos + EndOfCentralDirectory::SIZE;
        let Some(comment) = window.get(comment_start..comment_start + usize::from(eocd.comment_len)) else {
            debug!(
                "EOCD candidate at offset {offset} has a {} byte comment running past the end of the file",
                eocd.comment_len
            );
            return Ok(None);
        };

        if eocd.is_multi_volume() {
            return Err(Error::unsupported("multi-volume Zip archives"));
        }
        if eocd.is_zip64() {
            return Err(Error::unsupported("Zip64 archives"));
        }

        debug!(
            "End of Central Directory at offset {offset}: {} entries, central directory at {}",
            eocd.total_entries, eocd.cd_offset
        );
        Ok(Some(Trailer {
            comment: decode(comment, self.options.text_charset),
            eocd,
            offset,
        }))
    }

    /// Read the EOCD and every Central Directory record.
    ///
    /// Records are read until the signature stops matching or the directory
    /// runs into the EOCD; the entry count in the EOCD is not trusted.
    pub fn list_files(&self) -> Result<(Trailer, Vec<CentralDirectoryEntry>)> {
        let trailer = self.find_eocd()?;
        let cd_offset = u64::from(trailer.eocd.cd_offset);
        if cd_offset > trailer.offset {
            return Err(Error::format_at(
                format!("central directory offset {cd_offset} lies past the end of central directory record"),
                trailer.offset,
            ));
        }

        let mut reader = BufReader::new(self.store.open_range(cd_offset, trailer.offset - cd_offset)?);
        let mut entries = Vec::with_capacity(usize::from(trailer.eocd.total_entries));
        let mut offset = cd_offset;
        loop {
            let mut signature = [0u8; 4];
            match reader.read_exact(&mut signature) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            if signature != CDFH_SIGNATURE {
                break;
            }

            let (entry, record_len) = self.parse_cdfh(&mut reader, offset)?;
            if let Some(entry) = entry {
                entries.push(entry);
            }
            offset += record_len;
        }

        if entries.len() != usize::from(trailer.eocd.total_entries) {
            debug!(
                "central directory holds {} usable records, EOCD announces {}",
                entries.len(),
                trailer.eocd.total_entries
            );
        }
        Ok((trailer, entries))
    }

    /// Parse the rest of a Central Directory File Header whose signature has
    /// already been consumed. Returns the entry, `None` for records naming
    /// the root, and the full record length.
    fn parse_cdfh(&self, reader: &mut impl Read, offset: u64) -> Result<(Option<CentralDirectoryEntry>, u64)> {
        let truncated = |err: io::Error| -> Error {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                Error::format_at("truncated central directory record", offset)
            } else {
                err.into()
            }
        };

        let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
        reader.read_exact(&mut fixed).map_err(truncated)?;
        let mut cursor = Cursor::new(&fixed[..]);

        let version_made_by = VersionMadeBy::from_u16(cursor.read_u16::<LittleEndian>()?);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = GeneralPurposeFlags::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
        let uncompressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
        let file_name_length = usize::from(cursor.read_u16::<LittleEndian>()?);
        let extra_field_length = usize::from(cursor.read_u16::<LittleEndian>()?);
        let file_comment_length = usize::from(cursor.read_u16::<LittleEndian>()?);
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attributes = InternalAttributes::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let local_header_offset = u64::from(cursor.read_u32::<LittleEndian>()?);

        let mut name_bytes = vec![0u8; file_name_length];
        reader.read_exact(&mut name_bytes).map_err(truncated)?;
        let mut extra = vec![0u8; extra_field_length];
        reader.read_exact(&mut extra).map_err(truncated)?;
        let mut comment_bytes = vec![0u8; file_comment_length];
        reader.read_exact(&mut comment_bytes).map_err(truncated)?;

        let record_len = (CDFH_MIN_SIZE + file_name_length + extra_field_length + file_comment_length) as u64;
        let extra_fields = self.options.extra_fields.parse_block(
            &extra,
            FieldLocation::Central,
            offset + (CDFH_MIN_SIZE + file_name_length) as u64,
        );

        let utf8 = flags.contains(GeneralPurposeFlags::UTF8);
        let name_charset = if utf8 { encoding_rs::UTF_8 } else { self.options.file_name_charset };
        let text_charset = if utf8 { encoding_rs::UTF_8 } else { self.options.text_charset };
        let mut name = decode(&name_bytes, name_charset);
        let mut comment = decode(&comment_bytes, text_charset);
        if !utf8 {
            if let Some(text) = unicode_text(&extra_fields, &name_bytes, false) {
                name = text.to_string();
            }
            if let Some(text) = unicode_text(&extra_fields, &comment_bytes, true) {
                comment = text.to_string();
            }
        }

        if name == "/" {
            debug!("skipping central directory record at offset {offset} naming the archive root");
            return Ok((None, record_len));
        }
        let directory = name.ends_with('/');
        if directory {
            name.truncate(name.trim_end_matches('/').len());
        }

        let external_attributes = self
            .options
            .external_attributes
            .parse(version_made_by.host, external_attributes)?;

        trace!("central directory record {name:?} at offset {offset}");
        let entry = CentralDirectoryEntry {
            name,
            directory,
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            extra_fields,
            comment,
            offset,
        };
        Ok((Some(entry), record_len))
    }

    /// Read an entry's Local File Header.
    ///
    /// The local name and extra field lengths may differ from the central
    /// copy, so the data offset can only be known from here.
    pub fn read_local_header(&self, entry: &CentralDirectoryEntry) -> Result<LocalHeader> {
        let offset = entry.local_header_offset;
        let mut header = [0u8; LFH_SIZE];
        self.store.read_exact_at(offset, &mut header)?;
        if &header[0..4] != LFH_SIGNATURE {
            return Err(Error::format_at(
                format!("missing local file header for {}", entry.name),
                offset,
            ));
        }

        let mut cursor = Cursor::new(&header[LFH_NAME_LENGTH_OFFSET..]);
        let file_name_length = u64::from(cursor.read_u16::<LittleEndian>()?);
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;

        let extra_offset = offset + LFH_SIZE as u64 + file_name_length;
        let mut extra = vec![0u8; usize::from(extra_field_length)];
        self.store.read_exact_at(extra_offset, &mut extra)?;

        Ok(LocalHeader {
            extra_fields: self
                .options
                .extra_fields
                .parse_block(&extra, FieldLocation::Local, extra_offset),
            data_offset: extra_offset + u64::from(extra_field_length),
        })
    }
}

pub(crate) fn decode(bytes: &[u8], charset: &'static Encoding) -> String {
    charset.decode_without_bom_handling(bytes).0.into_owned()
}

/// The Info-ZIP Unicode replacement for `raw`, if present and still
/// matching the header text it was written for.
fn unicode_text<'f>(fields: &'f [ExtraField], raw: &[u8], comment: bool) -> Option<&'f str> {
    let mut crc = flate2::Crc::new();
    crc.update(raw);
    fields.iter().find_map(|field| match (field, comment) {
        (ExtraField::UnicodePath(text), false) | (ExtraField::UnicodeComment(text), true) => {
            (text.crc32 == crc.sum()).then_some(text.text.as_str())
        }
        _ => None,
    })
}
