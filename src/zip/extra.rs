//! Zip extra fields.
//!
//! Both the central directory and the local headers carry a block of
//! `(id: u16, size: u16, data)` records. Each id is looked up in an
//! [`ExtraFieldRegistry`]; registered ids are decoded into an [`ExtraField`],
//! anything else (or anything that fails to decode) is kept as
//! [`ExtraField::Unparsed`].

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
pub const INFO_ZIP_UNIX_ID: u16 = 0x5855;
pub const NEW_INFO_ZIP_UNIX_ID: u16 = 0x7855;
pub const NTFS_ID: u16 = 0x000a;
pub const UNICODE_PATH_ID: u16 = 0x7075;
pub const UNICODE_COMMENT_ID: u16 = 0x6375;

/// Which header an extra block came from. Several fields use a shorter
/// layout in the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLocation {
    Central,
    Local,
}

/// 0x5455: Unix times in seconds. The central directory copy only carries
/// the modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    pub flags: u8,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

/// 0x5855: the original Info-ZIP Unix field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoZipUnix {
    pub accessed: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub uid: Option<u16>,
    pub gid: Option<u16>,
}

/// 0x7855: owner ids. Empty in the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewInfoZipUnix {
    pub uid: Option<u16>,
    pub gid: Option<u16>,
}

/// 0x000a: NTFS file times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfsTimes {
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// 0x7075 and 0x6375: a UTF-8 replacement for the header's name or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodeText {
    pub version: u8,
    /// CRC-32 of the header text this one replaces.
    pub crc32: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    ExtendedTimestamp(ExtendedTimestamp),
    InfoZipUnix(InfoZipUnix),
    NewInfoZipUnix(NewInfoZipUnix),
    Ntfs(NtfsTimes),
    UnicodePath(UnicodeText),
    UnicodeComment(UnicodeText),
    Unparsed { id: u16, data: Vec<u8> },
}

impl ExtraField {
    pub fn id(&self) -> u16 {
        match self {
            ExtraField::ExtendedTimestamp(_) => EXTENDED_TIMESTAMP_ID,
            ExtraField::InfoZipUnix(_) => INFO_ZIP_UNIX_ID,
            ExtraField::NewInfoZipUnix(_) => NEW_INFO_ZIP_UNIX_ID,
            ExtraField::Ntfs(_) => NTFS_ID,
            ExtraField::UnicodePath(_) => UNICODE_PATH_ID,
            ExtraField::UnicodeComment(_) => UNICODE_COMMENT_ID,
            ExtraField::Unparsed { id, .. } => *id,
        }
    }

    /// Modification time carried by this field, if any.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        match self {
            ExtraField::ExtendedTimestamp(ts) => ts.modified,
            ExtraField::InfoZipUnix(unix) => Some(unix.modified),
            ExtraField::Ntfs(ntfs) => Some(ntfs.modified),
            _ => None,
        }
    }
}

/// Decoder for the data of one extra field id.
pub trait ExtraFieldParser: Send + Sync {
    fn parse(&self, data: &[u8], location: FieldLocation) -> Result<ExtraField>;
}

impl<F> ExtraFieldParser for F
where
    F: Fn(&[u8], FieldLocation) -> Result<ExtraField> + Send + Sync,
{
    fn parse(&self, data: &[u8], location: FieldLocation) -> Result<ExtraField> {
        self(data, location)
    }
}

/// Lookup table from extra field id to [`ExtraFieldParser`].
#[derive(Clone)]
pub struct ExtraFieldRegistry {
    parsers: HashMap<u16, Arc<dyn ExtraFieldParser>>,
}

impl ExtraFieldRegistry {
    /// A registry that leaves every field unparsed.
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: u16, parser: impl ExtraFieldParser + 'static) -> &mut Self {
        self.parsers.insert(id, Arc::new(parser));
        self
    }

    /// Decode a whole extra block. `offset` is where the block starts in the
    /// archive and only feeds log messages.
    pub fn parse_block(&self, block: &[u8], location: FieldLocation, offset: u64) -> Vec<ExtraField> {
        let mut fields = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= block.len() {
            let id = u16::from_le_bytes([block[pos], block[pos + 1]]);
            let size = usize::from(u16::from_le_bytes([block[pos + 2], block[pos + 3]]));
            let start = pos + 4;
            let Some(data) = block.get(start..start + size) else {
                warn!(
                    "extra field {id:#06x} at offset {} claims {size} bytes but only {} remain",
                    offset + pos as u64,
                    block.len() - start
                );
                break;
            };
            fields.push(self.parse_field(id, data, location, offset + pos as u64));
            pos = start + size;
        }
        if pos < block.len() && pos + 4 > block.len() {
            debug!(
                "ignoring {} trailing bytes after extra fields at offset {offset}",
                block.len() - pos
            );
        }
        fields
    }

    fn parse_field(&self, id: u16, data: &[u8], location: FieldLocation, offset: u64) -> ExtraField {
        let unparsed = || ExtraField::Unparsed {
            id,
            data: data.to_vec(),
        };
        let Some(parser) = self.parsers.get(&id) else {
            return unparsed();
        };
        match parser.parse(data, location) {
            Ok(field) => field,
            Err(err) => {
                warn!("cannot parse extra field {id:#06x} at offset {offset}: {err}");
                unparsed()
            }
        }
    }
}

impl Default for ExtraFieldRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(EXTENDED_TIMESTAMP_ID, parse_extended_timestamp)
            .register(INFO_ZIP_UNIX_ID, parse_info_zip_unix)
            .register(NEW_INFO_ZIP_UNIX_ID, parse_new_info_zip_unix)
            .register(NTFS_ID, parse_ntfs)
            .register(UNICODE_PATH_ID, |data: &[u8], _: FieldLocation| {
                parse_unicode_text(data).map(ExtraField::UnicodePath)
            })
            .register(UNICODE_COMMENT_ID, |data: &[u8], _: FieldLocation| {
                parse_unicode_text(data).map(ExtraField::UnicodeComment)
            });
        registry
    }
}

impl fmt::Debug for ExtraFieldRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.parsers.keys().map(|id| format!("{id:#06x}")).collect();
        ids.sort();
        f.debug_struct("ExtraFieldRegistry").field("ids", &ids).finish()
    }
}

fn unix_time(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| Error::format(format!("timestamp {seconds} out of range")))
}

fn parse_extended_timestamp(data: &[u8], location: FieldLocation) -> Result<ExtraField> {
    let mut cursor = Cursor::new(data);
    let flags = cursor.read_u8()?;
    let mut next = |present: bool| -> Result<Option<DateTime<Utc>>> {
        if !present || cursor.position() + 4 > data.len() as u64 {
            return Ok(None);
        }
        unix_time(i64::from(cursor.read_i32::<LittleEndian>()?)).map(Some)
    };

    let modified = next(flags & 0x01 != 0)?;
    let (accessed, created) = match location {
        FieldLocation::Local => (next(flags & 0x02 != 0)?, next(flags & 0x04 != 0)?),
        FieldLocation::Central => (None, None),
    };
    Ok(ExtraField::ExtendedTimestamp(ExtendedTimestamp {
        flags,
        modified,
        accessed,
        created,
    }))
}

fn parse_info_zip_unix(data: &[u8], _: FieldLocation) -> Result<ExtraField> {
    let mut cursor = Cursor::new(data);
    let accessed = unix_time(i64::from(cursor.read_i32::<LittleEndian>()?))?;
    let modified = unix_time(i64::from(cursor.read_i32::<LittleEndian>()?))?;
    let (uid, gid) = if data.len() >= 12 {
        (
            Some(cursor.read_u16::<LittleEndian>()?),
            Some(cursor.read_u16::<LittleEndian>()?),
        )
    } else {
        (None, None)
    };
    Ok(ExtraField::InfoZipUnix(InfoZipUnix {
        accessed,
        modified,
        uid,
        gid,
    }))
}

fn parse_new_info_zip_unix(data: &[u8], _: FieldLocation) -> Result<ExtraField> {
    if data.is_empty() {
        return Ok(ExtraField::NewInfoZipUnix(NewInfoZipUnix { uid: None, gid: None }));
    }
    let mut cursor = Cursor::new(data);
    Ok(ExtraField::NewInfoZipUnix(NewInfoZipUnix {
        uid: Some(cursor.read_u16::<LittleEndian>()?),
        gid: Some(cursor.read_u16::<LittleEndian>()?),
    }))
}

/// 100ns intervals between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

fn filetime(value: u64) -> Result<DateTime<Utc>> {
    let since_epoch = i128::from(value) - i128::from(FILETIME_UNIX_EPOCH);
    let seconds = since_epoch.div_euclid(10_000_000) as i64;
    let nanos = (since_epoch.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(seconds, nanos).ok_or_else(|| Error::format(format!("NTFS time {value} out of range")))
}

fn parse_ntfs(data: &[u8], _: FieldLocation) -> Result<ExtraField> {
    let mut cursor = Cursor::new(data);
    let _reserved = cursor.read_u32::<LittleEndian>()?;
    while cursor.position() + 4 <= data.len() as u64 {
        let tag = cursor.read_u16::<LittleEndian>()?;
        let size = cursor.read_u16::<LittleEndian>()?;
        if tag == 1 && size == 24 {
            return Ok(ExtraField::Ntfs(NtfsTimes {
                modified: filetime(cursor.read_u64::<LittleEndian>()?)?,
                accessed: filetime(cursor.read_u64::<LittleEndian>()?)?,
                created: filetime(cursor.read_u64::<LittleEndian>()?)?,
            }));
        }
        cursor.set_position(cursor.position() + u64::from(size));
    }
    Err(Error::format("NTFS extra field has no file times attribute"))
}

fn parse_unicode_text(data: &[u8]) -> Result<UnicodeText> {
    let mut cursor = Cursor::new(data);
    let version = cursor.read_u8()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let text = std::str::from_utf8(&data[5..])
        .map_err(|err| Error::format(format!("Unicode extra field is not UTF-8: {err}")))?;
    Ok(UnicodeText {
        version,
        crc32,
        text: text.to_string(),
    })
}
