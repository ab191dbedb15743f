//! Tar header block decoding.
//!
//! Every Tar record starts with a 512-byte header block:
//!
//! | Offset | Size | Field                         |
//! |--------|------|-------------------------------|
//! | 0      | 100  | name                          |
//! | 100    | 8    | mode (octal)                  |
//! | 108    | 8    | uid (octal)                   |
//! | 116    | 8    | gid (octal)                   |
//! | 124    | 12   | size (octal)                  |
//! | 136    | 12   | mtime (octal seconds)         |
//! | 148    | 8    | checksum (octal)              |
//! | 156    | 1    | type flag                     |
//! | 157    | 100  | link name                     |
//! | 257    | 6    | magic (`ustar\0` or `ustar `) |
//! | 263    | 2    | version                       |
//! | 265    | 32   | owner name                    |
//! | 297    | 32   | group name                    |
//! | 329    | 8    | device major (octal)          |
//! | 337    | 8    | device minor (octal)          |
//! | 345    | 155  | name prefix (POSIX ustar)     |
//!
//! GNU long-name/long-link blocks and PAX extended headers precede the
//! header they describe. They are decoded here into a [`HeaderExtension`]
//! that the parser folds into the next real header.

use std::collections::BTreeMap;

use encoding_rs::Encoding;

use crate::archive::EntryPath;
use crate::error::{Error, Result};

pub const BLOCK_SIZE: u64 = 512;

/// The type flag of a Tar header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFlag {
    Regular,
    HardLink,
    Symlink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
    Contiguous,
    GnuLongName,
    GnuLongLink,
    PaxExtended,
    PaxGlobal,
    Other(u8),
}

impl TypeFlag {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' | 0 => TypeFlag::Regular,
            b'1' => TypeFlag::HardLink,
            b'2' => TypeFlag::Symlink,
            b'3' => TypeFlag::CharDevice,
            b'4' => TypeFlag::BlockDevice,
            b'5' => TypeFlag::Directory,
            b'6' => TypeFlag::Fifo,
            b'7' => TypeFlag::Contiguous,
            b'L' => TypeFlag::GnuLongName,
            b'K' => TypeFlag::GnuLongLink,
            b'x' | b'X' => TypeFlag::PaxExtended,
            b'g' => TypeFlag::PaxGlobal,
            other => TypeFlag::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            TypeFlag::Regular => b'0',
            TypeFlag::HardLink => b'1',
            TypeFlag::Symlink => b'2',
            TypeFlag::CharDevice => b'3',
            TypeFlag::BlockDevice => b'4',
            TypeFlag::Directory => b'5',
            TypeFlag::Fifo => b'6',
            TypeFlag::Contiguous => b'7',
            TypeFlag::GnuLongName => b'L',
            TypeFlag::GnuLongLink => b'K',
            TypeFlag::PaxExtended => b'x',
            TypeFlag::PaxGlobal => b'g',
            TypeFlag::Other(byte) => *byte,
        }
    }
}

/// Header dialect, from the magic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TarFormat {
    /// Pre-POSIX header, no magic.
    V7,
    /// POSIX.1-1988 `ustar\0`.
    Ustar,
    /// GNU `ustar ` header. Same owner fields as ustar, no name prefix.
    Gnu,
}

/// Fields only present in ustar and GNU headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UstarFields {
    pub version: String,
    pub uname: String,
    pub gname: String,
    pub dev_major: u32,
    pub dev_minor: u32,
}

/// A decoded Tar entry header with any preceding extensions applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TarHeader {
    /// Entry name with the ustar prefix joined in and trailing `/` removed.
    pub name: String,
    /// Set by a trailing `/` on the name or a directory type flag.
    pub directory: bool,
    pub type_flag: TypeFlag,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    pub checksum: u32,
    pub link_name: String,
    pub format: TarFormat,
    pub ustar: Option<UstarFields>,
    pub pax: Option<BTreeMap<String, String>>,
    /// Offset of the header block in the archive.
    pub offset: u64,
}

impl TarHeader {
    pub fn path(&self) -> EntryPath {
        EntryPath::new(&self.name)
    }

    pub fn is_directory(&self) -> bool {
        self.directory || self.type_flag == TypeFlag::Directory
    }
}

/// What a single header block turned out to be.
#[derive(Debug)]
pub(crate) enum Block {
    /// An all-zero block: the logical end of the archive.
    End,
    /// A block whose `size` data bytes extend the next header.
    Extension { flag: TypeFlag, size: u64 },
    Header(TarHeader),
}

/// Decode one header block found at `offset`.
pub(crate) fn decode_block(block: &[u8], charset: &'static Encoding, offset: u64) -> Result<Block> {
    if block.len() != BLOCK_SIZE as usize {
        return Err(Error::format_at(
            format!("tar header block is {} bytes, expected {BLOCK_SIZE}", block.len()),
            offset,
        ));
    }
    if block.iter().all(|b| *b == 0) {
        return Ok(Block::End);
    }

    let field = |start: usize, len: usize, what: &str| -> Result<u64> {
        parse_numeric(&block[start..start + len]).ok_or_else(|| {
            Error::format_at(format!("invalid numeric {what} field in tar header"), offset + start as u64)
        })
    };
    let small = |start: usize, len: usize, what: &str| -> Result<u32> {
        u32::try_from(field(start, len, what)?).map_err(|_| {
            Error::format_at(format!("tar header {what} field out of range"), offset + start as u64)
        })
    };

    let type_flag = TypeFlag::from_byte(block[156]);
    let size = field(124, 12, "size")?;
    match type_flag {
        TypeFlag::GnuLongName | TypeFlag::GnuLongLink | TypeFlag::PaxExtended | TypeFlag::PaxGlobal => {
            return Ok(Block::Extension { flag: type_flag, size });
        }
        _ => {}
    }

    let format = if &block[257..262] == b"ustar" {
        if block[262] == b' ' { TarFormat::Gnu } else { TarFormat::Ustar }
    } else {
        TarFormat::V7
    };

    let mut name = decode_text(&block[0..100], charset);
    let ustar = match format {
        TarFormat::V7 => None,
        TarFormat::Ustar | TarFormat::Gnu => {
            if format == TarFormat::Ustar {
                let prefix = decode_text(&block[345..500], charset);
                if !prefix.is_empty() {
                    name = format!("{prefix}/{name}");
                }
            }
            Some(UstarFields {
                version: decode_text(&block[263..265], charset),
                uname: decode_text(&block[265..297], charset),
                gname: decode_text(&block[297..329], charset),
                dev_major: small(329, 8, "device major")?,
                dev_minor: small(337, 8, "device minor")?,
            })
        }
    };
    let (name, trailing_slash) = strip_trailing_slashes(name);

    let mtime = match parse_numeric(&block[136..148]) {
        Some(mtime) => i64::try_from(mtime).unwrap_or(i64::MAX),
        None => return Err(Error::format_at("invalid numeric mtime field in tar header", offset + 136)),
    };

    Ok(Block::Header(TarHeader {
        name,
        directory: trailing_slash || type_flag == TypeFlag::Directory,
        type_flag,
        mode: small(100, 8, "mode")?,
        uid: field(108, 8, "uid")?,
        gid: field(116, 8, "gid")?,
        size,
        mtime,
        checksum: small(148, 8, "checksum")?,
        link_name: decode_text(&block[157..257], charset),
        format,
        ustar,
        pax: None,
        offset,
    }))
}

/// Parse an octal field, or a GNU base-256 field when the high bit of the
/// first byte is set.
///
/// Octal fields may start with spaces and end at a space or NUL; an empty
/// field is zero. Returns `None` for invalid digits, overflow, or negative
/// base-256 values.
pub fn parse_numeric(field: &[u8]) -> Option<u64> {
    match field.first() {
        Some(&first) if first & 0x80 != 0 => {
            // 0xff marks a negative two's complement value
            if first == 0xff {
                return None;
            }
            let mut value = u64::from(first & 0x7f);
            for &byte in &field[1..] {
                value = value.checked_mul(256)?.checked_add(u64::from(byte))?;
            }
            Some(value)
        }
        _ => parse_octal(field),
    }
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits = field.iter().skip_while(|b| **b == b' ');
    let mut value = 0u64;
    for &byte in digits {
        match byte {
            b'0'..=b'7' => value = value.checked_mul(8)?.checked_add(u64::from(byte - b'0'))?,
            b' ' | 0 => break,
            _ => return None,
        }
    }
    Some(value)
}

/// Decode a NUL-terminated text field.
pub(crate) fn decode_text(field: &[u8], charset: &'static Encoding) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    let (text, _) = charset.decode_without_bom_handling(&field[..end]);
    text.trim().to_string()
}

fn strip_trailing_slashes(name: String) -> (String, bool) {
    if name.ends_with('/') {
        (name.trim_end_matches('/').to_string(), true)
    } else {
        (name, false)
    }
}

/// Pending metadata from extension blocks, waiting for its header.
#[derive(Debug)]
pub(crate) enum HeaderExtension {
    Gnu {
        /// Long name and whether it ended in `/`.
        name: Option<(String, bool)>,
        link: Option<String>,
    },
    Pax(BTreeMap<String, String>),
}

impl HeaderExtension {
    pub fn gnu_long_name(data: &[u8], charset: &'static Encoding) -> (String, bool) {
        strip_trailing_slashes(decode_text(data, charset))
    }

    pub fn gnu_long_link(data: &[u8], charset: &'static Encoding) -> String {
        decode_text(data, charset).trim_end_matches('/').to_string()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HeaderExtension::Gnu { .. } => "GNU",
            HeaderExtension::Pax(_) => "PAX",
        }
    }

    /// Fold the extension into the real header that follows it.
    pub fn apply(self, header: &mut TarHeader) {
        match self {
            HeaderExtension::Gnu { name, link } => {
                if let Some((name, trailing_slash)) = name {
                    header.name = name;
                    header.directory = trailing_slash || header.type_flag == TypeFlag::Directory;
                }
                if let Some(link) = link {
                    header.link_name = link;
                }
            }
            HeaderExtension::Pax(vars) => {
                if let Some(path) = vars.get("path").filter(|p| !p.is_empty()) {
                    let (name, trailing_slash) = strip_trailing_slashes(path.clone());
                    header.name = name;
                    header.directory = trailing_slash || header.type_flag == TypeFlag::Directory;
                }
                if let Some(link) = vars.get("linkpath").filter(|l| !l.is_empty()) {
                    header.link_name = link.clone();
                }
                if let Some(size) = vars.get("size").and_then(|v| v.parse().ok()) {
                    header.size = size;
                }
                if let Some(mtime) = vars.get("mtime").and_then(|v| parse_pax_seconds(v)) {
                    header.mtime = mtime;
                }
                if let Some(uid) = vars.get("uid").and_then(|v| v.parse().ok()) {
                    header.uid = uid;
                }
                if let Some(gid) = vars.get("gid").and_then(|v| v.parse().ok()) {
                    header.gid = gid;
                }
                if let Some(uname) = vars.get("uname") {
                    header.ustar.get_or_insert_with(UstarFields::default).uname = uname.clone();
                }
                if let Some(gname) = vars.get("gname") {
                    header.ustar.get_or_insert_with(UstarFields::default).gname = gname.clone();
                }
                header.pax = Some(vars);
            }
        }
    }
}

/// Whole seconds of a PAX time value such as `1700000000.25`.
fn parse_pax_seconds(value: &str) -> Option<i64> {
    let whole = value.split('.').next()?;
    whole.parse().ok()
}

/// Parse the `"<len> <key>=<value>\n"` records of a PAX extended header.
///
/// Records are UTF-8 whatever charset the archive names use.
pub(crate) fn parse_pax_records(data: &[u8], offset: u64) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let rest = &data[pos..];
        if rest.iter().all(|b| *b == 0) {
            break;
        }
        let at = offset + pos as u64;
        let space = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or_else(|| Error::format_at("PAX record has no length prefix", at))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| Error::format_at("PAX record length is not a number", at))?;
        if len <= space + 1 || len > rest.len() {
            return Err(Error::format_at(format!("PAX record length {len} is out of range"), at));
        }
        let mut record = &rest[space + 1..len];
        if let Some(stripped) = record.strip_suffix(b"\n") {
            record = stripped;
        }
        let eq = record
            .iter()
            .position(|b| *b == b'=')
            .ok_or_else(|| Error::format_at("PAX record is not a key=value pair", at))?;
        vars.insert(
            String::from_utf8_lossy(&record[..eq]).into_owned(),
            String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
        );
        pos += len;
    }
    Ok(vars)
}
