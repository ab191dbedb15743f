//! External file attributes.
//!
//! The meaning of the 32-bit external attributes depends on the host system
//! in "version made by". An [`ExternalAttributesRegistry`] picks the decoder
//! per host; hosts without one keep the raw value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::structures::HostSystem;
use crate::error::Result;

bitflags::bitflags! {
    /// MS-DOS attribute byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsDosAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL = 0x08;
        const SUB_DIRECTORY = 0x10;
        const ARCHIVE = 0x20;

        const _ = !0;
    }
}

bitflags::bitflags! {
    /// Windows file attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NtfsAttributes: u32 {
        const READ_ONLY = 0x0001;
        const HIDDEN = 0x0002;
        const SYSTEM = 0x0004;
        const DIRECTORY = 0x0010;
        const ARCHIVE = 0x0020;
        const DEVICE = 0x0040;
        const NORMAL = 0x0080;
        const TEMPORARY = 0x0100;
        const SPARSE_FILE = 0x0200;
        const REPARSE_POINT = 0x0400;
        const COMPRESSED = 0x0800;
        const OFFLINE = 0x1000;
        const NOT_CONTENT_INDEXED = 0x2000;
        const ENCRYPTED = 0x4000;

        const _ = !0;
    }
}

/// File type from the `S_IFMT` bits of a Unix mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnixEntityType {
    Fifo,
    CharDevice,
    Directory,
    BlockDevice,
    File,
    Symlink,
    Socket,
    /// Type bits this crate does not know. Zero means the archiver did not
    /// record a type at all.
    Unknown(u8),
}

impl UnixEntityType {
    /// Decode the 4-bit type field, i.e. `(mode >> 12) & 0o17`.
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0o01 => UnixEntityType::Fifo,
            0o02 => UnixEntityType::CharDevice,
            0o04 => UnixEntityType::Directory,
            0o06 => UnixEntityType::BlockDevice,
            0o10 => UnixEntityType::File,
            0o12 => UnixEntityType::Symlink,
            0o14 => UnixEntityType::Socket,
            other => UnixEntityType::Unknown(other),
        }
    }
}

impl fmt::Display for UnixEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnixEntityType::Fifo => f.write_str("fifo"),
            UnixEntityType::CharDevice => f.write_str("character device"),
            UnixEntityType::Directory => f.write_str("directory"),
            UnixEntityType::BlockDevice => f.write_str("block device"),
            UnixEntityType::File => f.write_str("regular file"),
            UnixEntityType::Symlink => f.write_str("symlink"),
            UnixEntityType::Socket => f.write_str("socket"),
            UnixEntityType::Unknown(bits) => write!(f, "unknown type {bits:#o}"),
        }
    }
}

/// Decoded external attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalAttributes {
    MsDos(MsDosAttributes),
    Unix {
        entity_type: UnixEntityType,
        /// Permission bits, `0o7777` at most.
        mode: u32,
        /// Info-ZIP also fills the low byte with MS-DOS attributes.
        dos: MsDosAttributes,
    },
    Ntfs(NtfsAttributes),
    Unparsed {
        host: HostSystem,
        raw: u32,
    },
}

impl ExternalAttributes {
    pub fn unix_entity_type(&self) -> Option<UnixEntityType> {
        match self {
            ExternalAttributes::Unix { entity_type, .. } => Some(*entity_type),
            _ => None,
        }
    }

    pub fn unix_mode(&self) -> Option<u32> {
        match self {
            ExternalAttributes::Unix { mode, .. } => Some(*mode),
            _ => None,
        }
    }
}

/// Decoder for the external attributes written by one host system.
pub trait ExternalAttributesParser: Send + Sync {
    fn parse(&self, raw: u32) -> Result<ExternalAttributes>;
}

impl<F> ExternalAttributesParser for F
where
    F: Fn(u32) -> Result<ExternalAttributes> + Send + Sync,
{
    fn parse(&self, raw: u32) -> Result<ExternalAttributes> {
        self(raw)
    }
}

pub fn parse_ms_dos(raw: u32) -> Result<ExternalAttributes> {
    Ok(ExternalAttributes::MsDos(MsDosAttributes::from_bits_retain(raw as u8)))
}

/// Default permissions for Unix entries that record a type but no mode.
const DEFAULT_UNIX_MODE: u32 = 0o775;

pub fn parse_unix(raw: u32) -> Result<ExternalAttributes> {
    let st_mode = raw >> 16;
    let mode = match st_mode & 0o7777 {
        0 => DEFAULT_UNIX_MODE,
        mode => mode,
    };
    Ok(ExternalAttributes::Unix {
        entity_type: UnixEntityType::from_bits(((st_mode >> 12) & 0o17) as u8),
        mode,
        dos: MsDosAttributes::from_bits_retain(raw as u8),
    })
}

pub fn parse_ntfs(raw: u32) -> Result<ExternalAttributes> {
    Ok(ExternalAttributes::Ntfs(NtfsAttributes::from_bits_retain(raw)))
}

/// Lookup table from host system to [`ExternalAttributesParser`].
#[derive(Clone)]
pub struct ExternalAttributesRegistry {
    parsers: HashMap<HostSystem, Arc<dyn ExternalAttributesParser>>,
}

impl ExternalAttributesRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, host: HostSystem, parser: impl ExternalAttributesParser + 'static) -> &mut Self {
        self.parsers.insert(host, Arc::new(parser));
        self
    }

    pub fn parse(&self, host: HostSystem, raw: u32) -> Result<ExternalAttributes> {
        match self.parsers.get(&host) {
            Some(parser) => parser.parse(raw),
            None => Ok(ExternalAttributes::Unparsed { host, raw }),
        }
    }
}

impl Default for ExternalAttributesRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(HostSystem::MsDos, parse_ms_dos)
            .register(HostSystem::Unix, parse_unix)
            .register(HostSystem::Darwin, parse_unix)
            .register(HostSystem::WindowsNtfs, parse_ntfs);
        registry
    }
}

impl fmt::Debug for ExternalAttributesRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hosts: Vec<_> = self.parsers.keys().collect();
        hosts.sort();
        f.debug_struct("ExternalAttributesRegistry").field("hosts", &hosts).finish()
    }
}
