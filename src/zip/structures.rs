use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use std::io::Cursor;

use crate::error::{Error, Result};

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Decode the fixed part of an EOCD record found at `offset`.
    pub fn from_bytes(data: &[u8], offset: u64) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format_at("invalid End of Central Directory record", offset));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn is_multi_volume(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Offset of the file name length field in a local file header.
pub const LFH_NAME_LENGTH_OFFSET: usize = 26;

/// The operating system a Zip entry was created on, from the high byte of
/// "version made by". It decides how external attributes are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HostSystem {
    MsDos,
    Amiga,
    OpenVms,
    Unix,
    VmCms,
    AtariSt,
    Os2Hpfs,
    Macintosh,
    ZSystem,
    CpM,
    WindowsNtfs,
    Mvs,
    Vse,
    AcornRisc,
    Vfat,
    AlternateMvs,
    BeOs,
    Tandem,
    Os400,
    Darwin,
    Other(u8),
}

impl HostSystem {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HostSystem::MsDos,
            1 => HostSystem::Amiga,
            2 => HostSystem::OpenVms,
            3 => HostSystem::Unix,
            4 => HostSystem::VmCms,
            5 => HostSystem::AtariSt,
            6 => HostSystem::Os2Hpfs,
            7 => HostSystem::Macintosh,
            8 => HostSystem::ZSystem,
            9 => HostSystem::CpM,
            10 => HostSystem::WindowsNtfs,
            11 => HostSystem::Mvs,
            12 => HostSystem::Vse,
            13 => HostSystem::AcornRisc,
            14 => HostSystem::Vfat,
            15 => HostSystem::AlternateMvs,
            16 => HostSystem::BeOs,
            17 => HostSystem::Tandem,
            18 => HostSystem::Os400,
            19 => HostSystem::Darwin,
            other => HostSystem::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HostSystem::MsDos => 0,
            HostSystem::Amiga => 1,
            HostSystem::OpenVms => 2,
            HostSystem::Unix => 3,
            HostSystem::VmCms => 4,
            HostSystem::AtariSt => 5,
            HostSystem::Os2Hpfs => 6,
            HostSystem::Macintosh => 7,
            HostSystem::ZSystem => 8,
            HostSystem::CpM => 9,
            HostSystem::WindowsNtfs => 10,
            HostSystem::Mvs => 11,
            HostSystem::Vse => 12,
            HostSystem::AcornRisc => 13,
            HostSystem::Vfat => 14,
            HostSystem::AlternateMvs => 15,
            HostSystem::BeOs => 16,
            HostSystem::Tandem => 17,
            HostSystem::Os400 => 18,
            HostSystem::Darwin => 19,
            HostSystem::Other(v) => *v,
        }
    }
}

/// The "version made by" field: Zip spec version and host system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionMadeBy {
    /// Spec version times ten, e.g. 20 for 2.0.
    pub version: u8,
    pub host: HostSystem,
}

impl VersionMadeBy {
    pub fn from_u16(value: u16) -> Self {
        Self {
            version: (value & 0xFF) as u8,
            host: HostSystem::from_u8((value >> 8) as u8),
        }
    }

    pub fn as_u16(&self) -> u16 {
        (u16::from(self.host.as_u8()) << 8) | u16::from(self.version)
    }
}

impl fmt::Display for VersionMadeBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({:?})", self.version / 10, self.version % 10, self.host)
    }
}

bitflags::bitflags! {
    /// General purpose bit flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeneralPurposeFlags: u16 {
        const ENCRYPTED = 1 << 0;
        /// Compression method specific option bits.
        const COMPRESSION_OPTION_1 = 1 << 1;
        const COMPRESSION_OPTION_2 = 1 << 2;
        /// Sizes and CRC follow the data in a data descriptor.
        const DATA_DESCRIPTOR = 1 << 3;
        const ENHANCED_DEFLATE = 1 << 4;
        const PATCHED_DATA = 1 << 5;
        const STRONG_ENCRYPTION = 1 << 6;
        /// Name and comment are UTF-8.
        const UTF8 = 1 << 11;
        const MASKED_HEADERS = 1 << 13;

        const _ = !0;
    }
}

bitflags::bitflags! {
    /// Internal file attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InternalAttributes: u16 {
        /// The entry is probably text.
        const TEXT = 1 << 0;

        const _ = !0;
    }
}

/// Decode an MS-DOS date and time pair.
///
/// Returns `None` for values that are not a valid calendar date, which
/// includes the all-zero timestamp some tools write.
pub fn dos_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let day = u32::from(date & 0x1F);
    let month = u32::from((date >> 5) & 0x0F);
    let year = i32::from((date >> 9) & 0x7F) + 1980;

    let second = u32::from(time & 0x1F) * 2;
    let minute = u32::from((time >> 5) & 0x3F);
    let hour = u32::from((time >> 11) & 0x1F);

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second.min(59))
}
