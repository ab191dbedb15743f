//! Hand-built Tar and Zip fixtures shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

pub const BLOCK: usize = 512;

/// 2021-06-15 13:45:30 in MS-DOS format.
pub const DOS_DATE: u16 = ((2021 - 1980) << 9) | (6 << 5) | 15;
pub const DOS_TIME: u16 = (13 << 11) | (45 << 5) | 15;

pub const UNIX_HOST: u16 = 3 << 8 | 30;
pub const DOS_HOST: u16 = 20;

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Zip method 14 data: SDK version, property length and properties, then
/// the raw stream, which ends with an end marker.
pub fn lzma(data: &[u8]) -> Vec<u8> {
    let options = xz2::stream::LzmaOptions::new_preset(6).unwrap();
    let stream = xz2::stream::Stream::new_lzma_encoder(&options).unwrap();
    let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data).unwrap();
    let alone = encoder.finish().unwrap();

    let mut out = vec![9, 20, 5, 0];
    out.extend_from_slice(&alone[..5]);
    out.extend_from_slice(&alone[13..]);
    out
}

fn octal(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let text = format!("{value:0digits$o}");
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
}

/// One ustar header block with a valid checksum.
pub fn tar_header(name: &str, type_flag: u8, size: u64, link_name: &str) -> [u8; BLOCK] {
    let mut block = [0u8; BLOCK];
    block[..name.len()].copy_from_slice(name.as_bytes());
    octal(&mut block[100..108], 0o644);
    octal(&mut block[108..116], 1000);
    octal(&mut block[116..124], 100);
    octal(&mut block[124..136], size);
    octal(&mut block[136..148], 1_600_000_000);
    block[156] = type_flag;
    block[157..157 + link_name.len()].copy_from_slice(link_name.as_bytes());
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    block[265..270].copy_from_slice(b"alice");
    block[297..302].copy_from_slice(b"staff");

    block[148..156].fill(b' ');
    let checksum: u64 = block.iter().map(|b| u64::from(*b)).sum();
    octal(&mut block[148..155], checksum);
    block[155] = b' ';
    block
}

/// Writes Tar archives one block at a time.
#[derive(Default)]
pub struct TarBuilder {
    out: Vec<u8>,
}

impl TarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A header followed by `data` padded to the block size.
    pub fn record(mut self, name: &str, type_flag: u8, data: &[u8], link_name: &str) -> Self {
        self.out
            .extend_from_slice(&tar_header(name, type_flag, data.len() as u64, link_name));
        self.out.extend_from_slice(data);
        let padding = (BLOCK - data.len() % BLOCK) % BLOCK;
        self.out.extend(std::iter::repeat_n(0u8, padding));
        self
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.record(name, b'0', data, "")
    }

    pub fn directory(self, name: &str) -> Self {
        self.record(name, b'5', b"", "")
    }

    pub fn symlink(self, name: &str, target: &str) -> Self {
        self.record(name, b'2', b"", target)
    }

    /// Finish with the two zero blocks marking the end of the archive.
    pub fn finish(mut self) -> Vec<u8> {
        self.out.extend_from_slice(&[0u8; 2 * BLOCK]);
        self.out
    }
}

/// One Zip entry exactly as it will be written.
#[derive(Clone)]
pub struct ZipFixtureEntry {
    pub name: Vec<u8>,
    pub method: u16,
    pub stored: Vec<u8>,
    pub size: u32,
    pub crc32: u32,
    pub flags: u16,
    pub version_made_by: u16,
    pub external_attributes: u32,
    pub central_extra: Vec<u8>,
    pub local_extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl ZipFixtureEntry {
    /// A Unix regular file holding `content`, stored as `stored` with
    /// `method`.
    pub fn new(name: &str, method: u16, stored: Vec<u8>, content: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            method,
            stored,
            size: content.len() as u32,
            crc32: crc32(content),
            flags: 0,
            version_made_by: UNIX_HOST,
            external_attributes: 0o100644 << 16,
            central_extra: Vec::new(),
            local_extra: Vec::new(),
            comment: Vec::new(),
        }
    }
}

/// Writes Zip archives: local headers and data, central directory, EOCD.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<ZipFixtureEntry>,
    comment: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: ZipFixtureEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn stored(self, name: &str, content: &[u8]) -> Self {
        self.entry(ZipFixtureEntry::new(name, 0, content.to_vec(), content))
    }

    pub fn deflated(self, name: &str, content: &[u8]) -> Self {
        self.entry(ZipFixtureEntry::new(name, 8, deflate(content), content))
    }

    pub fn bzip2(self, name: &str, content: &[u8]) -> Self {
        self.entry(ZipFixtureEntry::new(name, 12, bzip2(content), content))
    }

    pub fn directory(self, name: &str) -> Self {
        let mut entry = ZipFixtureEntry::new(name, 0, Vec::new(), b"");
        entry.external_attributes = (0o040755 << 16) | 0x10;
        self.entry(entry)
    }

    pub fn symlink(self, name: &str, target: &str) -> Self {
        let mut entry = ZipFixtureEntry::new(name, 0, target.as_bytes().to_vec(), target.as_bytes());
        entry.external_attributes = 0o120777 << 16;
        self.entry(entry)
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::new();

        for entry in &self.entries {
            offsets.push(out.len() as u32);
            out.extend_from_slice(b"PK\x03\x04");
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(entry.flags).unwrap();
            out.write_u16::<LittleEndian>(entry.method).unwrap();
            out.write_u16::<LittleEndian>(DOS_TIME).unwrap();
            out.write_u16::<LittleEndian>(DOS_DATE).unwrap();
            out.write_u32::<LittleEndian>(entry.crc32).unwrap();
            out.write_u32::<LittleEndian>(entry.stored.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(entry.size).unwrap();
            out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(entry.local_extra.len() as u16).unwrap();
            out.extend_from_slice(&entry.name);
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&entry.stored);
        }

        let cd_offset = out.len() as u32;
        for (entry, offset) in self.entries.iter().zip(offsets) {
            out.extend_from_slice(b"PK\x01\x02");
            out.write_u16::<LittleEndian>(entry.version_made_by).unwrap();
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(entry.flags).unwrap();
            out.write_u16::<LittleEndian>(entry.method).unwrap();
            out.write_u16::<LittleEndian>(DOS_TIME).unwrap();
            out.write_u16::<LittleEndian>(DOS_DATE).unwrap();
            out.write_u32::<LittleEndian>(entry.crc32).unwrap();
            out.write_u32::<LittleEndian>(entry.stored.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(entry.size).unwrap();
            out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(entry.central_extra.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(entry.comment.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u32::<LittleEndian>(entry.external_attributes).unwrap();
            out.write_u32::<LittleEndian>(offset).unwrap();
            out.extend_from_slice(&entry.name);
            out.extend_from_slice(&entry.central_extra);
            out.extend_from_slice(&entry.comment);
        }
        let cd_size = out.len() as u32 - cd_offset;

        out.extend_from_slice(b"PK\x05\x06");
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(self.entries.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(self.entries.len() as u16).unwrap();
        out.write_u32::<LittleEndian>(cd_size).unwrap();
        out.write_u32::<LittleEndian>(cd_offset).unwrap();
        out.write_u16::<LittleEndian>(self.comment.len() as u16).unwrap();
        out.extend_from_slice(&self.comment);
        out
    }
}

/// Write `data` to a temporary file that lives as long as the handle.
pub fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}
