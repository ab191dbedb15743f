//! Sequential Tar stream parser.
//!
//! Tar has no index: the only way to find entry `n` is to walk every header
//! before it. [`TarParser`] does that walk, one 512-byte block at a time,
//! folding GNU long-name/long-link and PAX extension blocks into the real
//! header that follows them and handing each resulting [`TarHeader`] to a
//! callback together with the entry's data.
//!
//! ## Parsing Strategy
//!
//! 1. Read a header block. An all-zero block, or end of input on a block
//!    boundary, ends the archive; anything after it is ignored.
//! 2. Extension blocks are read with their data and kept pending.
//! 3. A real header takes the pending extension, then goes to the callback.
//! 4. The callback reports how many data bytes to move past; the parser
//!    rounds that up to the next block boundary and continues.

use std::io::{self, Read, Seek, SeekFrom};

use encoding_rs::Encoding;
use tracing::{debug, trace, warn};

use super::header::{BLOCK_SIZE, Block, HeaderExtension, TarHeader, TypeFlag, decode_block, parse_pax_records};
use crate::error::{Error, Result};

/// Largest GNU or PAX extension payload accepted, in bytes.
const MAX_EXTENSION_SIZE: u64 = 1 << 20;

/// Round `n` up to a whole number of blocks. `None` when that overflows.
fn padded(n: u64) -> Option<u64> {
    n.div_ceil(BLOCK_SIZE).checked_mul(BLOCK_SIZE)
}

/// Low-level Tar stream parser.
///
/// Generic over any seekable reader positioned at the start of the archive.
/// Used to build [`TarArchive`](crate::TarArchive) indexes, and usable on its
/// own to stream through an archive without indexing it.
///
/// ## Example
///
/// ```no_run
/// use std::fs::File;
/// use runarc::tar::TarParser;
///
/// # fn main() -> runarc::Result<()> {
/// let file = File::open("backup.tar")?;
/// TarParser::new(file, encoding_rs::UTF_8).parse(|header, _data| {
///     println!("{} ({} bytes)", header.name, header.size);
///     Ok(header.size)
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct TarParser<R> {
    reader: R,
    charset: &'static Encoding,
    /// Offset of the next unread byte, relative to where parsing began.
    pos: u64,
}

impl<R: Read + Seek> TarParser<R> {
    /// Create a parser decoding names with `charset`.
    pub fn new(reader: R, charset: &'static Encoding) -> Self {
        Self {
            reader,
            charset,
            pos: 0,
        }
    }

    /// Walk the archive, calling `handler` once per entry.
    ///
    /// # Arguments
    ///
    /// * `handler` - Receives the entry header and an [`EntryData`] reader
    ///   positioned at the entry's first data byte. It returns the minimum
    ///   number of data bytes to move past; returning `header.size` skips the
    ///   entry's data. Bytes the handler already read count towards it.
    ///
    /// # Errors
    ///
    /// Returns a format error for truncated or malformed headers, and any
    /// error the handler returns.
    pub fn parse<F>(mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&TarHeader, &mut EntryData<'_, R>) -> Result<u64>,
    {
        let mut pending: Option<HeaderExtension> = None;
        let mut block = [0u8; BLOCK_SIZE as usize];
        let mut entries = 0usize;

        loop {
            let offset = self.pos;
            if !self.read_block(&mut block)? {
                debug!("tar archive ended without an end-of-archive block after {entries} entries");
                break;
            }

            match decode_block(&block, self.charset, offset)? {
                Block::End => {
                    debug!("end of tar archive at offset {offset} after {entries} entries");
                    break;
                }
                Block::Extension { flag, size } => {
                    let data = self.read_extension(size, offset)?;
                    pending = self.merge_extension(pending, flag, &data, offset + BLOCK_SIZE)?;
                }
                Block::Header(mut header) => {
                    if let Some(extension) = pending.take() {
                        extension.apply(&mut header);
                    }
                    trace!(
                        "tar header at {offset}: {:?} {:?} {} bytes",
                        header.name, header.type_flag, header.size
                    );

                    let data_offset = self.pos;
                    let mut data = EntryData {
                        reader: &mut self.reader,
                        offset: data_offset,
                        size: header.size,
                        consumed: 0,
                    };
                    let wanted = handler(&header, &mut data)?;
                    let consumed = data.consumed;

                    let (advance, next) = padded(wanted.max(consumed))
                        .and_then(|advance| Some((advance, data_offset.checked_add(advance)?)))
                        .ok_or_else(|| {
                            Error::format_at(format!("tar entry size {} overflows", header.size), offset)
                        })?;
                    self.skip(advance - consumed)?;
                    self.pos = next;
                    entries += 1;
                }
            }
        }

        if let Some(extension) = pending {
            warn!("{} extension header at the end of the archive has no entry", extension.kind());
        }
        Ok(())
    }

    /// Read one block. Returns `false` on a clean end of input.
    fn read_block(&mut self, block: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < block.len() {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        if filled < block.len() {
            return Err(Error::format_at(
                format!("truncated tar header, got {filled} of {BLOCK_SIZE} bytes"),
                self.pos,
            ));
        }
        self.pos += BLOCK_SIZE;
        Ok(true)
    }

    fn read_extension(&mut self, size: u64, offset: u64) -> Result<Vec<u8>> {
        if size > MAX_EXTENSION_SIZE {
            return Err(Error::format_at(
                format!("tar extension header of {size} bytes exceeds {MAX_EXTENSION_SIZE} bytes"),
                offset,
            ));
        }
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::format_at("truncated tar extension header data", self.pos),
            _ => err.into(),
        })?;
        // Bounded by MAX_EXTENSION_SIZE above.
        let padded = size.next_multiple_of(BLOCK_SIZE);
        self.skip(padded - size)?;
        self.pos += padded;
        Ok(data)
    }

    fn merge_extension(
        &self,
        pending: Option<HeaderExtension>,
        flag: TypeFlag,
        data: &[u8],
        data_offset: u64,
    ) -> Result<Option<HeaderExtension>> {
        let header_offset = data_offset - BLOCK_SIZE;
        if flag == TypeFlag::PaxGlobal {
            debug!("skipping global PAX header at offset {header_offset}");
            return Ok(pending);
        }
        if flag == TypeFlag::PaxExtended {
            if let Some(previous) = pending {
                warn!(
                    "PAX header at offset {header_offset} replaces an unused {} extension",
                    previous.kind()
                );
            }
            return Ok(Some(HeaderExtension::Pax(parse_pax_records(data, data_offset)?)));
        }

        // GNU long name and long link blocks accumulate into one extension.
        let (mut name, mut link) = match pending {
            Some(HeaderExtension::Gnu { name, link }) => (name, link),
            Some(previous) => {
                warn!(
                    "GNU header at offset {header_offset} replaces an unused {} extension",
                    previous.kind()
                );
                (None, None)
            }
            None => (None, None),
        };
        if flag == TypeFlag::GnuLongName {
            name = Some(HeaderExtension::gnu_long_name(data, self.charset));
        } else {
            link = Some(HeaderExtension::gnu_long_link(data, self.charset));
        }
        Ok(Some(HeaderExtension::Gnu { name, link }))
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let delta = i64::try_from(n).map_err(|_| Error::format_at("tar entry too large to skip", self.pos))?;
        self.reader.seek(SeekFrom::Current(delta))?;
        Ok(())
    }
}

/// An entry's data as seen from a [`TarParser`] callback.
///
/// Reading is limited to the entry's size.
pub struct EntryData<'a, R> {
    reader: &'a mut R,
    offset: u64,
    size: u64,
    consumed: u64,
}

impl<R> EntryData<'_, R> {
    /// Offset of the first data byte, relative to the start of parsing.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes read through this handle so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl<R: Read> Read for EntryData<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size - self.consumed;
        if remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.reader.read(&mut buf[..want])?;
        self.consumed += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;
    use std::io::Cursor;

    fn header_block(name: &str, flag: u8, size: u64) -> Vec<u8> {
        let mut block = vec![0u8; 512];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[100..108].copy_from_slice(b"0000644\0");
        block[124..136].copy_from_slice(format!("{size:011o}\0").as_bytes());
        block[156] = flag;
        block
    }

    fn with_data(mut block: Vec<u8>, data: &[u8]) -> Vec<u8> {
        block.extend_from_slice(data);
        block.resize(block.len().next_multiple_of(BLOCK_SIZE as usize), 0);
        block
    }

    fn entry(name: &str, flag: u8, data: &[u8]) -> Vec<u8> {
        with_data(header_block(name, flag, data.len() as u64), data)
    }

    fn pax(records: &str) -> Vec<u8> {
        entry("PaxHeader", b'x', records.as_bytes())
    }

    fn collect(archive: Vec<u8>) -> Vec<(TarHeader, u64, Vec<u8>)> {
        let mut seen = Vec::new();
        TarParser::new(Cursor::new(archive), UTF_8)
            .parse(|header, data| {
                let mut content = Vec::new();
                data.read_to_end(&mut content)?;
                seen.push((header.clone(), data.offset(), content));
                Ok(0)
            })
            .unwrap();
        seen
    }

    #[test]
    fn walks_entries_and_data() {
        let mut archive = entry("a.txt", b'0', b"hello");
        archive.extend(entry("dir/", b'5', b""));
        archive.extend(entry("dir/b.bin", 0, &[7u8; 600]));
        archive.extend([0u8; 1024]);

        let seen = collect(archive);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0.name, "a.txt");
        assert_eq!(seen[0].1, 512);
        assert_eq!(seen[0].2, b"hello");
        assert!(seen[1].0.is_directory());
        assert_eq!(seen[1].0.name, "dir");
        assert_eq!(seen[2].1, 512 * 4);
        assert_eq!(seen[2].2, vec![7u8; 600]);
    }

    #[test]
    fn skipping_handler_lands_on_next_header() {
        let mut archive = entry("one", b'0', &[1u8; 1000]);
        archive.extend(entry("two", b'0', &[2u8; 10]));
        let mut names = Vec::new();
        TarParser::new(Cursor::new(archive), UTF_8)
            .parse(|header, _| {
                names.push(header.name.clone());
                Ok(header.size)
            })
            .unwrap();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn zero_block_stops_parsing() {
        let mut archive = entry("kept", b'0', b"x");
        archive.extend([0u8; 512]);
        archive.extend(entry("ignored", b'0', b"y"));
        let seen = collect(archive);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.name, "kept");
    }

    #[test]
    fn gnu_long_name_and_link_chain() {
        let long_name = format!("{}/file.txt", "d".repeat(150));
        let mut archive = entry("././@LongLink", b'L', format!("{long_name}\0").as_bytes());
        archive.extend(entry("././@LongLink", b'K', b"../../somewhere/else\0"));
        archive.extend(entry("truncated-name", b'2', b""));
        let seen = collect(archive);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.name, long_name);
        assert_eq!(seen[0].0.link_name, "../../somewhere/else");
    }

    #[test]
    fn gnu_long_name_directory() {
        let mut archive = entry("././@LongLink", b'L', b"some/dir/\0");
        archive.extend(entry("some/d", b'0', b""));
        let seen = collect(archive);
        assert_eq!(seen[0].0.name, "some/dir");
        assert!(seen[0].0.directory);
    }

    #[test]
    fn pax_path_overrides_gnu_and_inline_name() {
        // The PAX header replaces the pending GNU one.
        let mut archive = entry("././@LongLink", b'L', b"gnu/name\0");
        archive.extend(pax("21 path=pax/name.txt\n"));
        archive.extend(entry("inline", b'0', b"data"));
        let seen = collect(archive);
        assert_eq!(seen[0].0.name, "pax/name.txt");
        assert_eq!(seen[0].0.pax.as_ref().unwrap()["path"], "pax/name.txt");
        assert_eq!(seen[0].2, b"data");
    }

    #[test]
    fn pax_size_controls_data_length() {
        let mut archive = pax("12 size=700\n");
        archive.extend(with_data(header_block("big", b'0', 0), &[9u8; 700]));
        archive.extend(entry("after", b'0', b"z"));
        let seen = collect(archive);
        assert_eq!(seen[0].2.len(), 700);
        assert_eq!(seen[1].0.name, "after");
    }

    #[test]
    fn extension_consumed_by_one_header_only() {
        let mut archive = pax("16 path=renamed\n");
        archive.extend(entry("first", b'0', b""));
        archive.extend(entry("second", b'0', b""));
        let seen = collect(archive);
        assert_eq!(seen[0].0.name, "renamed");
        assert_eq!(seen[1].0.name, "second");
        assert!(seen[1].0.pax.is_none());
    }

    #[test]
    fn huge_base256_size_is_a_format_error() {
        let mut archive = header_block("huge", b'0', 0);
        archive[124..136].copy_from_slice(&[0x80, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        archive.extend([0u8; 1024]);
        let err = TarParser::new(Cursor::new(archive), UTF_8)
            .parse(|header, _| {
                assert_eq!(header.size, u64::MAX);
                Ok(header.size)
            })
            .unwrap_err();
        assert!(matches!(err, Error::Format { offset: Some(0), .. }), "{err}");
    }

    #[test]
    fn huge_pax_size_is_a_format_error() {
        let mut archive = pax("29 size=18446744073709551615\n");
        archive.extend(header_block("huge", b'0', 0));
        let err = TarParser::new(Cursor::new(archive), UTF_8)
            .parse(|header, _| Ok(header.size))
            .unwrap_err();
        assert!(matches!(err, Error::Format { offset: Some(1024), .. }), "{err}");
    }

    #[test]
    fn global_pax_header_is_skipped() {
        let mut archive = entry("pax_global_header", b'g', b"26 comment=ignored value\n");
        archive.extend(entry("file", b'0', b"x"));
        let seen = collect(archive);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.name, "file");
    }

    #[test]
    fn extension_sized_in_whole_blocks() {
        let mut records = String::from("512 path=");
        records.push_str(&"p".repeat(512 - 10));
        records.push('\n');
        assert_eq!(records.len(), 512);
        let mut archive = pax(&records);
        archive.extend(entry("x", b'0', b"ok"));
        let seen = collect(archive);
        assert_eq!(seen[0].0.name.len(), 502);
        assert_eq!(seen[0].2, b"ok");
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let mut archive = entry("a", b'0', b"");
        archive.extend([1u8; 100]);
        let err = TarParser::new(Cursor::new(archive), UTF_8)
            .parse(|header, _| Ok(header.size))
            .unwrap_err();
        assert!(matches!(err, Error::Format { offset: Some(512), .. }));
    }
}
