use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::BackingStore;

/// A reader over one byte range of a [`BackingStore`].
///
/// Every `RangeReader` keeps its own position, so readers over the same or
/// overlapping ranges never disturb each other.
pub struct RangeReader {
    store: Arc<BackingStore>,
    start: u64,
    len: u64,
    pos: u64,
}

impl RangeReader {
    pub(super) fn new(store: Arc<BackingStore>, start: u64, len: u64) -> Self {
        Self {
            store,
            start,
            len,
            pos: 0,
        }
    }

    /// Absolute offset of the range in the backing store.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current position relative to the start of the range.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Absolute offset of the current position in the backing store.
    pub fn absolute_position(&self) -> u64 {
        self.start + self.pos
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            // Still report a closed store on an exhausted range.
            if self.store.is_closed() {
                return Err(crate::Error::Closed.into());
            }
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.store.read_at(self.start + self.pos, &mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}

impl fmt::Debug for RangeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeReader")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}
