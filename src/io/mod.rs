//! Positional byte sources and the shared backing store.
//!
//! An archive is parsed from, and later read through, a single [`ReadAt`]
//! source. The [`BackingStore`] owns that source for the archive's lifetime
//! and hands out [`RangeReader`]s, each with its own position, so any number
//! of entry reads can run side by side without sharing a file cursor.

mod local;
mod range;

pub use local::LocalFileReader;
pub use range::RangeReader;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{Error, Result};

/// Trait for random access reading from a data source
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Release locks or handles held by the source.
    ///
    /// Called at most once, when the owning archive is closed.
    fn release(&self) -> io::Result<()> {
        Ok(())
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.get(start..) else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn release(&self) -> io::Result<()> {
        (**self).release()
    }
}

/// Shared owner of an archive's byte source.
///
/// Once [`close`](Self::close) has run, every read through the store, and
/// through any [`RangeReader`] it handed out, fails with [`Error::Closed`].
pub struct BackingStore {
    source: Box<dyn ReadAt>,
    size: u64,
    closed: AtomicBool,
}

impl BackingStore {
    pub fn new(source: impl ReadAt + 'static) -> Arc<Self> {
        let size = source.size();
        Arc::new(Self {
            source: Box::new(source),
            size,
            closed: AtomicBool::new(false),
        })
    }

    /// Total size of the underlying source in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open an independent reader over `len` bytes starting at `start`.
    pub fn open_range(self: &Arc<Self>, start: u64, len: u64) -> Result<RangeReader> {
        self.check_open()?;
        match start.checked_add(len) {
            Some(end) if end <= self.size => Ok(RangeReader::new(Arc::clone(self), start, len)),
            _ => Err(Error::format_at(
                format!(
                    "byte range of {len} bytes runs past the end of the {} byte archive",
                    self.size
                ),
                start,
            )),
        }
    }

    /// Read until `buf` is full or the source ends.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed.into());
        }
        self.source.read_at(offset, buf)
    }

    /// Fill `buf` completely from `offset`, failing on a short read.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(offset + filled as u64, &mut buf[filled..])? {
                0 => {
                    return Err(Error::format_at(
                        format!("unexpected end of archive, wanted {} more bytes", buf.len() - filled),
                        offset + filled as u64,
                    ));
                }
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Release the source. Only the first call does anything.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("releasing archive backing store");
        self.source.release()?;
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!("failed to release backing store: {err}");
        }
    }
}
