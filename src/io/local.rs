use super::ReadAt;
use std::fs::File;
use std::io;
use std::path::Path;

/// Local file reader with random access support.
///
/// Holds a shared advisory lock on the file until [`ReadAt::release`] runs,
/// so cooperating writers cannot replace the archive while it is indexed.
pub struct LocalFileReader {
    file: File,
    size: u64,
    #[cfg(not(any(unix, windows)))]
    seek_guard: std::sync::Mutex<()>,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        file.lock_shared()?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            #[cfg(not(any(unix, windows)))]
            seek_guard: std::sync::Mutex::new(()),
        })
    }
}

impl ReadAt for LocalFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            // seek_read moves the handle's cursor, but nothing else uses it
            self.file.seek_read(buf, offset)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self
                .seek_guard
                .lock()
                .map_err(|_| io::Error::other("file reader lock poisoned"))?;
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn release(&self) -> io::Result<()> {
        self.file.unlock()
    }
}
