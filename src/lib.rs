//! # runarc
//!
//! A Rust Tar and Zip reader that indexes an archive once and then reads
//! entries lazily, concurrently and by byte range.
//!
//! Opening an archive parses its headers into an immutable entry tree.
//! Entry data stays in the archive file until an entry is opened; every
//! open gets its own cursor, so any number of threads can read entries at
//! the same time.
//!
//! ## Features
//!
//! - Tar: V7, ustar, GNU long names and links, PAX extended headers
//! - Zip: Stored, Deflate, BZip2 and LZMA entries, Unix attributes and
//!   symlinks, extra fields, comments
//! - Synthesized parent directories for archives that omit them
//! - Pluggable Zip compression methods, extra fields and attribute dialects
//! - Name and kind filters with glob patterns
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Read;
//! use runarc::ZipArchive;
//!
//! fn main() -> runarc::Result<()> {
//!     let archive = ZipArchive::open("archive.zip".as_ref())?;
//!
//!     for entry in archive.entries()? {
//!         println!("{} ({})", entry.path(), entry.kind());
//!     }
//!
//!     if let Some(file) = archive.get("docs/readme.txt")?.and_then(|e| e.as_file()) {
//!         let mut text = String::new();
//!         file.open()?.read_to_string(&mut text)?;
//!     }
//!
//!     archive.close()
//! }
//! ```

pub mod archive;
pub mod cli;
mod error;
pub mod io;
pub mod tar;
pub mod zip;

pub use archive::{
    Archive, DataRange, DirectoryEntry, Entry, EntryFilter, EntryFilterExt, EntryKind, EntryMetadata, EntryPath,
    FileEntry, LinkTarget, SymlinkEntry,
};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{BackingStore, LocalFileReader, RangeReader, ReadAt};
pub use tar::{TarArchive, TarMetadata, TarOptions};
pub use zip::{ZipArchive, ZipMetadata, ZipOptions};
