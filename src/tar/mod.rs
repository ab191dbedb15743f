//! Tar archive reading.
//!
//! - [`header`]: decoding of 512-byte header blocks and extension records
//! - [`parser`]: the sequential [`TarParser`] with its per-entry callback
//! - `builder`: the [`TarArchive`] index built on top of the parser
//!
//! ## Supported Features
//!
//! - V7, POSIX ustar and GNU headers
//! - GNU long names and long links
//! - PAX extended headers (`path`, `linkpath`, `size`, `mtime`, owner ids
//!   and names); global PAX headers are skipped
//! - GNU base-256 numeric fields
//!
//! ## Limitations
//!
//! - No sparse files
//! - No multi-volume archives
//! - Hard links, devices and FIFOs are indexed as regular files

mod builder;
pub mod header;
pub mod parser;

pub use builder::{TarArchive, TarMetadata, TarOptions};
pub use header::{TarFormat, TarHeader, TypeFlag, UstarFields};
pub use parser::{EntryData, TarParser};
