//! Zip archive reading.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed records (EOCD, signatures), flags and host systems
//! - [`parser`]: low-level parsing of the EOCD, the Central Directory and
//!   Local File Headers
//! - [`compression`], [`extra`], [`attributes`]: pluggable registries that
//!   interpret compression methods, extra fields and external attributes
//! - `builder`: the [`ZipArchive`] index built from the parsed records
//!
//! ## Zip Format Overview
//!
//! A Zip file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The archive is indexed from the Central Directory alone; entry data is
//! only read when an entry is opened.
//!
//! ## Supported Features
//!
//! - Stored, Deflate, BZip2 and LZMA entries
//! - Info-ZIP Unix attributes, symlinks and timestamp extra fields
//! - Archive and entry comments, non UTF-8 name charsets
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No Zip64 extensions

pub mod attributes;
mod builder;
pub mod compression;
pub mod extra;
pub mod parser;
pub mod structures;

pub use attributes::{ExternalAttributes, ExternalAttributesRegistry, UnixEntityType};
pub use builder::{ZipArchive, ZipMetadata, ZipOptions};
pub use compression::{CompressionMethod, CompressionRegistry};
pub use extra::{ExtraField, ExtraFieldRegistry};
pub use parser::ZipParser;
pub use structures::{GeneralPurposeFlags, HostSystem, VersionMadeBy};
