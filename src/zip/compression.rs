//! Zip compression methods.
//!
//! A [`CompressionRegistry`] maps the method code stored in each entry to a
//! [`CompressionMethod`] that knows how to decode the entry's stored bytes.
//! The registry is a plain value handed to the parser through
//! [`ZipOptions`](super::ZipOptions), so callers can add methods or replace
//! the built-in ones.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};

use super::structures::GeneralPurposeFlags;
use crate::error::{Error, Result};
use crate::io::RangeReader;

/// Decoding behavior of one Zip compression method.
pub trait CompressionMethod: fmt::Debug + Send + Sync {
    /// The method code stored in Zip headers.
    fn code(&self) -> u16;

    fn name(&self) -> &str;

    /// Whether the stored bytes can be read at arbitrary offsets, which only
    /// holds when they are not transformed at all.
    fn supports_random_access(&self) -> bool {
        false
    }

    /// Wrap the stored bytes of an entry in a decoding reader.
    fn decoder(
        &self,
        raw: RangeReader,
        flags: GeneralPurposeFlags,
        uncompressed_size: u64,
    ) -> Result<Box<dyn Read + Send>>;
}

/// Method 0: data stored as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stored;

impl CompressionMethod for Stored {
    fn code(&self) -> u16 {
        0
    }

    fn name(&self) -> &str {
        "Stored"
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn decoder(&self, raw: RangeReader, _: GeneralPurposeFlags, _: u64) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(raw))
    }
}

/// Method 8: raw Deflate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deflated;

impl CompressionMethod for Deflated {
    fn code(&self) -> u16 {
        8
    }

    fn name(&self) -> &str {
        "Deflated"
    }

    fn decoder(&self, raw: RangeReader, _: GeneralPurposeFlags, _: u64) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(flate2::read::DeflateDecoder::new(raw)))
    }
}

/// Method 12: a complete bzip2 stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct BZip2;

impl CompressionMethod for BZip2 {
    fn code(&self) -> u16 {
        12
    }

    fn name(&self) -> &str {
        "BZip2"
    }

    fn decoder(&self, raw: RangeReader, _: GeneralPurposeFlags, _: u64) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(bzip2::read::BzDecoder::new(raw)))
    }
}

/// Method 14: LZMA with the Zip specific property header.
///
/// Zip stores a 2-byte LZMA SDK version, a 2-byte property length (always 5)
/// and the 5 property bytes ahead of the raw stream. The decoder rebuilds the
/// classic `.lzma` header from them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lzma;

impl Lzma {
    const PROPERTIES_SIZE: u16 = 5;
}

impl CompressionMethod for Lzma {
    fn code(&self) -> u16 {
        14
    }

    fn name(&self) -> &str {
        "LZMA"
    }

    fn decoder(
        &self,
        mut raw: RangeReader,
        flags: GeneralPurposeFlags,
        uncompressed_size: u64,
    ) -> Result<Box<dyn Read + Send>> {
        let header_offset = raw.absolute_position();
        let _sdk_version = raw.read_u16::<LittleEndian>()?;
        let properties_size = raw.read_u16::<LittleEndian>()?;
        if properties_size != Self::PROPERTIES_SIZE {
            return Err(Error::format_at(
                format!("LZMA property block is {properties_size} bytes, expected {}", Self::PROPERTIES_SIZE),
                header_offset,
            ));
        }

        let mut header = vec![0u8; Self::PROPERTIES_SIZE as usize];
        raw.read_exact(&mut header)?;
        // Bit 1 means the stream ends with an end marker instead of at a known size.
        let size = if flags.contains(GeneralPurposeFlags::COMPRESSION_OPTION_1) {
            u64::MAX
        } else {
            uncompressed_size
        };
        header.extend_from_slice(&size.to_le_bytes());

        let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
            .map_err(|err| Error::format(format!("cannot set up LZMA decoder: {err}")))?;
        Ok(Box::new(xz2::read::XzDecoder::new_stream(
            Cursor::new(header).chain(raw),
            stream,
        )))
    }
}

/// A known or unknown method this crate cannot decode. Entries using it are
/// indexed normally; opening them fails.
#[derive(Debug, Clone)]
pub struct Unsupported {
    code: u16,
    name: String,
}

impl Unsupported {
    pub fn new(code: u16, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
        }
    }
}

impl CompressionMethod for Unsupported {
    fn code(&self) -> u16 {
        self.code
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn decoder(&self, _: RangeReader, _: GeneralPurposeFlags, _: u64) -> Result<Box<dyn Read + Send>> {
        Err(Error::unsupported(format!(
            "{} compression (method {})",
            self.name, self.code
        )))
    }
}

/// Lookup table from method code to [`CompressionMethod`].
#[derive(Clone)]
pub struct CompressionRegistry {
    methods: HashMap<u16, Arc<dyn CompressionMethod>>,
}

impl CompressionRegistry {
    /// A registry without any methods.
    pub fn empty() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register `method` under its code, replacing any earlier registration.
    pub fn register(&mut self, method: impl CompressionMethod + 'static) -> &mut Self {
        self.methods.insert(method.code(), Arc::new(method));
        self
    }

    /// The method for `code`. Unregistered codes get an [`Unsupported`]
    /// placeholder so the entry can still be indexed.
    pub fn lookup(&self, code: u16) -> Arc<dyn CompressionMethod> {
        match self.methods.get(&code) {
            Some(method) => Arc::clone(method),
            None => Arc::new(Unsupported::new(code, "Unknown")),
        }
    }

    pub fn contains(&self, code: u16) -> bool {
        self.methods.contains_key(&code)
    }
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Stored).register(Deflated).register(BZip2).register(Lzma);
        for (code, name) in [
            (1, "Shrunk"),
            (2, "Reduced1"),
            (3, "Reduced2"),
            (4, "Reduced3"),
            (5, "Reduced4"),
            (6, "Imploded"),
            (7, "Tokenizing"),
            (9, "Deflate64"),
            (10, "PKWare Imploding"),
            (18, "IBM TERSE"),
            (19, "IBM LZ77"),
            (97, "WavPack"),
            (98, "PPMd"),
        ] {
            registry.register(Unsupported::new(code, name));
        }
        registry
    }
}

impl fmt::Debug for CompressionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.methods.keys().collect();
        codes.sort();
        f.debug_struct("CompressionRegistry").field("codes", &codes).finish()
    }
}
