//! Per-value zstd (de)compression with a shared dictionary.
//!
//! Unaligned sequence columns store every value individually compressed
//! against a column-wide dictionary, so single rows can be materialized
//! without touching their neighbours.

use std::io::{Read, Write};

/// A column's shared compression dictionary. An empty dictionary is
/// valid and means plain per-value zstd framing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZstdDictionary {
    bytes: Vec<u8>,
}

impl ZstdDictionary {
    pub fn new(bytes: Vec<u8>) -> Self {
        ZstdDictionary { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

const COMPRESSION_LEVEL: i32 = 3;

/// Compress one value with the column dictionary.
pub fn compress_value(value: &str, dictionary: &ZstdDictionary) -> std::io::Result<Vec<u8>> {
    let mut encoder = zstd::stream::write::Encoder::with_dictionary(
        Vec::new(),
        COMPRESSION_LEVEL,
        dictionary.as_bytes(),
    )?;
    encoder.write_all(value.as_bytes())?;
    encoder.finish()
}

/// The scalar decompression contract: dictionary-based, null-preserving
/// (a null input never reaches this function; callers map null to null),
/// and accepting empty inputs.
pub fn silo_zstd_decompressor(
    compressed: &[u8],
    dictionary: &ZstdDictionary,
) -> std::io::Result<String> {
    let mut decoder =
        zstd::stream::read::Decoder::with_dictionary(compressed, dictionary.as_bytes())?;
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}
