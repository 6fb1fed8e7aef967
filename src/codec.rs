//! Compression and checksum envelope for stored values
//!
//! Values that leave this crate for the store (surface blobs in particular)
//! are wrapped in a small self-describing envelope:
//!
//! ```text
//! byte    compression method
//! byte    checksum kind
//! [u32]   CRC32 over the compressed payload (little-endian, if checksummed)
//! bytes   compressed payload
//! ```

use crate::error::{LabelvolError, Result};
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression as FlateCompression;
use std::io::Read;

/// Compression methods understood by the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// Gzip compression
    Gzip = 1,
    /// Zstandard compression
    Zstd = 2,
}

impl CompressionMethod {
    /// Get the method from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Gzip),
            2 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// Checksum kinds understood by the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Checksum {
    None = 0,
    Crc32 = 1,
}

impl Checksum {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Checksum::None),
            1 => Some(Checksum::Crc32),
            _ => None,
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Trait for compression/decompression operations
pub trait Compressor: Send + Sync {
    /// Compress data
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Get the compression method
    fn method(&self) -> CompressionMethod;
}

/// No compression
#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

/// Gzip compression
#[derive(Debug, Default)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(data, FlateCompression::new(level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| LabelvolError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| LabelvolError::Decompression(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Gzip
    }
}

/// Zstandard compression
#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(data, level.value() as i32)
            .map_err(|e| LabelvolError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| LabelvolError::Decompression(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Gzip => Box::new(GzipCompressor),
        CompressionMethod::Zstd => Box::new(ZstdCompressor),
    }
}

/// Wrap `data` in the compression+checksum envelope.
pub fn serialize_data(
    data: &[u8],
    method: CompressionMethod,
    level: CompressionLevel,
    checksum: Checksum,
) -> Result<Vec<u8>> {
    let payload = get_compressor(method).compress(data, level)?;
    let mut out = Vec::with_capacity(2 + 4 + payload.len());
    out.push(method as u8);
    out.push(checksum as u8);
    if checksum == Checksum::Crc32 {
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    }
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Unwrap an envelope produced by [`serialize_data`].
pub fn deserialize_data(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(LabelvolError::Decode(
            "serialized value shorter than envelope header".to_string(),
        ));
    }
    let method = CompressionMethod::from_u8(data[0]).ok_or_else(|| {
        LabelvolError::Decode(format!("unknown compression method byte {}", data[0]))
    })?;
    let checksum = Checksum::from_u8(data[1])
        .ok_or_else(|| LabelvolError::Decode(format!("unknown checksum byte {}", data[1])))?;

    let payload = match checksum {
        Checksum::None => &data[2..],
        Checksum::Crc32 => {
            if data.len() < 6 {
                return Err(LabelvolError::Decode(
                    "serialized value truncated before checksum".to_string(),
                ));
            }
            let stored = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
            let payload = &data[6..];
            let computed = crc32fast::hash(payload);
            if stored != computed {
                return Err(LabelvolError::ChecksumMismatch { stored, computed });
            }
            payload
        }
    };
    get_compressor(method).decompress(payload)
}
