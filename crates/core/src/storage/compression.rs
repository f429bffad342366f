//! Artifact compression
//!
//! Every compressed buffer starts with a 4-byte header
//! `[codec_id, version, 0, 0]` so readers detect the codec without any side
//! channel. Model artifacts are mostly float matrices and small codebooks, so
//! gzip via `flate2` is the only real codec; `None` stores bytes as-is.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Compression codec identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Codec {
    /// Stored as-is
    None,
    #[default]
    Gzip,
}

impl Codec {
    fn id(&self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Gzip => 1,
        }
    }

    fn from_id(id: u8) -> Result<Self, CompressionError> {
        match id {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Gzip),
            _ => Err(CompressionError::InvalidHeader(format!("Unknown codec ID: {}", id))),
        }
    }
}

/// Error types for compression operations
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

const HEADER_SIZE: usize = 4;
const VERSION: u8 = 1;

/// Compress `data` with `codec`, prefixing the header
pub fn compress(data: &[u8], codec: Codec) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::with_capacity(HEADER_SIZE + data.len() / 2);
    out.extend_from_slice(&[codec.id(), VERSION, 0, 0]);

    match codec {
        Codec::None => out.extend_from_slice(data),
        Codec::Gzip => {
            let mut encoder = GzEncoder::new(&mut out, Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?;
        }
    }

    Ok(out)
}

/// Decompress a buffer produced by [`compress`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if data.len() < HEADER_SIZE {
        return Err(CompressionError::InvalidHeader(format!(
            "Data too small: {} bytes",
            data.len()
        )));
    }
    let codec = Codec::from_id(data[0])?;
    if data[1] != VERSION {
        return Err(CompressionError::InvalidHeader(format!(
            "Unsupported version: {}",
            data[1]
        )));
    }

    let body = &data[HEADER_SIZE..];
    match codec {
        Codec::None => Ok(body.to_vec()),
        Codec::Gzip => {
            let mut result = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut result)
                .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
            Ok(result)
        }
    }
}
