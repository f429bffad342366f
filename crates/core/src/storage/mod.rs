//! Storage layer for trained models
//!
//! Compression codecs plus the atomic, checksummed artifact store used to
//! persist a [`QuantizationModel`](crate::quantize::QuantizationModel).

pub mod compression;
pub mod file;

pub use compression::{compress, decompress, Codec, CompressionError};

pub use file::{ArtifactEntry, ModelManifest, ModelStore, ARTIFACTS};
