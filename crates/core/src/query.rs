//! Query requests and results
//!
//! Query vectors arrive as bytes. Two encodings are accepted:
//!
//! - raw little-endian `f32`, 4 bytes per component
//! - an NPY file (format v1, v2 or v3) holding one `<f4` or `<f8` vector,
//!   shaped `(n,)`, `(1, n)` or `(n, 1)`

use crate::{MetadataRecord, Neighbor, Result, RetrievalError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Metadata keys copied onto results
pub const VIDEO_KEY: &str = "video_primary_key";
pub const FRAME_KEY: &str = "frame_primary_key";
pub const FRAME_INDEX_KEY: &str = "frame_index";
pub const DETECTION_KEY: &str = "detection_primary_key";

/// A k-nearest-neighbour query against one index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub index_id: String,
    /// Encoded query vector
    pub vector: Vec<u8>,
    /// Number of results wanted
    pub count: usize,
    /// Overrides the retriever's algorithm name on results
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl QueryRequest {
    pub fn new(index_id: impl Into<String>, vector: Vec<u8>, count: usize) -> Self {
        Self {
            index_id: index_id.into(),
            vector,
            count,
            algorithm: None,
        }
    }

    /// Build a request from an in-memory vector (raw f32 encoding)
    pub fn from_vector(index_id: impl Into<String>, vector: &[f32], count: usize) -> Self {
        Self::new(index_id, encode_vector(vector), count)
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Decoded query vector
    pub fn decode(&self) -> Result<Vec<f32>> {
        decode_vector(&self.vector)
    }
}

/// Raw little-endian f32 encoding of `vector`
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode query bytes, detecting NPY by its magic prefix
///
/// # Errors
///
/// `InvalidQuery` for empty input, a raw buffer not a multiple of 4 bytes, or
/// an NPY file that is not a single little-endian float vector.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.is_empty() {
        return Err(RetrievalError::InvalidQuery("Empty query vector".to_string()));
    }
    if bytes.starts_with(NPY_MAGIC) {
        return decode_npy(bytes);
    }
    if bytes.len() % 4 != 0 {
        return Err(RetrievalError::InvalidQuery(format!(
            "Raw f32 vector length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_npy(bytes: &[u8]) -> Result<Vec<f32>> {
    let invalid = |msg: String| RetrievalError::InvalidQuery(format!("NPY: {}", msg));

    let major = *bytes
        .get(NPY_MAGIC.len())
        .ok_or_else(|| invalid("truncated version".to_string()))?;
    let (header_len, header_start) = match major {
        1 => {
            let b = bytes.get(8..10).ok_or_else(|| invalid("truncated header length".to_string()))?;
            (u16::from_le_bytes([b[0], b[1]]) as usize, 10)
        }
        2 | 3 => {
            let b = bytes.get(8..12).ok_or_else(|| invalid("truncated header length".to_string()))?;
            (u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize, 12)
        }
        v => return Err(invalid(format!("unsupported version {}", v))),
    };

    let header_end = header_start + header_len;
    let header = bytes
        .get(header_start..header_end)
        .ok_or_else(|| invalid("truncated header".to_string()))?;
    let header = std::str::from_utf8(header).map_err(|_| invalid("header is not text".to_string()))?;

    let descr = header_field(header, "descr")
        .and_then(|v| v.split(['\'', '"']).nth(1))
        .ok_or_else(|| invalid("missing descr".to_string()))?;
    let shape = header_field(header, "shape")
        .and_then(parse_shape)
        .ok_or_else(|| invalid("missing or malformed shape".to_string()))?;

    // Only a single vector is accepted: every axis but one has length 1
    if shape.iter().filter(|&&d| d != 1).count() > 1 {
        return Err(invalid(format!("expected one vector, got shape {:?}", shape)));
    }
    let len = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| invalid(format!("shape {:?} too large", shape)))?;
    let byte_len = |width: usize| {
        len.checked_mul(width)
            .ok_or_else(|| invalid(format!("shape {:?} too large", shape)))
    };

    let body = &bytes[header_end..];
    match descr {
        "<f4" => {
            let body = body
                .get(..byte_len(4)?)
                .ok_or_else(|| invalid("truncated data".to_string()))?;
            Ok(body
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        }
        "<f8" => {
            let body = body
                .get(..byte_len(8)?)
                .ok_or_else(|| invalid("truncated data".to_string()))?;
            Ok(body
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
                .collect())
        }
        other => Err(invalid(format!("unsupported dtype {}", other))),
    }
}

/// Text following `'key':` in an NPY header dict
fn header_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{}':", key);
    let start = header.find(&pattern)? + pattern.len();
    Some(header[start..].trim_start())
}

fn parse_shape(value: &str) -> Option<Vec<usize>> {
    let inner = value.strip_prefix('(')?;
    let inner = &inner[..inner.find(')')?];
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Whether a result points at a whole frame or a detected region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Frame,
    Detection,
}

/// One ranked result with the identifiers of the matching frame or region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rank: usize,
    /// Euclidean distance for exact retrievers, quantizer score otherwise
    pub distance: f32,
    pub algorithm: String,
    pub kind: ResultKind,
    pub video_id: Option<Value>,
    pub frame_id: Option<Value>,
    pub frame_index: Option<Value>,
    pub detection_id: Option<Value>,
    pub metadata: MetadataRecord,
}

impl QueryResult {
    pub fn new(neighbor: &Neighbor, metadata: &MetadataRecord, algorithm: &str) -> Self {
        let detection_id = metadata.get(DETECTION_KEY).cloned();
        Self {
            rank: neighbor.rank,
            distance: neighbor.distance,
            algorithm: algorithm.to_string(),
            kind: if detection_id.is_some() {
                ResultKind::Detection
            } else {
                ResultKind::Frame
            },
            video_id: metadata.get(VIDEO_KEY).cloned(),
            frame_id: metadata.get(FRAME_KEY).cloned(),
            frame_index: metadata.get(FRAME_INDEX_KEY).cloned(),
            detection_id,
            metadata: metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    /// The index holds no vectors yet
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub index_id: String,
    pub status: QueryStatus,
    pub results: Vec<QueryResult>,
}

impl QueryResponse {
    pub fn no_data(index_id: impl Into<String>) -> Self {
        Self {
            index_id: index_id.into(),
            status: QueryStatus::NoData,
            results: Vec::new(),
        }
    }
}
