//! Fixed-width embedding blob format.
//!
//! ```text
//! | dimension: u32 LE | value[0]: f32 LE | ... | value[dimension-1]: f32 LE |
//! ```

use rollcall_core::Embedding;
use thiserror::Error;

const HEADER_LEN: usize = 4;
const VALUE_LEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("blob too short for header: {0} bytes")]
    MissingHeader(usize),
    #[error("blob declares {dimension} values ({expected} bytes) but holds {actual} bytes")]
    LengthMismatch {
        dimension: usize,
        expected: usize,
        actual: usize,
    },
}

pub fn encode(embedding: &Embedding) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + embedding.values.len() * VALUE_LEN);
    out.extend_from_slice(&(embedding.values.len() as u32).to_le_bytes());
    for v in &embedding.values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode(blob: &[u8]) -> Result<Vec<f32>, CodecError> {
    if blob.len() < HEADER_LEN {
        return Err(CodecError::MissingHeader(blob.len()));
    }
    let (header, body) = blob.split_at(HEADER_LEN);
    let dimension = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let expected = HEADER_LEN + dimension * VALUE_LEN;
    if blob.len() != expected {
        return Err(CodecError::LengthMismatch {
            dimension,
            expected,
            actual: blob.len(),
        });
    }
    Ok(body
        .chunks_exact(VALUE_LEN)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
