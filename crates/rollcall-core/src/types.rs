use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("degenerate vector: magnitude is zero")]
    DegenerateVector,
}

/// Bounding box for a detected face, in source frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector (typically 512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// True when every component is finite (no NaN or infinity).
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Accumulates in f64
    /// so that `v.similarity(&v)` lands on 1.0 for realistic 512-dim vectors.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        if self.values.len() != other.values.len() {
            return Err(SimilarityError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(*a), f64::from(*b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return Err(SimilarityError::DegenerateVector);
        }

        let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
        // Rounding can push parallel vectors a hair past 1.0.
        Ok(sim.clamp(-1.0, 1.0) as f32)
    }
}

/// An enrolled identity: one reference embedding per person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Embedding,
}
