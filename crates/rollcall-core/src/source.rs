//! Interfaces to the collaborators that turn video into face embeddings.
//!
//! Decoding, detection and embedding extraction live outside this crate. The
//! engine only needs frame access by index, face boxes per frame, and an
//! embedding per box.

use crate::types::{BoundingBox, Embedding};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("video unreadable: {0}")]
    Unreadable(String),
    #[error("frame {index} failed to decode: {reason}")]
    FrameDecode { index: u64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub frame_count: u64,
    pub fps: f64,
}

impl VideoMetadata {
    pub fn duration_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Random-access frame reader.
pub trait VideoSource {
    type Frame;

    /// Frame count and rate. Failure here is fatal to a run.
    fn metadata(&mut self) -> Result<VideoMetadata, SourceError>;

    /// Decode one frame. `Ok(None)` is end of stream; `Err(FrameDecode)`
    /// is recoverable and the frame is skipped.
    fn read_frame(&mut self, index: u64) -> Result<Option<Self::Frame>, SourceError>;
}

/// Locates faces in a frame. Finding none is an empty result, not an error.
pub trait FaceDetector<F: ?Sized> {
    fn detect(&mut self, frame: &F) -> Vec<BoundingBox>;
}

/// Extracts an embedding for one detected face.
///
/// `slot` is the face's position in the detector output for `frame`, so two
/// detections with the same box stay distinct. Returns `None` when no usable
/// embedding could be produced; the engine treats that as "no observation".
pub trait FaceEmbedder<F: ?Sized> {
    fn embed(&mut self, frame: &F, face: &BoundingBox, slot: usize) -> Option<Embedding>;
}
