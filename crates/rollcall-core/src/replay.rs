//! Replay of a pre-computed detection recording.
//!
//! An external detector/embedder pipeline writes one JSON document per video:
//!
//! ```json
//! { "fps": 30.0, "frame_count": 300,
//!   "frames": [ { "index": 0, "faces": [ { "bbox": { "x": 10, "y": 12, "width": 80,
//!                 "height": 96, "confidence": 0.98 }, "embedding": [0.12, -0.40] } ] },
//!               { "index": 6, "decode_error": "corrupt packet" } ] }
//! ```
//!
//! Frames missing from `frames` have no faces. A `null` embedding means the
//! embedder could not produce one for that face.

use crate::source::{FaceDetector, FaceEmbedder, SourceError, VideoMetadata, VideoSource};
use crate::types::{BoundingBox, Embedding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub fps: f64,
    pub frame_count: u64,
    #[serde(default)]
    pub frames: Vec<RecordedFrame>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub index: u64,
    #[serde(default)]
    pub faces: Vec<RecordedFace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedFace {
    pub bbox: BoundingBox,
    pub embedding: Option<Vec<f32>>,
}

impl Recording {
    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Unreadable(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| SourceError::Unreadable(format!("{}: {e}", path.display())))
    }
}

/// [`VideoSource`] over a [`Recording`]. When opened from a path the file is
/// read on the first [`metadata`](VideoSource::metadata) call.
pub struct ReplaySource {
    path: Option<PathBuf>,
    metadata: Option<VideoMetadata>,
    frames: HashMap<u64, RecordedFrame>,
}

impl ReplaySource {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            metadata: None,
            frames: HashMap::new(),
        }
    }

    pub fn from_recording(recording: Recording) -> Self {
        let mut source = Self {
            path: None,
            metadata: None,
            frames: HashMap::new(),
        };
        source.load(recording);
        source
    }

    fn load(&mut self, recording: Recording) {
        self.metadata = Some(VideoMetadata {
            frame_count: recording.frame_count,
            fps: recording.fps,
        });
        self.frames.clear();
        for frame in recording.frames {
            if frame.index >= recording.frame_count {
                tracing::warn!(
                    index = frame.index,
                    frame_count = recording.frame_count,
                    "ignoring recorded frame past end of video"
                );
                continue;
            }
            if let Some(previous) = self.frames.insert(frame.index, frame) {
                tracing::warn!(index = previous.index, "duplicate recorded frame, keeping last");
            }
        }
    }
}

impl VideoSource for ReplaySource {
    type Frame = RecordedFrame;

    fn metadata(&mut self) -> Result<VideoMetadata, SourceError> {
        if let Some(meta) = self.metadata {
            return Ok(meta);
        }
        let path = self
            .path
            .clone()
            .ok_or_else(|| SourceError::Unreadable("no recording".into()))?;
        let recording = Recording::from_path(&path)?;
        tracing::debug!(
            path = %path.display(),
            frame_count = recording.frame_count,
            fps = recording.fps,
            recorded = recording.frames.len(),
            "loaded recording"
        );
        self.load(recording);
        self.metadata
            .ok_or_else(|| SourceError::Unreadable(path.display().to_string()))
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<RecordedFrame>, SourceError> {
        let meta = self.metadata()?;
        if index >= meta.frame_count {
            return Ok(None);
        }
        match self.frames.get(&index) {
            Some(RecordedFrame {
                decode_error: Some(reason),
                ..
            }) => Err(SourceError::FrameDecode {
                index,
                reason: reason.clone(),
            }),
            Some(frame) => Ok(Some(frame.clone())),
            None => Ok(Some(RecordedFrame {
                index,
                ..Default::default()
            })),
        }
    }
}

/// Reports the recorded face boxes of a frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayDetector;

impl FaceDetector<RecordedFrame> for ReplayDetector {
    fn detect(&mut self, frame: &RecordedFrame) -> Vec<BoundingBox> {
        frame.faces.iter().map(|f| f.bbox.clone()).collect()
    }
}

/// Returns the recorded embedding at the detected face's slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayEmbedder;

impl FaceEmbedder<RecordedFrame> for ReplayEmbedder {
    fn embed(
        &mut self,
        frame: &RecordedFrame,
        face: &BoundingBox,
        slot: usize,
    ) -> Option<Embedding> {
        let recorded = frame.faces.get(slot)?;
        if &recorded.bbox != face {
            tracing::warn!(index = frame.index, slot, "detected box does not match recording");
            return None;
        }
        recorded.embedding.clone().map(Embedding::new)
    }
}
