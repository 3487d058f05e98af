//! rollcall-core: attendance determination from sampled video frames.
//!
//! Matches face embeddings observed in a class recording against a registry
//! of enrolled identities (cosine similarity), tallies matches per identity,
//! and classifies each identity as Present or Absent with an estimated
//! attended duration.

pub mod classifier;
pub mod engine;
pub mod policy;
pub mod registry;
pub mod replay;
pub mod sampler;
pub mod source;
pub mod tally;
pub mod types;

pub use classifier::{classify, AttendanceStatus, Classification};
pub use engine::{
    AttendanceEngine, AttendanceRecord, AttendanceReport, AttendanceRun, CancelFlag, EngineError,
    RunState,
};
pub use policy::{AttendancePolicy, PolicyError};
pub use registry::{IdentityRegistry, MatchResult, RegistryError, SharedRegistry};
pub use sampler::{sample_indices, FrameSampler, SamplerError};
pub use source::{FaceDetector, FaceEmbedder, SourceError, VideoMetadata, VideoSource};
pub use tally::{MatchTally, TallyError};
pub use types::{BoundingBox, Embedding, Identity, SimilarityError};

/// ArcFace (w600k_r50) embedding width.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;
