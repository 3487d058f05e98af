//! Attendance run orchestration.
//!
//! A run walks the sampled frames of one video in index order, matches every
//! face embedding against the registry, and classifies each enrolled identity
//! from its match count once all frames are consumed.
//!
//! ```text
//! Initialized -> Sampling -> Matching -> Classifying -> Complete
//!                    \           \
//!                     +-----------+--> Failed(error)
//! ```
//!
//! A failed run never yields a partial report.

use crate::classifier::{self, AttendanceStatus};
use crate::policy::{AttendancePolicy, PolicyError};
use crate::registry::{IdentityRegistry, RegistryError, SharedRegistry};
use crate::sampler::{FrameSampler, SamplerError};
use crate::source::{FaceDetector, FaceEmbedder, SourceError, VideoSource};
use crate::tally::{MatchTally, TallyError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("video unreadable: {0}")]
    VideoUnreadable(String),
    #[error(transparent)]
    InvalidRate(#[from] SamplerError),
    #[error("invalid policy: {0}")]
    InvalidPolicy(#[from] PolicyError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    UnknownIdentity(#[from] TallyError),
    #[error("run cancelled after {frames_processed} processed frames")]
    Cancelled { frames_processed: u64 },
    #[error("run already started (state: {0:?})")]
    AlreadyStarted(RunState),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Initialized,
    Sampling,
    Matching,
    Classifying,
    Complete,
    Failed(Box<EngineError>),
}

/// Cooperative cancellation, checked between sampled frames.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One identity's verdict for one class recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub class_id: String,
    pub identity_id: String,
    pub display_name: String,
    pub match_count: u64,
    pub estimated_duration_seconds: f64,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceReport {
    pub class_id: String,
    pub frame_count: u64,
    pub fps: f64,
    /// Distance between sampled frame indices.
    pub step: u64,
    pub step_seconds: f64,
    /// Sampled frames that were read (processed or skipped).
    pub frames_sampled: u64,
    pub frames_processed: u64,
    /// Sampled frames dropped because they failed to decode.
    pub frames_skipped: u64,
    pub required_count: u64,
    /// One record per enrolled identity, in enrollment order.
    pub records: Vec<AttendanceRecord>,
}

impl AttendanceReport {
    pub fn present_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count()
    }
}

/// A single run over one video. Runs are one-shot.
pub struct AttendanceRun<'r> {
    class_id: String,
    registry: &'r IdentityRegistry,
    policy: AttendancePolicy,
    state: RunState,
}

impl<'r> AttendanceRun<'r> {
    pub fn new(
        class_id: impl Into<String>,
        registry: &'r IdentityRegistry,
        policy: AttendancePolicy,
    ) -> Self {
        Self {
            class_id: class_id.into(),
            registry,
            policy,
            state: RunState::Initialized,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Drive the run to `Complete` or `Failed`.
    ///
    /// The source is consumed and dropped before this returns, on every path.
    pub fn execute<S, D, E>(
        &mut self,
        source: S,
        detector: &mut D,
        embedder: &mut E,
        cancel: &CancelFlag,
    ) -> Result<AttendanceReport, EngineError>
    where
        S: VideoSource,
        D: FaceDetector<S::Frame> + ?Sized,
        E: FaceEmbedder<S::Frame> + ?Sized,
    {
        if self.state != RunState::Initialized {
            return Err(EngineError::AlreadyStarted(self.state.clone()));
        }

        match self.drive(source, detector, embedder, cancel) {
            Ok(report) => {
                self.transition(RunState::Complete);
                tracing::info!(
                    class = %report.class_id,
                    processed = report.frames_processed,
                    skipped = report.frames_skipped,
                    present = report.present_count(),
                    identities = report.records.len(),
                    "attendance run complete"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(class = %self.class_id, error = %err, "attendance run failed");
                self.transition(RunState::Failed(Box::new(err.clone())));
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(class = %self.class_id, from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    fn drive<S, D, E>(
        &mut self,
        mut source: S,
        detector: &mut D,
        embedder: &mut E,
        cancel: &CancelFlag,
    ) -> Result<AttendanceReport, EngineError>
    where
        S: VideoSource,
        D: FaceDetector<S::Frame> + ?Sized,
        E: FaceEmbedder<S::Frame> + ?Sized,
    {
        self.policy.validate()?;

        self.transition(RunState::Sampling);
        let meta = source
            .metadata()
            .map_err(|e| EngineError::VideoUnreadable(e.to_string()))?;
        let sampler = FrameSampler::new(meta.fps, self.policy.target_sample_rate_hz)?;

        tracing::info!(
            class = %self.class_id,
            frame_count = meta.frame_count,
            fps = meta.fps,
            step = sampler.step(),
            samples = sampler.sample_count(meta.frame_count),
            identities = self.registry.len(),
            "starting attendance run"
        );

        let mut tally = MatchTally::new(self.registry);
        let mut frames_sampled = 0u64;
        let mut frames_skipped = 0u64;

        self.transition(RunState::Matching);
        for index in sampler.indices(meta.frame_count) {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    frames_processed: tally.frames_processed(),
                });
            }

            let frame = match source.read_frame(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::warn!(
                        index,
                        frame_count = meta.frame_count,
                        "end of stream before reported frame count"
                    );
                    break;
                }
                Err(SourceError::FrameDecode { index, reason }) => {
                    frames_sampled += 1;
                    frames_skipped += 1;
                    tracing::warn!(index, %reason, "skipping undecodable frame");
                    continue;
                }
                Err(err @ SourceError::Unreadable(_)) => {
                    return Err(EngineError::VideoUnreadable(err.to_string()));
                }
            };
            frames_sampled += 1;

            let matched = self.match_frame(&frame, detector, embedder)?;
            tracing::debug!(index, matched = ?matched, "frame processed");
            for identity_id in &matched {
                tally.record_match(identity_id)?;
            }
            tally.record_frame_processed();
        }
        drop(source);

        self.transition(RunState::Classifying);
        let frames_processed = tally.frames_processed();
        let step_seconds = sampler.step_seconds();
        let records = tally
            .iter()
            .map(|(identity_id, match_count)| {
                let verdict = classifier::classify(
                    match_count,
                    frames_processed,
                    step_seconds,
                    self.policy.min_attendance_percent,
                );
                AttendanceRecord {
                    class_id: self.class_id.clone(),
                    identity_id: identity_id.to_string(),
                    display_name: self
                        .registry
                        .get(identity_id)
                        .map(|i| i.display_name.clone())
                        .unwrap_or_default(),
                    match_count,
                    estimated_duration_seconds: verdict.duration_seconds,
                    status: verdict.status,
                }
            })
            .collect();

        Ok(AttendanceReport {
            class_id: self.class_id.clone(),
            frame_count: meta.frame_count,
            fps: meta.fps,
            step: sampler.step(),
            step_seconds,
            frames_sampled,
            frames_processed,
            frames_skipped,
            required_count: classifier::required_count(
                frames_processed,
                self.policy.min_attendance_percent,
            ),
            records,
        })
    }

    /// Identities matched by at least one face in `frame`, each listed once.
    fn match_frame<F, D, E>(
        &self,
        frame: &F,
        detector: &mut D,
        embedder: &mut E,
    ) -> Result<Vec<String>, EngineError>
    where
        F: ?Sized,
        D: FaceDetector<F> + ?Sized,
        E: FaceEmbedder<F> + ?Sized,
    {
        let mut matched: Vec<String> = Vec::new();

        for (slot, face) in detector.detect(frame).into_iter().enumerate() {
            let Some(embedding) = embedder.embed(frame, &face, slot) else {
                tracing::debug!(slot, confidence = face.confidence, "no embedding for face");
                continue;
            };
            let Some(hit) = self
                .registry
                .find_best_match(&embedding, self.policy.similarity_threshold)?
            else {
                continue;
            };
            if !matched.contains(&hit.identity_id) {
                matched.push(hit.identity_id);
            }
        }

        Ok(matched)
    }
}

/// Owns the detector/embedder pair and a validated policy; runs any number
/// of videos against a registry.
pub struct AttendanceEngine<D, E> {
    detector: D,
    embedder: E,
    policy: AttendancePolicy,
}

impl<D, E> AttendanceEngine<D, E> {
    pub fn new(detector: D, embedder: E, policy: AttendancePolicy) -> Result<Self, EngineError> {
        policy.validate()?;
        Ok(Self {
            detector,
            embedder,
            policy,
        })
    }

    pub fn policy(&self) -> &AttendancePolicy {
        &self.policy
    }

    pub fn run<S>(
        &mut self,
        class_id: &str,
        source: S,
        registry: &IdentityRegistry,
        cancel: &CancelFlag,
    ) -> Result<AttendanceReport, EngineError>
    where
        S: VideoSource,
        D: FaceDetector<S::Frame>,
        E: FaceEmbedder<S::Frame>,
    {
        AttendanceRun::new(class_id, registry, self.policy).execute(
            source,
            &mut self.detector,
            &mut self.embedder,
            cancel,
        )
    }

    /// Like [`run`](Self::run), holding the registry read lock for the whole run.
    pub fn run_shared<S>(
        &mut self,
        class_id: &str,
        source: S,
        registry: &SharedRegistry,
        cancel: &CancelFlag,
    ) -> Result<AttendanceReport, EngineError>
    where
        S: VideoSource,
        D: FaceDetector<S::Frame>,
        E: FaceEmbedder<S::Frame>,
    {
        let guard = registry.read();
        self.run(class_id, source, &guard, cancel)
    }
}
