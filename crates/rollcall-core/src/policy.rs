use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 5.0;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MIN_ATTENDANCE_PERCENT: f64 = 80.0;
pub const MIN_ATTENDANCE_PERCENT_RANGE: (f64, f64) = (50.0, 100.0);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("target_sample_rate_hz must be finite and > 0, got {0}")]
    SampleRate(f64),
    #[error("similarity_threshold must be within [-1, 1], got {0}")]
    SimilarityThreshold(f32),
    #[error("min_attendance_percent must be within [50, 100], got {0}")]
    MinAttendancePercent(f64),
}

/// Tunables for one attendance run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendancePolicy {
    /// Frames inspected per second of video.
    pub target_sample_rate_hz: f64,
    /// Cosine similarity a match must strictly exceed.
    pub similarity_threshold: f32,
    /// Share of processed frames an identity must be matched in to be Present.
    pub min_attendance_percent: f64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            target_sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            min_attendance_percent: DEFAULT_MIN_ATTENDANCE_PERCENT,
        }
    }
}

impl AttendancePolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(self.target_sample_rate_hz.is_finite() && self.target_sample_rate_hz > 0.0) {
            return Err(PolicyError::SampleRate(self.target_sample_rate_hz));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(PolicyError::SimilarityThreshold(self.similarity_threshold));
        }
        let (lo, hi) = MIN_ATTENDANCE_PERCENT_RANGE;
        if !(lo..=hi).contains(&self.min_attendance_percent) {
            return Err(PolicyError::MinAttendancePercent(self.min_attendance_percent));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let p = AttendancePolicy::default();
        assert_eq!(p.target_sample_rate_hz, 5.0);
        assert_eq!(p.similarity_threshold, 0.6);
        assert_eq!(p.min_attendance_percent, 80.0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_percent_range_inclusive() {
        for pct in [50.0, 75.5, 100.0] {
            let p = AttendancePolicy { min_attendance_percent: pct, ..Default::default() };
            assert!(p.validate().is_ok(), "{pct}");
        }
        for pct in [49.9, 100.1, f64::NAN] {
            let p = AttendancePolicy { min_attendance_percent: pct, ..Default::default() };
            assert!(matches!(p.validate(), Err(PolicyError::MinAttendancePercent(_))), "{pct}");
        }
    }

    #[test]
    fn test_invalid_rate_and_threshold() {
        let p = AttendancePolicy { target_sample_rate_hz: 0.0, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::SampleRate(0.0)));
        let p = AttendancePolicy { similarity_threshold: 1.5, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::SimilarityThreshold(1.5)));
        let p = AttendancePolicy { similarity_threshold: f32::NAN, ..Default::default() };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_partial_toml_style_deserialize_uses_defaults() {
        let p: AttendancePolicy =
            serde_json::from_str(r#"{"min_attendance_percent": 70}"#).unwrap();
        assert_eq!(p.min_attendance_percent, 70.0);
        assert_eq!(p.target_sample_rate_hz, 5.0);
    }
}
