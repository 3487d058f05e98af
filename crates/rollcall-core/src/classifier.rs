//! Converts match counts into attended duration and a Present/Absent verdict.

use crate::policy::MIN_ATTENDANCE_PERCENT_RANGE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub duration_seconds: f64,
    pub status: AttendanceStatus,
}

/// Minimum match count needed for Present: `ceil(percent / 100 * frames_processed)`.
///
/// A percentage outside [50, 100] (including NaN) can never be satisfied and
/// yields `u64::MAX`.
pub fn required_count(frames_processed: u64, min_attendance_percent: f64) -> u64 {
    let (lo, hi) = MIN_ATTENDANCE_PERCENT_RANGE;
    if !(lo..=hi).contains(&min_attendance_percent) {
        return u64::MAX;
    }
    // Multiply before dividing so whole percentages stay exact (70 * 10 / 100 == 7).
    let required = (min_attendance_percent * frames_processed as f64 / 100.0).ceil();
    if required <= 0.0 {
        0
    } else {
        required as u64
    }
}

/// Classify one identity.
///
/// `step_seconds_per_frame` is the real time one sampled frame stands for.
/// The threshold is inclusive (`match_count == required` is Present). With no
/// processed frames every identity is Absent with zero duration, and an
/// out-of-range percentage classifies everyone Absent.
pub fn classify(
    match_count: u64,
    frames_processed: u64,
    step_seconds_per_frame: f64,
    min_attendance_percent: f64,
) -> Classification {
    if frames_processed == 0 {
        return Classification {
            duration_seconds: 0.0,
            status: AttendanceStatus::Absent,
        };
    }

    let required = required_count(frames_processed, min_attendance_percent);
    let status = if match_count >= required {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Absent
    };

    Classification {
        duration_seconds: match_count as f64 * step_seconds_per_frame,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_count() {
        assert_eq!(required_count(50, 80.0), 40);
        assert_eq!(required_count(10, 70.0), 7);
        assert_eq!(required_count(3, 50.0), 2);
        assert_eq!(required_count(7, 100.0), 7);
        assert_eq!(required_count(0, 80.0), 0);
    }

    #[test]
    fn test_boundary_is_present() {
        let c = classify(40, 50, 0.2, 80.0);
        assert_eq!(c.status, AttendanceStatus::Present);
        assert!((c.duration_seconds - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_below_boundary_is_absent() {
        let c = classify(39, 50, 0.2, 80.0);
        assert_eq!(c.status, AttendanceStatus::Absent);
        assert!((c.duration_seconds - 7.8).abs() < 1e-9);
    }

    #[test]
    fn test_zero_frames_processed() {
        for count in [0, 1, 40, 1000] {
            let c = classify(count, 0, 0.2, 80.0);
            assert_eq!(c.status, AttendanceStatus::Absent);
            assert_eq!(c.duration_seconds, 0.0);
        }
    }

    #[test]
    fn test_invalid_percent_is_never_present() {
        for pct in [f64::NAN, -5.0, 0.0, 49.9, 100.1, f64::INFINITY] {
            assert_eq!(required_count(10, pct), u64::MAX);
            let c = classify(0, 10, 0.2, pct);
            assert_eq!(c.status, AttendanceStatus::Absent, "pct {pct}");
            assert_eq!(classify(10, 10, 0.2, pct).status, AttendanceStatus::Absent);
        }
    }

    #[test]
    fn test_fractional_requirement_rounds_up() {
        // 80% of 7 = 5.6 -> 6
        assert_eq!(classify(5, 7, 1.0, 80.0).status, AttendanceStatus::Absent);
        assert_eq!(classify(6, 7, 1.0, 80.0).status, AttendanceStatus::Present);
    }

    #[test]
    fn test_status_roundtrip_str() {
        for status in [AttendanceStatus::Present, AttendanceStatus::Absent] {
            assert_eq!(AttendanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttendanceStatus::parse("present"), None);
    }
}
