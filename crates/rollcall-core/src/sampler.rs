//! Temporal sampling: which frames of a video get inspected.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error(
        "invalid rate: fps={fps}, target_rate_hz={target_rate_hz} (both must be finite and > 0)"
    )]
    InvalidRate { fps: f64, target_rate_hz: f64 },
}

/// Fixed-cadence frame sampler for a video of known frame rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSampler {
    fps: f64,
    step: u64,
}

impl FrameSampler {
    /// Build a sampler inspecting roughly `target_rate_hz` frames per second.
    ///
    /// The step between sampled frames is `max(1, round(fps / target_rate_hz))`.
    pub fn new(fps: f64, target_rate_hz: f64) -> Result<Self, SamplerError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(fps) || !valid(target_rate_hz) {
            return Err(SamplerError::InvalidRate {
                fps,
                target_rate_hz,
            });
        }
        let step = ((fps / target_rate_hz).round() as u64).max(1);
        Ok(Self { fps, step })
    }

    /// Frames between consecutive samples.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Real-time span represented by one sampled frame, in seconds.
    pub fn step_seconds(&self) -> f64 {
        self.step as f64 / self.fps
    }

    /// Sampled frame indices: 0, step, 2*step, ... strictly below `total_frames`.
    pub fn indices(&self, total_frames: u64) -> impl Iterator<Item = u64> {
        (0..total_frames).step_by(self.step as usize)
    }

    /// Number of indices [`indices`](Self::indices) yields.
    pub fn sample_count(&self, total_frames: u64) -> u64 {
        total_frames.div_ceil(self.step)
    }
}

/// Ordered frame indices to inspect for a video of `total_frames` at `fps`.
pub fn sample_indices(
    total_frames: u64,
    fps: f64,
    target_rate_hz: f64,
) -> Result<Vec<u64>, SamplerError> {
    Ok(FrameSampler::new(fps, target_rate_hz)?
        .indices(total_frames)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_frames_is_empty() {
        assert_eq!(sample_indices(0, 30.0, 5.0).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_step_two() {
        let indices = sample_indices(100, 10.0, 5.0).unwrap();
        assert_eq!(indices.len(), 50);
        assert_eq!(indices.first(), Some(&0));
        assert_eq!(indices.last(), Some(&98));
        assert!(indices.windows(2).all(|w| w[1] - w[0] == 2));
    }

    #[test]
    fn test_step_rounds_to_nearest() {
        // 29.97 / 5 = 5.994 -> 6 (floor would give 5)
        assert_eq!(FrameSampler::new(29.97, 5.0).unwrap().step(), 6);
        // 12 / 5 = 2.4 -> 2
        assert_eq!(FrameSampler::new(12.0, 5.0).unwrap().step(), 2);
    }

    #[test]
    fn test_step_never_below_one() {
        let sampler = FrameSampler::new(2.0, 5.0).unwrap();
        assert_eq!(sampler.step(), 1);
        assert_eq!(sample_indices(4, 2.0, 5.0).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_step_seconds() {
        let sampler = FrameSampler::new(30.0, 5.0).unwrap();
        assert_eq!(sampler.step(), 6);
        assert!((sampler.step_seconds() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_sample_count_matches_indices() {
        let sampler = FrameSampler::new(30.0, 5.0).unwrap();
        for total in [0, 1, 5, 6, 7, 299, 300, 301] {
            assert_eq!(sampler.sample_count(total), sampler.indices(total).count() as u64);
        }
    }

    #[test]
    fn test_invalid_rates() {
        for (fps, rate) in [
            (0.0, 5.0),
            (-30.0, 5.0),
            (30.0, 0.0),
            (30.0, -1.0),
            (f64::NAN, 5.0),
            (30.0, f64::INFINITY),
        ] {
            assert!(
                matches!(FrameSampler::new(fps, rate), Err(SamplerError::InvalidRate { .. })),
                "fps={fps} rate={rate}"
            );
        }
    }
}
