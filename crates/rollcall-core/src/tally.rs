//! Per-run match accumulation.

use crate::registry::IdentityRegistry;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TallyError {
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
}

/// Match counts for one run, seeded with every registry identity at zero.
///
/// Identities enrolled after the tally was created are unknown to it.
#[derive(Debug, Clone)]
pub struct MatchTally {
    order: Vec<String>,
    counts: HashMap<String, u64>,
    frames_processed: u64,
}

impl MatchTally {
    pub fn new(registry: &IdentityRegistry) -> Self {
        let order: Vec<String> = registry.all().map(|i| i.identity_id.clone()).collect();
        let counts = order.iter().map(|id| (id.clone(), 0)).collect();
        Self {
            order,
            counts,
            frames_processed: 0,
        }
    }

    /// Count one matched frame for `identity_id`.
    pub fn record_match(&mut self, identity_id: &str) -> Result<(), TallyError> {
        let count = self
            .counts
            .get_mut(identity_id)
            .ok_or_else(|| TallyError::UnknownIdentity(identity_id.to_string()))?;
        *count += 1;
        Ok(())
    }

    /// Count one successfully processed frame, matched or not.
    pub fn record_frame_processed(&mut self) {
        self.frames_processed += 1;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn count(&self, identity_id: &str) -> Option<u64> {
        self.counts.get(identity_id).copied()
    }

    /// `(identity_id, count)` pairs in registry enrollment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.order
            .iter()
            .map(|id| (id.as_str(), self.counts.get(id).copied().unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    fn registry() -> IdentityRegistry {
        let mut reg = IdentityRegistry::new(2).unwrap();
        reg.enroll("a", "Ada", Embedding::new(vec![1.0, 0.0])).unwrap();
        reg.enroll("b", "Bo", Embedding::new(vec![0.0, 1.0])).unwrap();
        reg
    }

    #[test]
    fn test_starts_at_zero() {
        let tally = MatchTally::new(&registry());
        assert_eq!(tally.frames_processed(), 0);
        let counts: Vec<_> = tally.iter().collect();
        assert_eq!(counts, vec![("a", 0), ("b", 0)]);
    }

    #[test]
    fn test_record_match_increments_by_one() {
        let mut tally = MatchTally::new(&registry());
        tally.record_match("b").unwrap();
        tally.record_match("b").unwrap();
        tally.record_match("a").unwrap();
        assert_eq!(tally.count("a"), Some(1));
        assert_eq!(tally.count("b"), Some(2));
    }

    #[test]
    fn test_unknown_identity() {
        let mut reg = registry();
        let mut tally = MatchTally::new(&reg);
        reg.enroll("late", "Late", Embedding::new(vec![1.0, 1.0])).unwrap();
        assert_eq!(
            tally.record_match("late"),
            Err(TallyError::UnknownIdentity("late".into()))
        );
        assert_eq!(tally.count("late"), None);
    }

    #[test]
    fn test_frames_processed_independent_of_matches() {
        let mut tally = MatchTally::new(&registry());
        tally.record_frame_processed();
        tally.record_frame_processed();
        tally.record_match("a").unwrap();
        assert_eq!(tally.frames_processed(), 2);
        assert_eq!(tally.count("a"), Some(1));
    }
}
