//! Identity registry: one reference embedding per enrolled identity.
//!
//! Identities keep their enrollment position for the lifetime of the registry.
//! Re-enrolling an existing id replaces its name and embedding in place, so
//! the tie-break order in [`IdentityRegistry::find_best_match`] never depends
//! on how a storage backend happens to return rows.

use crate::types::{Embedding, Identity, SimilarityError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("registry dimension must be non-zero")]
    InvalidDimension,
    #[error("invalid embedding for identity {identity_id}: {reason}")]
    InvalidEmbedding {
        identity_id: String,
        reason: &'static str,
    },
    #[error(
        "embedding dimension mismatch{}: expected {expected}, got {actual}",
        fmt_identity(.identity_id)
    )]
    DimensionMismatch {
        /// Offending identity, or `None` when the probe itself is the wrong width.
        identity_id: Option<String>,
        expected: usize,
        actual: usize,
    },
}

fn fmt_identity(identity_id: &Option<String>) -> String {
    identity_id
        .as_deref()
        .map(|id| format!(" for identity {id}"))
        .unwrap_or_default()
}

/// Best enrolled candidate for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity_id: String,
    /// Cosine similarity of the match, strictly above the threshold used.
    pub similarity: f32,
    /// Enrollment position of the matched identity.
    pub position: usize,
}

/// Enrolled identities, in enrollment order, all sharing one embedding dimension.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    dimension: usize,
    identities: Vec<Identity>,
    index: HashMap<String, usize>,
}

impl IdentityRegistry {
    pub fn new(dimension: usize) -> Result<Self, RegistryError> {
        if dimension == 0 {
            return Err(RegistryError::InvalidDimension);
        }
        Ok(Self {
            dimension,
            identities: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Build a registry from identities already in enrollment order
    /// (e.g. loaded from storage).
    pub fn from_identities<I>(dimension: usize, identities: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Identity>,
    {
        let mut registry = Self::new(dimension)?;
        for identity in identities {
            registry.enroll(identity.identity_id, identity.display_name, identity.embedding)?;
        }
        Ok(registry)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Insert a new identity or replace an existing one (last write wins).
    pub fn enroll(
        &mut self,
        identity_id: impl Into<String>,
        display_name: impl Into<String>,
        embedding: Embedding,
    ) -> Result<(), RegistryError> {
        let identity_id = identity_id.into();

        if embedding.values.is_empty() {
            return Err(RegistryError::InvalidEmbedding {
                identity_id,
                reason: "embedding is empty",
            });
        }
        if !embedding.is_finite() {
            return Err(RegistryError::InvalidEmbedding {
                identity_id,
                reason: "embedding contains non-finite values",
            });
        }
        if embedding.dimension() != self.dimension {
            return Err(RegistryError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
                identity_id: Some(identity_id),
            });
        }

        let identity = Identity {
            identity_id: identity_id.clone(),
            display_name: display_name.into(),
            embedding,
        };

        match self.index.get(&identity_id) {
            Some(&pos) => {
                tracing::debug!(identity = %identity_id, pos, "replacing enrolled embedding");
                self.identities[pos] = identity;
            }
            None => {
                tracing::debug!(
                    identity = %identity_id,
                    pos = self.identities.len(),
                    "enrolled identity"
                );
                self.index.insert(identity_id, self.identities.len());
                self.identities.push(identity);
            }
        }
        Ok(())
    }

    /// Remove an identity. Later identities shift up one position but keep
    /// their relative order.
    pub fn remove(&mut self, identity_id: &str) -> Option<Identity> {
        let pos = self.index.remove(identity_id)?;
        let removed = self.identities.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, identity_id: &str) -> Option<&Identity> {
        self.index.get(identity_id).map(|&pos| &self.identities[pos])
    }

    pub fn contains(&self, identity_id: &str) -> bool {
        self.index.contains_key(identity_id)
    }

    /// All identities in enrollment order. The iterator is `Clone`, so a
    /// caller can restart the enumeration.
    pub fn all(&self) -> std::slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    /// Find the enrolled identity most similar to `probe`.
    ///
    /// Every identity is scored. The highest similarity wins, and among equal
    /// scores the earliest enrolled identity wins. The winner is returned only
    /// if its similarity is strictly greater than `threshold`. Identities whose
    /// similarity is undefined (zero-magnitude vectors) are never candidates.
    ///
    /// A probe of the wrong width is an error, not a non-match.
    pub fn find_best_match(
        &self,
        probe: &Embedding,
        threshold: f32,
    ) -> Result<Option<MatchResult>, RegistryError> {
        if probe.dimension() != self.dimension {
            return Err(RegistryError::DimensionMismatch {
                identity_id: None,
                expected: self.dimension,
                actual: probe.dimension(),
            });
        }

        let mut best: Option<(usize, f32)> = None;

        for (pos, identity) in self.identities.iter().enumerate() {
            let sim = match probe.similarity(&identity.embedding) {
                Ok(sim) => sim,
                Err(SimilarityError::DegenerateVector) => continue,
                Err(SimilarityError::DimensionMismatch { left, right }) => {
                    return Err(RegistryError::DimensionMismatch {
                        identity_id: Some(identity.identity_id.clone()),
                        expected: left,
                        actual: right,
                    });
                }
            };
            // Strict comparison keeps the earliest identity on ties; NaN never wins.
            let better = match best {
                None => !sim.is_nan(),
                Some((_, best_sim)) => sim > best_sim,
            };
            if better {
                best = Some((pos, sim));
            }
        }

        Ok(best
            .filter(|&(_, sim)| sim > threshold)
            .map(|(pos, sim)| MatchResult {
                identity_id: self.identities[pos].identity_id.clone(),
                similarity: sim,
                position: pos,
            }))
    }
}

/// Registry shared between concurrent runs.
///
/// Runs hold a read guard for their whole matching phase; enrollment takes
/// the write guard and therefore waits for in-flight runs to finish.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<IdentityRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: IdentityRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    // Mutations validate before touching state, so a poisoned lock still
    // guards a consistent registry.
    pub fn read(&self) -> RwLockReadGuard<'_, IdentityRegistry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IdentityRegistry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enroll(
        &self,
        identity_id: impl Into<String>,
        display_name: impl Into<String>,
        embedding: Embedding,
    ) -> Result<(), RegistryError> {
        self.write().enroll(identity_id, display_name, embedding)
    }
}
