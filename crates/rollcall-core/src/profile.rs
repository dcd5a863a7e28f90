//! Profile Store: enrollment and lifecycle of identity profiles.
//!
//! The store exclusively owns profile lifetime. Mutation of a given
//! identity is serialized behind a per-identity mutex; callers that
//! read a snapshot and commit later use the optimistic version counter
//! so concurrent photos cannot silently lose counter or threshold
//! updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use thiserror::Error;

use crate::config::ProfileConfig;
use crate::types::{Embedding, IdentityProfile};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("identity {0} is not enrolled")]
    UnknownIdentity(String),
    #[error("identity {0} is already enrolled")]
    AlreadyEnrolled(String),
    #[error("enrollment for {0} carries no embeddings")]
    EmptyEnrollment(String),
    /// The profile changed between snapshot and commit. Retried with a
    /// fresh read by the caller, bounded by configuration.
    #[error("identity {identity}: version {expected} expected, store has {actual}")]
    VersionConflict {
        identity: String,
        expected: u64,
        actual: u64,
    },
}

/// In-memory gallery of enrolled identities.
///
/// Constructed per process and injected into the engine; never a
/// process-wide singleton, so independent matching sessions do not
/// interfere.
pub struct ProfileStore {
    cfg: ProfileConfig,
    profiles: RwLock<HashMap<String, Arc<Mutex<IdentityProfile>>>>,
}

impl ProfileStore {
    pub fn new(cfg: ProfileConfig) -> Self {
        Self {
            cfg,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the store from previously persisted profiles (the storage
    /// collaborator's load path). Thresholds are clamped back into the
    /// configured bounds in case the bounds changed since persistence.
    pub fn from_profiles(cfg: ProfileConfig, profiles: Vec<IdentityProfile>) -> Self {
        let store = Self::new(cfg);
        {
            let mut map = store.profiles.write().unwrap_or_else(|e| e.into_inner());
            for mut p in profiles {
                p.threshold = p.threshold.clamp(store.cfg.threshold_min, store.cfg.threshold_max);
                map.insert(p.id.clone(), Arc::new(Mutex::new(p)));
            }
        }
        store
    }

    /// Enroll a new identity from one or more per-model embedding
    /// sets. The first set becomes the primary reference, the rest
    /// become variants.
    pub fn enroll(
        &self,
        id: &str,
        label: &str,
        mut embeddings: Vec<BTreeMap<String, Embedding>>,
    ) -> Result<(), ProfileError> {
        if embeddings.is_empty() || embeddings[0].is_empty() {
            return Err(ProfileError::EmptyEnrollment(id.to_string()));
        }

        let mut map = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(id) {
            return Err(ProfileError::AlreadyEnrolled(id.to_string()));
        }

        let primary = embeddings.remove(0);
        let mut variants: BTreeMap<String, Vec<Embedding>> = BTreeMap::new();
        for set in embeddings {
            for (model, embedding) in set {
                variants.entry(model).or_default().push(embedding);
            }
        }

        let profile = IdentityProfile {
            id: id.to_string(),
            label: label.to_string(),
            primary,
            variants,
            threshold: self.cfg.threshold_min,
            successes: 0,
            failures: 0,
            updated_at: Utc::now(),
            version: 0,
        };

        tracing::info!(identity = id, label, "identity enrolled");
        map.insert(id.to_string(), Arc::new(Mutex::new(profile)));
        Ok(())
    }

    /// Snapshot one profile.
    pub fn load(&self, id: &str) -> Option<IdentityProfile> {
        let map = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        let slot = map.get(id)?;
        let profile = slot.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Some(profile)
    }

    /// Snapshot the whole gallery, ordered by identity id for
    /// deterministic candidate generation.
    pub fn snapshot(&self) -> Vec<IdentityProfile> {
        let map = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        let mut profiles: Vec<IdentityProfile> = map
            .values()
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    pub fn ids(&self) -> Vec<String> {
        let map = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.profiles.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an enrolled identity. Explicit external operation only;
    /// matching never removes profiles as a side effect.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .profiles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(identity = id, "identity removed");
        }
        removed
    }

    /// Record a finalized match outcome against an expected version.
    ///
    /// Returns the new version. `expected_version` of `None` skips the
    /// optimistic check (single-writer callers).
    pub fn record_outcome(
        &self,
        id: &str,
        matched: bool,
        expected_version: Option<u64>,
    ) -> Result<u64, ProfileError> {
        self.with_profile(id, |profile| {
            if let Some(expected) = expected_version {
                if profile.version != expected {
                    return Err(ProfileError::VersionConflict {
                        identity: id.to_string(),
                        expected,
                        actual: profile.version,
                    });
                }
            }
            if matched {
                profile.successes += 1;
            } else {
                profile.failures += 1;
            }
            profile.updated_at = Utc::now();
            profile.version += 1;
            Ok(profile.version)
        })?
    }

    /// Recompute the identity's adaptive threshold from its success
    /// rate. Skipped (keeping the prior threshold) until the identity
    /// has accumulated the minimum observation count, to avoid
    /// thrashing on sparse data.
    pub fn recompute_threshold(&self, id: &str) -> Result<f32, ProfileError> {
        self.with_profile(id, |profile| {
            if profile.observations() < self.cfg.min_observations {
                tracing::debug!(
                    identity = id,
                    observations = profile.observations(),
                    "insufficient history; threshold unchanged"
                );
                return profile.threshold;
            }

            let rate = profile.success_rate();
            let old = profile.threshold;
            if rate > self.cfg.adapt_tighten_above {
                // Reliable identity: require more confidence.
                profile.threshold *= 1.0 + self.cfg.adapt_step;
            } else if rate < self.cfg.adapt_loosen_below {
                profile.threshold *= 1.0 - self.cfg.adapt_step;
            }
            profile.threshold = profile
                .threshold
                .clamp(self.cfg.threshold_min, self.cfg.threshold_max);

            if (profile.threshold - old).abs() > f32::EPSILON {
                profile.version += 1;
                profile.updated_at = Utc::now();
                tracing::debug!(
                    identity = id,
                    rate,
                    old,
                    new = profile.threshold,
                    "adaptive threshold recomputed"
                );
            }
            profile.threshold
        })
    }

    /// Current version of an identity, for conflict retry loops.
    pub fn version(&self, id: &str) -> Result<u64, ProfileError> {
        self.with_profile(id, |profile| profile.version)
    }

    fn with_profile<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut IdentityProfile) -> R,
    ) -> Result<R, ProfileError> {
        let slot = {
            let map = self.profiles.read().unwrap_or_else(|e| e.into_inner());
            map.get(id)
                .cloned()
                .ok_or_else(|| ProfileError::UnknownIdentity(id.to_string()))?
        };
        let mut profile = slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding_set(v: Vec<f32>) -> BTreeMap<String, Embedding> {
        let mut m = BTreeMap::new();
        m.insert("arcface".to_string(), Embedding::new(v));
        m
    }

    fn store() -> ProfileStore {
        ProfileStore::new(ProfileConfig::default())
    }

    #[test]
    fn test_enroll_and_load() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0, 0.0])]).unwrap();

        let p = s.load("s1").unwrap();
        assert_eq!(p.label, "Ada");
        assert_eq!(p.primary["arcface"].values, vec![1.0, 0.0]);
        assert!(p.variants.is_empty());
        assert_eq!(p.version, 0);
        assert!(s.load("missing").is_none());
    }

    #[test]
    fn test_enroll_extra_sets_become_variants() {
        let s = store();
        s.enroll(
            "s1",
            "Ada",
            vec![
                embedding_set(vec![1.0, 0.0]),
                embedding_set(vec![0.9, 0.1]),
                embedding_set(vec![0.8, 0.2]),
            ],
        )
        .unwrap();

        let p = s.load("s1").unwrap();
        assert_eq!(p.variants["arcface"].len(), 2);
    }

    #[test]
    fn test_duplicate_enroll_rejected() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();
        assert!(matches!(
            s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]),
            Err(ProfileError::AlreadyEnrolled(_))
        ));
    }

    #[test]
    fn test_empty_enrollment_rejected() {
        let s = store();
        assert!(matches!(
            s.enroll("s1", "Ada", vec![]),
            Err(ProfileError::EmptyEnrollment(_))
        ));
    }

    #[test]
    fn test_record_outcome_counts_and_versions() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();

        let v1 = s.record_outcome("s1", true, None).unwrap();
        let v2 = s.record_outcome("s1", false, None).unwrap();
        assert_eq!((v1, v2), (1, 2));

        let p = s.load("s1").unwrap();
        assert_eq!((p.successes, p.failures), (1, 1));
    }

    #[test]
    fn test_version_conflict_detected() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();

        // Snapshot at version 0, then someone else commits.
        s.record_outcome("s1", true, Some(0)).unwrap();
        let err = s.record_outcome("s1", true, Some(0)).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::VersionConflict { expected: 0, actual: 1, .. }
        ));

        // Retry with a fresh read succeeds.
        let v = s.version("s1").unwrap();
        s.record_outcome("s1", true, Some(v)).unwrap();
    }

    #[test]
    fn test_recompute_skipped_below_min_observations() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();
        let before = s.load("s1").unwrap().threshold;

        for _ in 0..4 {
            s.record_outcome("s1", true, None).unwrap();
        }
        // 4 observations < 5: unchanged.
        assert_eq!(s.recompute_threshold("s1").unwrap(), before);
    }

    #[test]
    fn test_recompute_tightens_on_strong_history() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();
        let before = s.load("s1").unwrap().threshold;

        for _ in 0..10 {
            s.record_outcome("s1", true, None).unwrap();
        }
        let after = s.recompute_threshold("s1").unwrap();
        assert!((after - before * 1.05).abs() < 1e-6);
    }

    #[test]
    fn test_recompute_loosens_on_weak_history() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();
        let before = s.load("s1").unwrap().threshold;

        for i in 0..10 {
            s.record_outcome("s1", i == 0, None).unwrap();
        }
        let after = s.recompute_threshold("s1").unwrap();
        // 1/10 success rate loosens, but never below the lower bound.
        assert!(after <= before);
        assert!(after >= ProfileConfig::default().threshold_min);
    }

    #[test]
    fn test_threshold_bounds_respected_for_any_sequence() {
        let cfg = ProfileConfig::default();
        let s = ProfileStore::new(cfg.clone());
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();

        // Long all-success run: threshold must stay within bounds.
        for _ in 0..200 {
            s.record_outcome("s1", true, None).unwrap();
            let t = s.recompute_threshold("s1").unwrap();
            assert!(t >= cfg.threshold_min && t <= cfg.threshold_max);
        }
        // Long all-failure run afterwards.
        for _ in 0..400 {
            s.record_outcome("s1", false, None).unwrap();
            let t = s.recompute_threshold("s1").unwrap();
            assert!(t >= cfg.threshold_min && t <= cfg.threshold_max);
        }
    }

    #[test]
    fn test_remove() {
        let s = store();
        s.enroll("s1", "Ada", vec![embedding_set(vec![1.0])]).unwrap();
        assert!(s.remove("s1"));
        assert!(!s.remove("s1"));
        assert!(s.load("s1").is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_from_profiles_clamps_threshold() {
        let cfg = ProfileConfig::default();
        let mut p = IdentityProfile {
            id: "s1".into(),
            label: "Ada".into(),
            primary: embedding_set(vec![1.0]),
            variants: BTreeMap::new(),
            threshold: 5.0,
            successes: 0,
            failures: 0,
            updated_at: Utc::now(),
            version: 7,
        };
        p.threshold = 5.0;
        let s = ProfileStore::from_profiles(cfg.clone(), vec![p]);
        let loaded = s.load("s1").unwrap();
        assert_eq!(loaded.threshold, cfg.threshold_max);
        assert_eq!(loaded.version, 7);
    }

    #[test]
    fn test_snapshot_sorted_by_id() {
        let s = store();
        for id in ["s3", "s1", "s2"] {
            s.enroll(id, id, vec![embedding_set(vec![1.0])]).unwrap();
        }
        let ids: Vec<String> = s.snapshot().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }
}
