//! The per-photo matching pipeline.
//!
//! `MatchingEngine` wires the stages together: quality gate, score
//! fusion, temporal adjustment, threshold policy, greedy assignment,
//! and finally the profile-store commit. Evaluation is pure; commit is
//! a separate step so a cancelled photo is simply never committed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::MatchingConfig;
use crate::fusion;
use crate::matcher::{self, ScoredPair};
use crate::profile::{ProfileError, ProfileStore};
use crate::temporal::TemporalTracker;
use crate::threshold::{self, ThresholdInputs};
use crate::types::{
    FaceObservation, FaceTrace, MatchCandidate, PendingOutcome, PhotoReport, RecognitionEvent,
};

/// What happened when a report was committed. Per-identity failures
/// are logged and counted, never propagated: one slow identity must
/// not block the photo's other decisions.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommitSummary {
    /// Identities whose counters were updated.
    pub applied: usize,
    /// Version conflicts that were resolved by retrying.
    pub conflicts_retried: usize,
    /// Identities whose update was abandoned after bounded retries.
    pub failed: usize,
}

/// The identity-matching decision engine.
///
/// Constructed once per process (or per tenant/session) and injected
/// into callers; holds no global state.
pub struct MatchingEngine {
    cfg: MatchingConfig,
    store: Arc<ProfileStore>,
    temporal: TemporalTracker,
}

impl MatchingEngine {
    pub fn new(cfg: MatchingConfig, store: Arc<ProfileStore>) -> Self {
        let temporal = TemporalTracker::new(cfg.temporal.clone());
        Self {
            cfg,
            store,
            temporal,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    /// Evaluate one photo against the current gallery. Pure with
    /// respect to the profile store: nothing is written.
    ///
    /// A photo with zero detected faces yields an empty decision list.
    /// A corrupt profile is excluded from this photo and logged; other
    /// identities and faces are unaffected.
    pub fn evaluate(&self, faces: &[FaceObservation], now: DateTime<Utc>) -> PhotoReport {
        let group_size = faces.len();
        let mut report = PhotoReport {
            decisions: Vec::new(),
            traces: None,
            evaluated_at: now,
            outcomes: Vec::new(),
            snapshot_versions: BTreeMap::new(),
        };
        if faces.is_empty() {
            return report;
        }

        let gallery = self.store.snapshot();
        tracing::debug!(faces = group_size, identities = gallery.len(), "evaluating photo");

        let mut pairs: Vec<ScoredPair> = Vec::new();
        for profile in &gallery {
            report
                .snapshot_versions
                .insert(profile.id.clone(), profile.version);

            let mut profile_pairs: Vec<ScoredPair> = Vec::new();
            let mut corrupt = false;

            for face in faces {
                if !face.quality.acceptable {
                    continue;
                }

                let fused = match fusion::fuse(face, profile, &self.cfg) {
                    Ok(Some(f)) => f,
                    Ok(None) => continue,
                    Err(err) => {
                        // ProfileCorrupt: drop this identity for the
                        // whole photo, keep everything else.
                        tracing::warn!(
                            identity = %profile.id,
                            error = %err,
                            "corrupt profile excluded from photo"
                        );
                        corrupt = true;
                        break;
                    }
                };

                let score = self.temporal.adjust(&profile.id, fused.score, now);
                let boundary = threshold::decision_threshold(
                    &self.cfg.threshold,
                    ThresholdInputs {
                        identity_threshold: profile.threshold,
                        group_size,
                        quality: face.quality.overall,
                        success_rate: profile.success_rate(),
                    },
                );

                profile_pairs.push(ScoredPair {
                    candidate: MatchCandidate {
                        face_index: face.face_index,
                        identity_id: profile.id.clone(),
                        score,
                        distances: fused.distances,
                        threshold: boundary.value(),
                    },
                    boundary,
                    best_distance: fused.best_distance,
                });
            }

            if !corrupt {
                pairs.append(&mut profile_pairs);
            }
        }

        if self.cfg.trace_top_n > 0 {
            report.traces = Some(build_traces(faces, &pairs, self.cfg.trace_top_n));
        }

        report.decisions = matcher::assign(faces.len(), pairs.clone());
        report.outcomes = pending_outcomes(&report, &pairs);

        let matched = report.decisions.iter().filter(|d| d.is_matched()).count();
        tracing::info!(
            faces = group_size,
            matched,
            unmatched = group_size - matched,
            "photo evaluated"
        );
        report
    }

    /// Commit a report: counters, recognition events, and threshold
    /// recomputation, per identity, with optimistic-version retries.
    pub fn commit(&self, report: &PhotoReport) -> CommitSummary {
        let mut summary = CommitSummary::default();
        let committed_at = Utc::now();

        for outcome in &report.outcomes {
            let expected = report
                .snapshot_versions
                .get(&outcome.identity_id)
                .copied();
            match self.apply_with_retries(&outcome.identity_id, outcome.matched, expected) {
                Ok(retries) => {
                    summary.applied += 1;
                    summary.conflicts_retried += retries;

                    self.temporal.record(RecognitionEvent {
                        identity_id: outcome.identity_id.clone(),
                        confidence: outcome.confidence,
                        accepted: outcome.matched,
                        at: committed_at,
                    });

                    if let Err(err) = self.store.recompute_threshold(&outcome.identity_id) {
                        tracing::warn!(
                            identity = %outcome.identity_id,
                            error = %err,
                            "threshold recomputation failed"
                        );
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(
                        identity = %outcome.identity_id,
                        error = %err,
                        "outcome dropped after bounded retries"
                    );
                }
            }
        }
        summary
    }

    /// Evaluate and immediately commit.
    pub fn process_photo(&self, faces: &[FaceObservation], now: DateTime<Utc>) -> PhotoReport {
        let report = self.evaluate(faces, now);
        self.commit(&report);
        report
    }

    /// Versioned counter update with fresh-read retries, bounded by
    /// configuration. Returns how many conflicts were retried.
    fn apply_with_retries(
        &self,
        identity_id: &str,
        matched: bool,
        snapshot_version: Option<u64>,
    ) -> Result<usize, ProfileError> {
        let mut expected = snapshot_version;
        let mut retries = 0usize;
        loop {
            match self.store.record_outcome(identity_id, matched, expected) {
                Ok(_) => return Ok(retries),
                Err(ProfileError::VersionConflict { .. })
                    if retries < self.cfg.profile.max_commit_retries as usize =>
                {
                    retries += 1;
                    expected = Some(self.store.version(identity_id)?);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Per-face top-N candidate trace, best first.
fn build_traces(faces: &[FaceObservation], pairs: &[ScoredPair], top_n: usize) -> Vec<FaceTrace> {
    faces
        .iter()
        .map(|face| {
            let mut candidates: Vec<MatchCandidate> = pairs
                .iter()
                .filter(|p| p.candidate.face_index == face.face_index)
                .map(|p| p.candidate.clone())
                .collect();
            candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.identity_id.cmp(&b.identity_id))
            });
            candidates.truncate(top_n);
            FaceTrace {
                face_index: face.face_index,
                candidates,
            }
        })
        .collect()
}

/// One outcome per face that had at least one candidate: success for
/// the matched identity, failure for the best rejected identity of an
/// unmatched face. An identity matched elsewhere in the photo is never
/// also charged a failure for it; the photo consumed that identity.
fn pending_outcomes(report: &PhotoReport, pairs: &[ScoredPair]) -> Vec<PendingOutcome> {
    let matched_ids: HashSet<&str> = report
        .decisions
        .iter()
        .filter_map(|d| d.identity_id.as_deref())
        .collect();

    let mut outcomes = Vec::new();
    for decision in &report.decisions {
        match &decision.identity_id {
            Some(id) => outcomes.push(PendingOutcome {
                identity_id: id.clone(),
                matched: true,
                confidence: decision.confidence,
            }),
            None => {
                // Attribute the rejection to the face's strongest
                // unconsumed candidate, if it had any.
                let best = pairs
                    .iter()
                    .filter(|p| p.candidate.face_index == decision.face_index)
                    .filter(|p| !matched_ids.contains(p.candidate.identity_id.as_str()))
                    .max_by(|a, b| {
                        a.candidate
                            .score
                            .partial_cmp(&b.candidate.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            // Prefer the lower identity id on ties, to
                            // mirror the matcher's determinism.
                            .then_with(|| b.candidate.identity_id.cmp(&a.candidate.identity_id))
                    });
                if let Some(best) = best {
                    outcomes.push(PendingOutcome {
                        identity_id: best.candidate.identity_id.clone(),
                        matched: false,
                        confidence: best.candidate.score,
                    });
                }
            }
        }
    }
    outcomes
}
