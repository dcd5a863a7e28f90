use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional eye landmarks.
///
/// Coordinates are pixels in the source photo. Landmarks, when the
/// detector supplies them, are [left_eye, right_eye].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence for this face.
    pub confidence: f32,
    pub eye_landmarks: Option<[(f32, f32); 2]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector produced by an external model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions; degenerate (zero-norm) input
    /// yields 0.0 rather than NaN.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Quality metrics for one face observation, each in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub sharpness: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub size_score: f32,
    pub pose_score: f32,
    pub occlusion_score: f32,
    /// Weighted overall quality in [0, 1].
    pub overall: f32,
    /// Gate: whether this face is usable for matching at all.
    pub acceptable: bool,
}

impl QualityMetrics {
    /// Neutral mid-quality metrics, used when a face region cannot be
    /// assessed. A bad crop must never fail the whole photo.
    pub fn neutral() -> Self {
        Self {
            sharpness: 0.5,
            brightness: 0.5,
            contrast: 0.5,
            size_score: 0.5,
            pose_score: 0.5,
            occlusion_score: 0.5,
            overall: 0.5,
            acceptable: true,
        }
    }
}

/// One detected face in one photo, with its per-model embeddings.
///
/// Created per detection, immutable, discarded after the photo is
/// processed. Keyed by model name; a model that failed to produce an
/// embedding is simply absent from the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Index of this face within its photo.
    pub face_index: usize,
    pub bbox: BoundingBox,
    pub embeddings: BTreeMap<String, Embedding>,
    pub quality: QualityMetrics,
}

/// One enrolled person: primary reference embedding per model,
/// optional variant embeddings, adaptive threshold, and running
/// match statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub id: String,
    pub label: String,
    /// Primary reference embedding, keyed by model name.
    pub primary: BTreeMap<String, Embedding>,
    /// Ordered variant embeddings per model (pose/lighting robustness).
    #[serde(default)]
    pub variants: BTreeMap<String, Vec<Embedding>>,
    /// Per-identity adaptive threshold, clamped to configured bounds.
    pub threshold: f32,
    pub successes: u32,
    pub failures: u32,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every committed
    /// mutation.
    #[serde(default)]
    pub version: u64,
}

impl IdentityProfile {
    pub fn observations(&self) -> u32 {
        self.successes + self.failures
    }

    /// Fraction of observations that were successful matches.
    /// Returns 0.5 with no history (neither tightens nor loosens).
    pub fn success_rate(&self) -> f32 {
        let total = self.observations();
        if total == 0 {
            0.5
        } else {
            self.successes as f32 / total as f32
        }
    }
}

/// Ephemeral (face, identity) scoring record. Exists only while one
/// photo is being assigned.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub face_index: usize,
    pub identity_id: String,
    /// Fused confidence in [0, 1], after temporal adjustment.
    pub score: f32,
    /// Raw per-model distances, for diagnostics.
    pub distances: BTreeMap<String, f32>,
    /// Decision threshold computed for this specific pair.
    pub threshold: f32,
}

/// Final decision for one face: a matched identity or unmatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
    pub face_index: usize,
    /// `None` means unmatched. Never an error.
    pub identity_id: Option<String>,
    pub confidence: f32,
    pub distances: BTreeMap<String, f32>,
}

impl MatchDecision {
    pub fn unmatched(face_index: usize) -> Self {
        Self {
            face_index,
            identity_id: None,
            confidence: 0.0,
            distances: BTreeMap::new(),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// One historical record per finalized decision, appended to the
/// identity's rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub identity_id: String,
    pub confidence: f32,
    pub accepted: bool,
    pub at: DateTime<Utc>,
}

/// Per-face diagnostic trace: top candidates considered, best first.
#[derive(Debug, Clone, Serialize)]
pub struct FaceTrace {
    pub face_index: usize,
    pub candidates: Vec<MatchCandidate>,
}

/// Outcome the engine will apply to one identity's counters when the
/// photo is committed.
#[derive(Debug, Clone, Serialize)]
pub struct PendingOutcome {
    pub identity_id: String,
    pub matched: bool,
    pub confidence: f32,
}

/// Everything the engine produced for one photo. Decisions are final;
/// nothing is written to the profile store until the report is
/// committed, so a cancelled photo leaves no trace.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoReport {
    pub decisions: Vec<MatchDecision>,
    /// Present only when diagnostic tracing is enabled.
    pub traces: Option<Vec<FaceTrace>>,
    pub evaluated_at: DateTime<Utc>,
    /// Counter updates to apply at commit time.
    #[serde(skip)]
    pub outcomes: Vec<PendingOutcome>,
    /// Profile versions observed at evaluation time, for optimistic
    /// commit.
    #[serde(skip)]
    pub snapshot_versions: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.cosine_similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_success_rate_no_history() {
        let p = IdentityProfile {
            id: "s1".into(),
            label: "Ada".into(),
            primary: BTreeMap::new(),
            variants: BTreeMap::new(),
            threshold: 0.2,
            successes: 0,
            failures: 0,
            updated_at: Utc::now(),
            version: 0,
        };
        assert_eq!(p.success_rate(), 0.5);
    }

    #[test]
    fn test_success_rate_counts() {
        let p = IdentityProfile {
            id: "s1".into(),
            label: "Ada".into(),
            primary: BTreeMap::new(),
            variants: BTreeMap::new(),
            threshold: 0.2,
            successes: 9,
            failures: 1,
            updated_at: Utc::now(),
            version: 0,
        };
        assert!((p.success_rate() - 0.9).abs() < 1e-6);
        assert_eq!(p.observations(), 10);
    }

    #[test]
    fn test_unmatched_decision() {
        let d = MatchDecision::unmatched(3);
        assert_eq!(d.face_index, 3);
        assert!(!d.is_matched());
        assert_eq!(d.confidence, 0.0);
    }
}
