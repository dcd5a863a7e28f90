//! rollcall-core — identity-matching decision engine.
//!
//! Consumes face observations (embeddings + quality signals computed
//! by external detector/embedding collaborators) and decides, per
//! face, whether a confident match against the enrolled gallery
//! exists: quality gating, multi-model score fusion, adaptive
//! per-situation thresholds, greedy one-to-one assignment, and
//! feedback-driven threshold adaptation.

pub mod config;
pub mod engine;
pub mod fusion;
pub mod matcher;
pub mod profile;
pub mod quality;
pub mod temporal;
pub mod threshold;
pub mod types;

pub use config::{DistanceMetric, MatchingConfig, ModelConfig, ThresholdScale};
pub use engine::{CommitSummary, MatchingEngine};
pub use profile::{ProfileError, ProfileStore};
pub use types::{
    BoundingBox, Embedding, FaceObservation, IdentityProfile, MatchDecision, PhotoReport,
    QualityMetrics, RecognitionEvent,
};
