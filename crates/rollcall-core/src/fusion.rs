//! Score Fusion: one face observation against one identity profile.
//!
//! Computes per-model raw distances (primary reference and best
//! variant), converts each to a confidence, and blends across models
//! and matching strategies. Degrades gracefully: models that produced
//! no embedding and strategies with no data are excluded and the
//! remaining weights renormalized, never treated as zero scores.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::{DistanceMetric, MatchingConfig, ModelConfig};
use crate::types::{Embedding, FaceObservation, IdentityProfile};

#[derive(Error, Debug)]
pub enum FusionError {
    /// A stored reference embedding does not match the observation's
    /// dimensionality. The identity is excluded from this photo.
    #[error("identity {identity}: model {model} reference is {reference_dim}-dim, observation is {observation_dim}-dim")]
    CorruptReference {
        identity: String,
        model: String,
        reference_dim: usize,
        observation_dim: usize,
    },
}

/// Fused result for one (face, identity) pair.
#[derive(Debug, Clone)]
pub struct FusedScore {
    /// Blended confidence in [0, 1].
    pub score: f32,
    /// Best (minimum) raw distance per model, for diagnostics and for
    /// distance-scale thresholding.
    pub distances: BTreeMap<String, f32>,
    /// Minimum raw distance across all available models.
    pub best_distance: f32,
}

/// Raw distance between two embeddings under a model's native metric.
/// Cosine distance is `1 - cosine similarity`, in [0, 2].
fn raw_distance(metric: DistanceMetric, a: &Embedding, b: &Embedding) -> f32 {
    match metric {
        DistanceMetric::Euclidean => a.euclidean_distance(b),
        DistanceMetric::Cosine => 1.0 - a.cosine_similarity(b),
    }
}

/// Distance-to-confidence conversion: `max(0, 1 - d/norm)`.
fn confidence(model: &ModelConfig, distance: f32) -> f32 {
    (1.0 - distance / model.norm).max(0.0)
}

struct ModelScores<'a> {
    model: &'a ModelConfig,
    primary_conf: f32,
    /// Present only when the profile carries variants for this model.
    variant_conf: Option<f32>,
    best_distance: f32,
}

/// Fuse one observation against one profile.
///
/// Returns `Ok(None)` when the observation and profile share no
/// embedding model at all (degraded input: there is nothing to score,
/// so the identity simply produces no candidate for this face).
pub fn fuse(
    obs: &FaceObservation,
    profile: &IdentityProfile,
    cfg: &MatchingConfig,
) -> Result<Option<FusedScore>, FusionError> {
    let mut per_model: Vec<ModelScores> = Vec::new();
    let mut distances = BTreeMap::new();

    for model in &cfg.models {
        let Some(observed) = obs.embeddings.get(&model.name) else {
            continue;
        };
        let Some(reference) = profile.primary.get(&model.name) else {
            continue;
        };
        if reference.dim() != observed.dim() {
            return Err(FusionError::CorruptReference {
                identity: profile.id.clone(),
                model: model.name.clone(),
                reference_dim: reference.dim(),
                observation_dim: observed.dim(),
            });
        }

        let primary_dist = raw_distance(model.metric, observed, reference);
        let mut best_dist = primary_dist;

        let variant_conf = match profile.variants.get(&model.name) {
            Some(variants) if !variants.is_empty() => {
                let mut min_dist = f32::INFINITY;
                for v in variants {
                    if v.dim() != observed.dim() {
                        return Err(FusionError::CorruptReference {
                            identity: profile.id.clone(),
                            model: model.name.clone(),
                            reference_dim: v.dim(),
                            observation_dim: observed.dim(),
                        });
                    }
                    min_dist = min_dist.min(raw_distance(model.metric, observed, v));
                }
                best_dist = best_dist.min(min_dist);
                Some(confidence(model, min_dist))
            }
            _ => None,
        };

        distances.insert(model.name.clone(), best_dist);
        per_model.push(ModelScores {
            model,
            primary_conf: confidence(model, primary_dist),
            variant_conf,
            best_distance: best_dist,
        });
    }

    if per_model.is_empty() {
        tracing::debug!(
            identity = %profile.id,
            face = obs.face_index,
            "no shared embedding model; skipping candidate"
        );
        return Ok(None);
    }

    // Model weights renormalized over the models that actually ran.
    let total_weight: f32 = per_model.iter().map(|m| m.model.weight).sum();

    let weighted = |pick: &dyn Fn(&ModelScores) -> Option<f32>| -> Option<f32> {
        let mut acc = 0.0f32;
        let mut w_sum = 0.0f32;
        for m in &per_model {
            if let Some(c) = pick(m) {
                acc += m.model.weight * c;
                w_sum += m.model.weight;
            }
        }
        if w_sum > 0.0 { Some(acc / w_sum) } else { None }
    };

    let primary_score = weighted(&|m| Some(m.primary_conf));
    let variant_score = weighted(&|m| m.variant_conf);
    // The ensemble strategy only adds signal with at least two models.
    let ensemble_score = if per_model.len() >= 2 && total_weight > 0.0 {
        weighted(&|m| Some(m.primary_conf.max(m.variant_conf.unwrap_or(0.0))))
    } else {
        None
    };

    // Blend strategies 60/30/10, renormalized over whichever are present.
    let sw = &cfg.strategy;
    let mut acc = 0.0f32;
    let mut w_sum = 0.0f32;
    for (score, weight) in [
        (primary_score, sw.primary),
        (variant_score, sw.variant),
        (ensemble_score, sw.ensemble),
    ] {
        if let Some(s) = score {
            acc += weight * s;
            w_sum += weight;
        }
    }
    // per_model is non-empty, so the primary strategy is always present.
    let score = (acc / w_sum).clamp(0.0, 1.0);

    let best_distance = per_model
        .iter()
        .map(|m| m.best_distance)
        .fold(f32::INFINITY, f32::min);

    Ok(Some(FusedScore {
        score,
        distances,
        best_distance,
    }))
}
