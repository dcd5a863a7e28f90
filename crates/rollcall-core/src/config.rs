//! Engine configuration.
//!
//! Every formula constant used by the decision engine lives here as a
//! named, serde-visible field, so a deployment can pin its exact
//! matching behavior in one reviewable document instead of scattering
//! literals through the scoring code.

use serde::{Deserialize, Serialize};

/// Distance metric native to an embedding model's space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

/// One configured embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name, matching the key used in `FaceObservation::embeddings`.
    pub name: String,
    pub metric: DistanceMetric,
    /// Ensemble weight relative to the other configured models.
    /// Renormalized at fusion time over the models that actually
    /// produced an embedding.
    pub weight: f32,
    /// Distance-to-confidence normalizer: confidence = max(0, 1 - d/norm).
    pub norm: f32,
}

/// Which threshold scale the deployment decides on. The two scales use
/// different formulas and bounds and are never combined in one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdScale {
    /// Fused [0,1] confidence compared against a confidence threshold.
    Confidence,
    /// Best raw model distance compared against a distance threshold.
    Distance,
}

/// Weights for the overall quality score. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    pub sharpness: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub size: f32,
    pub pose: f32,
    pub occlusion: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            sharpness: 0.25,
            brightness: 0.15,
            contrast: 0.10,
            size: 0.20,
            pose: 0.15,
            occlusion: 0.15,
        }
    }
}

/// Quality Assessor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    /// Laplacian variance at (or above) which a face counts as fully sharp.
    pub sharpness_norm: f32,
    /// Laplacian variance below which a face is rejected as blurry.
    pub blur_floor: f32,
    /// Ideal mean-luma band; brightness score is 1.0 inside it.
    pub ideal_luma_low: f32,
    pub ideal_luma_high: f32,
    /// Luma std-dev treated as full contrast.
    pub contrast_norm: f32,
    /// Face area (pixels) treated as ideal; size score = area/ideal, clipped.
    pub ideal_face_area: f32,
    /// Lower-half edge density below which occlusion is suspected.
    pub occlusion_edge_floor: f32,
    /// Acceptability gates.
    pub min_overall: f32,
    pub min_size_score: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            sharpness_norm: 300.0,
            blur_floor: 40.0,
            ideal_luma_low: 90.0,
            ideal_luma_high: 170.0,
            contrast_norm: 64.0,
            ideal_face_area: 96.0 * 96.0,
            occlusion_edge_floor: 0.04,
            min_overall: 0.4,
            min_size_score: 0.3,
        }
    }
}

/// Strategy blend for Score Fusion: primary-only vs. primary+variants
/// vs. full ensemble. Renormalized over the strategies actually
/// available for an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyWeights {
    pub primary: f32,
    pub variant: f32,
    pub ensemble: f32,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            primary: 0.6,
            variant: 0.3,
            ensemble: 0.1,
        }
    }
}

/// Adaptive Threshold Policy constants, both scales.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub scale: ThresholdScale,

    // --- Confidence scale ---
    /// Fallback base when an identity has no adaptive threshold yet.
    pub base_confidence: f32,
    /// Group-size deltas added to the base: stricter for a lone face,
    /// progressively more lenient for group photos.
    pub group_delta_single: f32,
    pub group_delta_leq3: f32,
    pub group_delta_leq6: f32,
    pub group_delta_leq10: f32,
    pub group_delta_gt10: f32,
    /// Absolute clamp for the confidence-scale decision threshold.
    pub confidence_min: f32,
    pub confidence_max: f32,

    // --- Distance scale ---
    pub base_distance: f32,
    pub group_factor_single: f32,
    pub group_factor_leq5: f32,
    pub group_factor_leq20: f32,
    pub group_factor_gt20: f32,
    /// History factors by recent success rate.
    pub history_tighten: f32,
    pub history_neutral: f32,
    pub history_loosen: f32,
    /// Quality-based additive adjustment, distance units.
    pub quality_tighten_delta: f32,
    pub quality_loosen_delta: f32,
    /// Distance clamp, expressed as offsets from the base.
    pub distance_min_offset: f32,
    pub distance_max_offset: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            scale: ThresholdScale::Confidence,

            base_confidence: 0.20,
            group_delta_single: 0.05,
            group_delta_leq3: 0.0,
            group_delta_leq6: -0.02,
            group_delta_leq10: -0.03,
            group_delta_gt10: -0.05,
            confidence_min: 0.10,
            confidence_max: 0.40,

            base_distance: 20.0,
            group_factor_single: 1.0,
            group_factor_leq5: 1.1,
            group_factor_leq20: 1.2,
            group_factor_gt20: 1.3,
            history_tighten: 0.95,
            history_neutral: 1.0,
            history_loosen: 1.1,
            quality_tighten_delta: -2.0,
            quality_loosen_delta: 3.0,
            distance_min_offset: -2.0,
            distance_max_offset: 12.0,
        }
    }
}

/// Temporal Consistency Tracker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    pub enabled: bool,
    /// Window used for the consistency boost, seconds.
    pub consistency_window_secs: i64,
    /// Events older than this are pruned, seconds.
    pub retention_secs: i64,
    /// Recent-average bands and their multipliers.
    pub boost_above: f32,
    pub boost_factor: f32,
    pub dampen_below: f32,
    pub dampen_factor: f32,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consistency_window_secs: 60 * 60,
            retention_secs: 24 * 60 * 60,
            boost_above: 0.7,
            boost_factor: 1.1,
            dampen_below: 0.3,
            dampen_factor: 0.9,
        }
    }
}

/// Profile Store lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Per-identity adaptive threshold bounds (confidence scale).
    pub threshold_min: f32,
    pub threshold_max: f32,
    /// Minimum observations before the adaptive threshold moves at all.
    pub min_observations: u32,
    /// Relative nudge applied per recomputation.
    pub adapt_step: f32,
    /// Success-rate bands that trigger a nudge.
    pub adapt_loosen_below: f32,
    pub adapt_tighten_above: f32,
    /// Bounded retries for versioned commits.
    pub max_commit_retries: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            threshold_min: 0.2,
            threshold_max: 0.9,
            min_observations: 5,
            adapt_step: 0.05,
            adapt_loosen_below: 0.5,
            adapt_tighten_above: 0.8,
            max_commit_retries: 3,
        }
    }
}

/// Full engine configuration, injected into every `MatchingEngine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub models: Vec<ModelConfig>,
    pub quality: QualityConfig,
    pub strategy: StrategyWeights,
    pub threshold: ThresholdConfig,
    pub temporal: TemporalConfig,
    pub profile: ProfileConfig,
    /// When > 0, attach a per-face top-N candidate trace to reports.
    pub trace_top_n: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            models: vec![ModelConfig {
                name: "arcface".to_string(),
                metric: DistanceMetric::Cosine,
                weight: 1.0,
                norm: 1.2,
            }],
            quality: QualityConfig::default(),
            strategy: StrategyWeights::default(),
            threshold: ThresholdConfig::default(),
            temporal: TemporalConfig::default(),
            profile: ProfileConfig::default(),
            trace_top_n: 0,
        }
    }
}

impl MatchingConfig {
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_weights_sum_to_one() {
        let w = QualityWeights::default();
        let sum = w.sharpness + w.brightness + w.contrast + w.size + w.pose + w.occlusion;
        assert!((sum - 1.0).abs() < 1e-6, "weights sum to {sum}");
    }

    #[test]
    fn test_strategy_weights_sum_to_one() {
        let s = StrategyWeights::default();
        assert!((s.primary + s.variant + s.ensemble - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_default_scale_is_confidence() {
        let cfg = MatchingConfig::default();
        assert_eq!(cfg.threshold.scale, ThresholdScale::Confidence);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let cfg = MatchingConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MatchingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.models.len(), 1);
        assert_eq!(back.models[0].name, "arcface");
        assert_eq!(back.threshold.scale, ThresholdScale::Confidence);
    }

    #[test]
    fn test_model_lookup() {
        let cfg = MatchingConfig::default();
        assert!(cfg.model("arcface").is_some());
        assert!(cfg.model("missing").is_none());
    }
}
