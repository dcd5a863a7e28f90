//! Adaptive Threshold Policy.
//!
//! Derives the decision threshold for one (face, identity) pair from
//! the identity's adaptive base, the photo's face count, the face's
//! quality, and the identity's historical success rate. Two scales
//! exist, selected once per deployment and never mixed in a decision:
//! the canonical confidence scale (fused score vs. [0,1] threshold)
//! and a distance scale (best raw distance vs. distance threshold).

use crate::config::{ThresholdConfig, ThresholdScale};

/// Inputs the policy consumes for one pair.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdInputs {
    /// Identity's current adaptive threshold (confidence scale). On
    /// the confidence scale this is the base; history is folded into
    /// it by the profile store's recomputation.
    pub identity_threshold: f32,
    /// Number of faces detected in the photo.
    pub group_size: usize,
    /// Overall face quality in [0, 1].
    pub quality: f32,
    /// Identity's historical success rate in [0, 1].
    pub success_rate: f32,
}

/// The computed boundary, on whichever scale the deployment picked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecisionThreshold {
    /// Accept when fused confidence >= value.
    Confidence(f32),
    /// Accept when best raw distance <= value.
    Distance(f32),
}

impl DecisionThreshold {
    /// The raw threshold value, used for reporting.
    pub fn value(&self) -> f32 {
        match *self {
            DecisionThreshold::Confidence(v) | DecisionThreshold::Distance(v) => v,
        }
    }

    /// Whether a candidate with the given fused confidence and best
    /// raw distance clears this boundary.
    pub fn accepts(&self, confidence: f32, best_distance: f32) -> bool {
        match *self {
            DecisionThreshold::Confidence(t) => confidence >= t,
            DecisionThreshold::Distance(t) => best_distance <= t,
        }
    }
}

/// Compute the decision threshold for one pair.
pub fn decision_threshold(cfg: &ThresholdConfig, inputs: ThresholdInputs) -> DecisionThreshold {
    match cfg.scale {
        ThresholdScale::Confidence => {
            DecisionThreshold::Confidence(confidence_threshold(cfg, inputs))
        }
        ThresholdScale::Distance => DecisionThreshold::Distance(distance_threshold(cfg, inputs)),
    }
}

/// Confidence scale: the identity's adaptive base relaxed by group
/// size. A lone face is held to a stricter minimum; group photos
/// systematically produce lower per-face quality and get more slack.
fn confidence_threshold(cfg: &ThresholdConfig, inputs: ThresholdInputs) -> f32 {
    let base = if inputs.identity_threshold > 0.0 {
        inputs.identity_threshold
    } else {
        cfg.base_confidence
    };

    let delta = match inputs.group_size {
        0 | 1 => cfg.group_delta_single,
        2..=3 => cfg.group_delta_leq3,
        4..=6 => cfg.group_delta_leq6,
        7..=10 => cfg.group_delta_leq10,
        _ => cfg.group_delta_gt10,
    };

    (base + delta).clamp(cfg.confidence_min, cfg.confidence_max)
}

/// Distance scale: base x group_factor x history_factor + quality
/// adjustment, clamped to [base + min_offset, base + max_offset].
/// Larger distance threshold = more lenient.
fn distance_threshold(cfg: &ThresholdConfig, inputs: ThresholdInputs) -> f32 {
    let base = cfg.base_distance;

    let group_factor = match inputs.group_size {
        0 | 1 => cfg.group_factor_single,
        2..=5 => cfg.group_factor_leq5,
        6..=20 => cfg.group_factor_leq20,
        _ => cfg.group_factor_gt20,
    };

    let history_factor = if inputs.success_rate > 0.8 {
        cfg.history_tighten
    } else if inputs.success_rate > 0.6 {
        cfg.history_neutral
    } else {
        cfg.history_loosen
    };

    let quality_adjustment = if inputs.quality >= 0.7 {
        cfg.quality_tighten_delta
    } else if inputs.quality >= 0.5 {
        0.0
    } else {
        cfg.quality_loosen_delta
    };

    (base * group_factor * history_factor + quality_adjustment).clamp(
        base + cfg.distance_min_offset,
        base + cfg.distance_max_offset,
    )
}
