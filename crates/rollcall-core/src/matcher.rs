//! Assignment Matcher: global greedy one-to-one assignment.
//!
//! Considers every (face, identity) candidate of one photo by
//! descending score, consuming each face and each identity at most
//! once. A pair is only accepted if it clears its precomputed decision
//! threshold. Per-face independent top-1 matching is deliberately not
//! used: it lets two faces claim the same identity.

use std::collections::HashSet;

use crate::threshold::DecisionThreshold;
use crate::types::{MatchCandidate, MatchDecision};

/// One scored pair fed into assignment.
#[derive(Debug, Clone)]
pub struct ScoredPair {
    pub candidate: MatchCandidate,
    pub boundary: DecisionThreshold,
    /// Best raw distance, consumed by distance-scale boundaries.
    pub best_distance: f32,
}

/// Assign identities to faces for one photo.
///
/// `face_count` is the number of detected faces; every face index in
/// `0..face_count` receives exactly one decision, unmatched when no
/// acceptable identity remains for it. Deterministic: ties on score
/// break by identity id, then face index.
pub fn assign(face_count: usize, mut pairs: Vec<ScoredPair>) -> Vec<MatchDecision> {
    // Descending score; deterministic tie-break so re-runs are
    // reproducible on identical input.
    pairs.sort_by(|a, b| {
        b.candidate
            .score
            .partial_cmp(&a.candidate.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate.identity_id.cmp(&b.candidate.identity_id))
            .then_with(|| a.candidate.face_index.cmp(&b.candidate.face_index))
    });

    let mut taken_identities: HashSet<String> = HashSet::new();
    let mut decisions: Vec<Option<MatchDecision>> = vec![None; face_count];

    for pair in pairs {
        let face = pair.candidate.face_index;
        if face >= face_count || decisions[face].is_some() {
            continue;
        }
        if taken_identities.contains(&pair.candidate.identity_id) {
            continue;
        }
        if !pair.boundary.accepts(pair.candidate.score, pair.best_distance) {
            // This pair is the face's best remaining identity (all
            // higher-scoring pairs for it were already consumed or
            // skipped). Best remaining below threshold => unmatched.
            tracing::debug!(
                face,
                identity = %pair.candidate.identity_id,
                score = pair.candidate.score,
                threshold = pair.boundary.value(),
                "best remaining candidate below threshold; face unmatched"
            );
            decisions[face] = Some(MatchDecision::unmatched(face));
            continue;
        }

        tracing::debug!(
            face,
            identity = %pair.candidate.identity_id,
            score = pair.candidate.score,
            threshold = pair.boundary.value(),
            "face assigned"
        );
        taken_identities.insert(pair.candidate.identity_id.clone());
        decisions[face] = Some(MatchDecision {
            face_index: face,
            identity_id: Some(pair.candidate.identity_id),
            confidence: pair.candidate.score,
            distances: pair.candidate.distances,
        });
    }

    decisions
        .into_iter()
        .enumerate()
        .map(|(i, d)| d.unwrap_or_else(|| MatchDecision::unmatched(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn pair(face: usize, identity: &str, score: f32, threshold: f32) -> ScoredPair {
        ScoredPair {
            candidate: MatchCandidate {
                face_index: face,
                identity_id: identity.to_string(),
                score,
                distances: BTreeMap::new(),
                threshold,
            },
            boundary: DecisionThreshold::Confidence(threshold),
            best_distance: f32::INFINITY,
        }
    }

    fn matched_ids(decisions: &[MatchDecision]) -> Vec<Option<&str>> {
        decisions.iter().map(|d| d.identity_id.as_deref()).collect()
    }

    #[test]
    fn test_simple_assignment() {
        let decisions = assign(1, vec![pair(0, "s1", 0.30, 0.25)]);
        assert_eq!(matched_ids(&decisions), vec![Some("s1")]);
        assert_eq!(decisions[0].confidence, 0.30);
    }

    #[test]
    fn test_below_threshold_is_unmatched() {
        let decisions = assign(1, vec![pair(0, "s1", 0.20, 0.25)]);
        assert_eq!(matched_ids(&decisions), vec![None]);
    }

    #[test]
    fn test_no_double_assignment_of_identity() {
        // Both faces prefer s1; only the higher scorer gets it, the
        // other falls back to its next identity.
        let decisions = assign(
            2,
            vec![
                pair(0, "s1", 0.9, 0.1),
                pair(1, "s1", 0.8, 0.1),
                pair(1, "s2", 0.5, 0.1),
            ],
        );
        assert_eq!(matched_ids(&decisions), vec![Some("s1"), Some("s2")]);
    }

    #[test]
    fn test_second_claimant_unmatched_even_above_threshold() {
        // Two faces both exceed their threshold against the only
        // identity; one face stays unmatched.
        let decisions = assign(2, vec![pair(0, "s1", 0.9, 0.1), pair(1, "s1", 0.8, 0.1)]);
        assert_eq!(matched_ids(&decisions), vec![Some("s1"), None]);
    }

    #[test]
    fn test_exact_tie_breaks_by_identity_then_face() {
        // Exact tie on score against the same identity: lower face
        // index wins deterministically.
        let decisions = assign(2, vec![pair(1, "s1", 0.9, 0.1), pair(0, "s1", 0.9, 0.1)]);
        assert_eq!(matched_ids(&decisions), vec![Some("s1"), None]);

        // One face, two identities, tied score: lower identity id wins.
        let decisions = assign(1, vec![pair(0, "s2", 0.9, 0.1), pair(0, "s1", 0.9, 0.1)]);
        assert_eq!(matched_ids(&decisions), vec![Some("s1")]);
    }

    #[test]
    fn test_best_remaining_below_threshold_closes_face() {
        // Face 0's best identity fails its threshold; the face must
        // not fall through to the weaker s2 even though s2's pair
        // would clear its own lower threshold.
        let decisions = assign(1, vec![pair(0, "s1", 0.30, 0.35), pair(0, "s2", 0.25, 0.10)]);
        assert_eq!(matched_ids(&decisions), vec![None]);
    }

    #[test]
    fn test_global_greedy_beats_per_face_order() {
        // Per-face top-1 in face order would give face 0 -> s1 and
        // leave face 1 (which matches s1 far better) with s2. Global
        // greedy assigns s1 to face 1 first.
        let decisions = assign(
            2,
            vec![
                pair(0, "s1", 0.6, 0.1),
                pair(0, "s2", 0.55, 0.1),
                pair(1, "s1", 0.95, 0.1),
            ],
        );
        assert_eq!(matched_ids(&decisions), vec![Some("s2"), Some("s1")]);
    }

    #[test]
    fn test_every_face_gets_a_decision() {
        let decisions = assign(4, vec![pair(2, "s1", 0.9, 0.1)]);
        assert_eq!(decisions.len(), 4);
        assert_eq!(
            matched_ids(&decisions),
            vec![None, None, Some("s1"), None]
        );
        for (i, d) in decisions.iter().enumerate() {
            assert_eq!(d.face_index, i);
        }
    }

    #[test]
    fn test_empty_input_empty_output() {
        assert!(assign(0, vec![]).is_empty());
    }

    #[test]
    fn test_idempotent_rerun() {
        let pairs = vec![
            pair(0, "s3", 0.8, 0.1),
            pair(0, "s1", 0.8, 0.1),
            pair(1, "s2", 0.8, 0.1),
            pair(1, "s1", 0.8, 0.1),
            pair(2, "s2", 0.4, 0.1),
        ];
        let first = assign(3, pairs.clone());
        for _ in 0..5 {
            let again = assign(3, pairs.clone());
            assert_eq!(matched_ids(&first), matched_ids(&again));
        }
    }

    #[test]
    fn test_accepted_decisions_unique() {
        // Property: no repeated identity and no repeated face among
        // accepted decisions, for a dense candidate grid.
        let mut pairs = Vec::new();
        for face in 0..5 {
            for s in 0..5 {
                let id = format!("s{s}");
                let score = 0.3 + 0.1 * ((face * 3 + s) % 7) as f32 / 7.0;
                pairs.push(pair(face, &id, score, 0.2));
            }
        }
        let decisions = assign(5, pairs);

        let mut seen_ids = HashSet::new();
        let mut seen_faces = HashSet::new();
        for d in decisions.iter().filter(|d| d.is_matched()) {
            assert!(seen_ids.insert(d.identity_id.clone().unwrap()));
            assert!(seen_faces.insert(d.face_index));
        }
    }
}
