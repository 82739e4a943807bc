//! Nearest-neighbor identity matcher.
//!
//! An identity's distance to the probe is the minimum Euclidean
//! distance over all of its enrollment embeddings (best-case match
//! against any enrollment photo). The winner is the global arg-max of
//! `confidence = 1 - distance` across identities; only the winner is
//! checked against the acceptance threshold. A sub-threshold best
//! match therefore shadows every other candidate — deliberate fidelity
//! to the deployed behavior, see DESIGN.md before "fixing" it.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};

/// Default acceptance threshold on confidence.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Bounds within which the threshold may be configured.
pub const CONFIDENCE_THRESHOLD_RANGE: (f32, f32) = (0.3, 0.9);

/// Minimum-distance matcher over the enrolled gallery.
#[derive(Debug, Clone)]
pub struct NearestMatcher {
    confidence_threshold: f32,
}

impl Default for NearestMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl NearestMatcher {
    /// Build a matcher, clamping the threshold into the supported
    /// `[0.3, 0.9]` range.
    pub fn new(confidence_threshold: f32) -> Self {
        let (lo, hi) = CONFIDENCE_THRESHOLD_RANGE;
        Self {
            confidence_threshold: confidence_threshold.clamp(lo, hi),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Match a probe embedding against every enrolled identity.
    ///
    /// Returns `None` when no identity is enrolled or when the best
    /// candidate's confidence does not exceed the threshold. Ties on
    /// confidence are broken by enumeration order (first encountered
    /// wins) — an accepted nondeterminism under floating-point
    /// equality, since map iteration order is unspecified.
    pub fn recognize(&self, gallery: &Gallery, probe: &Embedding) -> Option<MatchResult> {
        if gallery.is_empty() {
            return None;
        }

        let best = gallery.with_identities(|identities| {
            let mut best: Option<MatchResult> = None;

            for (student_id, identity) in identities {
                let Some(distance) = identity
                    .embeddings
                    .iter()
                    .map(|e| probe.euclidean_distance(e))
                    .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                else {
                    continue;
                };

                let confidence = (1.0 - distance).clamp(0.0, 1.0);
                let is_better = match &best {
                    None => true,
                    Some(b) => confidence > b.confidence,
                };
                if is_better {
                    best = Some(MatchResult {
                        student_id: student_id.clone(),
                        name: identity.name.clone(),
                        confidence,
                        raw_distance: distance,
                    });
                }
            }

            best
        });

        match best {
            Some(result) if result.confidence > self.confidence_threshold => {
                tracing::debug!(
                    student_id = %result.student_id,
                    confidence = result.confidence,
                    distance = result.raw_distance,
                    "probe matched"
                );
                Some(result)
            }
            Some(result) => {
                tracing::debug!(
                    best_candidate = %result.student_id,
                    confidence = result.confidence,
                    threshold = self.confidence_threshold,
                    "best candidate below threshold"
                );
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    /// Gallery with one identity per (id, name, embedding-set).
    fn gallery_of(entries: &[(&str, &str, Vec<Vec<f32>>)]) -> Gallery {
        let gallery = Gallery::new(5);
        for (id, name, embeddings) in entries {
            for values in embeddings {
                gallery.enroll(id, name, emb(values.clone()));
            }
        }
        gallery
    }

    #[test]
    fn test_empty_gallery_short_circuits() {
        let gallery = Gallery::new(5);
        let result = NearestMatcher::default().recognize(&gallery, &emb(vec![0.1, 0.2]));
        assert!(result.is_none());
    }

    #[test]
    fn test_exact_match_full_confidence() {
        let gallery = gallery_of(&[("S1", "Anong", vec![vec![0.1, 0.2, 0.3]])]);
        let result = NearestMatcher::default()
            .recognize(&gallery, &emb(vec![0.1, 0.2, 0.3]))
            .unwrap();
        assert_eq!(result.student_id, "S1");
        assert_eq!(result.name, "Anong");
        assert!((result.confidence - 1.0).abs() < 1e-6);
        assert!(result.raw_distance < 1e-6);
    }

    #[test]
    fn test_identity_distance_is_minimum_over_embeddings() {
        // One far embedding, one near: the near one must represent S1.
        let gallery = gallery_of(&[(
            "S1",
            "Anong",
            vec![vec![0.9, 0.9], vec![0.1, 0.1]],
        )]);
        let result = NearestMatcher::default()
            .recognize(&gallery, &emb(vec![0.1, 0.1]))
            .unwrap();
        assert!(result.raw_distance < 1e-6);
    }

    #[test]
    fn test_nearest_identity_wins() {
        let gallery = gallery_of(&[
            ("S1", "Anong", vec![vec![0.0, 0.0]]),
            ("S2", "Boon", vec![vec![0.1, 0.0]]),
        ]);
        let result = NearestMatcher::default()
            .recognize(&gallery, &emb(vec![0.09, 0.0]))
            .unwrap();
        assert_eq!(result.student_id, "S2");
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let gallery = gallery_of(&[("S1", "Anong", vec![vec![0.0, 0.0]])]);
        // Distance 0.5 → confidence 0.5, below the 0.6 threshold.
        let result = NearestMatcher::default().recognize(&gallery, &emb(vec![0.3, 0.4]));
        assert!(result.is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let gallery = gallery_of(&[("S1", "Anong", vec![vec![0.0, 0.0]])]);
        // Distance exactly 0.4 → confidence exactly at the threshold:
        // "only if confidence > threshold" means rejection.
        let matcher = NearestMatcher::new(0.6);
        let result = matcher.recognize(&gallery, &emb(vec![0.4, 0.0]));
        assert!(result.is_none());
    }

    #[test]
    fn test_threshold_monotonicity() {
        let gallery = gallery_of(&[("S1", "Anong", vec![vec![0.0, 0.0]])]);
        let probe = emb(vec![0.2, 0.1]); // distance ≈ 0.2236, confidence ≈ 0.776

        // Raising the threshold can only turn an accept into a reject.
        let mut last_accepted = true;
        for threshold in [0.3f32, 0.5, 0.7, 0.8, 0.9] {
            let accepted = NearestMatcher::new(threshold)
                .recognize(&gallery, &probe)
                .is_some();
            assert!(
                accepted <= last_accepted,
                "accept flipped back on at threshold {threshold}"
            );
            last_accepted = accepted;
        }
    }

    #[test]
    fn test_sub_threshold_winner_shadows_runner_up() {
        // Documented arg-max behavior: the global winner is below
        // threshold, so the whole call is a non-match even though the
        // runner-up is also below threshold — no partial results.
        let gallery = gallery_of(&[
            ("S1", "Anong", vec![vec![0.0, 0.0]]),
            ("S2", "Boon", vec![vec![1.0, 1.0]]),
        ]);
        let result = NearestMatcher::new(0.9).recognize(&gallery, &emb(vec![0.2, 0.2]));
        assert!(result.is_none());
    }

    #[test]
    fn test_threshold_clamped_to_supported_range() {
        assert_eq!(NearestMatcher::new(0.05).confidence_threshold(), 0.3);
        assert_eq!(NearestMatcher::new(0.99).confidence_threshold(), 0.9);
        assert_eq!(NearestMatcher::new(0.6).confidence_threshold(), 0.6);
    }

    #[test]
    fn test_planted_identity_wins_among_many() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let gallery = Gallery::new(5);
        for i in 0..50 {
            let values: Vec<f32> = (0..64).map(|_| rng.gen_range(0.3..1.0)).collect();
            gallery.enroll(&format!("S{i:03}"), "Decoy", emb(values));
        }
        let probe: Vec<f32> = (0..64).map(|_| rng.gen_range(0.3..1.0)).collect();
        let planted: Vec<f32> = probe.iter().map(|v| v + 0.001).collect();
        gallery.enroll("S999", "Target", emb(planted));

        let result = NearestMatcher::new(0.9)
            .recognize(&gallery, &emb(probe))
            .unwrap();
        assert_eq!(result.student_id, "S999");
    }

    #[test]
    fn test_confidence_clamped_for_far_probes() {
        let gallery = gallery_of(&[("S1", "Anong", vec![vec![0.0, 0.0]])]);
        // Distance > 1 would give negative confidence; must clamp to 0.
        let matcher = NearestMatcher::new(0.3);
        assert!(matcher.recognize(&gallery, &emb(vec![3.0, 4.0])).is_none());
    }
}
