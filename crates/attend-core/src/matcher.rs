//! Nearest-neighbour identity matching over known encodings.

use crate::types::{Encoding, KnownEncoding};

/// Result of matching an observed encoding against the known encodings.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest known encoding, `None` when nothing was compared.
    pub distance: Option<f32>,
    /// Identity owning the closest encoding, set only when accepted.
    pub identity_id: Option<String>,
    /// Position of the closest encoding in store order.
    pub index: Option<usize>,
}

impl MatchResult {
    fn rejected(distance: Option<f32>, index: Option<usize>) -> Self {
        Self {
            matched: false,
            distance,
            identity_id: None,
            index,
        }
    }

    /// Accepted identity id, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }
}

/// Strategy for comparing an observed encoding against the known set.
pub trait Matcher {
    fn compare(&self, observed: &Encoding, known: &[KnownEncoding], threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Accepts the closest known encoding when its distance is strictly below
/// the threshold. Equal distances keep the earliest entry in store order,
/// which is the enrollment scan order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, observed: &Encoding, known: &[KnownEncoding], threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in known.iter().enumerate() {
            let distance = observed.euclidean_distance(&entry.encoding);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((i, distance)),
            }
        }

        match best {
            Some((idx, distance)) if distance < threshold => MatchResult {
                matched: true,
                distance: Some(distance),
                identity_id: Some(known[idx].identity_id.clone()),
                index: Some(idx),
            },
            Some((idx, distance)) => MatchResult::rejected(Some(distance), Some(idx)),
            None => MatchResult::rejected(None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(id: &str, values: Vec<f32>) -> KnownEncoding {
        KnownEncoding {
            identity_id: id.into(),
            encoding: Encoding::new(values),
        }
    }

    #[test]
    fn test_empty_known_never_matches() {
        let observed = Encoding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&observed, &[], 10.0);
        assert!(!result.matched);
        assert_eq!(result.distance, None);
        assert_eq!(result.identity(), None);
    }

    #[test]
    fn test_closest_entry_wins() {
        let observed = Encoding::new(vec![1.0, 0.0]);
        let gallery = vec![
            known("a", vec![0.0, 1.0]),
            known("b", vec![0.9, 0.1]),
            known("c", vec![-1.0, 0.0]),
        ];
        let result = EuclideanMatcher.compare(&observed, &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.identity(), Some("b"));
        assert_eq!(result.index, Some(1));
    }

    #[test]
    fn test_threshold_is_strict() {
        let observed = Encoding::new(vec![0.0, 0.0]);
        let gallery = vec![known("a", vec![0.0, 0.5])];

        let at_threshold = EuclideanMatcher.compare(&observed, &gallery, 0.5);
        assert!(!at_threshold.matched);
        assert_eq!(at_threshold.identity(), None);
        assert!((at_threshold.distance.unwrap() - 0.5).abs() < 1e-6);

        let above = EuclideanMatcher.compare(&observed, &gallery, 0.5001);
        assert_eq!(above.identity(), Some("a"));
    }

    #[test]
    fn test_tie_keeps_first_in_store_order() {
        let observed = Encoding::new(vec![0.0, 0.0]);
        let gallery = vec![
            known("far", vec![3.0, 3.0]),
            known("first", vec![0.0, 0.2]),
            known("second", vec![0.2, 0.0]),
        ];
        let result = EuclideanMatcher.compare(&observed, &gallery, 1.0);
        assert_eq!(result.identity(), Some("first"));
        assert_eq!(result.index, Some(1));
    }

    #[test]
    fn test_multiple_encodings_same_identity() {
        let observed = Encoding::new(vec![0.0, 1.0]);
        let gallery = vec![
            known("a", vec![1.0, 0.0]),
            known("b", vec![-1.0, 0.0]),
            known("a", vec![0.05, 0.95]),
        ];
        let result = EuclideanMatcher.compare(&observed, &gallery, 0.3);
        assert_eq!(result.identity(), Some("a"));
        assert_eq!(result.index, Some(2));
    }
}
