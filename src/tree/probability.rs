//! Probability normalization for sibling cohorts.

use super::node::PROBABILITY_TOLERANCE;

/// Whether `weights` sum to 1.0 within `tolerance`.
pub fn sums_to_one(weights: &[f64], tolerance: f64) -> bool {
    let sum: f64 = weights.iter().sum();
    (sum - 1.0).abs() <= tolerance
}

/// Normalize `weights` in place so they sum to 1.0.
///
/// An all-zero cohort is distributed equally (`1/k` each). After scaling,
/// the sum is re-asserted within [`PROBABILITY_TOLERANCE`] and scaled one
/// more time if needed. Returns whether the invariant holds afterwards;
/// callers treat `false` as a schema failure.
pub fn normalize(weights: &mut [f64]) -> bool {
    if weights.is_empty() {
        return false;
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return false;
    }

    let sum: f64 = weights.iter().sum();
    if sum == 0.0 {
        let equal = 1.0 / weights.len() as f64;
        for w in weights.iter_mut() {
            *w = equal;
        }
        return true;
    }

    for w in weights.iter_mut() {
        *w /= sum;
    }

    if !sums_to_one(weights, PROBABILITY_TOLERANCE) {
        let sum: f64 = weights.iter().sum();
        if sum == 0.0 {
            return false;
        }
        for w in weights.iter_mut() {
            *w /= sum;
        }
    }

    sums_to_one(weights, PROBABILITY_TOLERANCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scales_to_unit_sum() {
        let mut weights = vec![0.7, 0.5, 0.3];
        assert!(normalize(&mut weights));
        assert!((weights[0] - 0.4667).abs() < 1e-4);
        assert!((weights[1] - 0.3333).abs() < 1e-4);
        assert!((weights[2] - 0.2000).abs() < 1e-4);
        assert!(sums_to_one(&weights, 1e-9));
    }

    #[test]
    fn test_zero_sum_distributes_equally() {
        let mut weights = vec![0.0, 0.0, 0.0, 0.0];
        assert!(normalize(&mut weights));
        assert!(weights.iter().all(|w| (*w - 0.25).abs() < 1e-12));
    }

    #[test]
    fn test_rejects_empty_and_invalid() {
        let mut empty: Vec<f64> = vec![];
        assert!(!normalize(&mut empty));

        let mut negative = vec![0.5, -0.1];
        assert!(!normalize(&mut negative));

        let mut nan = vec![0.5, f64::NAN];
        assert!(!normalize(&mut nan));
    }

    #[test]
    fn test_single_weight_becomes_one() {
        let mut weights = vec![0.2];
        assert!(normalize(&mut weights));
        assert!((weights[0] - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_normalized_weights_sum_to_one(
            weights in proptest::collection::vec(0.0f64..10.0, 1..=5)
        ) {
            let mut weights = weights;
            prop_assert!(normalize(&mut weights));
            prop_assert!(sums_to_one(&weights, 1e-3));
        }

        #[test]
        fn prop_normalization_is_idempotent(
            weights in proptest::collection::vec(0.001f64..10.0, 1..=5)
        ) {
            let mut once = weights;
            prop_assert!(normalize(&mut once));
            let mut twice = once.clone();
            prop_assert!(normalize(&mut twice));
            for (a, b) in once.iter().zip(twice.iter()) {
                prop_assert!((a - b).abs() < 1e-6);
            }
        }

        #[test]
        fn prop_zero_cohort_yields_equal_split(k in 1usize..=5) {
            let mut weights = vec![0.0; k];
            prop_assert!(normalize(&mut weights));
            let expected = 1.0 / k as f64;
            for w in &weights {
                prop_assert!((w - expected).abs() < 1e-12);
            }
        }
    }
}
