//! Per-miner score computation and weight normalization (spec.md §4.6).
//!
//! This is the rewrite of `DefaultScoringV1`'s replacement: the legacy
//! EMA/volume-latency scoring strategy in
//! `original_source/neurons/scoring.py` is retired per spec.md §9 Open
//! Questions (see DESIGN.md); only the raw validated-order-count scoring
//! described in spec.md §4.6 is implemented.

use std::collections::HashMap;

use crate::model::ValidationResult;

/// Counts `validated_orders` per miner over a window, optionally filtering
/// to a single user address before counting (spec.md §4.6
/// `compute_scores_from_results`).
pub fn compute_scores_from_results(
    results: &[ValidationResult],
    filter_user_address: Option<&str>,
) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for result in results {
        let Some(miner_id) = result.miner_id.as_deref() else {
            continue;
        };
        if let Some(filter) = filter_user_address {
            if result.user_address.as_deref() != Some(filter) {
                continue;
            }
        }
        let entry = scores.entry(miner_id.to_owned()).or_insert(0.0);
        if result.success {
            *entry += 1.0;
        } else {
            scores.entry(miner_id.to_owned()).or_insert(0.0);
        }
    }

    scores
}

/// Normalizes raw scores into a weight vector, per spec.md §4.6
/// `normalize_scores_to_weights`:
/// 1. empty + creator configured -> `{creator: 1.0}`.
/// 2. empty + no creator -> `{}`.
/// 3. total score is 0 (miners exist, none succeeded) -> equal weights.
/// 4. else -> proportional to score.
/// Then, if `burn_percentage > 0` and a creator is configured, blend in the
/// burn allocation.
pub fn normalize_scores_to_weights(
    scores: &HashMap<String, f64>,
    burn_percentage: f64,
    creator_miner_id: Option<&str>,
) -> HashMap<String, f64> {
    let mut weights: HashMap<String, f64> = if scores.is_empty() {
        match creator_miner_id {
            Some(creator) => {
                let mut w = HashMap::new();
                w.insert(creator.to_owned(), 1.0);
                return w;
            }
            None => return HashMap::new(),
        }
    } else {
        let total: f64 = scores.values().sum();
        if total == 0.0 {
            let equal = 1.0 / scores.len() as f64;
            scores.keys().map(|k| (k.clone(), equal)).collect()
        } else {
            scores
                .iter()
                .map(|(k, v)| (k.clone(), v / total))
                .collect()
        }
    };

    if burn_percentage > 0.0 {
        if let Some(creator) = creator_miner_id {
            if weights.is_empty() {
                weights.insert(creator.to_owned(), 1.0);
            } else {
                for weight in weights.values_mut() {
                    *weight *= 1.0 - burn_percentage;
                }
                let entry = weights.entry(creator.to_owned()).or_insert(0.0);
                *entry += burn_percentage;
            }
        }
    }

    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(miner: &str, success: bool) -> ValidationResult {
        ValidationResult::new("o", "s", Some(miner.to_owned()), success, None)
    }

    #[test]
    fn happy_path_weights_match_spec_example() {
        let results = vec![
            result("A", true),
            result("A", true),
            result("B", false),
        ];
        let scores = compute_scores_from_results(&results, None);
        let weights = normalize_scores_to_weights(&scores, 0.0, None);
        assert!((weights["A"] - 2.0 / 3.0).abs() < 1e-9);
        assert!((weights["B"] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn burn_blend_scales_miners_and_adds_creator() {
        let results = vec![
            result("A", true),
            result("A", true),
            result("B", false),
        ];
        let scores = compute_scores_from_results(&results, None);
        let weights = normalize_scores_to_weights(&scores, 0.2, Some("C"));
        assert!((weights["A"] - 0.8 * 2.0 / 3.0).abs() < 1e-9);
        assert!((weights["B"] - 0.8 * 1.0 / 3.0).abs() < 1e-9);
        assert!((weights["C"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn empty_scores_with_creator_burns_fully() {
        let scores = HashMap::new();
        let weights = normalize_scores_to_weights(&scores, 0.0, Some("C"));
        assert_eq!(weights.len(), 1);
        assert!((weights["C"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_scores_without_creator_is_empty() {
        let scores = HashMap::new();
        let weights = normalize_scores_to_weights(&scores, 0.0, None);
        assert!(weights.is_empty());
    }

    #[test]
    fn all_failures_yield_equal_weights() {
        let results = vec![result("A", false), result("B", false)];
        let scores = compute_scores_from_results(&results, None);
        let weights = normalize_scores_to_weights(&scores, 0.0, None);
        assert!((weights["A"] - 0.5).abs() < 1e-9);
        assert!((weights["B"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn filter_by_user_address_excludes_other_orders() {
        let mut r1 = result("A", true);
        r1.user_address = Some("0xabc".to_owned());
        let mut r2 = result("A", true);
        r2.user_address = Some("0xdef".to_owned());

        let scores = compute_scores_from_results(&[r1, r2], Some("0xabc"));
        assert_eq!(scores["A"], 1.0);
    }
}
