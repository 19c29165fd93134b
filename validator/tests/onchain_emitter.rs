//! Exercises `process_weights_pure`'s branch selection (spec.md §4.7, §8
//! "Max-weight cap" / "Min-allowed padding") without a live substrate
//! connection.

use minotaur_validator::onchain_emitter::process_weights_pure;

#[test]
fn uniform_fallback_when_no_weights_are_set() {
    let (uids, weights) = process_weights_pure(&[], &[], 4, 8, 0.5);
    assert_eq!(uids, vec![0, 1, 2, 3]);
    assert_eq!(weights, vec![0.25; 4]);
}

#[test]
fn uniform_fallback_when_node_count_below_min_allowed() {
    let (uids, weights) = process_weights_pure(&[0, 1], &[0.4, 0.6], 2, 8, 0.5);
    assert_eq!(uids, vec![0, 1]);
    assert_eq!(weights, vec![0.5, 0.5]);
}

#[test]
fn padding_branch_preserves_node_count_below_min_allowed_weights() {
    let (uids, weights) = process_weights_pure(&[1, 3], &[0.5, 0.5], 5, 4, 0.9);
    assert_eq!(uids.len(), 5);
    assert_eq!(weights.len(), 5);
    let sum: f64 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
}

#[test]
fn quantile_trim_branch_caps_max_weight_under_limit() {
    let uids: Vec<u16> = (0..10).collect();
    let weights = vec![0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.91];
    let (_, out_weights) = process_weights_pure(&uids, &weights, 10, 4, 0.2);
    let max = out_weights.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max <= 0.2 + 1e-6, "max was {max}");
    let sum: f64 = out_weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
}
