//! Normalizes a `hotkey -> weight` map under subnet constraints and
//! submits the `set_weights` extrinsic (spec.md §4.7).
//!
//! Grounded on `original_source/neurons/onchain_emitter.py`:
//! `process_weights_for_netuid` and `_normalize_max_weight` are ported
//! arithmetic-for-arithmetic (vectorized with `ndarray`-free plain `Vec<f64>`
//! math, since the inputs here are always small per-subnet vectors).

use log::{error, warn};
use subxt::dynamic::Value;

use crate::chain::SubstrateClient;
use crate::error::WeightEmissionError;
use crate::metagraph::MetagraphManager;

const U16_MAX: f64 = 65535.0;
const DEFAULT_MIN_ALLOWED_WEIGHTS: u64 = 8;
const DEFAULT_MAX_WEIGHT_LIMIT: f64 = 0.1;
const DEFAULT_VERSION_KEY: u64 = 6;
const DEFAULT_EXCLUDE_QUANTILE: f64 = 0.0;

pub struct OnchainWeightEmitter {
    client: SubstrateClient,
    netuid: u16,
}

impl OnchainWeightEmitter {
    pub fn new(client: SubstrateClient, netuid: u16) -> Self {
        Self { client, netuid }
    }

    async fn min_allowed_weights(&self) -> u64 {
        self.client
            .query_u128(
                "SubtensorModule",
                "MinAllowedWeights",
                vec![Value::u128(self.netuid as u128)],
                None,
            )
            .await
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_MIN_ALLOWED_WEIGHTS)
    }

    async fn max_weight_limit(&self) -> f64 {
        self.client
            .query_u128(
                "SubtensorModule",
                "MaxWeightsLimit",
                vec![Value::u128(self.netuid as u128)],
                None,
            )
            .await
            .map(|v| v as f64 / U16_MAX)
            .unwrap_or(DEFAULT_MAX_WEIGHT_LIMIT)
    }

    async fn version_key(&self) -> u64 {
        self.client
            .query_u128(
                "SubtensorModule",
                "WeightsVersionKey",
                vec![Value::u128(self.netuid as u128)],
                None,
            )
            .await
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_VERSION_KEY)
    }

    /// Transforms raw per-uid weights into a subnet-valid `(uids, weights)`
    /// pair (spec.md §4.7 `process_weights_for_netuid`).
    pub async fn process_weights_for_netuid(
        &self,
        uids: &[u16],
        weights: &[f64],
        node_count: usize,
    ) -> (Vec<u16>, Vec<f64>) {
        let min_allowed_weights = self.min_allowed_weights().await as usize;
        let max_weight_limit = self.max_weight_limit().await;
        process_weights_pure(uids, weights, node_count, min_allowed_weights, max_weight_limit)
    }

    /// Refreshes the metagraph, filters the weight map to known hotkeys,
    /// normalizes under subnet constraints, and submits `set_weights`
    /// (spec.md §4.8 "on-chain weight callback").
    ///
    /// `seed` is the validator's sr25519 mini-secret seed, used directly to
    /// derive the extrinsic-signing keypair; the `Signer` abstraction of
    /// spec.md §9 only covers the aggregator's `{sr25519, ed25519,
    /// placeholder}` submission path, since `set_weights` always requires a
    /// real sr25519 substrate keypair, never a placeholder.
    pub async fn emit(
        &self,
        metagraph: &MetagraphManager,
        weights_by_hotkey: &std::collections::HashMap<String, f64>,
        seed: &[u8; 32],
    ) -> Result<(), WeightEmissionError> {
        let snapshot = metagraph
            .refresh(false)
            .await
            .map_err(|e| WeightEmissionError::ExtrinsicFailed(e.to_string()))?;

        if !snapshot.validator_permit {
            return Err(WeightEmissionError::MissingUid(
                "validator".to_owned(),
                self.netuid,
            ));
        }

        let mut uids = Vec::new();
        let mut weights = Vec::new();
        for (hotkey, weight) in weights_by_hotkey {
            match snapshot.uid_for_hotkey.get(hotkey) {
                Some(&uid) => {
                    uids.push(uid);
                    weights.push(*weight);
                }
                None => warn!(target: "onchain_emitter", "unknown hotkey {hotkey} not present in metagraph, dropping"),
            }
        }

        let sum: f64 = weights_by_hotkey.values().sum();
        if weights_by_hotkey.is_empty() {
            warn!(target: "onchain_emitter", "empty weight map, emitting uniform fallback");
        } else if (sum - 1.0).abs() > 1e-3 {
            warn!(target: "onchain_emitter", "input weights do not sum to ~1.0 (got {sum})");
        }

        let (processed_uids, processed_weights) = self
            .process_weights_for_netuid(&uids, &weights, snapshot.size)
            .await;

        let u16_weights: Vec<u16> = processed_weights
            .iter()
            .map(|w| (w * U16_MAX).round().clamp(0.0, U16_MAX) as u16)
            .collect();

        let version_key = self.version_key().await;

        let keypair = subxt_signer::sr25519::Keypair::from_secret_key(*seed)
            .map_err(|e| WeightEmissionError::ExtrinsicFailed(e.to_string()))?;

        self.client
            .submit_set_weights(self.netuid, &processed_uids, &u16_weights, version_key, &keypair)
            .await
            .map_err(|e| {
                error!(target: "onchain_emitter", "extrinsic submission failed: {e}");
                WeightEmissionError::ExtrinsicFailed(e)
            })
    }
}

/// Pure arithmetic core of `process_weights_for_netuid`, split out from the
/// chain-querying wrapper so the branch selection (uniform fallback, padded
/// normalization, exclude-quantile trim) can be tested without a live
/// substrate connection.
pub fn process_weights_pure(
    uids: &[u16],
    weights: &[f64],
    node_count: usize,
    min_allowed_weights: usize,
    max_weight_limit: f64,
) -> (Vec<u16>, Vec<f64>) {
    let non_zero: Vec<(u16, f64)> = uids
        .iter()
        .zip(weights.iter())
        .filter(|(_, &w)| w > 0.0)
        .map(|(&u, &w)| (u, w))
        .collect();

    let (processed_uids, processed_weights) = if non_zero.is_empty() || node_count < min_allowed_weights {
        let n = node_count.max(1);
        let uniform = 1.0 / n as f64;
        ((0..n as u16).collect::<Vec<_>>(), vec![uniform; n])
    } else if non_zero.len() < min_allowed_weights {
        let mut padded = vec![1e-5_f64; node_count];
        for (uid, w) in &non_zero {
            padded[*uid as usize] += w;
        }
        let normalized = normalize_max_weight(&padded, max_weight_limit);
        ((0..node_count as u16).collect::<Vec<_>>(), normalized)
    } else {
        let values: Vec<f64> = non_zero.iter().map(|(_, w)| *w).collect();
        let max_exclude = (non_zero.len() - min_allowed_weights) as f64 / non_zero.len() as f64;
        let quantile = (DEFAULT_EXCLUDE_QUANTILE / U16_MAX).min(max_exclude);
        let cutoff = quantile_of(&values, quantile);

        let kept: Vec<(u16, f64)> = non_zero.into_iter().filter(|(_, w)| *w >= cutoff).collect();
        let kept_uids: Vec<u16> = kept.iter().map(|(u, _)| *u).collect();
        let kept_weights: Vec<f64> = kept.iter().map(|(_, w)| *w).collect();
        let normalized = normalize_max_weight(&kept_weights, max_weight_limit);
        (kept_uids, normalized)
    };

    let sum: f64 = processed_weights.iter().sum();
    let final_weights = if sum > 0.0 {
        processed_weights.iter().map(|w| w / sum).collect()
    } else {
        processed_weights
    };

    (processed_uids, final_weights)
}

/// Ports `_normalize_max_weight`: if the max normalized weight is already
/// within `limit`, just normalize; otherwise solve for a cutoff that
/// clips the heaviest entries down to exactly `limit` after renormalizing.
fn normalize_max_weight(weights: &[f64], limit: f64) -> Vec<f64> {
    let epsilon = 1e-7;
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }

    let sum: f64 = weights.iter().sum();
    if sum == 0.0 || (n as f64) * limit <= 1.0 {
        return vec![1.0 / n as f64; n];
    }

    let mut sorted = weights.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let values_sum: f64 = sorted.iter().sum();
    let estimation: Vec<f64> = sorted.iter().map(|v| v / values_sum).collect();

    let max_estimation = estimation.iter().cloned().fold(f64::MIN, f64::max);
    if max_estimation <= limit {
        return weights.iter().map(|w| w / sum).collect();
    }

    let mut cumsum = vec![0.0; n];
    let mut running = 0.0;
    for (i, e) in estimation.iter().enumerate() {
        running += e;
        cumsum[i] = running;
    }

    let estimation_sum: Vec<f64> = (0..n)
        .map(|i| (n - i - 1) as f64 * estimation[i])
        .collect();

    let n_values = (0..n)
        .filter(|&i| estimation[i] / (estimation_sum[i] + cumsum[i] + epsilon) < limit)
        .count()
        .max(1);

    let cutoff_scale = (limit * cumsum[n_values - 1] - epsilon) / (1.0 - limit * (n - n_values) as f64);
    let cutoff = cutoff_scale * values_sum;

    let clipped: Vec<f64> = weights.iter().map(|&w| if w > cutoff { cutoff } else { w }).collect();
    let clipped_sum: f64 = clipped.iter().sum();
    if clipped_sum == 0.0 {
        vec![1.0 / n as f64; n]
    } else {
        clipped.iter().map(|w| w / clipped_sum).collect()
    }
}

/// Linear-interpolation quantile, matching `numpy.quantile`'s default
/// method closely enough for the exclude-quantile trim (spec.md §4.7).
fn quantile_of(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_max_weight_is_noop_under_limit() {
        let weights = vec![0.1, 0.2, 0.3, 0.4];
        let out = normalize_max_weight(&weights, 0.5);
        let sum: f64 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(out.iter().all(|&w| w <= 0.5 + 1e-6));
    }

    #[test]
    fn normalize_max_weight_caps_dominant_entry() {
        let weights = vec![0.01, 0.01, 0.01, 0.97];
        let out = normalize_max_weight(&weights, 0.3);
        let max = out.iter().cloned().fold(f64::MIN, f64::max);
        assert!(max <= 0.3 + 1e-6, "max was {max}");
        let sum: f64 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn quantile_of_interpolates_between_neighbors() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((quantile_of(&values, 0.0) - 1.0).abs() < 1e-9);
        assert!((quantile_of(&values, 1.0) - 4.0).abs() < 1e-9);
        assert!((quantile_of(&values, 0.5) - 2.5).abs() < 1e-9);
    }
}

// `process_weights_for_netuid`'s branch selection (uniform fallback,
// min-allowed-padding, exclude-quantile trim) is exercised directly in
// `tests/onchain_emitter.rs` via `process_weights_pure`, with fixed
// `min_allowed_weights`/`max_weight_limit` values standing in for the live
// chain queries `process_weights_for_netuid` itself performs.
