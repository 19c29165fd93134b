//! Data model shared across the validation and weighting engine.
//!
//! Mirrors spec.md §3: `Order`, `ValidationResult`, `ValidationHistory`,
//! `EpochResult`, `StateRecord`, `MetagraphSnapshot`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pending order as consumed from the aggregator.
///
/// `quote_details` is forwarded to the simulator opaquely; the engine only
/// reaches into it to extract `solver_id`/`miner_id`/user address/chain id.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "solverId")]
    pub solver_id: Option<String>,
    #[serde(rename = "minerId")]
    pub miner_id: Option<String>,
    #[serde(rename = "quoteDetails", default)]
    pub quote_details: Value,
    #[serde(default)]
    pub signature: Option<String>,
}

impl Order {
    /// The user address embedded in the first available input, if any.
    pub fn user_address(&self) -> Option<String> {
        self.quote_details
            .get("availableInputs")
            .and_then(Value::as_array)
            .and_then(|inputs| inputs.first())
            .and_then(|input| input.get("user"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// The chain id this order settles on, used to pick a simulator RPC URL.
    ///
    /// Tries, in order (ported from
    /// `original_source/neurons/simulator.py::_extract_chain_id`):
    /// `settlement.chainId`, `originChainId`, then the ERC-7930 interop
    /// address carried by the first available input or requested output
    /// (checking the OIF-nested `details.*` location before the flat one).
    pub fn chain_id(&self) -> Option<u64> {
        self.quote_details
            .get("settlement")
            .and_then(|s| s.get("chainId"))
            .and_then(Value::as_u64)
            .or_else(|| {
                self.quote_details
                    .get("originChainId")
                    .and_then(Value::as_u64)
            })
            .or_else(|| self.chain_id_from_interop_assets("availableInputs"))
            .or_else(|| self.chain_id_from_interop_assets("requestedOutputs"))
    }

    fn chain_id_from_interop_assets(&self, field: &str) -> Option<u64> {
        let details = self.quote_details.get("details");
        let entries = details
            .and_then(|d| d.get(field))
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
            .or_else(|| self.quote_details.get(field).and_then(Value::as_array))?;

        let asset = entries.first()?.get("asset")?.as_str()?;
        parse_chain_id_from_interop(asset)
    }
}

/// Parses the chain id out of an ERC-7930 interop address:
/// `0x` + version(1B) + chain_type(2B) + chain_ref_len(1B) + addr_len(1B) +
/// chain_ref(chain_ref_len B) + address. A zero-length chain reference means
/// the default chain (1).
fn parse_chain_id_from_interop(interop_address: &str) -> Option<u64> {
    let hex_part = interop_address.strip_prefix("0x")?;
    if hex_part.len() < 10 {
        return None;
    }

    let chain_ref_len = u8::from_str_radix(&hex_part[6..8], 16).ok()? as usize;
    if chain_ref_len == 0 {
        return Some(1);
    }

    let chain_ref_start = 10;
    let chain_ref_end = chain_ref_start + chain_ref_len * 2;
    let chain_ref_hex = hex_part.get(chain_ref_start..chain_ref_end)?;
    u64::from_str_radix(chain_ref_hex, 16).ok()
}

/// Outcome of simulating a single order. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub order_id: String,
    pub solver_id: String,
    pub miner_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_s: Option<f64>,
    pub user_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new(
        order_id: impl Into<String>,
        solver_id: impl Into<String>,
        miner_id: Option<String>,
        success: bool,
        error_message: Option<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            solver_id: solver_id.into(),
            miner_id,
            success,
            error_message,
            execution_time_s: None,
            user_address: None,
            timestamp: Utc::now(),
        }
    }
}

/// Summary statistics attached to an `EpochResult`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EpochStats {
    pub total_simulations: usize,
    pub valid_miners: usize,
    pub total_miners: usize,
    pub burn_percentage: f64,
    pub burn_fallback: bool,
    pub error: Option<String>,
}

/// Result of aggregating validation results into a weight vector for one epoch.
#[derive(Debug, Clone)]
pub struct EpochResult {
    pub epoch_key: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub validation_results: Vec<ValidationResult>,
    pub weights: HashMap<String, f64>,
    pub stats: EpochStats,
}

/// Persisted validator runtime state (`state_store.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(default)]
    pub last_epoch_index: Option<u64>,
    #[serde(default)]
    pub watermark_to_ts: Option<String>,
    #[serde(default)]
    pub last_scores: HashMap<String, f64>,
    #[serde(default)]
    pub last_weight_block: Option<u64>,
    #[serde(default)]
    pub last_saved_at: Option<f64>,
}

/// Snapshot of subnet membership, refreshed opportunistically by the
/// Metagraph Manager.
#[derive(Debug, Clone)]
pub struct MetagraphSnapshot {
    pub uid_for_hotkey: HashMap<String, u16>,
    pub size: usize,
    pub validator_permit: bool,
    pub validator_uid: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_with(quote_details: Value) -> Order {
        Order {
            order_id: "o1".to_owned(),
            solver_id: None,
            miner_id: None,
            quote_details,
            signature: None,
        }
    }

    #[test]
    fn chain_id_prefers_settlement_chain_id() {
        let order = order_with(json!({
            "settlement": { "chainId": 8453 },
            "originChainId": 1,
        }));
        assert_eq!(order.chain_id(), Some(8453));
    }

    #[test]
    fn chain_id_falls_back_to_origin_chain_id() {
        let order = order_with(json!({ "originChainId": 10 }));
        assert_eq!(order.chain_id(), Some(10));
    }

    #[test]
    fn chain_id_falls_back_to_interop_address_in_available_inputs() {
        // version=01, chain_type=0000, chain_ref_len=01, addr_len=00, chain_ref=0a (chain 10)
        let order = order_with(json!({
            "availableInputs": [{ "asset": "0x01000001000a" }]
        }));
        assert_eq!(order.chain_id(), Some(10));
    }

    #[test]
    fn chain_id_checks_nested_details_before_flat_requested_outputs() {
        let order = order_with(json!({
            "details": {
                "requestedOutputs": [{ "asset": "0x01000001000a" }]
            }
        }));
        assert_eq!(order.chain_id(), Some(10));
    }

    #[test]
    fn chain_id_zero_length_chain_ref_means_default_chain() {
        let order = order_with(json!({
            "availableInputs": [{ "asset": "0x010000000000" }]
        }));
        assert_eq!(order.chain_id(), Some(1));
    }

    #[test]
    fn chain_id_none_when_nothing_matches() {
        let order = order_with(json!({}));
        assert_eq!(order.chain_id(), None);
    }
}
