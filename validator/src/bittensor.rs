//! Top-level chain-aligned loop (spec.md §4.8).
//!
//! Grounded on `original_source/neurons/bittensor_validator.py`:
//! `run_continuous_epochs` drives the Window Planner/Validation Engine/State
//! Store together, and `_check_wallet_registration` gates startup on the
//! configured hotkey actually holding a UID on the target subnet.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};

use crate::error::{ConfigError, WeightEmissionError};
use crate::metagraph::MetagraphManager;
use crate::model::EpochResult;
use crate::onchain_emitter::OnchainWeightEmitter;
use crate::state_store::StateStore;
use crate::validation_engine::{ValidationEngine, WeightCallback};
use crate::window_planner::WindowPlanner;

/// The on-chain weight callback registered with the Validation Engine
/// (spec.md §4.8): refreshes the metagraph, refuses without a validator
/// permit, drops weights for hotkeys outside the current snapshot, and
/// hands the rest to the Onchain Weight Emitter.
pub struct OnchainWeightCallback {
    metagraph: Arc<MetagraphManager>,
    emitter: Arc<OnchainWeightEmitter>,
    seed: [u8; 32],
}

impl OnchainWeightCallback {
    pub fn new(
        metagraph: Arc<MetagraphManager>,
        emitter: Arc<OnchainWeightEmitter>,
        seed: [u8; 32],
    ) -> Self {
        Self {
            metagraph,
            emitter,
            seed,
        }
    }
}

#[async_trait]
impl WeightCallback for OnchainWeightCallback {
    async fn on_weights(
        &self,
        weights: &std::collections::HashMap<String, f64>,
        epoch_result: &EpochResult,
    ) -> bool {
        let snapshot = match self.metagraph.refresh(true).await {
            Ok(s) => s,
            Err(e) => {
                error!(target: "bittensor", "metagraph refresh failed, refusing to emit weights for {}: {e}", epoch_result.epoch_key);
                return false;
            }
        };

        if !snapshot.validator_permit {
            error!(
                target: "bittensor",
                "validator has no permit on the subnet, refusing to emit weights for {}",
                epoch_result.epoch_key
            );
            return false;
        }

        let mut filtered = std::collections::HashMap::new();
        for (hotkey, weight) in weights {
            if snapshot.uid_for_hotkey.contains_key(hotkey) {
                filtered.insert(hotkey.clone(), *weight);
            } else {
                warn!(target: "bittensor", "dropping weight for unknown hotkey {hotkey}");
            }
        }

        match self.emitter.emit(&self.metagraph, &filtered, &self.seed).await {
            Ok(()) => true,
            Err(WeightEmissionError::MissingUid(hotkey, netuid)) => {
                error!(target: "bittensor", "validator hotkey {hotkey} has no UID on subnet {netuid}");
                false
            }
            Err(e) => {
                error!(target: "bittensor", "on-chain weight emission failed for {}: {e}", epoch_result.epoch_key);
                false
            }
        }
    }
}

/// Verifies the configured hotkey is registered on the target subnet before
/// continuous operation starts (spec.md SPEC_FULL.md "Wallet registration
/// check"; ported from `bittensor_validator.py::_check_wallet_registration`).
pub async fn check_wallet_registration(
    metagraph: &MetagraphManager,
    validator_hotkey: &str,
    netuid: u16,
) -> Result<(), ConfigError> {
    let snapshot = metagraph
        .refresh(true)
        .await
        .map_err(|_| ConfigError::NotRegistered {
            hotkey: validator_hotkey.to_owned(),
            netuid,
        })?;

    if snapshot.uid_for_hotkey.contains_key(validator_hotkey) {
        Ok(())
    } else {
        Err(ConfigError::NotRegistered {
            hotkey: validator_hotkey.to_owned(),
            netuid,
        })
    }
}

/// Runs the chain-aligned loop described in spec.md §4.8: starts continuous
/// validation, then repeatedly asks the Window Planner for the previous
/// finalized epoch, scores it, submits it, and commits state.
///
/// If `continuous` is false, processes at most one ready epoch and returns.
pub async fn run(
    engine: Arc<ValidationEngine>,
    window_planner: Arc<WindowPlanner>,
    state_store: Arc<StateStore>,
    finalization_buffer_blocks: u64,
    poll_seconds: u64,
    continuous: bool,
) {
    let _handle = engine.clone().start_continuous_validation().await;

    loop {
        let last_processed = state_store.get_last_epoch().await;

        let window = match window_planner
            .previous_epoch_window(last_processed, finalization_buffer_blocks)
            .await
        {
            Ok(window) => window,
            Err(e) => {
                warn!(target: "bittensor", "window planner error, will retry: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(poll_seconds)).await;
                if !continuous {
                    return;
                }
                continue;
            }
        };

        let Some(window) = window else {
            tokio::time::sleep(std::time::Duration::from_secs(poll_seconds)).await;
            if !continuous {
                return;
            }
            continue;
        };

        let epoch_key = format!(
            "epoch-{}-{}",
            window.epoch_index,
            window.to_ts.timestamp()
        );

        let results = engine.get_results_for_window(window.from_ts, window.to_ts).await;
        let epoch_result = engine.compute_weights_for_epoch(&epoch_key, results).await;
        engine.process_epoch_results(&epoch_result).await;

        state_store
            .commit_epoch(
                window.epoch_index,
                &window.to_ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                &epoch_result.weights,
            )
            .await;

        info!(
            target: "bittensor",
            "committed epoch {} at {}",
            window.epoch_index,
            Utc::now().to_rfc3339()
        );

        if !continuous {
            engine.stop_continuous_validation();
            return;
        }

        tokio::time::sleep(std::time::Duration::from_secs(poll_seconds)).await;
    }
}
