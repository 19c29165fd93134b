//! Central orchestration: background validation loop, epoch accumulation,
//! weight normalization, burn policy, signed submission (spec.md §4.6).
//!
//! Grounded on `original_source/neurons/validation_engine.py`'s
//! `ValidationEngine`. The semaphore-per-loop concern noted there (spec.md
//! §9) does not apply to the Rust port: concurrency is bounded inside
//! `SimulatorPool` by its worker-token channel, so `validate_single_order`
//! here simply calls `SimulatorPool::simulate` and lets the pool serialize
//! access to its slots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::aggregator_client::{canonical_weights_payload, AggregatorClient};
use crate::error::SimulatorError;
use crate::history::ValidationHistory;
use crate::model::{EpochResult, EpochStats, Order, ValidationResult};
use crate::scoring::{compute_scores_from_results, normalize_scores_to_weights};
use crate::signer::Signer;
use crate::simulator_pool::SimulatorPool;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// A post-compute hook invoked with `(weights, epoch_result)`; returns
/// whether it succeeded (spec.md §4.6, §4.8).
#[async_trait]
pub trait WeightCallback: Send + Sync {
    async fn on_weights(&self, weights: &HashMap<String, f64>, epoch_result: &EpochResult) -> bool;
}

struct HealthState {
    healthy: bool,
    last_checked: Option<Instant>,
}

pub struct ValidationEngineConfig {
    pub validator_id: String,
    pub burn_percentage: f64,
    pub creator_miner_id: Option<String>,
    pub poll_interval: Duration,
    pub filter_user_address: Option<String>,
    pub rpc_url_for_chain: Arc<dyn Fn(u64) -> Option<String> + Send + Sync>,
}

pub struct ValidationEngine {
    aggregator: Arc<AggregatorClient>,
    simulator_pool: Arc<SimulatorPool>,
    history: Arc<ValidationHistory>,
    config: ValidationEngineConfig,
    signer: Option<Box<dyn Signer>>,
    weight_callbacks: RwLock<Vec<Arc<dyn WeightCallback>>>,
    submitted_epochs: Mutex<HashSet<String>>,
    health: Mutex<HealthState>,
    stop_notify: Notify,
    stopped: std::sync::atomic::AtomicBool,
}

impl ValidationEngine {
    pub fn new(
        aggregator: Arc<AggregatorClient>,
        simulator_pool: Arc<SimulatorPool>,
        history: Arc<ValidationHistory>,
        config: ValidationEngineConfig,
        signer: Option<Box<dyn Signer>>,
    ) -> Self {
        Self {
            aggregator,
            simulator_pool,
            history,
            config,
            signer,
            weight_callbacks: RwLock::new(Vec::new()),
            submitted_epochs: Mutex::new(HashSet::new()),
            health: Mutex::new(HealthState {
                healthy: true,
                last_checked: None,
            }),
            stop_notify: Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn add_weight_callback(&self, callback: Arc<dyn WeightCallback>) {
        self.weight_callbacks.write().await.push(callback);
    }

    pub async fn get_results_for_window(
        &self,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Vec<ValidationResult> {
        self.history.get_results_for_window(from_ts, to_ts).await
    }

    pub async fn is_aggregator_healthy(&self) -> bool {
        self.health.lock().await.healthy
    }

    /// Runs the single long-lived background validation loop (spec.md
    /// §4.6): health probe every 30s, then fetch + validate all pending
    /// orders, then sleep `poll_interval`.
    pub async fn start_continuous_validation(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if self.stopped.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }

                self.maybe_check_health().await;
                self.fetch_and_validate_orders().await;

                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = self.stop_notify.notified() => break,
                }
            }
        })
    }

    pub fn stop_continuous_validation(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::Relaxed);
        self.stop_notify.notify_waiters();
    }

    async fn maybe_check_health(&self) {
        let due = {
            let health = self.health.lock().await;
            match health.last_checked {
                Some(last) => last.elapsed() >= HEALTH_CHECK_INTERVAL,
                None => true,
            }
        };
        if !due {
            return;
        }

        let doc = self.aggregator.fetch_health().await;
        let healthy = doc.as_ref().map(|d| d.is_healthy()).unwrap_or(false);
        let mut health = self.health.lock().await;
        health.healthy = healthy;
        health.last_checked = Some(Instant::now());
        if !healthy {
            warn!(target: "validation_engine", "aggregator health check failed or reported unhealthy");
        }
    }

    async fn fetch_and_validate_orders(&self) {
        let orders = self.aggregator.fetch_pending_orders(&self.config.validator_id).await;
        if orders.is_empty() {
            debug!(target: "validation_engine", "no pending orders for {}", self.config.validator_id);
            return;
        }

        info!(target: "validation_engine", "validating {} pending orders", orders.len());
        let mut tasks = Vec::with_capacity(orders.len());
        for order in orders {
            tasks.push(self.validate_single_order(order));
        }
        let results = futures::future::join_all(tasks).await;

        let successful = results.iter().filter(|r| r.success).count();
        info!(
            target: "validation_engine",
            "validation batch complete: {} processed, {} succeeded, {} failed",
            results.len(),
            successful,
            results.len() - successful
        );

        for result in results {
            self.history.append(result).await;
        }
    }

    /// Validates one order end to end: missing `solver_id`/`miner_id`
    /// synthesizes a failing result without simulating; otherwise runs the
    /// simulation, submits the verdict, and returns the result for the
    /// caller to append to history (spec.md §4.6 `validate_single_order`).
    pub async fn validate_single_order(&self, order: Order) -> ValidationResult {
        let order_id = order.order_id.clone();
        let user_address = order.user_address();

        let Some(solver_id) = order.solver_id.clone() else {
            warn!(target: "validation_engine", "order {order_id} missing solverId");
            let mut r = ValidationResult::new(order_id, "unknown", None, false, Some("Missing solverId".to_owned()));
            r.user_address = user_address;
            return r;
        };

        let Some(miner_id) = order.miner_id.clone() else {
            warn!(target: "validation_engine", "order {order_id} missing minerId");
            let mut r = ValidationResult::new(order_id, solver_id, None, false, Some("Missing minerId".to_owned()));
            r.user_address = user_address;
            return r;
        };

        let chain_id = order.chain_id().unwrap_or(1);
        let rpc_url = match (self.config.rpc_url_for_chain)(chain_id) {
            Some(url) => url,
            None => {
                let msg = SimulatorError::UnconfiguredChain(chain_id).to_string();
                error!(target: "validation_engine", "{msg}");
                let mut r = ValidationResult::new(order_id.clone(), solver_id, Some(miner_id), false, Some(msg));
                r.user_address = user_address;
                self.aggregator
                    .submit_validation(&order_id, &self.config.validator_id, false, r.error_message.as_deref())
                    .await;
                return r;
            }
        };

        let payload = json!({
            "quoteDetails": order.quote_details,
            "signature": order.signature,
        });

        let start = Instant::now();
        let (success, error_message) = match self.simulator_pool.simulate(&order_id, &payload, &rpc_url).await {
            Ok(outcome) => (outcome.success, outcome.error_message),
            Err(e) => (false, Some(e.to_string())),
        };
        let execution_time_s = start.elapsed().as_secs_f64();

        let submitted = self
            .aggregator
            .submit_validation(&order_id, &self.config.validator_id, success, error_message.as_deref())
            .await;
        if !submitted {
            warn!(target: "validation_engine", "failed to report validation result to aggregator for {order_id}");
        }

        let mut result = ValidationResult::new(order_id, solver_id, Some(miner_id), success, error_message);
        result.execution_time_s = Some(execution_time_s);
        result.user_address = user_address;
        result
    }

    /// Computes weights for an epoch, applying the burn-fallback policy
    /// before scoring (spec.md §4.6 top-level policy).
    pub async fn compute_weights_for_epoch(
        &self,
        epoch_key: &str,
        validation_results: Vec<ValidationResult>,
    ) -> EpochResult {
        let start_time = validation_results
            .iter()
            .map(|r| r.timestamp)
            .min()
            .unwrap_or_else(Utc::now);

        let aggregator_healthy = self.is_aggregator_healthy().await;

        if !aggregator_healthy {
            let weights = match &self.config.creator_miner_id {
                Some(creator) => {
                    warn!(target: "validation_engine", "aggregator unhealthy, falling back to 100% burn to {creator}");
                    let mut w = HashMap::new();
                    w.insert(creator.clone(), 1.0);
                    w
                }
                None => {
                    error!(target: "validation_engine", "aggregator unhealthy and no creator_miner_id set, emitting no weights");
                    HashMap::new()
                }
            };
            return EpochResult {
                epoch_key: epoch_key.to_owned(),
                start_time,
                end_time: Utc::now(),
                stats: EpochStats {
                    total_simulations: validation_results.len(),
                    valid_miners: 0,
                    total_miners: 0,
                    burn_percentage: 1.0,
                    burn_fallback: true,
                    error: Some("aggregator_unhealthy".to_owned()),
                },
                validation_results,
                weights,
            };
        }

        let scores = compute_scores_from_results(&validation_results, self.config.filter_user_address.as_deref());
        let weights = normalize_scores_to_weights(
            &scores,
            self.config.burn_percentage,
            self.config.creator_miner_id.as_deref(),
        );

        let valid_miners = scores.len();

        EpochResult {
            epoch_key: epoch_key.to_owned(),
            start_time,
            end_time: Utc::now(),
            stats: EpochStats {
                total_simulations: validation_results.len(),
                valid_miners,
                total_miners: scores.len(),
                burn_percentage: self.config.burn_percentage,
                burn_fallback: false,
                error: None,
            },
            validation_results,
            weights,
        }
    }

    /// Submits weights to the aggregator (idempotent per `epoch_key`) and
    /// fans out to every registered weight callback (spec.md §4.6
    /// `process_epoch_results`).
    pub async fn process_epoch_results(&self, epoch_result: &EpochResult) {
        let duration = (epoch_result.end_time - epoch_result.start_time)
            .num_milliseconds() as f64
            / 1000.0;
        info!(
            target: "validation_engine",
            "epoch {} completed in {duration:.1}s: {} validations, {} unique miners weighted",
            epoch_result.epoch_key,
            epoch_result.validation_results.len(),
            epoch_result.weights.len()
        );

        self.submit_weights_to_aggregator(epoch_result).await;

        let callbacks = self.weight_callbacks.read().await;
        let mut success_count = 0;
        for callback in callbacks.iter() {
            if callback.on_weights(&epoch_result.weights, epoch_result).await {
                success_count += 1;
            }
        }
        info!(
            target: "validation_engine",
            "weight callbacks: {success_count}/{} succeeded",
            callbacks.len()
        );
    }

    /// Guarded by `submitted_epochs`: a given `epoch_key` is submitted at
    /// most once per process lifetime (spec.md §3, §8 "Idempotence").
    async fn submit_weights_to_aggregator(&self, epoch_result: &EpochResult) {
        {
            let mut submitted = self.submitted_epochs.lock().await;
            if submitted.contains(&epoch_result.epoch_key) {
                warn!(target: "validation_engine", "weights already submitted for epoch {}, skipping", epoch_result.epoch_key);
                return;
            }
            submitted.insert(epoch_result.epoch_key.clone());
        }

        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let payload = canonical_weights_payload(
            &self.config.validator_id,
            &epoch_result.epoch_key,
            &timestamp,
            None,
            &epoch_result.weights,
            &epoch_result.stats,
        );

        let (signature_hex, signature_type) = match &self.signer {
            Some(signer) => {
                let signed = signer.sign(payload.as_bytes());
                (format!("0x{}", hex::encode(signed.signature)), signed.signature_type)
            }
            None => {
                warn!(target: "validation_engine", "no signing keypair configured, using placeholder signature");
                let signed = crate::signer::PlaceholderSigner.sign(payload.as_bytes());
                (format!("0x{}", hex::encode(signed.signature)), signed.signature_type)
            }
        };

        let receipt = self
            .aggregator
            .submit_weights(
                &self.config.validator_id,
                &epoch_result.epoch_key,
                &epoch_result.weights,
                &epoch_result.stats,
                &timestamp,
                signature_hex,
                signature_type,
                None,
            )
            .await;

        match receipt {
            Some(r) => info!(target: "validation_engine", "weights submitted for epoch {}: {:?}", epoch_result.epoch_key, r.weight_submission_id),
            None => error!(target: "validation_engine", "failed to submit weights for epoch {}", epoch_result.epoch_key),
        }
    }
}

// Idempotent submission, burn fallback, and the end-to-end scenarios of
// spec.md §8 are algorithm-level properties of `compute_scores_from_results`
// / `normalize_scores_to_weights` (see `scoring.rs`'s unit tests, which
// reproduce spec.md §8 scenarios 1-4 exactly) plus the `submitted_epochs`
// guard above. A full `ValidationEngine` integration test would need a
// running aggregator and docker daemon to construct the pool it depends on,
// so it isn't exercised end to end here.
