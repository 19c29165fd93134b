//! Binary entrypoint: loads configuration, wires every component, and runs
//! the chain-aligned loop (`VALIDATOR_MODE=bittensor`) or the validation
//! engine alone with a no-op weight callback (`VALIDATOR_MODE=mock`).

use std::sync::Arc;

use log::{info, warn};
use minotaur_validator::aggregator_client::AggregatorClient;
use minotaur_validator::bittensor::{self, OnchainWeightCallback};
use minotaur_validator::chain::SubstrateClient;
use minotaur_validator::config::{Config, ValidatorMode};
use minotaur_validator::error::ConfigError;
use minotaur_validator::history::ValidationHistory;
use minotaur_validator::metagraph::MetagraphManager;
use minotaur_validator::model::EpochResult;
use minotaur_validator::onchain_emitter::OnchainWeightEmitter;
use minotaur_validator::signer::{Signer, Sr25519Signer};
use minotaur_validator::simulator_pool::SimulatorPool;
use minotaur_validator::state_store::StateStore;
use minotaur_validator::validation_engine::{ValidationEngine, ValidationEngineConfig, WeightCallback};

struct NoopWeightCallback;

#[async_trait::async_trait]
impl WeightCallback for NoopWeightCallback {
    async fn on_weights(
        &self,
        _weights: &std::collections::HashMap<String, f64>,
        epoch_result: &EpochResult,
    ) -> bool {
        info!(target: "bittensor", "mock mode: skipping on-chain emission for {}", epoch_result.epoch_key);
        true
    }
}

fn decode_seed(hex_str: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("VALIDATOR_SEED_HEX must decode to exactly 32 bytes"))?;
    Ok(array)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    info!(target: "validator", "starting minotaur-validator for netuid {} in {:?} mode", config.netuid, config.validator_mode);

    let seed = match &config.validator_seed_hex {
        Some(hex_str) => Some(decode_seed(hex_str)?),
        None => {
            warn!(target: "validator", "VALIDATOR_SEED_HEX not set; weight submissions will use a placeholder signature");
            None
        }
    };

    let signer: Option<Box<dyn Signer>> = seed.map(|s| Box::new(Sr25519Signer::from_seed(&s)) as Box<dyn Signer>);

    let aggregator = Arc::new(AggregatorClient::new(
        &config.aggregator_url,
        &config.validator_api_key,
        config.aggregator_timeout,
        config.aggregator_verify_ssl,
        config.aggregator_max_retries,
        config.aggregator_backoff_seconds,
        config.aggregator_page_limit,
    )?);

    let failed_simulations_dir = std::path::Path::new(&config.validator_state_dir).join("failed_simulations");
    let simulator_pool = Arc::new(
        SimulatorPool::start(
            &config.simulator_docker_image,
            config.simulator_max_concurrent,
            config.simulator_timeout_seconds,
            &failed_simulations_dir,
            config.simulator_auto_pull,
        )
        .await?,
    );

    let history = Arc::new(ValidationHistory::new(config.validation_history_retention_seconds));
    let state_store = Arc::new(StateStore::open(&config.validator_state_dir).await);

    let rpc_config = config.clone();
    let rpc_url_for_chain: Arc<dyn Fn(u64) -> Option<String> + Send + Sync> =
        Arc::new(move |chain_id| rpc_config.rpc_url_for_chain(chain_id).map(str::to_owned));

    let engine_config = ValidationEngineConfig {
        validator_id: config.validator_hotkey.clone(),
        burn_percentage: config.burn_percentage,
        creator_miner_id: config.creator_miner_id.clone(),
        poll_interval: std::time::Duration::from_secs(config.validator_poll_seconds),
        filter_user_address: None,
        rpc_url_for_chain,
    };

    let engine = Arc::new(ValidationEngine::new(
        aggregator,
        simulator_pool.clone(),
        history,
        engine_config,
        signer,
    ));

    match config.validator_mode {
        ValidatorMode::Mock => {
            engine.add_weight_callback(Arc::new(NoopWeightCallback)).await;
            info!(target: "validator", "mock mode: running validation engine with a no-op weight callback");
            let handle = engine.clone().start_continuous_validation().await;
            tokio::signal::ctrl_c().await.ok();
            engine.stop_continuous_validation();
            let _ = handle.await;
        }
        ValidatorMode::Bittensor => {
            let client = SubstrateClient::connect(&config.substrate_url)
                .await
                .map_err(|e| anyhow::anyhow!("failed to connect to substrate node: {e}"))?;

            let metagraph = Arc::new(MetagraphManager::new(
                client.clone(),
                config.netuid,
                config.validator_hotkey.clone(),
            ));

            bittensor::check_wallet_registration(&metagraph, &config.validator_hotkey, config.netuid).await?;

            let seed = seed.ok_or_else(|| {
                ConfigError::MissingEnv("VALIDATOR_SEED_HEX".to_owned())
            })?;

            let emitter = Arc::new(OnchainWeightEmitter::new(client.clone(), config.netuid));

            let callback = Arc::new(OnchainWeightCallback::new(metagraph, emitter, seed));
            engine.add_weight_callback(callback).await;

            let window_planner = Arc::new(minotaur_validator::window_planner::WindowPlanner::new(
                client,
                config.netuid,
                config.window_planner_max_retries,
            ));

            bittensor::run(
                engine,
                window_planner,
                state_store,
                config.validator_finalization_buffer_blocks,
                config.validator_poll_seconds,
                config.validator_continuous,
            )
            .await;
        }
    }

    info!(target: "validator", "shutting down, cleaning up simulator pool");
    simulator_pool.shutdown().await;
    Ok(())
}
