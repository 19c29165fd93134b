//! Validator configuration, resolved once at startup (spec.md §6, §9).
//!
//! Every environment variable the validator recognizes is parsed here into
//! an immutable [`Config`] and threaded into each component by construction;
//! nothing downstream re-reads the environment.

use clap::Parser;

use crate::error::ConfigError;

fn default_aggregator_timeout() -> u64 {
    10
}

fn default_aggregator_max_retries() -> u32 {
    3
}

fn default_aggregator_backoff_seconds() -> u64 {
    2
}

fn default_aggregator_page_limit() -> u32 {
    100
}

fn default_poll_seconds() -> u64 {
    12
}

fn default_finalization_buffer_blocks() -> u64 {
    8
}

fn default_epoch_minutes() -> u64 {
    0
}

fn default_simulator_max_concurrent() -> usize {
    4
}

fn default_simulator_timeout_seconds() -> u64 {
    300
}

fn default_history_retention_seconds() -> i64 {
    7200
}

fn default_window_planner_max_retries() -> u32 {
    3
}

fn default_state_dir() -> String {
    "state".to_owned()
}

/// Validation mode: `bittensor` drives the chain-aligned loop against a real
/// subnet; `mock` runs the same engine with a no-op weight callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ValidatorMode {
    Bittensor,
    Mock,
}

/// All environment inputs recognized by the validator (spec.md §6).
///
/// Parsed once, at startup, via `Config::load`. `clap`'s `env` attribute
/// reads from the process environment (already populated by `dotenvy` in
/// `main.rs`); no CLI flag parsing is performed.
#[derive(Debug, Clone, Parser)]
#[command(name = "minotaur-validator", about = "Validation & weighting engine")]
pub struct Config {
    /// API key presented to the aggregator as `X-API-Key`.
    #[arg(long, env = "VALIDATOR_API_KEY")]
    pub validator_api_key: String,

    /// Aggregator base URL, e.g. `https://aggregator.example.com`.
    #[arg(long, env = "AGGREGATOR_URL")]
    pub aggregator_url: String,

    /// Aggregator request timeout, in seconds.
    #[arg(long, env = "AGGREGATOR_TIMEOUT", default_value_t = default_aggregator_timeout())]
    pub aggregator_timeout: u64,

    /// Whether to verify the aggregator's TLS certificate.
    #[arg(long, env = "AGGREGATOR_VERIFY_SSL", default_value_t = true)]
    pub aggregator_verify_ssl: bool,

    /// Maximum retry attempts beyond the first for aggregator requests.
    #[arg(long, env = "AGGREGATOR_MAX_RETRIES", default_value_t = default_aggregator_max_retries())]
    pub aggregator_max_retries: u32,

    /// Linear backoff unit, in seconds, for aggregator retries.
    #[arg(long, env = "AGGREGATOR_BACKOFF_SECONDS", default_value_t = default_aggregator_backoff_seconds())]
    pub aggregator_backoff_seconds: u64,

    /// Page size hint for `fetch_pending_orders`.
    #[arg(long, env = "AGGREGATOR_PAGE_LIMIT", default_value_t = default_aggregator_page_limit())]
    pub aggregator_page_limit: u32,

    /// Target subnet id.
    #[arg(long, env = "NETUID")]
    pub netuid: u16,

    /// Background loop + chain-aligned loop poll interval, in seconds.
    #[arg(long, env = "VALIDATOR_POLL_SECONDS", default_value_t = default_poll_seconds())]
    pub validator_poll_seconds: u64,

    /// Blocks to wait past an epoch boundary before treating it as closed.
    #[arg(long, env = "VALIDATOR_FINALIZATION_BUFFER_BLOCKS", default_value_t = default_finalization_buffer_blocks())]
    pub validator_finalization_buffer_blocks: u64,

    /// Non-chain-aligned epoch duration in minutes; 0 disables `run_epoch`
    /// mode in favor of the chain-aligned loop (spec.md §4.6, §4.8).
    #[arg(long, env = "VALIDATOR_EPOCH_MINUTES", default_value_t = default_epoch_minutes())]
    pub validator_epoch_minutes: u64,

    /// Run the chain-aligned loop continuously; if false, process exactly
    /// one ready epoch (or none) and exit.
    #[arg(long, env = "VALIDATOR_CONTINUOUS", default_value_t = true)]
    pub validator_continuous: bool,

    /// Fraction of weight burned to `creator_miner_id` on every epoch.
    #[arg(long, env = "BURN_PERCENTAGE", default_value_t = 0.0)]
    pub burn_percentage: f64,

    /// Hotkey that receives burned weight / the burn-fallback allocation.
    #[arg(long, env = "CREATOR_MINER_ID")]
    pub creator_miner_id: Option<String>,

    /// Default simulator RPC URL for chain ids without a specific override.
    #[arg(long, env = "SIMULATOR_RPC_URL")]
    pub simulator_rpc_url: Option<String>,

    /// RPC URL used for chain id 8453 (Base).
    #[arg(long, env = "BASE_RPC_URL")]
    pub base_rpc_url: Option<String>,

    /// RPC URL used for chain id 1 (Ethereum mainnet).
    #[arg(long, env = "ETHEREUM_RPC_URL")]
    pub ethereum_rpc_url: Option<String>,

    /// Docker image used for simulator worker containers.
    #[arg(long, env = "SIMULATOR_DOCKER_IMAGE")]
    pub simulator_docker_image: String,

    /// Number of long-lived simulator worker containers.
    #[arg(long, env = "SIMULATOR_MAX_CONCURRENT", default_value_t = default_simulator_max_concurrent())]
    pub simulator_max_concurrent: usize,

    /// Per-simulation timeout in seconds.
    #[arg(long, env = "SIMULATOR_TIMEOUT_SECONDS", default_value_t = default_simulator_timeout_seconds())]
    pub simulator_timeout_seconds: u64,

    /// Best-effort `docker pull` of the worker image at pool startup.
    #[arg(long, env = "SIMULATOR_AUTO_PULL", default_value_t = true)]
    pub simulator_auto_pull: bool,

    /// Validation history retention window, in seconds.
    #[arg(long, env = "VALIDATION_HISTORY_RETENTION_SECONDS", default_value_t = default_history_retention_seconds())]
    pub validation_history_retention_seconds: i64,

    /// Max attempts to resolve epoch boundary timestamps before giving up
    /// on a tick (from `original_source/neurons/window_planner.py`).
    #[arg(long, env = "WINDOW_PLANNER_MAX_RETRIES", default_value_t = default_window_planner_max_retries())]
    pub window_planner_max_retries: u32,

    /// `bittensor` drives the real chain loop; `mock` wires a no-op weight
    /// callback for local/test deployments.
    #[arg(long, env = "VALIDATOR_MODE", value_enum, default_value_t = ValidatorMode::Bittensor)]
    pub validator_mode: ValidatorMode,

    /// Substrate node websocket endpoint.
    #[arg(long, env = "SUBSTRATE_URL", default_value = "ws://127.0.0.1:9944")]
    pub substrate_url: String,

    /// SS58-encoded hotkey address identifying this validator.
    #[arg(long, env = "VALIDATOR_HOTKEY")]
    pub validator_hotkey: String,

    /// Directory holding `state_store.json` and `failed_simulations/`.
    #[arg(long, env = "VALIDATOR_STATE_DIR", default_value_t = default_state_dir())]
    pub validator_state_dir: String,

    /// Hex-encoded 32-byte sr25519 mini-secret seed for this validator's
    /// hotkey. Required to sign weight submissions and `set_weights`
    /// extrinsics with a real keypair; if unset, a placeholder signature is
    /// used and a loud warning is logged (spec.md §9 Open Questions).
    #[arg(long, env = "VALIDATOR_SEED_HEX")]
    pub validator_seed_hex: Option<String>,
}

impl Config {
    /// Parse configuration from the process environment. Callers should load
    /// a `.env` file (via `dotenvy`) before calling this, if desired.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::try_parse().map_err(|e| ConfigError::InvalidValue {
            name: "<config>".to_owned(),
            value: e.to_string(),
        })?;

        if config.validator_api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnv("VALIDATOR_API_KEY".to_owned()));
        }
        if !(0.0..=1.0).contains(&config.burn_percentage) {
            return Err(ConfigError::InvalidValue {
                name: "BURN_PERCENTAGE".to_owned(),
                value: config.burn_percentage.to_string(),
            });
        }

        Ok(config)
    }

    /// The RPC URL to use for a given chain id, per spec.md §4.1. Chain 1
    /// (Ethereum mainnet) is the default chain and falls back to
    /// `simulator_rpc_url`; any other chain must have its own RPC URL
    /// configured or the order fails with `SimulatorError::UnconfiguredChain`.
    pub fn rpc_url_for_chain(&self, chain_id: u64) -> Option<&str> {
        match chain_id {
            1 => self.ethereum_rpc_url.as_deref().or(self.simulator_rpc_url.as_deref()),
            8453 => self.base_rpc_url.as_deref(),
            _ => None,
        }
    }
}
