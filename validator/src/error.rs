//! Error taxonomy for the validation and weighting engine (spec.md §7).
//!
//! Per-order and per-epoch errors never crash the process: the call sites
//! that can recover convert these into `Result`s that become logged outcomes
//! (`Ok(false)`, empty vectors, `None`) rather than propagating. Configuration
//! and pool-startup errors are fatal and propagate out of `main`.

use thiserror::Error;

/// Missing or invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("validator hotkey {hotkey} is not registered on subnet {netuid}")]
    NotRegistered { hotkey: String, netuid: u16 },
}

/// Network, timeout, or non-2xx errors talking to the aggregator.
/// Recovered per-request via retry; surfaced to callers as `nil`/`false`.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("request to {0} failed: {1}")]
    Transport(String, String),

    #[error("http {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid JSON response from {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Process exit, timeout, unparseable output, or missing chain RPC for a
/// single order simulation. Per-order failure; logged to `failed_simulations/`.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("no RPC URL configured for chain {0}")]
    UnconfiguredChain(u64),

    #[error("no workers available in the simulation pool")]
    PoolExhausted,

    #[error("worker {0} is unhealthy and could not be restarted")]
    WorkerUnavailable(String),

    #[error("simulator process exited with status {0}: {1}")]
    NonZeroExit(i32, String),

    #[error("simulator timed out after {0}s")]
    Timeout(u64),

    #[error("failed to parse simulator output: {0}")]
    UnparseableOutput(String),

    #[error("failed to spawn simulator process: {0}")]
    Spawn(String),
}

/// Block timestamps could not be resolved after retries. The caller must
/// retry rather than guess (spec.md §4.4).
#[derive(Debug, Error)]
pub enum WindowPlannerError {
    #[error(
        "failed to resolve timestamps for epoch {epoch} blocks {start}-{end} after {attempts} attempts"
    )]
    UnresolvedTimestamps {
        epoch: u64,
        start: u64,
        end: u64,
        attempts: u32,
    },

    #[error("substrate query failed: {0}")]
    SubstrateQuery(String),
}

/// Substrate query failure while refreshing the metagraph snapshot. Callers
/// fall back to the cached snapshot if available, otherwise refuse to emit.
#[derive(Debug, Error)]
pub enum MetagraphSyncError {
    #[error("substrate query failed: {0}")]
    SubstrateQuery(String),

    #[error("no cached metagraph snapshot available")]
    NoCachedSnapshot,
}

/// Extrinsic submission failure or missing validator UID. Surfaced as a
/// `false` return from the weight callback; the epoch is still committed
/// locally so it is not re-processed.
#[derive(Debug, Error)]
pub enum WeightEmissionError {
    #[error("validator hotkey {0} has no UID on subnet {1}")]
    MissingUid(String, u16),

    #[error("substrate extrinsic submission failed: {0}")]
    ExtrinsicFailed(String),

    #[error("input weights do not sum to ~1.0 (got {0})")]
    InvalidWeightSum(f64),
}
