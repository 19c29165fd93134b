//! Validation and weighting engine for the Minotaur subnet validator node.
//!
//! See spec.md / SPEC_FULL.md for the full module map; each module's doc
//! comment names the original component it is grounded on.

pub mod aggregator_client;
pub mod bittensor;
pub mod chain;
pub mod config;
pub mod error;
pub mod history;
pub mod metagraph;
pub mod model;
pub mod onchain_emitter;
pub mod scoring;
pub mod signer;
pub mod simulator_pool;
pub mod ss58;
pub mod state_store;
pub mod validation_engine;
pub mod window_planner;
