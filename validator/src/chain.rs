//! Thin wrapper over a dynamic `subxt` client, shared by the Window
//! Planner, Metagraph Manager, and Onchain Weight Emitter.
//!
//! Grounded on the pack's subxt-based chain client pattern
//! (`other_examples/.../spo-indexer-src-application.rs.rs` drives an
//! `OnlineClient`-backed epoch loop). The subnet pallet metadata is not
//! vendored into this repo, so storage and extrinsics are addressed
//! dynamically (`subxt::dynamic::storage`/`tx`) rather than through a
//! generated, statically-typed API — the same posture the teacher takes
//! toward chain-specific surfaces it does not own end-to-end.

use log::warn;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::config::substrate::H256;
use subxt::config::SubstrateConfig;
use subxt::dynamic::Value;
use subxt::{OnlineClient, PolkadotConfig};
use subxt_signer::sr25519::Keypair as SrKeypair;

pub type ChainConfig = PolkadotConfig;

/// A connected substrate client plus the legacy RPC surface needed for
/// block-header/hash/timestamp lookups that the dynamic storage API does
/// not cover directly.
#[derive(Clone)]
pub struct SubstrateClient {
    online: OnlineClient<ChainConfig>,
    legacy: LegacyRpcMethods<ChainConfig>,
}

impl SubstrateClient {
    pub async fn connect(url: &str) -> Result<Self, String> {
        let rpc_client = subxt::backend::rpc::RpcClient::from_url(url)
            .await
            .map_err(|e| e.to_string())?;
        let online = OnlineClient::<ChainConfig>::from_rpc_client(rpc_client.clone())
            .await
            .map_err(|e| e.to_string())?;
        let legacy = LegacyRpcMethods::new(rpc_client);
        Ok(Self { online, legacy })
    }

    /// Current (best, not necessarily finalized) block number.
    pub async fn current_block_number(&self) -> u64 {
        match self.online.blocks().at_latest().await {
            Ok(block) => block.number().into(),
            Err(e) => {
                warn!(target: "chain", "failed to fetch latest block: {e}");
                0
            }
        }
    }

    pub async fn block_hash(&self, block_number: u64) -> Option<H256> {
        self.legacy
            .chain_get_block_hash(Some(block_number.into()))
            .await
            .ok()
            .flatten()
    }

    /// Reads a single scalar storage value as `u128`, e.g.
    /// `SubtensorModule::Tempo(netuid)`.
    pub async fn query_u128(
        &self,
        pallet: &str,
        entry: &str,
        keys: Vec<Value>,
        at: Option<H256>,
    ) -> Option<u128> {
        let address = subxt::dynamic::storage(pallet, entry, keys);
        let storage = match at {
            Some(hash) => self.online.storage().at(hash),
            None => self.online.storage().at_latest().await.ok()?,
        };
        let value = storage.fetch(&address).await.ok().flatten()?;
        let decoded = value.to_value().ok()?;
        decoded.as_u128()
    }

    /// `Timestamp::Now` at the given block hash, in milliseconds since the
    /// Unix epoch.
    pub async fn timestamp_now_at(&self, hash: H256) -> Option<u64> {
        self.query_u128("Timestamp", "Now", vec![], Some(hash))
            .await
            .map(|v| v as u64)
    }

    /// Iterates a storage map, returning `(key_bytes, decoded_value)` pairs.
    /// Used by the Metagraph Manager to enumerate `hotkey -> uid`.
    pub async fn iter_map_u16(
        &self,
        pallet: &str,
        entry: &str,
        netuid_key: Value,
    ) -> Vec<(Vec<u8>, u16)> {
        let address = subxt::dynamic::storage(pallet, entry, vec![netuid_key]);
        let storage = match self.online.storage().at_latest().await {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "chain", "failed to access storage: {e}");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        let mut iter = match storage.iter(address).await {
            Ok(iter) => iter,
            Err(e) => {
                warn!(target: "chain", "failed to iterate {pallet}::{entry}: {e}");
                return out;
            }
        };

        while let Some(item) = iter.next().await {
            let Ok(kv) = item else { continue };
            let Ok(value) = kv.value.to_value() else {
                continue;
            };
            if let Some(v) = value.as_u128() {
                out.push((kv.key_bytes, v as u16));
            }
        }
        out
    }

    /// Submits a signed `SubtensorModule::set_weights(netuid, dests,
    /// weights, version_key)` extrinsic.
    pub async fn submit_set_weights(
        &self,
        netuid: u16,
        uids: &[u16],
        weights: &[u16],
        version_key: u64,
        signer: &SrKeypair,
    ) -> Result<(), String> {
        let call = subxt::dynamic::tx(
            "SubtensorModule",
            "set_weights",
            vec![
                Value::u128(netuid as u128),
                Value::unnamed_composite(uids.iter().map(|&u| Value::u128(u as u128)).collect::<Vec<_>>()),
                Value::unnamed_composite(weights.iter().map(|&w| Value::u128(w as u128)).collect::<Vec<_>>()),
                Value::u128(version_key as u128),
            ],
        );

        self.online
            .tx()
            .sign_and_submit_then_watch_default(&call, signer)
            .await
            .map_err(|e| e.to_string())?
            .wait_for_finalized_success()
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }
}

/// Convenience so `SubstrateConfig`'s `Hasher::Output` type stays in scope
/// for callers that only import this module.
pub type BlockHash = <SubstrateConfig as subxt::Config>::Hash;
