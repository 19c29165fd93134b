//! Subnet membership snapshot cache (spec.md §4.5).
//!
//! Grounded on `original_source/neurons/metagraph_manager.py`: refresh is
//! skipped (returning the cached snapshot) unless forced or ≥5 blocks have
//! elapsed since the last refresh; the wallet's hotkey must have a
//! validator permit or the snapshot is still returned but flagged unusable
//! for weight emission.

use std::collections::HashMap;

use log::error;
use subxt::dynamic::Value;
use tokio::sync::Mutex;

use crate::chain::SubstrateClient;
use crate::error::MetagraphSyncError;
use crate::model::MetagraphSnapshot;
use crate::ss58;

const REFRESH_INTERVAL_BLOCKS: u64 = 5;
const SS58_NETWORK_PREFIX: u8 = 42;

struct Cached {
    snapshot: MetagraphSnapshot,
    last_block: u64,
}

pub struct MetagraphManager {
    client: SubstrateClient,
    netuid: u16,
    validator_hotkey: String,
    cached: Mutex<Option<Cached>>,
}

impl MetagraphManager {
    pub fn new(client: SubstrateClient, netuid: u16, validator_hotkey: String) -> Self {
        Self {
            client,
            netuid,
            validator_hotkey,
            cached: Mutex::new(None),
        }
    }

    /// Refreshes the snapshot if `force` or the cache is stale by at least
    /// `REFRESH_INTERVAL_BLOCKS`. On query failure, falls back to the cached
    /// snapshot if one exists.
    pub async fn refresh(&self, force: bool) -> Result<MetagraphSnapshot, MetagraphSyncError> {
        let current_block = self.client.current_block_number().await;

        let mut cached = self.cached.lock().await;
        if !force {
            if let Some(c) = cached.as_ref() {
                if current_block.saturating_sub(c.last_block) < REFRESH_INTERVAL_BLOCKS {
                    return Ok(c.snapshot.clone());
                }
            }
        }

        match self.build_snapshot().await {
            Ok(snapshot) => {
                *cached = Some(Cached {
                    snapshot: snapshot.clone(),
                    last_block: current_block,
                });
                Ok(snapshot)
            }
            Err(e) => {
                error!(target: "metagraph", "failed to sync metagraph: {e}");
                match cached.as_ref() {
                    Some(c) => Ok(c.snapshot.clone()),
                    None => Err(e),
                }
            }
        }
    }

    async fn build_snapshot(&self) -> Result<MetagraphSnapshot, MetagraphSyncError> {
        let entries = self
            .client
            .iter_map_u16("SubtensorModule", "Keys", Value::u128(self.netuid as u128))
            .await;

        let mut uid_for_hotkey: HashMap<String, u16> = HashMap::new();
        for (key_bytes, uid) in entries {
            if key_bytes.len() < 32 {
                continue;
            }
            let mut account = [0u8; 32];
            account.copy_from_slice(&key_bytes[key_bytes.len() - 32..]);
            let hotkey = ss58::encode(SS58_NETWORK_PREFIX, &account);
            uid_for_hotkey.insert(hotkey, uid);
        }

        let validator_uid = uid_for_hotkey.get(&self.validator_hotkey).copied();
        let validator_permit = match validator_uid {
            Some(uid) => self.has_permit(uid).await,
            None => false,
        };

        if !validator_permit {
            error!(target: "metagraph", "validator has no permit or UID is missing; weight emission will be refused");
        }

        Ok(MetagraphSnapshot {
            size: uid_for_hotkey.len(),
            uid_for_hotkey,
            validator_permit,
            validator_uid,
        })
    }

    async fn has_permit(&self, uid: u16) -> bool {
        self.client
            .query_u128(
                "SubtensorModule",
                "ValidatorPermit",
                vec![Value::u128(self.netuid as u128), Value::u128(uid as u128)],
                None,
            )
            .await
            .map(|v| v != 0)
            .unwrap_or(false)
    }
}
