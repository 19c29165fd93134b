//! SS58 address encoding for substrate account ids (subnet hotkeys).
//!
//! The metagraph's `Keys` storage map is indexed by raw 32-byte account
//! ids; every other component (config, aggregator payloads, weight maps)
//! identifies miners by their SS58-encoded address, so decoded storage
//! keys are re-encoded here before they leave `chain`/`metagraph`.

use base58::ToBase58;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

const SS58_PREFIX: &[u8] = b"SS58PRE";

/// Encodes a 32-byte substrate account id as an SS58 address using the
/// default network prefix (42, the generic substrate prefix).
pub fn encode(network_prefix: u8, account_id: &[u8; 32]) -> String {
    let mut body = vec![network_prefix];
    body.extend_from_slice(account_id);

    let mut hasher = Blake2bVar::new(64).expect("64 is a valid blake2b output size");
    hasher.update(SS58_PREFIX);
    hasher.update(&body);
    let mut checksum = [0u8; 64];
    hasher.finalize_variable(&mut checksum).expect("buffer matches output size");

    body.extend_from_slice(&checksum[..2]);
    body.to_base58()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_deterministic() {
        let account = [1u8; 32];
        assert_eq!(encode(42, &account), encode(42, &account));
    }

    #[test]
    fn encode_varies_with_prefix() {
        let account = [1u8; 32];
        assert_ne!(encode(0, &account), encode(42, &account));
    }
}
