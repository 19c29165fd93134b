//! Signing abstraction over sr25519, ed25519, and a deterministic
//! placeholder scheme (spec.md §9 "Signing abstraction").
//!
//! The canonical payload construction (`aggregator_client::canonical_payload`)
//! is identical across implementations; only the signature bytes and the
//! `signature_type` string vary.

use schnorrkel::{ExpansionMode, Keypair as SrKeypair, MiniSecretKey, Signature as SrSignature};
use sha2::{Digest, Sha256};

/// A 64-byte signature plus the wire name of the scheme that produced it.
pub struct Signed {
    pub signature: [u8; 64],
    pub signature_type: &'static str,
}

/// Common interface over the validator's supported signing schemes.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Signed;
}

/// sr25519 signing via a Bittensor-style wallet hotkey keypair.
pub struct Sr25519Signer {
    keypair: SrKeypair,
}

impl Sr25519Signer {
    /// Derive a keypair from a raw 32-byte mini secret key (e.g. decoded
    /// from an SS58/hex-encoded seed).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mini = MiniSecretKey::from_bytes(seed).expect("sr25519 seed must be 32 bytes");
        let keypair = mini.expand_to_keypair(ExpansionMode::Ed25519);
        Self { keypair }
    }
}

impl Signer for Sr25519Signer {
    fn sign(&self, payload: &[u8]) -> Signed {
        let sig: SrSignature = self.keypair.sign_simple(b"substrate", payload);
        Signed {
            signature: sig.to_bytes(),
            signature_type: "sr25519",
        }
    }
}

/// ed25519 signing, for miner-style keys (ported in spirit from
/// `common/src/crypto/ed25519.rs` in the teacher repo).
pub struct Ed25519Signer {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8]) -> Signed {
        use ed25519_dalek::Signer as _;
        let sig = self.signing_key.sign(payload);
        Signed {
            signature: sig.to_bytes(),
            signature_type: "ed25519",
        }
    }
}

/// Deterministic SHA-256-padded placeholder, used when no keypair is
/// configured. The server is expected to reject these outside test mode
/// (spec.md §9 Open Questions). `signature_type` is reported as `"sr25519"`
/// rather than a distinct literal: spec.md §6's `submit_weights` contract
/// restricts `signatureType` to `"sr25519"|"ed25519"`, and
/// `original_source/neurons/validation_engine.py` hardcodes `"sr25519"` for
/// its own no-keypair placeholder path.
pub struct PlaceholderSigner;

impl Signer for PlaceholderSigner {
    fn sign(&self, payload: &[u8]) -> Signed {
        let digest = Sha256::digest(payload);
        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(&digest);
        Signed {
            signature,
            signature_type: "sr25519",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_signer_is_deterministic() {
        let signer = PlaceholderSigner;
        let a = signer.sign(b"payload");
        let b = signer.sign(b"payload");
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.signature_type, "sr25519");
    }

    #[test]
    fn placeholder_signer_pads_to_64_bytes() {
        let signer = PlaceholderSigner;
        let signed = signer.sign(b"x");
        assert_eq!(signed.signature.len(), 64);
        assert!(signed.signature[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn sr25519_round_trip_signs() {
        let seed = [7u8; 32];
        let signer = Sr25519Signer::from_seed(&seed);
        let signed = signer.sign(b"hello");
        assert_eq!(signed.signature_type, "sr25519");
        assert_eq!(signed.signature.len(), 64);
    }

    #[test]
    fn ed25519_round_trip_signs() {
        let seed = [9u8; 32];
        let signer = Ed25519Signer::from_seed(&seed);
        let signed = signer.sign(b"hello");
        assert_eq!(signed.signature_type, "ed25519");
        assert_eq!(signed.signature.len(), 64);
    }
}
