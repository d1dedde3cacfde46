use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey};
use sha2::{Digest, Sha256};

use crate::{PocketError, Result};

/// Hex length of a Pocket private key: 32-byte seed followed by the
/// 32-byte public key.
pub const PRIVATE_KEY_HEX_LEN: usize = 128;

/// Signing material for one servicer.
///
/// Deliberately not `Clone`: the secret lives in exactly one place and is
/// shared behind an `Arc`.
pub struct Signer {
    key: SigningKey,
    private_key: String,
    public_key: String,
    address: String,
}

impl Signer {
    /// Parse a hex-encoded ed25519 keypair (optionally `0x`-prefixed).
    ///
    /// The embedded public key must match the one derived from the seed.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let normalized = normalize_key(private_key);
        if normalized.len() != PRIVATE_KEY_HEX_LEN {
            return Err(PocketError::InvalidKey(format!(
                "expected {PRIVATE_KEY_HEX_LEN} hex characters, got {}",
                normalized.len()
            )));
        }
        let bytes = hex::decode(&normalized).map_err(|e| PocketError::InvalidKey(e.to_string()))?;
        let keypair: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PocketError::InvalidKey("expected 64 bytes".into()))?;
        let key = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| PocketError::InvalidKey(e.to_string()))?;

        let public = key.verifying_key().to_bytes();
        Ok(Self {
            key,
            private_key: normalized,
            public_key: hex::encode(public),
            address: address_from_public_key(&public),
        })
    }

    /// The on-chain identity: lowercase hex of `sha256(pubkey)[..20]`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Whether this signer was built from `private_key`, ignoring case and a
    /// `0x` prefix.
    pub fn holds_key(&self, private_key: &str) -> bool {
        self.private_key == normalize_key(private_key)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    key.strip_prefix("0x")
        .unwrap_or(key)
        .to_ascii_lowercase()
}

pub fn address_from_public_key(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..20])
}

/// Cheap syntactic check used by config validation; does not verify that
/// the public half matches the seed.
pub fn is_private_key_hex(key: &str) -> bool {
    let key = normalize_key(key);
    key.len() == PRIVATE_KEY_HEX_LEN && key.chars().all(|c| c.is_ascii_hexdigit())
}

/// Encode the keypair derived from `seed` in the 128-char private key
/// format accepted by [`Signer::from_private_key`].
pub fn private_key_from_seed(seed: [u8; 32]) -> String {
    hex::encode(SigningKey::from_bytes(&seed).to_keypair_bytes())
}
