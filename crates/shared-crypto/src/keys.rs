//! # State Key Derivation
//!
//! Per-chaincode state keys derived with BLAKE3's `derive_key` mode. The
//! deploy transaction's key material anchors the derivation so that every
//! transaction against the same chaincode unseals values written by any
//! earlier one.

use crate::CryptoError;
use zeroize::Zeroize;

/// Secret key (256-bit). Zeroed on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Create from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive the state key for a chaincode from the key material of its deploy
/// transaction.
///
/// `context` is a static domain-separation string; callers use one context
/// per purpose (state sealing, future MACs, ...).
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` when `key_material` is empty.
pub fn derive_state_key(context: &str, key_material: &[u8]) -> Result<SecretKey, CryptoError> {
    if key_material.is_empty() {
        return Err(CryptoError::InvalidKeyMaterial(
            "empty key material".to_string(),
        ));
    }
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    Ok(SecretKey::from_bytes(*hasher.finalize().as_bytes()))
}
