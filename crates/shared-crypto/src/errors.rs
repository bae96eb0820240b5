//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error, Clone)]
pub enum CryptoError {
    /// Encryption failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key, truncated or tampered input)
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Sealed blob too short to carry a nonce
    #[error("sealed input too short: {len} < {min} bytes")]
    SealedInputTooShort {
        /// Actual input length in bytes
        len: usize,
        /// Minimum length in bytes (nonce plus tag)
        min: usize,
    },

    /// Key material missing or unusable
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}
