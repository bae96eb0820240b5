//! # Symmetric Sealing
//!
//! XChaCha20-Poly1305 with the nonce attached to the ciphertext, so a sealed
//! value is a single byte string that can live in a ledger column or ride a
//! wire frame without side-channel metadata.
//!
//! Layout: `nonce (24 bytes) || ciphertext+tag`.

use crate::keys::SecretKey;
use crate::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

/// Nonce length in bytes (XChaCha20 uses 192-bit nonces).
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length in bytes.
const TAG_LEN: usize = 16;

/// Seal plaintext under `key`. Returns `nonce || ciphertext`.
///
/// # Errors
///
/// Returns `CryptoError::EncryptionFailed` if encryption fails.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_LEN];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Unseal a `nonce || ciphertext` blob produced by [`seal`].
///
/// # Errors
///
/// Returns `CryptoError::SealedInputTooShort` for truncated input and
/// `CryptoError::DecryptionFailed` for a wrong key or tampered ciphertext.
pub fn unseal(key: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::SealedInputTooShort {
            len: sealed.len(),
            min: NONCE_LEN + TAG_LEN,
        });
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}
