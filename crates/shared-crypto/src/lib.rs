//! # Shared Crypto - State Confidentiality Primitives
//!
//! Cryptographic building blocks for confidential chaincode state. The peer
//! seals every value before it reaches the ledger and unseals it on the way
//! back; keys are derived from the key material of the deploy transaction
//! that installed the chaincode.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | XChaCha20-Poly1305 | Sealing ledger values |
//! | `keys` | BLAKE3 derive_key | Per-chaincode state keys |
//!
//! ## Security Properties
//!
//! - **XChaCha20**: 192-bit nonce, constant-time ARX design; random nonces
//!   are safe without coordination
//! - **BLAKE3 derive_key**: domain-separated, context-bound derivation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod keys;
pub mod symmetric;

pub use errors::CryptoError;
pub use keys::{derive_state_key, SecretKey};
pub use symmetric::{seal, unseal, NONCE_LEN};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
