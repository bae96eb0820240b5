//! # Derived-Key Security Helper
//!
//! State confidentiality built on `shared-crypto`: the chaincode's state key
//! is derived from the deploy transaction's key material, values are sealed
//! with XChaCha20-Poly1305. Anchoring the key on the deploy transaction lets
//! any later transaction against the same chaincode open values written by
//! earlier ones.

use crate::ports::{SecurityHelper, StateEncryptor};
use shared_crypto::{derive_state_key, seal, unseal, CryptoError, SecretKey};
use shared_types::Transaction;

/// Domain separation for state sealing keys.
const STATE_KEY_CONTEXT: &str = "meridian chaincode state sealing v1";

/// [`SecurityHelper`] deriving one sealing key per chaincode.
#[derive(Default)]
pub struct DerivedKeyHelper;

impl DerivedKeyHelper {
    /// New helper.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SecurityHelper for DerivedKeyHelper {
    fn state_encryptor(
        &self,
        deploy_tx: &Transaction,
        _tx: &Transaction,
    ) -> Result<Box<dyn StateEncryptor>, CryptoError> {
        let key = derive_state_key(STATE_KEY_CONTEXT, &deploy_tx.key_material)?;
        Ok(Box::new(DerivedKeyEncryptor { key }))
    }
}

/// Seals and opens values under one derived key.
struct DerivedKeyEncryptor {
    key: SecretKey,
}

impl StateEncryptor for DerivedKeyEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.key, plaintext)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        unseal(&self.key, sealed)
    }
}
