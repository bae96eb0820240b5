//! # Transaction Descriptors
//!
//! The decrypted transaction descriptor that accompanies every init, invoke
//! and query against a chaincode. The session handler stores it on the
//! per-transaction context and the crypto mediator selects encryption keys
//! from it.

use crate::payloads::{decode, encode, ChaincodeId, ChaincodeSpec};
use crate::WireError;
use serde::{Deserialize, Serialize};

/// Kind of a transaction against a chaincode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Installs the chaincode. Its security context becomes the encryption
    /// anchor for every later transaction against the same chaincode.
    Deploy,
    /// State-mutating invocation.
    Execute,
    /// Read-only invocation.
    Query,
}

/// A decrypted transaction descriptor.
///
/// `chaincode_id` is kept in encoded form: the deploy security context is
/// produced by round-tripping this field so the `path` can be erased without
/// touching the rest of the descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier (worker- or peer-chosen string).
    pub tx_id: String,
    /// Deploy, execute or query.
    pub tx_type: TransactionType,
    /// Encoded [`ChaincodeId`] this transaction targets.
    pub chaincode_id: Vec<u8>,
    /// Transaction body. For deploys this is the (large) code package and is
    /// stripped from the security context.
    pub payload: Vec<u8>,
    /// Key material consumed by the crypto mediator.
    pub key_material: Vec<u8>,
}

impl Transaction {
    /// Build a transaction targeting `chaincode_id`.
    pub fn new(
        tx_id: impl Into<String>,
        tx_type: TransactionType,
        chaincode_id: &ChaincodeId,
        payload: Vec<u8>,
        key_material: Vec<u8>,
    ) -> Result<Self, WireError> {
        Ok(Self {
            tx_id: tx_id.into(),
            tx_type,
            chaincode_id: encode(chaincode_id)?,
            payload,
            key_material,
        })
    }

    /// Build the transaction for a nested invocation: the caller's
    /// transaction id is carried over and the spec's input becomes the
    /// payload, so the support plane can launch the target and replay the
    /// input to it.
    pub fn for_invocation(
        spec: &ChaincodeSpec,
        tx_id: impl Into<String>,
        tx_type: TransactionType,
    ) -> Result<Self, WireError> {
        Ok(Self {
            tx_id: tx_id.into(),
            tx_type,
            chaincode_id: encode(&spec.chaincode_id)?,
            payload: encode(&spec.input)?,
            key_material: Vec::new(),
        })
    }

    /// Decode the target chaincode identity.
    pub fn decode_chaincode_id(&self) -> Result<ChaincodeId, WireError> {
        decode(&self.chaincode_id)
    }

    /// Deep clone by round-tripping through the wire format.
    pub fn clone_via_wire(&self) -> Result<Self, WireError> {
        decode(&encode(self)?)
    }
}
