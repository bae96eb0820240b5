//! # Payload Schemas
//!
//! Schema-typed wrappers for frame payloads, plus the bincode codec used to
//! move them through the opaque `payload` field of a frame.

use crate::WireError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encode a schema-typed payload to frame bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|e| WireError::Encode(e.to_string()))
}

/// Decode frame bytes into a schema-typed payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// Identity of a chaincode. `path` is only populated on deploy transactions;
/// it names the source location the worker image was built from and is erased
/// from every downstream security context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeId {
    /// Registered name, unique per peer.
    pub name: String,
    /// Filesystem path of the deployed source. Empty outside deploys.
    pub path: String,
}

impl ChaincodeId {
    /// Identity with a name and no path.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
        }
    }
}

/// Function selector and arguments for INIT / TRANSACTION / QUERY frames.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeInput {
    /// Function to dispatch inside the worker.
    pub function: String,
    /// Positional string arguments.
    pub args: Vec<String>,
}

/// Target and input of a nested chaincode invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeSpec {
    /// Chaincode to invoke.
    pub chaincode_id: ChaincodeId,
    /// Input handed to the target chaincode.
    pub input: ChaincodeInput,
}

/// PUT_STATE payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutStateInfo {
    /// Ledger key.
    pub key: String,
    /// Value bytes (encrypted by the peer before they reach the ledger when
    /// confidentiality is enabled).
    pub value: Vec<u8>,
}

/// RANGE_QUERY_STATE payload: open a scan over `[start_key, end_key]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQueryState {
    /// Inclusive lower bound.
    pub start_key: String,
    /// Inclusive upper bound.
    pub end_key: String,
}

/// RANGE_QUERY_STATE_NEXT payload: continue the scan with the given id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQueryStateNext {
    /// Iterator id allocated by the peer on the initial open.
    pub id: String,
}

/// RANGE_QUERY_STATE_CLOSE payload: release the scan with the given id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQueryStateClose {
    /// Iterator id allocated by the peer on the initial open.
    pub id: String,
}

/// One key/value pair in a range scan page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQueryKeyValue {
    /// Ledger key.
    pub key: String,
    /// Decrypted value bytes.
    pub value: Vec<u8>,
}

/// RESPONSE payload for range scan requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQueryStateResponse {
    /// Up to one page of key/value pairs.
    pub keys_and_values: Vec<RangeQueryKeyValue>,
    /// True when the scan has more pairs; continue with
    /// RANGE_QUERY_STATE_NEXT.
    pub has_more: bool,
    /// Iterator id, allocated on open and echoed on NEXT / CLOSE.
    pub id: String,
}
