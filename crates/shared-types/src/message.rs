//! # Chaincode Message Frames
//!
//! The single wire element exchanged on a peer/worker stream. A frame carries
//! a [`MessageType`], the transaction identifier it belongs to, and an opaque
//! payload whose schema is determined by the type (see `payloads`).

use crate::payloads::{encode, ChaincodeInput};
use crate::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Enumeration of every frame type on the peer/worker stream.
///
/// Direction noted per variant is the typical initiator; both sides may send
/// most types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// worker→peer: first frame on the stream, payload is `ChaincodeId`.
    Register,
    /// peer→worker: acknowledges registration, empty payload.
    Registered,
    /// peer→worker: initialize the chaincode, payload is `ChaincodeInput`.
    Init,
    /// peer→worker: no initialization required, empty payload.
    Ready,
    /// peer→worker: invoke the chaincode, payload is `ChaincodeInput`.
    Transaction,
    /// peer→worker: query the chaincode, payload is `ChaincodeInput`.
    Query,
    /// worker→peer: write a key, payload is `PutStateInfo`.
    PutState,
    /// worker→peer: delete a key, payload is the raw key bytes.
    DelState,
    /// worker→peer: invoke another chaincode, payload is `ChaincodeSpec`.
    InvokeChaincode,
    /// worker→peer: query another chaincode, payload is `ChaincodeSpec`.
    InvokeQuery,
    /// worker→peer: read a key, payload is the raw key bytes.
    GetState,
    /// worker→peer: open a range scan, payload is `RangeQueryState`.
    RangeQueryState,
    /// worker→peer: fetch the next page, payload is `RangeQueryStateNext`.
    RangeQueryStateNext,
    /// worker→peer: close a scan, payload is `RangeQueryStateClose`.
    RangeQueryStateClose,
    /// either direction: successful reply, payload is the result bytes.
    Response,
    /// either direction: failed reply, payload is UTF-8 error text.
    Error,
    /// worker→peer: terminal result of an init or invoke.
    Completed,
    /// worker→peer: terminal result of a query.
    QueryCompleted,
    /// worker→peer: terminal failure of a query, payload is UTF-8 error text.
    QueryError,
}

impl MessageType {
    /// Canonical wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Registered => "REGISTERED",
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Transaction => "TRANSACTION",
            Self::Query => "QUERY",
            Self::PutState => "PUT_STATE",
            Self::DelState => "DEL_STATE",
            Self::InvokeChaincode => "INVOKE_CHAINCODE",
            Self::InvokeQuery => "INVOKE_QUERY",
            Self::GetState => "GET_STATE",
            Self::RangeQueryState => "RANGE_QUERY_STATE",
            Self::RangeQueryStateNext => "RANGE_QUERY_STATE_NEXT",
            Self::RangeQueryStateClose => "RANGE_QUERY_STATE_CLOSE",
            Self::Response => "RESPONSE",
            Self::Error => "ERROR",
            Self::Completed => "COMPLETED",
            Self::QueryCompleted => "QUERY_COMPLETED",
            Self::QueryError => "QUERY_ERROR",
        }
    }

    /// True for the types that mutate execution state on the peer
    /// (writes and nested invokes). These are only admissible for
    /// transactions, never for queries.
    #[must_use]
    pub fn is_write_class(self) -> bool {
        matches!(
            self,
            Self::PutState | Self::DelState | Self::InvokeChaincode
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// One frame on the peer/worker stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeMessage {
    /// Frame type; selects the payload schema.
    pub msg_type: MessageType,
    /// Transaction identifier this frame belongs to. Empty for handshake
    /// frames (REGISTER / REGISTERED).
    pub tx_id: String,
    /// Opaque payload, interpreted per `msg_type`.
    pub payload: Vec<u8>,
}

impl ChaincodeMessage {
    /// Build a frame from parts.
    #[must_use]
    pub fn new(msg_type: MessageType, tx_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            tx_id: tx_id.into(),
            payload,
        }
    }

    /// Empty REGISTERED acknowledgement.
    #[must_use]
    pub fn registered() -> Self {
        Self::new(MessageType::Registered, String::new(), Vec::new())
    }

    /// Empty READY frame for the given transaction.
    #[must_use]
    pub fn ready(tx_id: impl Into<String>) -> Self {
        Self::new(MessageType::Ready, tx_id, Vec::new())
    }

    /// Successful RESPONSE carrying result bytes.
    #[must_use]
    pub fn response(tx_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Response, tx_id, payload)
    }

    /// ERROR frame carrying UTF-8 error text.
    #[must_use]
    pub fn error(tx_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageType::Error, tx_id, text.into().into_bytes())
    }

    /// INIT frame carrying an encoded [`ChaincodeInput`].
    pub fn init(tx_id: impl Into<String>, input: &ChaincodeInput) -> Result<Self, WireError> {
        Ok(Self::new(MessageType::Init, tx_id, encode(input)?))
    }

    /// TRANSACTION frame carrying an encoded [`ChaincodeInput`].
    pub fn transaction(
        tx_id: impl Into<String>,
        input: &ChaincodeInput,
    ) -> Result<Self, WireError> {
        Ok(Self::new(MessageType::Transaction, tx_id, encode(input)?))
    }

    /// QUERY frame carrying an encoded [`ChaincodeInput`].
    pub fn query(tx_id: impl Into<String>, input: &ChaincodeInput) -> Result<Self, WireError> {
        Ok(Self::new(MessageType::Query, tx_id, encode(input)?))
    }

    /// Payload interpreted as UTF-8 (lossy). Used for ERROR frames.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// =============================================================================
// TESTS
// =============================================================================
