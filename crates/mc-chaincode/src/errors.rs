//! # Error Types
//!
//! Error taxonomy of the chaincode session subsystem. Transport, handshake
//! and protocol failures terminate a session; payload, ledger and crypto
//! failures stay scoped to the transaction that caused them and reach the
//! worker as ERROR frames.

use crate::fsm::SessionState;
use shared_crypto::CryptoError;
use shared_types::{MessageType, WireError};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// SESSION ERRORS
// =============================================================================

/// Errors surfaced by a chaincode session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The duplex stream failed or closed.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// A schema-typed payload failed to encode or decode.
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    /// The ledger rejected an operation.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// State encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The chaincode support plane rejected an operation.
    #[error("support plane error: {0}")]
    Support(#[from] SupportError),

    /// A transaction context already exists for this id.
    #[error("transaction context for {0} already exists")]
    DuplicateContext(String),

    /// No transaction context exists for this id.
    #[error("no transaction context for {0}")]
    MissingContext(String),

    /// The transaction context carries no security descriptor.
    #[error("no security context for {0}")]
    MissingSecContext(String),

    /// A write-class frame arrived for a query.
    #[error("cannot handle {msg_type} in query context")]
    QueryContextViolation {
        /// The offending frame type.
        msg_type: MessageType,
    },

    /// The state machine cannot accept this frame in its current state.
    #[error("cannot handle {msg_type} with payload size {payload_len} in state {state}")]
    Inadmissible {
        /// State the session was in.
        state: SessionState,
        /// The offending frame type.
        msg_type: MessageType,
        /// Payload size, for diagnostics.
        payload_len: usize,
    },

    /// The session reached its terminal state.
    #[error("chaincode session ended")]
    SessionEnded,

    /// An operation needed the chaincode identity before registration.
    #[error("chaincode is not registered")]
    NotRegistered,
}

// =============================================================================
// COLLABORATOR ERRORS
// =============================================================================

/// Transport-level failures on the worker stream.
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    /// The remote side closed the stream (EOF).
    #[error("stream closed by remote")]
    Closed,

    /// The transport failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Failures reported by the ledger.
#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    /// The ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The underlying store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Failures reported by the chaincode support plane.
#[derive(Debug, Error, Clone)]
pub enum SupportError {
    /// A handler is already registered under this chaincode name.
    #[error("handler already registered for chaincode {0}")]
    DuplicateHandler(String),

    /// No handler is registered under this chaincode name.
    #[error("no handler registered for chaincode {0}")]
    UnknownChaincode(String),

    /// The session could not be registered.
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// The target chaincode could not be launched.
    #[error("chaincode launch failed: {0}")]
    LaunchFailed(String),

    /// A nested execution did not complete in time.
    #[error("execution timed out after {0:?}")]
    ExecuteTimeout(Duration),

    /// A nested execution failed.
    #[error("execution failed: {0}")]
    ExecuteFailed(String),
}
