//! # Driven Ports (Outbound)
//!
//! Interfaces the session handler depends on. Adapters implement these to
//! provide the worker transport, the ledger, the chaincode support plane and
//! state confidentiality.

use crate::errors::{LedgerError, StreamError, SupportError};
use crate::session::SessionHandle;
use async_trait::async_trait;
use shared_crypto::CryptoError;
use shared_types::{ChaincodeInput, ChaincodeMessage, Transaction};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// WORKER TRANSPORT
// =============================================================================

/// One duplex stream of frames between the peer and a chaincode worker.
///
/// The session is the single reader; sends are serialized by the session's
/// sender, so implementations only need to be internally consistent, not
/// ordered across callers.
#[async_trait]
pub trait ChaincodeStream: Send + Sync {
    /// Send one frame to the worker.
    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError>;

    /// Receive the next frame. `Ok(None)` signals end of stream.
    async fn recv(&self) -> Result<Option<ChaincodeMessage>, StreamError>;
}

// =============================================================================
// LEDGER
// =============================================================================

/// Cursor over a key interval of the ledger, in key order.
///
/// Usage mirrors the ledger contract: `next()` advances and reports whether a
/// pair is available; `key_value()` reads the pair at the current position
/// and is only valid after `next()` returned true.
pub trait RangeScanIterator: Send {
    /// Advance to the next pair. Returns false once exhausted.
    fn next(&mut self) -> bool;

    /// Key and value at the current position.
    fn key_value(&self) -> (String, Vec<u8>);

    /// Release underlying resources. Idempotent.
    fn close(&mut self);
}

/// Ledger state access, scoped per chaincode.
///
/// `committed = true` reads only committed state (query semantics);
/// `committed = false` lets a transaction read the writes it has buffered
/// during its own execution.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read one key. Missing keys yield empty bytes.
    async fn get_state(
        &self,
        chaincode: &str,
        key: &str,
        committed: bool,
    ) -> Result<Vec<u8>, LedgerError>;

    /// Buffer a write for the executing transaction.
    async fn set_state(
        &self,
        chaincode: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError>;

    /// Buffer a delete for the executing transaction.
    async fn delete_state(&self, chaincode: &str, key: &str) -> Result<(), LedgerError>;

    /// Open a cursor over `[start_key, end_key]`.
    async fn range_scan(
        &self,
        chaincode: &str,
        start_key: &str,
        end_key: &str,
        committed: bool,
    ) -> Result<Box<dyn RangeScanIterator>, LedgerError>;
}

// =============================================================================
// STATE CONFIDENTIALITY
// =============================================================================

/// Encrypts and decrypts ledger values for one transaction context.
pub trait StateEncryptor: Send {
    /// Seal a plaintext value.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Open a sealed value.
    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Produces a [`StateEncryptor`] for a transaction.
///
/// `deploy_tx` is the cleaned security context of the transaction that
/// installed the chaincode; `tx` is the descriptor of the transaction being
/// served. Deploys pass the deploy context in both positions.
pub trait SecurityHelper: Send + Sync {
    /// Build the encryptor for `(deploy_tx, tx)`.
    fn state_encryptor(
        &self,
        deploy_tx: &Transaction,
        tx: &Transaction,
    ) -> Result<Box<dyn StateEncryptor>, CryptoError>;
}

// =============================================================================
// SUPPORT PLANE
// =============================================================================

/// The chaincode support plane: owns the handler registry, launches worker
/// containers and routes nested executions between sessions.
///
/// Nested execution deliberately goes through this interface rather than the
/// caller's own stream: the caller's pump may be parked waiting for its
/// worker, and the target chaincode lives on a different session entirely.
#[async_trait]
pub trait SupportPlane: Send + Sync {
    /// Register a session under its chaincode name. Fails when the name is
    /// taken; the second REGISTER of a handshake must not displace the first.
    fn register(&self, handle: SessionHandle) -> Result<(), SupportError>;

    /// Remove the session registered under `chaincode`.
    fn deregister(&self, chaincode: &str);

    /// Ensure the transaction's target chaincode is running. A no-op when it
    /// already is. Returns the input to replay to the target.
    async fn launch(&self, tx: &Transaction) -> Result<ChaincodeInput, SupportError>;

    /// Execute `msg` on the chaincode registered under `chaincode` and wait
    /// up to `timeout` for its terminal reply.
    async fn execute(
        &self,
        chaincode: &str,
        msg: ChaincodeMessage,
        timeout: Duration,
    ) -> Result<ChaincodeMessage, SupportError>;

    /// The installed security helper, if confidentiality is enabled.
    fn security_helper(&self) -> Option<Arc<dyn SecurityHelper>>;
}
