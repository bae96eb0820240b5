//! # In-Process Support Plane
//!
//! Support plane for peers that run every chaincode session in-process: a
//! concurrent registry of sessions keyed by chaincode name, nested execution
//! routed through the target session's handle, and the optional security
//! helper shared by all sessions.

use crate::errors::SupportError;
use crate::ports::{SecurityHelper, SupportPlane};
use crate::session::SessionHandle;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::payloads::decode;
use shared_types::{ChaincodeInput, ChaincodeMessage, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// In-process [`SupportPlane`] implementation.
#[derive(Default)]
pub struct InProcessSupport {
    handlers: DashMap<String, SessionHandle>,
    security: Option<Arc<dyn SecurityHelper>>,
}

impl InProcessSupport {
    /// Support plane without confidentiality.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Support plane with a security helper; every session it hosts will
    /// encrypt and decrypt state through it.
    #[must_use]
    pub fn with_security(helper: Arc<dyn SecurityHelper>) -> Self {
        Self {
            handlers: DashMap::new(),
            security: Some(helper),
        }
    }

    /// Handle of the session registered under `chaincode`, if any.
    #[must_use]
    pub fn handler(&self, chaincode: &str) -> Option<SessionHandle> {
        self.handlers.get(chaincode).map(|entry| entry.value().clone())
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl SupportPlane for InProcessSupport {
    fn register(&self, handle: SessionHandle) -> Result<(), SupportError> {
        let name = handle.chaincode_name().ok_or_else(|| {
            SupportError::RegistrationFailed("session has no chaincode identity".to_string())
        })?;

        match self.handlers.entry(name.clone()) {
            Entry::Occupied(_) => {
                warn!(chaincode = %name, "duplicate registration rejected");
                Err(SupportError::DuplicateHandler(name))
            }
            Entry::Vacant(slot) => {
                debug!(chaincode = %name, "session registered");
                slot.insert(handle);
                Ok(())
            }
        }
    }

    fn deregister(&self, chaincode: &str) {
        if self.handlers.remove(chaincode).is_some() {
            debug!(chaincode = %chaincode, "session deregistered");
        }
    }

    async fn launch(&self, tx: &Transaction) -> Result<ChaincodeInput, SupportError> {
        let cc_id = tx
            .decode_chaincode_id()
            .map_err(|e| SupportError::LaunchFailed(e.to_string()))?;

        // In-process workers are launched out of band; a registered session
        // is the "already running" no-op path, anything else cannot be
        // started from here.
        if !self.handlers.contains_key(&cc_id.name) {
            return Err(SupportError::LaunchFailed(format!(
                "chaincode {} is not running",
                cc_id.name
            )));
        }

        decode::<ChaincodeInput>(&tx.payload)
            .map_err(|e| SupportError::LaunchFailed(e.to_string()))
    }

    async fn execute(
        &self,
        chaincode: &str,
        msg: ChaincodeMessage,
        timeout: Duration,
    ) -> Result<ChaincodeMessage, SupportError> {
        let handle = self
            .handler(chaincode)
            .ok_or_else(|| SupportError::UnknownChaincode(chaincode.to_string()))?;

        let tx_id = msg.tx_id.clone();
        let mut receiver = handle
            .send_execute(msg, None)
            .await
            .map_err(|e| SupportError::ExecuteFailed(e.to_string()))?;

        let outcome = tokio::time::timeout(timeout, receiver.recv()).await;

        // The context was created for this call; release it regardless.
        handle.delete_context(&tx_id);

        match outcome {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(SupportError::ExecuteFailed(
                "target session terminated".to_string(),
            )),
            Err(_) => Err(SupportError::ExecuteTimeout(timeout)),
        }
    }

    fn security_helper(&self) -> Option<Arc<dyn SecurityHelper>> {
        self.security.clone()
    }
}
