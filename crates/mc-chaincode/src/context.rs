//! # Transaction Contexts
//!
//! Per-transaction bookkeeping for one session: the response rendezvous, the
//! live range-scan cursors, the security descriptor, the in-flight request
//! guard and the transaction-vs-query table. One mutex guards every table;
//! none of the registry calls block, so the lock is never held across a
//! suspension point.

use crate::ports::RangeScanIterator;
use crate::session::short_id;
use crate::SessionError;
use parking_lot::Mutex;
use shared_types::{ChaincodeMessage, Transaction};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Rendezvous capacity: one buffered slot so the producer never blocks when
/// the caller has timed out or abandoned waiting.
const RESPONSE_CAPACITY: usize = 1;

/// Per-transaction record.
struct TxContext {
    /// Decrypted transaction descriptor; the crypto mediator selects keys
    /// from it. `None` for nested executions dispatched without one.
    sec_context: Option<Transaction>,
    /// Single-slot rendezvous for the terminal reply.
    notifier: mpsc::Sender<ChaincodeMessage>,
    /// Live range-scan cursors, keyed by iterator id.
    iterators: HashMap<String, Box<dyn RangeScanIterator>>,
}

#[derive(Default)]
struct Tables {
    contexts: HashMap<String, TxContext>,
    in_flight: HashSet<String>,
    is_transaction: HashMap<String, bool>,
}

/// All per-transaction tables of one session, behind a single mutex.
#[derive(Default)]
pub(crate) struct ContextRegistry {
    tables: Mutex<Tables>,
}

impl ContextRegistry {
    /// Install a context for `tx_id` and hand back the receiving side of its
    /// rendezvous. Fails when the id is already present; worker-chosen ids
    /// are validated here, not trusted.
    pub fn create_context(
        &self,
        tx_id: &str,
        sec_context: Option<Transaction>,
    ) -> Result<mpsc::Receiver<ChaincodeMessage>, SessionError> {
        let mut tables = self.tables.lock();
        if tables.contexts.contains_key(tx_id) {
            return Err(SessionError::DuplicateContext(tx_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(RESPONSE_CAPACITY);
        tables.contexts.insert(
            tx_id.to_string(),
            TxContext {
                sec_context,
                notifier: tx,
                iterators: HashMap::new(),
            },
        );
        Ok(rx)
    }

    /// Drop the context for `tx_id`, closing any surviving cursors.
    pub fn delete_context(&self, tx_id: &str) {
        let ctx = self.tables.lock().contexts.remove(tx_id);
        if let Some(mut ctx) = ctx {
            for iter in ctx.iterators.values_mut() {
                iter.close();
            }
        }
    }

    /// Clone of the security descriptor for `tx_id`. Outer `None` when no
    /// context exists.
    pub fn sec_context(&self, tx_id: &str) -> Option<Option<Transaction>> {
        self.tables
            .lock()
            .contexts
            .get(tx_id)
            .map(|ctx| ctx.sec_context.clone())
    }

    /// Deliver the terminal frame for its transaction and close every
    /// surviving cursor on that context. Returns false when no context
    /// exists or the waiter is gone.
    pub fn notify(&self, msg: &ChaincodeMessage) -> bool {
        // Take the cursors out under the lock; close them after release.
        let (notifier, mut iterators) = {
            let mut tables = self.tables.lock();
            let Some(ctx) = tables.contexts.get_mut(&msg.tx_id) else {
                debug!(tx = short_id(&msg.tx_id), "no context to notify");
                return false;
            };
            (ctx.notifier.clone(), std::mem::take(&mut ctx.iterators))
        };

        for iter in iterators.values_mut() {
            iter.close();
        }

        match notifier.try_send(msg.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    tx = short_id(&msg.tx_id),
                    msg_type = %msg.msg_type,
                    error = %e,
                    "dropping notification, waiter gone or already notified"
                );
                false
            }
        }
    }

    /// Claim the single in-flight state-request slot for `tx_id`. Returns
    /// false when another request already holds it; the duplicate is dropped.
    pub fn claim_in_flight(&self, tx_id: &str) -> bool {
        self.tables.lock().in_flight.insert(tx_id.to_string())
    }

    /// Release the in-flight slot for `tx_id`.
    pub fn release_in_flight(&self, tx_id: &str) {
        self.tables.lock().in_flight.remove(tx_id);
    }

    /// Record whether `tx_id` is a transaction (true) or a query (false).
    /// The worker's shim tracks this too, but cannot be trusted.
    pub fn mark_transaction(&self, tx_id: &str, is_tx: bool) {
        self.tables
            .lock()
            .is_transaction
            .insert(tx_id.to_string(), is_tx);
    }

    /// True only when `tx_id` was marked as a transaction.
    pub fn is_transaction(&self, tx_id: &str) -> bool {
        self.tables
            .lock()
            .is_transaction
            .get(tx_id)
            .copied()
            .unwrap_or(false)
    }

    /// Forget the transaction/query mark for `tx_id`.
    pub fn clear_transaction(&self, tx_id: &str) {
        self.tables.lock().is_transaction.remove(tx_id);
    }

    /// Attach a cursor to the context of `tx_id`. Returns the cursor back
    /// when no context exists, so the caller can close it.
    pub fn store_iterator(
        &self,
        tx_id: &str,
        iter_id: &str,
        iter: Box<dyn RangeScanIterator>,
    ) -> Result<(), Box<dyn RangeScanIterator>> {
        let mut tables = self.tables.lock();
        match tables.contexts.get_mut(tx_id) {
            Some(ctx) => {
                ctx.iterators.insert(iter_id.to_string(), iter);
                Ok(())
            }
            None => Err(iter),
        }
    }

    /// Detach the cursor `iter_id` from the context of `tx_id`. The caller
    /// drains it without holding the registry lock and either stores it back
    /// or closes it.
    pub fn take_iterator(&self, tx_id: &str, iter_id: &str) -> Option<Box<dyn RangeScanIterator>> {
        self.tables
            .lock()
            .contexts
            .get_mut(tx_id)?
            .iterators
            .remove(iter_id)
    }

    /// Terminate every outstanding context: deliver a synthesized ERROR frame
    /// on each rendezvous, close all cursors and clear every table. Called
    /// when the session's stream terminates so no waiter hangs forever.
    pub fn abort_all(&self, reason: &str) {
        let contexts = {
            let mut tables = self.tables.lock();
            tables.in_flight.clear();
            tables.is_transaction.clear();
            std::mem::take(&mut tables.contexts)
        };

        for (tx_id, mut ctx) in contexts {
            for iter in ctx.iterators.values_mut() {
                iter.close();
            }
            let frame = ChaincodeMessage::error(&tx_id, reason);
            if ctx.notifier.try_send(frame).is_err() {
                debug!(tx = short_id(&tx_id), "abort notification dropped");
            }
        }
    }

    /// Number of live contexts. Diagnostic only.
    pub fn context_count(&self) -> usize {
        self.tables.lock().contexts.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
