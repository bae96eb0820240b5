//! # In-Memory Ledger
//!
//! Ledger adapter backed by ordered maps, with the committed/uncommitted
//! split the session relies on: writes land in a per-chaincode overlay until
//! `commit`, `committed = false` reads see the overlay (a transaction reads
//! its own writes), `committed = true` reads do not (query semantics).

use crate::errors::LedgerError;
use crate::ports::{Ledger, RangeScanIterator};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Per-chaincode state: committed store plus uncommitted overlay.
/// `None` in the overlay marks a pending delete.
#[derive(Default)]
struct ChainState {
    committed: BTreeMap<String, Vec<u8>>,
    pending: BTreeMap<String, Option<Vec<u8>>>,
}

impl ChainState {
    fn read(&self, key: &str, committed: bool) -> Vec<u8> {
        if !committed {
            if let Some(slot) = self.pending.get(key) {
                return slot.clone().unwrap_or_default();
            }
        }
        self.committed.get(key).cloned().unwrap_or_default()
    }

    /// Ordered snapshot of `[start, end]`. Empty bounds are open-ended.
    fn snapshot_range(&self, start: &str, end: &str, committed: bool) -> Vec<(String, Vec<u8>)> {
        let mut merged: BTreeMap<String, Vec<u8>> = self.committed.clone();
        if !committed {
            for (key, slot) in &self.pending {
                match slot {
                    Some(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }

        let low = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start.to_string())
        };
        let high = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(end.to_string())
        };

        merged
            .range((low, high))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// In-memory [`Ledger`] implementation.
#[derive(Default)]
pub struct MemoryLedger {
    chains: Mutex<HashMap<String, ChainState>>,
}

impl MemoryLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the uncommitted overlay of `chaincode` to its committed store.
    pub fn commit(&self, chaincode: &str) {
        let mut chains = self.chains.lock();
        if let Some(state) = chains.get_mut(chaincode) {
            let pending = std::mem::take(&mut state.pending);
            for (key, slot) in pending {
                match slot {
                    Some(value) => {
                        state.committed.insert(key, value);
                    }
                    None => {
                        state.committed.remove(&key);
                    }
                }
            }
        }
    }

    /// Discard the uncommitted overlay of `chaincode`.
    pub fn rollback(&self, chaincode: &str) {
        let mut chains = self.chains.lock();
        if let Some(state) = chains.get_mut(chaincode) {
            state.pending.clear();
        }
    }
}

/// Cursor over a snapshot taken at open time.
struct SnapshotIterator {
    entries: Vec<(String, Vec<u8>)>,
    /// Position of the current pair; `None` before the first `next`.
    position: Option<usize>,
}

impl RangeScanIterator for SnapshotIterator {
    fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next);
        next < self.entries.len()
    }

    fn key_value(&self) -> (String, Vec<u8>) {
        match self.position.and_then(|p| self.entries.get(p)) {
            Some((key, value)) => (key.clone(), value.clone()),
            None => (String::new(), Vec::new()),
        }
    }

    fn close(&mut self) {
        self.entries.clear();
        self.position = None;
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_state(
        &self,
        chaincode: &str,
        key: &str,
        committed: bool,
    ) -> Result<Vec<u8>, LedgerError> {
        let chains = self.chains.lock();
        Ok(chains
            .get(chaincode)
            .map(|state| state.read(key, committed))
            .unwrap_or_default())
    }

    async fn set_state(
        &self,
        chaincode: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError> {
        let mut chains = self.chains.lock();
        chains
            .entry(chaincode.to_string())
            .or_default()
            .pending
            .insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn delete_state(&self, chaincode: &str, key: &str) -> Result<(), LedgerError> {
        let mut chains = self.chains.lock();
        chains
            .entry(chaincode.to_string())
            .or_default()
            .pending
            .insert(key.to_string(), None);
        Ok(())
    }

    async fn range_scan(
        &self,
        chaincode: &str,
        start_key: &str,
        end_key: &str,
        committed: bool,
    ) -> Result<Box<dyn RangeScanIterator>, LedgerError> {
        let chains = self.chains.lock();
        let entries = chains
            .get(chaincode)
            .map(|state| state.snapshot_range(start_key, end_key, committed))
            .unwrap_or_default();
        Ok(Box::new(SnapshotIterator {
            entries,
            position: None,
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
