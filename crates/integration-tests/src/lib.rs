//! # Integration Tests Crate
//!
//! Cross-component tests for the chaincode session subsystem: full protocol
//! flows between a scripted worker, a session handler, the in-process
//! support plane and the in-memory ledger.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! └── src/
//!     ├── lib.rs         # This file
//!     ├── harness.rs     # Session fixtures and frame helpers
//!     ├── lifecycle.rs   # Handshake, deploy/ready paths, termination
//!     └── state_flows.rs # Reads, writes, range scans, nesting, crypto
//! ```
//!
//! ## Flows covered
//!
//! 1. **Deploy path**: `init_or_ready` drives INIT, worker completes,
//!    rendezvous yields COMPLETED.
//! 2. **Invoke with read and write**: GET_STATE answers from the ledger,
//!    PUT_STATE buffers an uncommitted write.
//! 3. **Query misuse**: a write in query context draws ERROR and no ledger
//!    call.
//! 4. **Paged range scans**: 250 entries drain in 100/100/50 pages.
//! 5. **Stream loss**: EOF mid-transaction releases every waiter.
//! 6. **Nested invocation**: one session calls into another through the
//!    support plane.
//! 7. **Confidential state**: values are sealed on the ledger and opened on
//!    the way back to the worker.

pub mod harness;

#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod state_flows;
