//! # Chaincode Session Handling
//!
//! Peer-side management of chaincode worker streams. Each running chaincode
//! holds one duplex stream to the peer; the session behind that stream owns
//! the protocol state machine, multiplexes concurrent transactions over the
//! stream, arbitrates ledger access and mediates state confidentiality.
//!
//! ## Architecture
//!
//! - **Hexagonal:** the session depends only on ports (`ports`); adapters
//!   (`adapters`) provide the worker transport, the ledger, the support
//!   plane and state encryption.
//! - **Single reader, serialized writer:** the stream pump is the only
//!   reader of the stream and the only driver of the state machine; every
//!   outbound frame passes through one serialized sender.
//! - **Transition-complete-before-effect:** FSM callbacks return quickly;
//!   ledger and crypto work runs on spawned tasks that reconverge through
//!   the serialized sender or a state-driving event.
//!
//! ## Invariants
//!
//! - Writes (`PUT_STATE`, `DEL_STATE`, `INVOKE_CHAINCODE`) are only admitted
//!   for transactions; the worker's own claim is never trusted.
//! - At most one state request is in flight per transaction id; concurrent
//!   duplicates are dropped.
//! - One session per chaincode name; a second REGISTER fails the handshake.
//! - Every range-scan cursor is closed when its transaction completes.
//!
//! ## Example
//!
//! ```ignore
//! use mc_chaincode::prelude::*;
//!
//! let support = Arc::new(InProcessSupport::new());
//! let ledger = Arc::new(MemoryLedger::new());
//! let (peer_side, worker_side) = ChannelStream::pair(64);
//!
//! tokio::spawn(handle_chaincode_stream(support.clone(), ledger, Arc::new(peer_side)));
//! // worker_side now speaks the chaincode protocol, starting with REGISTER.
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod adapters;
mod context;
pub mod errors;
pub mod fsm;
pub mod ports;
pub mod session;

pub use actions::MAX_RANGE_QUERY_STATE_LIMIT;
pub use errors::{LedgerError, SessionError, StreamError, SupportError};
pub use fsm::{Fsm, SessionState};
pub use session::{handle_chaincode_stream, Handler, SessionHandle, EXECUTE_TIMEOUT};

/// Convenient re-exports for hosts.
pub mod prelude {
    pub use crate::adapters::{ChannelStream, DerivedKeyHelper, InProcessSupport, MemoryLedger};
    pub use crate::errors::{LedgerError, SessionError, StreamError, SupportError};
    pub use crate::fsm::SessionState;
    pub use crate::ports::{
        ChaincodeStream, Ledger, RangeScanIterator, SecurityHelper, StateEncryptor, SupportPlane,
    };
    pub use crate::session::{
        handle_chaincode_stream, Handler, SessionHandle, EXECUTE_TIMEOUT,
    };
    pub use crate::MAX_RANGE_QUERY_STATE_LIMIT;
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
