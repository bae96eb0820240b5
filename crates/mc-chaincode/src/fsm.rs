//! # Session State Machine
//!
//! Lifecycle of one chaincode session, driven by frame types. The machine is
//! the single authority on whether a frame is admissible in the current
//! state; the session consults it before acting on any FSM-driven frame.
//!
//! ```text
//!  created ──REGISTER──▶ established ──INIT──▶ init ──COMPLETED──▶ ready
//!                              │                 │ ▲                 │ ▲
//!                              └────READY────────┼─┼──────┐          │ │
//!                                                │ │      ▼          │ │
//!                          PUT_STATE/DEL_STATE/  │ │    ready ◀──────┘ │
//!                          INVOKE_CHAINCODE      ▼ │      │ TRANSACTION│
//!                                            busyinit     ▼           │
//!                                                     transaction ──COMPLETED
//!                                                        │   ▲
//!                                                        ▼   │ RESPONSE/ERROR
//!                                                     busyxact
//! ```
//!
//! Reads (GET_STATE, RANGE_QUERY_STATE[_NEXT|_CLOSE]) are self-loops in every
//! state with a live transaction or query: they never alter execution state
//! and may be issued while already busy. Writes do alter state and are only
//! admissible from a non-busy state.

use serde::{Deserialize, Serialize};
use shared_types::MessageType;
use std::fmt;

// =============================================================================
// STATES
// =============================================================================

/// States of a chaincode session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Stream opened, nothing received yet.
    Created,
    /// REGISTER accepted, REGISTERED sent.
    Established,
    /// INIT forwarded to the worker, awaiting COMPLETED.
    Init,
    /// Idle between transactions.
    Ready,
    /// TRANSACTION forwarded, worker executing.
    Transaction,
    /// Worker issued a write during init.
    BusyInit,
    /// Worker issued a write during a transaction.
    BusyXact,
    /// Terminal.
    End,
}

impl SessionState {
    /// True once the handshake and initialization are behind us.
    #[must_use]
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Created | Self::Established | Self::Init)
    }

    /// True for the terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Established => "established",
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Transaction => "transaction",
            Self::BusyInit => "busyinit",
            Self::BusyXact => "busyxact",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

// =============================================================================
// TRANSITION TABLE
// =============================================================================

/// Data-driven transition table: `(state, frame type) -> next state`.
/// `None` means the frame is inadmissible in that state.
#[must_use]
pub fn successor(state: SessionState, event: MessageType) -> Option<SessionState> {
    use MessageType as M;
    use SessionState as S;

    match (state, event) {
        (S::Created, M::Register) => Some(S::Established),
        (S::Established, M::Init) => Some(S::Init),
        (S::Established, M::Ready) => Some(S::Ready),
        (S::Ready, M::Transaction) => Some(S::Transaction),

        (S::Transaction, M::PutState | M::DelState | M::InvokeChaincode) => Some(S::BusyXact),
        (S::Init, M::PutState | M::DelState | M::InvokeChaincode) => Some(S::BusyInit),

        (S::Init | S::Ready | S::Transaction, M::Completed) => Some(S::Ready),

        // Reads self-loop wherever a transaction or query is live.
        (
            S::Init | S::Ready | S::Transaction | S::BusyInit | S::BusyXact,
            M::GetState
            | M::RangeQueryState
            | M::RangeQueryStateNext
            | M::RangeQueryStateClose,
        ) => Some(state),

        (S::Init, M::Error) => Some(S::End),
        (S::Transaction, M::Error) => Some(S::Ready),
        (S::BusyInit, M::Error | M::Response) => Some(S::Init),
        (S::BusyXact, M::Error | M::Response) => Some(S::Transaction),

        _ => None,
    }
}

// =============================================================================
// MACHINE
// =============================================================================

/// Result of firing an event.
///
/// A self-loop is the "no transition" signal: the event was admissible but
/// the state did not change, so state-entry effects must not run. Only a
/// cancellation with a cause (an error from a before-callback) propagates;
/// self-loops are swallowed by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// The state changed.
    Moved {
        /// State before the event.
        from: SessionState,
        /// State after the event.
        to: SessionState,
    },
    /// Admissible event with no state change.
    SelfLoop(SessionState),
}

/// The session state machine. Owned by the stream pump; callbacks never
/// drive it re-entrantly.
#[derive(Debug)]
pub struct Fsm {
    current: SessionState,
}

impl Fsm {
    /// New machine in the initial state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: SessionState::Created,
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> SessionState {
        self.current
    }

    /// Can the current state accept this frame type?
    #[must_use]
    pub fn can_handle(&self, event: MessageType) -> bool {
        successor(self.current, event).is_some()
    }

    /// Fire an admissible event. Callers must check [`Fsm::can_handle`]
    /// first; firing an inadmissible event leaves the state untouched and
    /// returns `None`.
    pub fn advance(&mut self, event: MessageType) -> Option<Advance> {
        let next = successor(self.current, event)?;
        if next == self.current {
            return Some(Advance::SelfLoop(next));
        }
        let from = self.current;
        self.current = next;
        Some(Advance::Moved { from, to: next })
    }
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
