//! # Shared Types - Chaincode Wire Protocol
//!
//! Types shared between the Meridian peer and out-of-process chaincode
//! workers. One duplex stream per worker carries [`ChaincodeMessage`] frames;
//! every schema-typed payload rides inside the frame as opaque bytes.
//!
//! ## Components
//!
//! | Module | Contents |
//! |--------|----------|
//! | `message` | `ChaincodeMessage` frame and `MessageType` enumeration |
//! | `payloads` | Schema-typed payload structs and the bincode codec |
//! | `transaction` | `Transaction` descriptor consumed by the crypto mediator |
//! | `errors` | `WireError` |
//!
//! ## Design Rules
//!
//! - Frame payloads are `Vec<u8>`; interpretation is driven by the frame type.
//! - Transaction identifiers are worker-chosen strings. They MUST be validated
//!   for uniqueness by the receiving session, never trusted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod message;
pub mod payloads;
pub mod transaction;

pub use errors::WireError;
pub use message::{ChaincodeMessage, MessageType};
pub use payloads::{
    decode, encode, ChaincodeId, ChaincodeInput, ChaincodeSpec, PutStateInfo, RangeQueryKeyValue,
    RangeQueryState, RangeQueryStateClose, RangeQueryStateNext, RangeQueryStateResponse,
};
pub use transaction::{Transaction, TransactionType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
