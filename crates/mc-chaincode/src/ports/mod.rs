//! Ports of the chaincode session subsystem. The session depends only on
//! these traits; adapters supply the concrete collaborators.

pub mod outbound;

pub use outbound::{
    ChaincodeStream, Ledger, RangeScanIterator, SecurityHelper, StateEncryptor, SupportPlane,
};
