//! In-memory adapters for the session's ports: a channel-backed worker
//! stream, a ledger with uncommitted-overlay semantics, an in-process
//! support plane and a derived-key security helper.

pub mod encryptor;
pub mod memory_ledger;
pub mod stream;
pub mod support;

pub use encryptor::DerivedKeyHelper;
pub use memory_ledger::MemoryLedger;
pub use stream::ChannelStream;
pub use support::InProcessSupport;
