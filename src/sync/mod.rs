//! Replica-to-replica synchronization
//!
//! Peers exchange version summaries and then the changes the other side is
//! missing, over any `Transport`.

pub mod message;
pub mod session;
pub mod transport;

pub use message::SyncMessage;
pub use session::{SyncSession, SyncStats};
pub use transport::{MemoryTransport, Transport};
