//! Snapshot persistence
//!
//! A snapshot is the replica's full change history, versioned and
//! checksummed. Stores only move opaque bytes around, keyed by document id;
//! they never look inside.

pub mod local;
pub mod memory;
pub mod snapshot;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PersistenceError;

pub use local::FileSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use snapshot::Snapshot;

/// Trait for snapshot stores
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store the snapshot for a document, replacing any previous one
    async fn save(&self, doc_id: Uuid, bytes: Vec<u8>) -> Result<(), PersistenceError>;

    /// Latest snapshot for a document, if any
    async fn load(&self, doc_id: Uuid) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Forget a document. Missing documents are not an error.
    async fn delete(&self, doc_id: Uuid) -> Result<(), PersistenceError>;

    /// Documents with a stored snapshot
    async fn list(&self) -> Result<Vec<Uuid>, PersistenceError>;
}
