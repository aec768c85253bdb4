// Stickyboard - replicated unconference scheduling board

pub mod config;
pub mod convergent;
pub mod error;
pub mod replica;
pub mod storage;
pub mod sync;

pub use config::{ReplicaConfig, SyncConfig};
pub use convergent::{
    new_id, BoardState, ChangeBuilder, ChangeId, Horizon, MergeReport, SessionState,
};
pub use error::{MergeError, PersistenceError, SyncError, TransportError, ValidationError};
pub use replica::{Autosave, Replica};
pub use storage::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use sync::{MemoryTransport, SyncSession, SyncStats, Transport};
