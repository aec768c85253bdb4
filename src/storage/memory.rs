//! In-memory snapshot store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::SnapshotStore;
use crate::error::PersistenceError;

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<Uuid, Vec<u8>>>,
    /// When set, every save fails with an IO error.
    unavailable: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing storage going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, doc_id: Uuid, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "store unavailable",
            )));
        }
        self.snapshots.lock().await.insert(doc_id, bytes);
        Ok(())
    }

    async fn load(&self, doc_id: Uuid) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.snapshots.lock().await.get(&doc_id).cloned())
    }

    async fn delete(&self, doc_id: Uuid) -> Result<(), PersistenceError> {
        self.snapshots.lock().await.remove(&doc_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Uuid>, PersistenceError> {
        let mut ids: Vec<Uuid> = self.snapshots.lock().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_store_rejects_saves() {
        let store = MemorySnapshotStore::new();
        let doc_id = Uuid::new_v4();
        store.set_unavailable(true);
        assert!(matches!(
            store.save(doc_id, vec![1]).await,
            Err(PersistenceError::Io(_))
        ));
        store.set_unavailable(false);
        store.save(doc_id, vec![1]).await.unwrap();
        assert_eq!(store.load(doc_id).await.unwrap(), Some(vec![1]));
    }
}
