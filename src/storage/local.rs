//! Local file system snapshot store
//!
//! One `{doc_id}.snapshot` file per document in a base directory. Writes go
//! to a temporary file first and are renamed into place, so a crash mid-save
//! leaves the previous snapshot intact.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::SnapshotStore;
use crate::error::PersistenceError;

const EXTENSION: &str = "snapshot";

/// A snapshot store backed by a directory
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open a store, creating the directory if needed
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            tokio_fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn path_for(&self, doc_id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{doc_id}.{EXTENSION}"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, doc_id: Uuid, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let path = self.path_for(doc_id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));

        let mut file = tokio_fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio_fs::rename(&tmp, &path).await?;
        log::debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn load(&self, doc_id: Uuid) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio_fs::read(self.path_for(doc_id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, doc_id: Uuid) -> Result<(), PersistenceError> {
        match tokio_fs::remove_file(self.path_for(doc_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Uuid>, PersistenceError> {
        let mut ids = Vec::new();
        if !self.base_dir.exists() {
            return Ok(ids);
        }

        let mut entries = tokio_fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snaps")).await.unwrap();
        let doc_id = Uuid::new_v4();

        assert_eq!(store.load(doc_id).await.unwrap(), None);
        store.save(doc_id, vec![1, 2, 3]).await.unwrap();
        store.save(doc_id, vec![4, 5]).await.unwrap();
        assert_eq!(store.load(doc_id).await.unwrap(), Some(vec![4, 5]));
        assert_eq!(store.list().await.unwrap(), vec![doc_id]);

        store.delete(doc_id).await.unwrap();
        store.delete(doc_id).await.unwrap();
        assert_eq!(store.load(doc_id).await.unwrap(), None);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_ignores_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("not-a-uuid.snapshot"), b"hi").unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
