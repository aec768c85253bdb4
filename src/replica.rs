//! A replica of one board document
//!
//! The replica is the single owner of its `ChangeEngine`: every local change
//! and every remote merge goes through it, one at a time. Readers get
//! immutable `BoardState` snapshots, either on demand or pushed to
//! subscribers after each version bump. Sync sessions and autosave run as
//! tokio tasks and only take the document lock for synchronous sections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ReplicaConfig;
use crate::convergent::{
    ActorId, BoardState, Change, ChangeBuilder, ChangeEngine, ChangeId, Horizon, MergeReport,
};
use crate::error::{MergeError, PersistenceError, ValidationError};
use crate::storage::{Snapshot, SnapshotStore};
use crate::sync::{SyncSession, Transport};

type Subscriber = Box<dyn Fn(&BoardState) + Send + Sync>;

struct Inner {
    doc_id: Uuid,
    config: ReplicaConfig,
    engine: RwLock<ChangeEngine>,
    current: RwLock<Arc<BoardState>>,
    /// Bumped under the engine lock on every state change.
    version: AtomicU64,
    /// Highest version handed to subscribers.
    notified: AtomicU64,
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    version_tx: broadcast::Sender<u64>,
}

#[derive(Clone)]
pub struct Replica {
    inner: Arc<Inner>,
}

impl Replica {
    /// An empty document.
    pub fn new(doc_id: Uuid, config: ReplicaConfig) -> Self {
        let engine = ChangeEngine::new(config.actor());
        Self::with_engine(doc_id, config, engine)
    }

    fn with_engine(doc_id: Uuid, config: ReplicaConfig, engine: ChangeEngine) -> Self {
        let (version_tx, _) = broadcast::channel(config.notify_capacity.max(1));
        let state = Arc::new(engine.state());
        Self {
            inner: Arc::new(Inner {
                doc_id,
                config,
                engine: RwLock::new(engine),
                current: RwLock::new(state),
                version: AtomicU64::new(0),
                notified: AtomicU64::new(0),
                subscribers: RwLock::new(HashMap::new()),
                version_tx,
            }),
        }
    }

    pub fn doc_id(&self) -> Uuid {
        self.inner.doc_id
    }

    pub fn actor(&self) -> ActorId {
        self.read_engine().actor().clone()
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.inner.config
    }

    /// Number of state changes since this replica was opened.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn current_state(&self) -> Arc<BoardState> {
        let current = self
            .inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }

    /// Call `callback` with the new state after every change. Returns the id
    /// to pass to `unsubscribe`.
    pub fn subscribe(&self, callback: Subscriber) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, callback);
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Version numbers, broadcast after each change.
    pub fn version_ticks(&self) -> broadcast::Receiver<u64> {
        self.inner.version_tx.subscribe()
    }

    /// Commit a local batch.
    pub fn apply_change(&self, builder: ChangeBuilder) -> Result<ChangeId, ValidationError> {
        let (id, published) = {
            let mut engine = self.write_engine();
            let change = engine.commit(builder)?;
            (change.id, self.refresh(&engine))
        };
        self.publish(published);
        Ok(id)
    }

    /// Fold in changes received from a peer.
    pub fn merge_remote(&self, changes: Vec<Change>) -> Result<MergeReport, MergeError> {
        let (result, published) = {
            let mut engine = self.write_engine();
            let result = engine.merge(changes);
            let changed = match &result {
                Ok(report) => report.changed(),
                Err(MergeError::HistoryGap { report, .. }) => report.changed(),
            };
            (result, changed.then(|| self.refresh(&engine)))
        };
        if let Some(published) = published {
            self.publish(published);
        }
        result
    }

    /// Version summary of the local history.
    pub fn summary(&self) -> Horizon {
        self.read_engine().horizon().clone()
    }

    pub fn changes_since(&self, theirs: &Horizon) -> Vec<Change> {
        self.read_engine().changes_since(theirs)
    }

    pub fn history(&self) -> Vec<Change> {
        self.read_engine().history().cloned().collect()
    }

    /// Remote changes still waiting for parents.
    pub fn pending_changes(&self) -> usize {
        self.read_engine().pending_len()
    }

    pub fn snapshot(&self) -> Result<Snapshot, PersistenceError> {
        Snapshot::new(self.inner.doc_id, self.history())
    }

    pub async fn save(&self, store: &dyn SnapshotStore) -> Result<(), PersistenceError> {
        let bytes = self.snapshot()?.encode()?;
        store.save(self.inner.doc_id, bytes).await
    }

    /// Open a saved document. `None` if the store has nothing for `doc_id`.
    pub async fn load(
        doc_id: Uuid,
        store: &dyn SnapshotStore,
        config: ReplicaConfig,
    ) -> Result<Option<Replica>, PersistenceError> {
        match store.load(doc_id).await? {
            Some(bytes) => Self::from_snapshot(&bytes, config).map(Some),
            None => Ok(None),
        }
    }

    /// Rebuild a replica from snapshot bytes. It always writes under a fresh
    /// actor: the snapshot may predate changes its old actor already sent to
    /// peers, and reusing that actor would hand out the same change ids again.
    pub fn from_snapshot(bytes: &[u8], config: ReplicaConfig) -> Result<Replica, PersistenceError> {
        let snapshot = Snapshot::decode(bytes)?;
        let actor = ActorId::generate();
        if let Some(configured) = &config.actor_id {
            log::info!("Ignoring configured actor {} for loaded document, using {}", configured, actor);
        }
        let engine = ChangeEngine::from_history(actor, snapshot.changes)
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        log::info!(
            "Loaded document {} ({} changes, saved {})",
            snapshot.document_id,
            engine.history_len(),
            snapshot.saved_at
        );
        Ok(Self::with_engine(snapshot.document_id, config, engine))
    }

    /// Start syncing with a peer over `transport`.
    pub fn connect(&self, transport: Arc<dyn Transport>) -> SyncSession {
        SyncSession::start(self.clone(), transport)
    }

    /// Start periodic saves if `autosave_interval_ms` is configured.
    pub fn start_autosave(&self, store: Arc<dyn SnapshotStore>) -> Option<Autosave> {
        let interval = self.inner.config.autosave_interval()?;
        Some(Autosave::start(self.clone(), store, interval))
    }

    fn read_engine(&self) -> std::sync::RwLockReadGuard<'_, ChangeEngine> {
        self.inner.engine.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_engine(&self) -> std::sync::RwLockWriteGuard<'_, ChangeEngine> {
        self.inner.engine.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuild the published state. Called with the engine lock held so
    /// versions and states line up.
    fn refresh(&self, engine: &ChangeEngine) -> (u64, Arc<BoardState>) {
        let state = Arc::new(engine.state());
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::clone(&state);
        (version, state)
    }

    /// Notify subscribers, skipping states older than one already delivered.
    fn publish(&self, (version, state): (u64, Arc<BoardState>)) {
        if self.inner.notified.fetch_max(version, Ordering::SeqCst) >= version {
            return;
        }
        let subs = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner());
        for callback in subs.values() {
            callback(&state);
        }
        drop(subs);
        let _ = self.inner.version_tx.send(version);
    }
}

/// Handle to a running autosave task.
pub struct Autosave {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Autosave {
    fn start(replica: Replica, store: Arc<dyn SnapshotStore>, interval: std::time::Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let sync = replica.config().sync.clone();

        let task = tokio::spawn(async move {
            let mut saved_version = None;
            let mut failures: u32 = 0;
            loop {
                let delay = match failures {
                    0 => interval,
                    n => sync.backoff(n - 1),
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => break,
                }

                let version = replica.version();
                if saved_version == Some(version) {
                    continue;
                }
                match replica.save(store.as_ref()).await {
                    Ok(()) => {
                        saved_version = Some(version);
                        failures = 0;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        log::warn!(
                            "Autosave of {} failed (attempt {}): {}",
                            replica.doc_id(),
                            failures,
                            e
                        );
                    }
                }
            }
        });

        Self { shutdown_tx, task }
    }

    /// Stop after the current save, if any.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}
