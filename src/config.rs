//! Replica configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convergent::ActorId;
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Actor id to write under for a new document. A fresh one is generated
    /// when absent. Documents loaded from a snapshot always get a fresh one.
    pub actor_id: Option<String>,
    /// Depth of the version-tick broadcast channel.
    pub notify_capacity: usize,
    /// Save a snapshot this often when a store is attached.
    pub autosave_interval_ms: Option<u64>,
    pub sync: SyncConfig,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            actor_id: None,
            notify_capacity: 64,
            autosave_interval_ms: None,
            sync: SyncConfig::default(),
        }
    }
}

impl ReplicaConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// The configured actor, or a freshly generated one.
    pub fn actor(&self) -> ActorId {
        self.actor_id
            .as_deref()
            .map(ActorId::from)
            .unwrap_or_else(ActorId::generate)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        self.autosave_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest number of changes sent in one frame.
    pub max_batch_changes: usize,
    /// First delay before retrying a failed save.
    pub retry_backoff_ms: u64,
    /// Retry delays double up to this cap.
    pub max_retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch_changes: 256,
            retry_backoff_ms: 500,
            max_retry_backoff_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Delay before retry number `attempt` (0-based), doubling to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_retry_backoff_ms);
        Duration::from_millis(ms)
    }
}
