//! Sync wire frames
//!
//! Two frames cover the whole protocol: a replica's version summary, and a
//! batch of changes the receiver is missing. Both are CBOR-encoded and tagged
//! with the document they belong to.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::convergent::{Change, Horizon};
use crate::error::SyncError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// "These are the changes I hold."
    VersionSummary { doc_id: Uuid, summary: Horizon },
    /// Changes the receiver lacks, in causal order.
    ChangeBatch { doc_id: Uuid, changes: Vec<Change> },
}

impl SyncMessage {
    pub fn doc_id(&self) -> Uuid {
        match self {
            SyncMessage::VersionSummary { doc_id, .. } => *doc_id,
            SyncMessage::ChangeBatch { doc_id, .. } => *doc_id,
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, SyncError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_cbor(data: &[u8]) -> Result<Self, SyncError> {
        ciborium::from_reader(data).map_err(|e| SyncError::Codec(e.to_string()))
    }
}

/// Split `changes` into batch frames of at most `max` changes each.
pub fn batches(doc_id: Uuid, changes: Vec<Change>, max: usize) -> Vec<SyncMessage> {
    let max = max.max(1);
    changes
        .chunks(max)
        .map(|chunk| SyncMessage::ChangeBatch {
            doc_id,
            changes: chunk.to_vec(),
        })
        .collect()
}
