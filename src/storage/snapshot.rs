//! Snapshot codec
//!
//! CBOR-encoded full history plus a SHA-256 over the encoded changes. Any
//! snapshot, however old, replays into a state consistent with a prefix of
//! the live history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::convergent::Change;
use crate::error::PersistenceError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub document_id: Uuid,
    pub saved_at: DateTime<Utc>,
    /// Full history in causal order.
    pub changes: Vec<Change>,
    /// Hex SHA-256 of the CBOR encoding of `changes`.
    pub checksum: String,
}

impl Snapshot {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn new(document_id: Uuid, changes: Vec<Change>) -> Result<Self, PersistenceError> {
        let checksum = checksum(&changes)?;
        Ok(Self {
            format_version: Self::FORMAT_VERSION,
            document_id,
            saved_at: Utc::now(),
            changes,
            checksum,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistenceError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode and verify version and checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let snapshot: Snapshot =
            ciborium::from_reader(bytes).map_err(|e| PersistenceError::Decode(e.to_string()))?;
        if snapshot.format_version != Self::FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(snapshot.format_version));
        }
        let actual = checksum(&snapshot.changes)?;
        if actual != snapshot.checksum {
            return Err(PersistenceError::ChecksumMismatch {
                expected: snapshot.checksum,
                actual,
            });
        }
        Ok(snapshot)
    }
}

fn checksum(changes: &[Change]) -> Result<String, PersistenceError> {
    let mut buf = Vec::new();
    ciborium::into_writer(&changes, &mut buf)
        .map_err(|e| PersistenceError::Encode(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&buf)))
}
