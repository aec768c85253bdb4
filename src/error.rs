use thiserror::Error;

use crate::convergent::engine::MergeReport;
use crate::convergent::operation::{ChangeId, RecordRef};
use crate::convergent::schema::{Collection, FieldKind};

/// A local change was rejected. Nothing it contained was applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Change contains no mutations")]
    EmptyChange,

    #[error("Unknown record {0}")]
    UnknownRecord(RecordRef),

    #[error("Collection {collection} has no field '{field}'")]
    UnknownField { collection: Collection, field: String },

    #[error("Field '{field}' is not a {expected:?} field")]
    WrongFieldKind { field: String, expected: FieldKind },

    #[error("Value written to '{field}' has the wrong type")]
    TypeMismatch { field: String },

    #[error("Id {0} has already been used")]
    DuplicateId(RecordRef),

    #[error("Span {0} is outside 1..=4")]
    InvalidSpan(i64),

    #[error("Start slot {0} is negative")]
    NegativeSlot(i64),

    #[error("Placement overlaps {other} in room {room}")]
    Overlap { room: String, other: String },

    #[error("Session {session} is already placed")]
    AlreadyPlaced { session: String },

    #[error("Records in {0} cannot be removed")]
    AppendOnly(Collection),

    #[error("Index {index}+{count} out of range for '{field}' (length {len})")]
    TextIndexOutOfRange {
        field: String,
        index: usize,
        count: usize,
        len: usize,
    },

    #[error("Counter '{field}' would overflow")]
    CounterOverflow { field: String },

    #[error("Field '{field}' of {target} can only be set when it is created")]
    ImmutableField { target: RecordRef, field: String },

    #[error("Unknown session state '{0}'")]
    InvalidState(String),

    #[error("{target}.{field} refers to missing {missing}")]
    DanglingReference {
        target: RecordRef,
        field: String,
        missing: RecordRef,
    },
}

/// Remote changes could not all be folded in.
#[derive(Error, Debug, Clone)]
pub enum MergeError {
    /// Some changes depend on parents this replica has never seen. They stay
    /// buffered; everything else in the batch was applied (see `report`).
    #[error("History gap: missing {} parent change(s)", missing.len())]
    HistoryGap {
        missing: Vec<ChangeId>,
        report: MergeReport,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported snapshot format version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Peer disconnected")]
    Disconnected,

    #[error("Transport closed")]
    Closed,

    #[error("Transport IO error: {0}")]
    Io(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Message for document {0} does not belong to this session")]
    WrongDocument(uuid::Uuid),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Sync task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}
