//! Convergent scheduling document
//!
//! Value CRDTs (register, counter, sequence, table), the record schema built
//! on them, and the engine that commits local changes and merges remote ones.
//! Replicas that have seen the same set of changes hold identical state,
//! whatever order the changes arrived in.

pub mod builder;
pub mod clock;
pub mod counter;
pub mod document;
pub mod engine;
pub mod horizon;
pub mod operation;
pub mod register;
pub mod resolver;
pub mod schema;
pub mod sequence;
pub mod state;
pub mod table;

pub use builder::ChangeBuilder;
pub use clock::{new_id, ActorId, LogicalClock, Stamp};
pub use counter::{Counter, Tally};
pub use document::{DocumentStore, Field, Record};
pub use engine::{ChangeEngine, MergeReport};
pub use horizon::{Horizon, SeqNum};
pub use operation::{Change, ChangeId, Mutation, RecordRef, Value};
pub use register::Register;
pub use resolver::{ConflictResolver, Repair};
pub use schema::{Collection, FieldKind, SessionState};
pub use sequence::{ElementId, SeqElement, Sequence};
pub use state::BoardState;
pub use table::Table;

/// State-based merge shared by every value CRDT.
///
/// Implementations must be commutative, associative, and idempotent.
pub trait Mergeable {
    fn merge(&mut self, other: &Self);
}
