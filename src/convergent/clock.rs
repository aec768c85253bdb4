//! Actor identity and logical time
//!
//! Every replica writes under its own `ActorId`. Writes are ordered by a
//! Lamport `Stamp`: a counter that only moves forward, with the actor id as a
//! deterministic tie-break. Two stamps from different actors are never equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally-unique identity of one replica (tab, device, session).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Generate a fresh actor id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fresh record id. Replicas create records offline, so ids are random
/// rather than drawn from a shared sequence.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A (logical time, actor) pair. Ordered by counter, then actor.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub counter: u64,
    pub actor: ActorId,
}

impl Stamp {
    pub fn new(counter: u64, actor: impl Into<ActorId>) -> Self {
        Self {
            counter,
            actor: actor.into(),
        }
    }

    /// The stamp every fresh field starts at. Smaller than any issued stamp.
    pub fn origin() -> Self {
        Self::default()
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.actor)
    }
}

/// Lamport clock owned by a single actor.
#[derive(Clone, Debug)]
pub struct LogicalClock {
    actor: ActorId,
    counter: u64,
}

impl LogicalClock {
    pub fn new(actor: ActorId) -> Self {
        Self { actor, counter: 0 }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Highest counter issued or observed so far.
    pub fn current(&self) -> u64 {
        self.counter
    }

    /// Issue a stamp strictly greater than anything seen so far.
    pub fn tick(&mut self) -> Stamp {
        self.counter += 1;
        Stamp {
            counter: self.counter,
            actor: self.actor.clone(),
        }
    }

    /// Fold in a counter observed on a remote write.
    pub fn observe(&mut self, counter: u64) {
        if counter > self.counter {
            self.counter = counter;
        }
    }
}
