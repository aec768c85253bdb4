//! Which changes a replica holds
//!
//! Each actor numbers its changes 1, 2, 3... and a replica only applies an
//! actor's change once it holds all of that actor's earlier ones. So the
//! highest sequence number per actor says exactly which changes are present.
//! This is the summary peers swap when a sync session opens.

use super::clock::ActorId;
use super::operation::ChangeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position within one actor's change stream. The first change is 1.
pub type SeqNum = u64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    latest: BTreeMap<ActorId, SeqNum>,
}

impl Horizon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest change held from `actor`, 0 if none.
    pub fn seq(&self, actor: &ActorId) -> SeqNum {
        self.latest.get(actor).copied().unwrap_or(0)
    }

    /// Sequence number `actor`'s next change will carry.
    pub fn next_seq(&self, actor: &ActorId) -> SeqNum {
        self.seq(actor) + 1
    }

    pub fn contains(&self, id: &ChangeId) -> bool {
        self.seq(&id.actor) >= id.seq
    }

    /// Note that `id` and everything before it from the same actor is held.
    pub fn record(&mut self, id: &ChangeId) {
        let latest = self.latest.entry(id.actor.clone()).or_insert(0);
        *latest = (*latest).max(id.seq);
    }
}
