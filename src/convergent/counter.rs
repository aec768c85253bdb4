//! Positive-negative counter

use super::clock::ActorId;
use super::Mergeable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running totals contributed by one actor. Both only ever grow, and local
/// writes keep each below `i64::MAX`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub increments: u64,
    pub decrements: u64,
}

/// Commutative integer counter.
///
/// Each actor only touches its own tally, so merging is a pointwise max. The
/// value is not clamped: a display layer may choose to clamp at zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    tallies: BTreeMap<ActorId, Tally>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if the actor's total would no longer fit in an `i64`.
    pub fn increment(&mut self, actor: &ActorId, n: u64) -> Option<Tally> {
        let tally = self.tallies.entry(actor.clone()).or_default();
        tally.increments = bounded_add(tally.increments, n)?;
        Some(*tally)
    }

    pub fn decrement(&mut self, actor: &ActorId, n: u64) -> Option<Tally> {
        let tally = self.tallies.entry(actor.clone()).or_default();
        tally.decrements = bounded_add(tally.decrements, n)?;
        Some(*tally)
    }

    /// Sum over all actors of increments minus decrements, saturating at the
    /// `i64` bounds.
    pub fn value(&self) -> i64 {
        let total: i128 = self
            .tallies
            .values()
            .map(|t| i128::from(t.increments) - i128::from(t.decrements))
            .sum();
        i64::try_from(total).unwrap_or(if total < 0 { i64::MIN } else { i64::MAX })
    }

    pub fn tally(&self, actor: &ActorId) -> Tally {
        self.tallies.get(actor).copied().unwrap_or_default()
    }

    /// Fold in one actor's absolute totals (pointwise max).
    pub fn absorb(&mut self, actor: &ActorId, totals: Tally) {
        let tally = self.tallies.entry(actor.clone()).or_default();
        tally.increments = tally.increments.max(totals.increments);
        tally.decrements = tally.decrements.max(totals.decrements);
    }
}

fn bounded_add(total: u64, n: u64) -> Option<u64> {
    total
        .checked_add(n)
        .filter(|sum| i64::try_from(*sum).is_ok())
}

impl Mergeable for Counter {
    fn merge(&mut self, other: &Self) {
        for (actor, totals) in &other.tallies {
            self.absorb(actor, *totals);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_increments_sum() {
        let mut a = Counter::new();
        let mut b = Counter::new();
        a.increment(&"A".into(), 3);
        b.increment(&"B".into(), 2);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.value(), 5);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_increment_and_decrement_across_replicas() {
        let u1: ActorId = "U1".into();
        let u2: ActorId = "U2".into();

        let mut r1 = Counter::new();
        r1.increment(&u1, 1);
        r1.decrement(&u1, 1);

        let mut r2 = Counter::new();
        r2.increment(&u2, 1);

        r1.merge(&r2);
        assert_eq!(r1.value(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut c = Counter::new();
        c.increment(&"A".into(), 4);
        let snapshot = c.clone();
        c.merge(&snapshot);
        c.merge(&snapshot);
        assert_eq!(c.value(), 4);
    }

    #[test]
    fn test_tally_refuses_to_pass_i64_max() {
        let mut c = Counter::new();
        let a: ActorId = "A".into();
        assert!(c.increment(&a, i64::MAX as u64).is_some());
        assert!(c.increment(&a, 1).is_none());
        assert_eq!(c.value(), i64::MAX);

        // Many large tallies saturate instead of wrapping
        c.absorb(&"B".into(), Tally { increments: i64::MAX as u64, decrements: 0 });
        assert_eq!(c.value(), i64::MAX);
    }

    #[test]
    fn test_value_may_go_negative() {
        let mut c = Counter::new();
        c.decrement(&"A".into(), 2);
        assert_eq!(c.value(), -2);
    }
}
