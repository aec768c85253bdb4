//! Last-writer-wins register

use super::clock::{LogicalClock, Stamp};
use super::Mergeable;

/// A single value tagged with the stamp of the write that produced it.
///
/// Merging keeps whichever side carries the larger stamp. Stamps embed the
/// actor id, so two distinct writes never compare equal and the outcome does
/// not depend on merge order.
#[derive(Clone, Debug, PartialEq)]
pub struct Register<T> {
    value: T,
    stamp: Stamp,
}

impl<T: Clone> Register<T> {
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Local write: draws a stamp strictly greater than both the clock and
    /// the current stamp.
    pub fn set(&mut self, value: T, clock: &mut LogicalClock) -> Stamp {
        clock.observe(self.stamp.counter);
        let stamp = clock.tick();
        self.value = value;
        self.stamp = stamp.clone();
        stamp
    }

    /// Apply an already-stamped write. Returns false if it lost.
    pub fn assign(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}

impl<T: Default> Default for Register<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            stamp: Stamp::origin(),
        }
    }
}

impl<T: Clone> Mergeable for Register<T> {
    fn merge(&mut self, other: &Self) {
        if other.stamp > self.stamp {
            self.value = other.value.clone();
            self.stamp = other.stamp.clone();
        }
    }
}
