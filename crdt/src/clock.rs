//! Lamport timestamps and the per-document clock that hands them out.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A warning-worthy jump in an inbound timestamp's counter relative to the local clock.
///
/// Chosen generously: anything past this is almost certainly a misbehaving peer or a bug,
/// not legitimate concurrent activity.
pub const CLOCK_DRIFT_THRESHOLD: u64 = 1_000_000;

/// `(counter, actor)`. Comparable counter-major, actor-minor.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LamportTs {
    pub counter: u64,
    pub actor: String,
}

impl LamportTs {
    pub fn new(counter: u64, actor: impl Into<String>) -> Self {
        Self {
            counter,
            actor: actor.into(),
        }
    }
}

impl PartialOrd for LamportTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LamportTs {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.actor.cmp(&other.actor))
    }
}

impl fmt::Debug for LamportTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.counter, self.actor)
    }
}

impl fmt::Display for LamportTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.actor)
    }
}

/// The document-owned Lamport clock. One per [`crate::doc::StorageDocument`].
#[derive(Clone, Debug)]
pub struct Clock {
    actor: String,
    counter: u64,
}

impl Clock {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            counter: 0,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advances the clock to `max(local, seen) + 1` and returns the new timestamp, stamped
    /// with this clock's own actor. Used both for local ops (`seen == self.counter`, a plain
    /// increment) and for observing a remote op's timestamp.
    pub fn advance(&mut self, seen: u64) -> LamportTs {
        if seen > self.counter.saturating_add(CLOCK_DRIFT_THRESHOLD) {
            tracing::warn!(
                local = self.counter,
                seen,
                "clock drift: inbound timestamp far ahead of local clock, jumping"
            );
        }
        self.counter = self.counter.max(seen) + 1;
        LamportTs::new(self.counter, self.actor.clone())
    }

    /// Advances for a local mutation: equivalent to `advance(self.counter())`.
    pub fn tick(&mut self) -> LamportTs {
        self.advance(self.counter)
    }

    /// Observes a remote timestamp without needing the returned value — used when applying a
    /// batch of remote ops where only the clock side effect matters at each step.
    pub fn observe(&mut self, ts: &LamportTs) {
        self.advance(ts.counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn monotonic_after_local_tick() {
        let mut clock = Clock::new("a");
        let t1 = clock.tick();
        let t2 = clock.tick();
        assert!(t2 > t1);
        assert!(clock.counter() > t1.counter);
    }

    #[test]
    fn ord_counter_major_actor_minor() {
        let a = LamportTs::new(5, "A");
        let b = LamportTs::new(5, "B");
        let c = LamportTs::new(6, "A");
        assert!(a < b);
        assert!(b < c);
    }

    proptest! {
        #[test]
        fn observing_remote_advances_past_it(local in 0u64..1000, seen in 0u64..1000) {
            let mut clock = Clock::new("a");
            // fast-forward to `local` by ticking
            for _ in 0..local {
                clock.tick();
            }
            let ts = LamportTs::new(seen, "b");
            clock.observe(&ts);
            prop_assert!(clock.counter() > ts.counter);
            prop_assert!(clock.counter() > local.min(u64::MAX));
        }

        #[test]
        fn advance_is_deterministic_given_state(local in 0u64..1000, seen in 0u64..1000) {
            let mut c1 = Clock::new("a");
            let mut c2 = Clock::new("a");
            for _ in 0..local {
                c1.tick();
                c2.tick();
            }
            let t1 = c1.advance(seen);
            let t2 = c2.advance(seen);
            prop_assert_eq!(t1, t2);
        }
    }
}
