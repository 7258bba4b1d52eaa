//! Tracks a user's local activity to drive presence's `online`/`away`/`offline` status.
//! Headless-safe: with no input source registered, `refresh()` is simply never called and the
//! tracker reports `Online` forever rather than drifting to `Away`/`Offline` on a dead clock.
use std::time::{Duration, Instant};

const AWAY_AFTER: Duration = Duration::from_secs(60);
const OFFLINE_AFTER: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityLevel {
    Online,
    Away,
    Offline,
}

/// Call [`ActivityTracker::refresh`] on every input event and [`ActivityTracker::poll`] on a
/// timer; `poll` returns `Some(level)` only when the level actually changed, matching the
/// single-listener emission the spec describes for presence updates.
pub struct ActivityTracker {
    last_activity: Option<Instant>,
    current: ActivityLevel,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self { last_activity: None, current: ActivityLevel::Online }
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&mut self) {
        self.last_activity = Some(Instant::now());
        self.current = ActivityLevel::Online;
    }

    pub fn level(&self) -> ActivityLevel {
        self.current
    }

    /// Re-evaluates the level against wall-clock elapsed time. Returns the new level only if it
    /// differs from the previous one.
    pub fn poll(&mut self) -> Option<ActivityLevel> {
        let Some(last) = self.last_activity else {
            return None;
        };
        let elapsed = last.elapsed();
        let level = if elapsed >= OFFLINE_AFTER {
            ActivityLevel::Offline
        } else if elapsed >= AWAY_AFTER {
            ActivityLevel::Away
        } else {
            ActivityLevel::Online
        };
        if level == self.current {
            None
        } else {
            self.current = level;
            Some(level)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_online_with_no_registered_input_source() {
        let mut tracker = ActivityTracker::new();
        assert_eq!(tracker.level(), ActivityLevel::Online);
        assert_eq!(tracker.poll(), None);
    }

    #[test]
    fn refresh_resets_to_online() {
        let mut tracker = ActivityTracker::new();
        tracker.refresh();
        assert_eq!(tracker.level(), ActivityLevel::Online);
    }
}
