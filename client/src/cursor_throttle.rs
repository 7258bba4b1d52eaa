//! Coalesces rapid cursor-move input into at most one emission per 40 ms window (≤ 26
//! frames per second-of-bursts), keeping only the latest position of each window.
use lively_protocol::CursorMove;
use std::time::{Duration, Instant};

const THROTTLE_INTERVAL: Duration = Duration::from_millis(40);

#[derive(Default)]
pub struct CursorThrottle {
    last_emit: Option<Instant>,
    pending: Option<CursorMove>,
}

impl CursorThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every raw cursor-move input. Emits immediately if the window has elapsed,
    /// otherwise buffers `mv` as the latest pending position for [`CursorThrottle::flush`].
    pub fn push(&mut self, mv: CursorMove) -> Option<CursorMove> {
        let now = Instant::now();
        let due = match self.last_emit {
            Some(last) => now.duration_since(last) >= THROTTLE_INTERVAL,
            None => true,
        };
        if due {
            self.last_emit = Some(now);
            self.pending = None;
            Some(mv)
        } else {
            self.pending = Some(mv);
            None
        }
    }

    /// Called by a periodic 40 ms timer to emit a trailing coalesced move that arrived mid-window.
    pub fn flush(&mut self) -> Option<CursorMove> {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < THROTTLE_INTERVAL {
                return None;
            }
        }
        let pending = self.pending.take();
        if pending.is_some() {
            self.last_emit = Some(now);
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(x: f64) -> CursorMove {
        CursorMove { x, y: 0.0, viewport_pos: None, viewport_scale: None }
    }

    #[test]
    fn first_move_in_a_burst_emits_immediately() {
        let mut throttle = CursorThrottle::new();
        assert_eq!(throttle.push(mv(1.0)), Some(mv(1.0)));
    }

    #[test]
    fn rapid_followups_within_the_window_coalesce_to_the_latest() {
        let mut throttle = CursorThrottle::new();
        throttle.push(mv(1.0));
        assert_eq!(throttle.push(mv(2.0)), None);
        assert_eq!(throttle.push(mv(3.0)), None);
        assert_eq!(throttle.pending, Some(mv(3.0)));
    }

    #[test]
    fn a_thousand_moves_in_one_second_emit_at_most_26_frames() {
        let mut throttle = CursorThrottle::new();
        let mut emitted = 0;
        let start = Instant::now();
        let mut x = 0.0;
        while start.elapsed() < Duration::from_secs(1) {
            if throttle.push(mv(x)).is_some() {
                emitted += 1;
            }
            x += 1.0;
            std::thread::sleep(Duration::from_micros(500));
        }
        assert!(emitted <= 26, "emitted {emitted} frames, expected at most 26");
    }
}
