//! Component D: timers expressed as wall-time deadlines, the way the
//! teacher's `ConsensusModule::cycle` turns durations into a
//! `tick.next_tick` deadline rather than holding any of its own
//! background timer threads (`consensus.rs`, `ELECTION_TIMEOUT`,
//! `HEARTBEAT_TIMEOUT`). Deadlines, not interrupts: spec.md §5
//! "Cancellation and timeouts" is explicit that nothing here needs to
//! be cancelled, only checked.

use std::time::{Duration, Instant};

use rand::Rng;

/// Randomised election timer. Deadline = now + uniform draw from
/// `[low, high]` (spec.md §4.D). Reset on vote grant, on a valid
/// AppendEntries from the current leader, on becoming a candidate, and
/// suspended while leader.
#[derive(Debug, Clone)]
pub struct ElectionTimer {
    low: Duration,
    high: Duration,
    deadline: Option<Instant>,
}

impl ElectionTimer {
    pub fn new(low: Duration, high: Duration) -> Self {
        let mut t = ElectionTimer {
            low,
            high,
            deadline: None,
        };
        t.reset();
        t
    }

    /// Draws a fresh random deadline in `[low, high]` from now.
    pub fn reset(&mut self) {
        let millis = if self.high > self.low {
            let span = (self.high - self.low).as_millis() as u64;
            self.low.as_millis() as u64 + rand::thread_rng().gen_range(0..=span)
        } else {
            self.low.as_millis() as u64
        };
        self.deadline = Some(Instant::now() + Duration::from_millis(millis));
    }

    /// Leaders don't run an election timer at all.
    pub fn suspend(&mut self) {
        self.deadline = None;
    }

    pub fn is_suspended(&self) -> bool {
        self.deadline.is_none()
    }

    /// `true` once `now` has passed the current deadline. Always
    /// `false` while suspended.
    pub fn has_elapsed(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if now >= d)
    }

    /// How long until the deadline, or `None` if suspended or already past.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

/// Leader-only periodic heartbeat timer. Fires every `interval`, with
/// `interval < election_low` so a live leader's heartbeats always beat
/// a follower's election timeout (spec.md §4.D).
#[derive(Debug, Clone)]
pub struct HeartbeatTimer {
    interval: Duration,
    next_fire: Instant,
}

impl HeartbeatTimer {
    pub fn new(interval: Duration) -> Self {
        HeartbeatTimer {
            interval,
            next_fire: Instant::now(),
        }
    }

    pub fn has_elapsed(&self, now: Instant) -> bool {
        now >= self.next_fire
    }

    /// Call after sending heartbeats to schedule the next one.
    pub fn reset(&mut self, now: Instant) {
        self.next_fire = now + self.interval;
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_fire.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_timer_elapses_after_high_bound() {
        let t = ElectionTimer::new(Duration::from_millis(1), Duration::from_millis(2));
        std::thread::sleep(Duration::from_millis(5));
        assert!(t.has_elapsed(Instant::now()));
    }

    #[test]
    fn suspended_timer_never_elapses() {
        let mut t = ElectionTimer::new(Duration::from_millis(1), Duration::from_millis(2));
        t.suspend();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!t.has_elapsed(Instant::now()));
        assert!(t.is_suspended());
    }

    #[test]
    fn heartbeat_timer_fires_on_interval() {
        let t = HeartbeatTimer::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(3));
        assert!(t.has_elapsed(Instant::now()));
    }
}
