//! Scale signals — the external trigger for steady-state scaling steps.
//!
//! The reconciler polls its signal once per tick, and only while the
//! orchestrator and membership counts agree. A signal yields `+1`, `-1`,
//! or `0`; larger requests are released one unit step per poll.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Source of requested scaling steps.
pub trait ScaleSignal: Send + Sync {
    /// Next requested step: `+1`, `-1`, or `0` for none.
    fn next_step(&self) -> i32;

    /// Queue an operator request. Signals that are not operator-driven
    /// ignore it and return `false`.
    fn request(&self, _delta: i32) -> bool {
        false
    }

    /// Remaining requested delta not yet released.
    fn pending(&self) -> i64 {
        0
    }
}

/// Never requests a step; the reconciler only repairs drift.
#[derive(Debug, Default)]
pub struct NoSignal;

impl ScaleSignal for NoSignal {
    fn next_step(&self) -> i32 {
        0
    }
}

/// Operator-driven requests accumulated as a net pending delta.
#[derive(Debug, Default)]
pub struct ManualSignal {
    pending: Mutex<i64>,
}

impl ManualSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any outstanding request.
    pub fn clear(&self) {
        *self.pending.lock().expect("signal lock") = 0;
    }
}

impl ScaleSignal for ManualSignal {
    fn next_step(&self) -> i32 {
        let mut pending = self.pending.lock().expect("signal lock");
        let step = pending.signum() as i32;
        *pending -= i64::from(step);
        step
    }

    fn request(&self, delta: i32) -> bool {
        let mut pending = self.pending.lock().expect("signal lock");
        *pending += i64::from(delta);
        debug!(delta, pending = *pending, "scale request queued");
        true
    }

    fn pending(&self) -> i64 {
        *self.pending.lock().expect("signal lock")
    }
}

/// Alternates one scale-up and one scale-down, each followed by
/// `period_ticks - 1` quiet polls.
#[derive(Debug)]
pub struct OscillatingSignal {
    period_ticks: u64,
    polls: AtomicU64,
}

impl OscillatingSignal {
    pub fn new(period_ticks: u32) -> Self {
        Self {
            period_ticks: u64::from(period_ticks.max(1)),
            polls: AtomicU64::new(0),
        }
    }
}

impl ScaleSignal for OscillatingSignal {
    fn next_step(&self) -> i32 {
        let n = self.polls.fetch_add(1, Ordering::Relaxed);
        if n % self.period_ticks != 0 {
            return 0;
        }
        if (n / self.period_ticks) % 2 == 0 { 1 } else { -1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signal_is_idle() {
        let s = NoSignal;
        assert_eq!(s.next_step(), 0);
        assert!(!s.request(3));
        assert_eq!(s.next_step(), 0);
    }

    #[test]
    fn manual_releases_unit_steps() {
        let s = ManualSignal::new();
        assert!(s.request(2));
        assert_eq!(s.pending(), 2);
        assert_eq!(s.next_step(), 1);
        assert_eq!(s.next_step(), 1);
        assert_eq!(s.next_step(), 0);
    }

    #[test]
    fn manual_requests_net_out() {
        let s = ManualSignal::new();
        s.request(2);
        s.request(-3);
        assert_eq!(s.next_step(), -1);
        assert_eq!(s.next_step(), 0);
    }

    #[test]
    fn manual_clear_drops_pending() {
        let s = ManualSignal::new();
        s.request(-4);
        s.clear();
        assert_eq!(s.pending(), 0);
        assert_eq!(s.next_step(), 0);
    }

    #[test]
    fn oscillating_alternates() {
        let s = OscillatingSignal::new(2);
        let steps: Vec<i32> = (0..8).map(|_| s.next_step()).collect();
        assert_eq!(steps, vec![1, 0, -1, 0, 1, 0, -1, 0]);
    }

    #[test]
    fn oscillating_period_of_one() {
        let s = OscillatingSignal::new(1);
        let steps: Vec<i32> = (0..4).map(|_| s.next_step()).collect();
        assert_eq!(steps, vec![1, -1, 1, -1]);
    }
}
