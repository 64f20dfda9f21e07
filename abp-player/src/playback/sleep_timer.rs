//! Sleep timer: deferred single-shot auto-pause
//!
//! Repeated activations stack onto the existing deadline instead of
//! resetting it, so an accidental double-press extends the timer rather
//! than restarting it. `check_due` does not clear the deadline; the monitor
//! clears it after acting, so a missed check cannot lose the signal.

use std::time::Duration;
use tokio::time::Instant;

/// Stackable auto-pause deadline.
#[derive(Debug, Default)]
pub struct SleepTimer {
    deadline: Option<Instant>,
}

impl SleepTimer {
    /// Arm the timer `extra` from now, or push an existing deadline out by
    /// `extra`.
    pub fn activate(&mut self, extra: Duration) {
        self.deadline = Some(match self.deadline {
            Some(deadline) => deadline + extra,
            None => Instant::now() + extra,
        });
    }

    /// Disarm the timer. Called on stop, book switch, and after firing.
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is currently armed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the deadline has been reached. Does not clear it.
    pub fn check_due(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Time left until the deadline, if armed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
