//! Playback position tracking
//!
//! Pure timestamp arithmetic, no I/O. The decoder offers no position query,
//! so the position is derived entirely from when playback began, how long it
//! has been paused in total, and the offset it started from:
//!
//! ```text
//! position = base_offset + (now - started_at) - accumulated_pause
//! ```
//!
//! While paused, `now` is frozen at the instant the pause began, so the
//! position holds steady until `resume` folds the pause interval into
//! `accumulated_pause`.
//!
//! Uses `tokio::time::Instant` so tests can drive the clock with
//! `tokio::time::advance`.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Elapsed-time position tracker for the active playback session.
#[derive(Debug, Default)]
pub struct PositionTracker {
    started_at: Option<Instant>,
    base_offset: f64,
    pause_started: Option<Instant>,
    accumulated_pause: Duration,
}

impl PositionTracker {
    /// Start tracking from `start_offset` seconds into the book.
    /// Resets any accumulated pause time from a previous run.
    pub fn begin(&mut self, start_offset: f64) {
        self.started_at = Some(Instant::now());
        self.base_offset = start_offset.max(0.0);
        self.pause_started = None;
        self.accumulated_pause = Duration::ZERO;
    }

    /// Record the start of a pause. Idempotent: a second call while already
    /// paused is a no-op, so pause time is never double-counted.
    pub fn pause(&mut self) {
        if self.started_at.is_some() && self.pause_started.is_none() {
            self.pause_started = Some(Instant::now());
        }
    }

    /// Fold the completed pause interval into the accumulated total.
    /// No-op if not currently paused.
    pub fn resume(&mut self) {
        if let Some(pause_started) = self.pause_started.take() {
            self.accumulated_pause += pause_started.elapsed();
        }
    }

    /// Whether a pause is currently in progress.
    pub fn is_paused(&self) -> bool {
        self.pause_started.is_some()
    }

    /// Forget the current run entirely.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current position in seconds. Never negative; no upper clamp (the
    /// decoder terminates itself at end of file).
    ///
    /// # Errors
    ///
    /// [`Error::NotStarted`] if called before [`begin`](Self::begin).
    pub fn current_position(&self) -> Result<f64> {
        let started_at = self.started_at.ok_or(Error::NotStarted)?;
        let end = self.pause_started.unwrap_or_else(Instant::now);
        let active = end
            .saturating_duration_since(started_at)
            .saturating_sub(self.accumulated_pause);
        Ok(self.base_offset + active.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn test_position_before_begin_fails() {
        let tracker = PositionTracker::default();
        assert!(matches!(tracker.current_position(), Err(Error::NotStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_advances_with_clock() {
        let mut tracker = PositionTracker::default();
        tracker.begin(0.0);

        advance(Duration::from_secs(125)).await;
        let pos = tracker.current_position().unwrap();
        assert!((pos - 125.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_offset_added() {
        let mut tracker = PositionTracker::default();
        tracker.begin(60.0);

        advance(Duration::from_secs(5)).await;
        let pos = tracker.current_position().unwrap();
        assert!((pos - 65.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_excludes_paused_time() {
        let mut tracker = PositionTracker::default();
        tracker.begin(0.0);

        advance(Duration::from_secs(125)).await;
        tracker.pause();
        advance(Duration::from_secs(30)).await;
        tracker.resume();
        advance(Duration::from_secs(10)).await;

        // 125 + 10 active seconds; the 30s pause does not count
        let pos = tracker.current_position().unwrap();
        assert!((pos - 135.0).abs() < 1e-6, "got {}", pos);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_frozen_while_paused() {
        let mut tracker = PositionTracker::default();
        tracker.begin(0.0);

        advance(Duration::from_secs(40)).await;
        tracker.pause();
        advance(Duration::from_secs(300)).await;

        let pos = tracker.current_position().unwrap();
        assert!((pos - 40.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_pause_not_double_counted() {
        let mut tracker = PositionTracker::default();
        tracker.begin(0.0);

        advance(Duration::from_secs(10)).await;
        tracker.pause();
        advance(Duration::from_secs(5)).await;
        tracker.pause(); // second call must be a no-op
        advance(Duration::from_secs(5)).await;
        tracker.resume();
        advance(Duration::from_secs(10)).await;

        let pos = tracker.current_position().unwrap();
        assert!((pos - 20.0).abs() < 1e-6, "got {}", pos);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_pause_resume_pairs() {
        let mut tracker = PositionTracker::default();
        tracker.begin(0.0);

        let mut expected_active = 0u64;
        for (active, paused) in [(10, 3), (20, 60), (5, 1)] {
            advance(Duration::from_secs(active)).await;
            expected_active += active;
            tracker.pause();
            advance(Duration::from_secs(paused)).await;
            tracker.resume();
        }

        let pos = tracker.current_position().unwrap();
        assert!((pos - expected_active as f64).abs() < 1e-6, "got {}", pos);
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_resets_previous_run() {
        let mut tracker = PositionTracker::default();
        tracker.begin(0.0);
        advance(Duration::from_secs(50)).await;
        tracker.pause();
        advance(Duration::from_secs(5)).await;

        tracker.begin(200.0);
        advance(Duration::from_secs(2)).await;

        let pos = tracker.current_position().unwrap();
        assert!((pos - 202.0).abs() < 1e-6);
        assert!(!tracker.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_tracking() {
        let mut tracker = PositionTracker::default();
        tracker.begin(10.0);
        advance(Duration::from_secs(1)).await;

        tracker.reset();
        assert!(matches!(tracker.current_position(), Err(Error::NotStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_offset_clamped() {
        let mut tracker = PositionTracker::default();
        tracker.begin(-10.0);
        let pos = tracker.current_position().unwrap();
        assert!(pos >= 0.0);
    }
}
