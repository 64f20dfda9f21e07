//! In-memory playback session
//!
//! The sole shared mutable resource of the engine. Every field is read and
//! written only while holding the engine's session lock.

use crate::playback::position::PositionTracker;
use crate::playback::sleep_timer::SleepTimer;
use abp_common::events::PlaybackState;

/// Current playback session for the active book.
#[derive(Debug)]
pub struct PlaybackSession {
    /// Index into the configured book list
    pub book_index: usize,

    /// Stopped / Playing / Paused
    pub state: PlaybackState,

    /// Elapsed-time position computation for the current run
    pub tracker: PositionTracker,

    /// Deferred auto-pause deadline
    pub sleep_timer: SleepTimer,

    /// Set under the session lock before the engine terminates the decoder,
    /// so the monitor never treats an intentional stop (or a mid-transition
    /// restart) as natural completion.
    pub explicitly_stopped: bool,

    /// Position to resume from while no run is active; refreshed whenever
    /// the live position is snapshotted.
    pub last_known_position: f64,
}

impl PlaybackSession {
    /// Session seeded from the persisted state, initially stopped.
    pub fn new(book_index: usize, position_seconds: f64) -> Self {
        Self {
            book_index,
            state: PlaybackState::Stopped,
            tracker: PositionTracker::default(),
            sleep_timer: SleepTimer::default(),
            explicitly_stopped: false,
            last_known_position: position_seconds.max(0.0),
        }
    }

    /// Best-known position: the live tracker while a run is active, the
    /// saved resume point otherwise.
    pub fn position(&self) -> f64 {
        match self.state {
            PlaybackState::Stopped => self.last_known_position,
            _ => self
                .tracker
                .current_position()
                .unwrap_or(self.last_known_position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_stopped() {
        let session = PlaybackSession::new(2, 37.5);
        assert_eq!(session.state, PlaybackState::Stopped);
        assert_eq!(session.book_index, 2);
        assert_eq!(session.position(), 37.5);
        assert!(!session.explicitly_stopped);
    }

    #[test]
    fn test_negative_seed_position_clamped() {
        let session = PlaybackSession::new(0, -5.0);
        assert_eq!(session.position(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_tracker_while_playing() {
        let mut session = PlaybackSession::new(0, 10.0);
        session.tracker.begin(10.0);
        session.state = PlaybackState::Playing;

        tokio::time::advance(std::time::Duration::from_secs(7)).await;
        assert!((session.position() - 17.0).abs() < 1e-6);
    }
}
