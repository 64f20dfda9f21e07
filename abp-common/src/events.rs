//! Event types for the abplayer event system
//!
//! The daemon uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting from
//!   the playback engine to observers (indicator shim, logging)
//! - **Action channel** (tokio::mpsc): input shim → orchestration loop
//! - **Shared state** (single mutex around the playback session)
//!
//! The event bus is the engine's observation point: subscribers learn about
//! book changes and state transitions without reaching into engine state.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Playback state of the active session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// abplayer event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Playback state changed
    PlaybackStateChanged {
        state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Active book changed (user switch or natural completion advance)
    BookChanged {
        book_index: usize,
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback progress update (emitted on each autosave cycle)
    PlaybackProgress {
        book_index: usize,
        position_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decoder played a book through to its end
    BookCompleted {
        book_index: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sleep timer armed or extended
    SleepTimerSet {
        remaining_minutes: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sleep timer deadline reached; playback paused
    SleepTimerExpired {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            PlayerEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            PlayerEvent::BookChanged { .. } => "BookChanged",
            PlayerEvent::PlaybackProgress { .. } => "PlaybackProgress",
            PlayerEvent::BookCompleted { .. } => "BookCompleted",
            PlayerEvent::SleepTimerSet { .. } => "SleepTimerSet",
            PlayerEvent::SleepTimerExpired { .. } => "SleepTimerExpired",
        }
    }
}

/// Broadcast event bus for one-to-many event distribution
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers that received it.
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
