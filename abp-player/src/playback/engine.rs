//! Playback engine: lifecycle and orchestration
//!
//! Top-level coordinator composing decoder control, position tracking, the
//! sleep timer, and the state store behind the public API the orchestration
//! loop consumes. All session mutation happens under one lock; the lock is
//! never held across a decoder launch or stop, which can block for the
//! length of the termination grace period. The quick critical sections
//! before and after a subprocess call keep the monitor and autosave tasks
//! responsive during transitions.
//!
//! The `explicitly_stopped` flag is raised under the lock before any
//! intentional decoder termination (stop, seek restart, book switch), so
//! the monitor can never mistake one for natural end-of-book.

use crate::db::{PersistedState, StateStore};
use crate::error::{Error, Result};
use crate::playback::monitor;
use crate::playback::process::{DecoderControl, DecoderStatus};
use crate::playback::session::PlaybackSession;
use abp_common::config::{AdvancePolicy, PlayerConfig};
use abp_common::events::{EventBus, PlaybackState, PlayerEvent};
use abp_common::time::format_clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Upper bound on a book announcement clip.
const ANNOUNCEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `shutdown` waits for each background task to finish.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Playback engine façade.
///
/// Generic over the decoder capability so tests can drive the engine with
/// an in-memory fake while the daemon uses the signal-driven controller.
pub struct PlaybackEngine<D: DecoderControl> {
    config: Arc<PlayerConfig>,
    decoder: D,
    store: StateStore,
    session: Mutex<PlaybackSession>,
    events: EventBus,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: DecoderControl + 'static> PlaybackEngine<D> {
    /// Build an engine seeded from the persisted state.
    ///
    /// A persisted book index that no longer fits the configured book list
    /// is discarded in favor of defaults.
    pub async fn new(config: Arc<PlayerConfig>, decoder: D, store: StateStore) -> Result<Self> {
        let mut seed = store.load_or_default().await?;
        if seed.book_index >= config.book_count() {
            warn!(
                "Persisted book index {} out of range ({} books), starting fresh",
                seed.book_index,
                config.book_count()
            );
            seed = PersistedState::default();
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            decoder,
            store,
            session: Mutex::new(PlaybackSession::new(seed.book_index, seed.position_seconds)),
            events: EventBus::default(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Configuration this engine was built with.
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Subscribe to engine events (book changes, state transitions,
    /// progress updates).
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Shutdown signal observed by the background tasks.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn the completion monitor and autosave tasks.
    pub async fn start_background(self: &Arc<Self>) {
        let handles = monitor::spawn_background_tasks(Arc::clone(self));
        self.tasks.lock().await.extend(handles);
    }

    /// Current playback state.
    pub async fn playback_state(&self) -> PlaybackState {
        self.session.lock().await.state
    }

    /// Index of the active book.
    pub async fn current_book(&self) -> usize {
        self.session.lock().await.book_index
    }

    /// Current position in seconds.
    ///
    /// While stopped this is the resume point; during an active run it is
    /// computed from elapsed time.
    pub async fn current_position(&self) -> Result<f64> {
        let session = self.session.lock().await;
        match session.state {
            PlaybackState::Stopped => Ok(session.last_known_position),
            _ => session.tracker.current_position(),
        }
    }

    /// Toggle between Playing and Paused; from Stopped, launch the active
    /// book at its persisted position. Returns the resulting state.
    pub async fn play_pause(&self) -> Result<PlaybackState> {
        let state = self.session.lock().await.state;
        match state {
            PlaybackState::Stopped => self.start_playback().await?,
            PlaybackState::Playing => self.pause_playback().await?,
            PlaybackState::Paused => self.resume_playback().await?,
        }
        Ok(self.playback_state().await)
    }

    /// Stop playback, advance to the next book (wrapping), and start it
    /// from its own persisted position.
    pub async fn next_book(&self) -> Result<usize> {
        self.switch_book(1).await
    }

    /// Stop playback, retreat to the previous book (wrapping), and start it
    /// from its own persisted position.
    pub async fn previous_book(&self) -> Result<usize> {
        self.switch_book(-1).await
    }

    /// Jump `delta_seconds` relative to the current position (clamped to
    /// zero) by restarting the decoder at the new offset, preserving the
    /// play/pause state. A no-op while stopped. Returns the new position.
    pub async fn seek(&self, delta_seconds: f64) -> Result<f64> {
        let (index, target, was_paused, path) = {
            let mut session = self.session.lock().await;
            if session.state == PlaybackState::Stopped {
                debug!("Seek ignored while stopped");
                return Ok(session.last_known_position);
            }
            let book = self
                .config
                .book(session.book_index)
                .ok_or_else(|| Error::Config("active book index out of range".to_string()))?;
            let target = (session.position() + delta_seconds).max(0.0);
            session.explicitly_stopped = true;
            (
                session.book_index,
                target,
                session.state == PlaybackState::Paused,
                book.path.clone(),
            )
        };

        self.decoder.stop().await?;
        if let Err(e) = self.decoder.start(&path, target).await {
            self.fall_back_to_stopped(index, target).await;
            return Err(e);
        }

        let mut paused = was_paused;
        if was_paused {
            if let Err(e) = self.decoder.pause().await {
                warn!("Could not re-pause after seek: {}", e);
                paused = false;
            }
        }

        {
            let mut session = self.session.lock().await;
            session.tracker.begin(target);
            if paused {
                session.tracker.pause();
            }
            session.state = if paused {
                PlaybackState::Paused
            } else {
                PlaybackState::Playing
            };
            session.last_known_position = target;
            session.explicitly_stopped = false;
        }

        self.persist(index, target).await;
        info!("Seeked {:+.0}s to {}", delta_seconds, format_clock(target));
        Ok(target)
    }

    /// Arm or extend the sleep timer. Only meaningful while playing; the
    /// deadline stacks across repeated activations. Returns the remaining
    /// time, or `None` if the timer was not armed.
    pub async fn sleep_timer_add(&self, minutes: u32) -> Result<Option<Duration>> {
        let remaining = {
            let mut session = self.session.lock().await;
            if session.state != PlaybackState::Playing {
                debug!("Sleep timer ignored while {}", session.state);
                return Ok(None);
            }
            session
                .sleep_timer
                .activate(abp_common::time::minutes(u64::from(minutes)));
            session.sleep_timer.remaining()
        };

        if let Some(left) = remaining {
            self.play_notification().await;
            let remaining_minutes = left.as_secs() / 60;
            self.events.emit_lossy(PlayerEvent::SleepTimerSet {
                remaining_minutes,
                timestamp: chrono::Utc::now(),
            });
            info!("Sleep timer set: {} minutes remaining", remaining_minutes);
        }
        Ok(remaining)
    }

    /// Stop playback and persist the resume point. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let (index, position, was_stopped) = {
            let mut session = self.session.lock().await;
            let was_stopped = session.state == PlaybackState::Stopped;
            // Raised before terminating so the monitor never treats the
            // exit as natural completion
            session.explicitly_stopped = true;
            session.sleep_timer.clear();
            let position = session.position();
            session.last_known_position = position;
            (session.book_index, position, was_stopped)
        };

        self.decoder.stop().await?;

        {
            let mut session = self.session.lock().await;
            session.state = PlaybackState::Stopped;
            session.tracker.reset();
        }

        if !was_stopped {
            self.persist(index, position).await;
            self.emit_state(PlaybackState::Stopped);
            info!("Stopped at {}", format_clock(position));
        }
        Ok(())
    }

    /// Stop the decoder, end the background tasks (bounded join), and
    /// perform a final save. Safe to call from any state; never hangs.
    pub async fn shutdown(&self) {
        info!("Shutting down playback engine");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.stop().await {
            warn!("Stop during shutdown failed: {}", e);
        }

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            match time::timeout(TASK_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task ended abnormally: {}", e),
                Err(_) => warn!(
                    "Background task did not stop within {:?}, proceeding",
                    TASK_JOIN_TIMEOUT
                ),
            }
        }

        let (index, position) = {
            let session = self.session.lock().await;
            (session.book_index, session.last_known_position)
        };
        self.persist(index, position).await;
        info!("Playback engine shut down");
    }

    /// One monitor pass: detect natural end-of-book and a due sleep timer.
    /// Driven by the completion check task; errors are contained here.
    pub async fn monitor_tick(&self) {
        let active = {
            let session = self.session.lock().await;
            session.state == PlaybackState::Playing && !session.explicitly_stopped
        };
        if !active {
            return;
        }

        match self.decoder.status().await {
            Ok(DecoderStatus::Exited { success }) => {
                if let Err(e) = self.handle_natural_completion(success).await {
                    warn!("Book advance after completion failed: {}", e);
                }
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("Decoder liveness check failed: {}", e),
        }

        let due = {
            let session = self.session.lock().await;
            session.state == PlaybackState::Playing && session.sleep_timer.check_due()
        };
        if due {
            info!("Sleep timer expired, pausing playback");
            match self.pause_playback().await {
                Ok(()) => {
                    self.session.lock().await.sleep_timer.clear();
                    self.events.emit_lossy(PlayerEvent::SleepTimerExpired {
                        timestamp: chrono::Utc::now(),
                    });
                }
                Err(e) => warn!("Sleep timer pause failed: {}", e),
            }
        }
    }

    /// One autosave pass: persist the current position while playing.
    /// Driven by the autosave task; persistence failures are logged and
    /// retried on the next cycle.
    pub async fn autosave_tick(&self) {
        let snapshot = {
            let mut session = self.session.lock().await;
            if session.state != PlaybackState::Playing {
                None
            } else {
                let position = session.position();
                session.last_known_position = position;
                Some((session.book_index, position))
            }
        };

        if let Some((index, position)) = snapshot {
            self.persist(index, position).await;
            self.events.emit_lossy(PlayerEvent::PlaybackProgress {
                book_index: index,
                position_seconds: position,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    async fn start_playback(&self) -> Result<()> {
        let (index, position, path, label) = {
            let mut session = self.session.lock().await;
            if session.state != PlaybackState::Stopped {
                return Ok(());
            }
            let book = self
                .config
                .book(session.book_index)
                .ok_or_else(|| Error::Config("active book index out of range".to_string()))?;
            // Mask the monitor while the launch is in flight
            session.explicitly_stopped = true;
            (
                session.book_index,
                session.last_known_position,
                book.path.clone(),
                book.label(),
            )
        };

        if let Err(e) = self.decoder.start(&path, position).await {
            self.fall_back_to_stopped(index, position).await;
            return Err(e);
        }

        {
            let mut session = self.session.lock().await;
            session.tracker.begin(position);
            session.state = PlaybackState::Playing;
            session.explicitly_stopped = false;
        }

        self.persist(index, position).await;
        self.emit_state(PlaybackState::Playing);
        info!("Playing book {} ({}) from {}", index, label, format_clock(position));
        Ok(())
    }

    async fn pause_playback(&self) -> Result<()> {
        {
            let session = self.session.lock().await;
            if session.state != PlaybackState::Playing {
                return Ok(());
            }
        }

        self.decoder.pause().await?;

        let (index, position) = {
            let mut session = self.session.lock().await;
            session.tracker.pause();
            session.state = PlaybackState::Paused;
            let position = session.position();
            session.last_known_position = position;
            (session.book_index, position)
        };

        self.persist(index, position).await;
        self.play_notification().await;
        self.emit_state(PlaybackState::Paused);
        info!("Paused at {}", format_clock(position));
        Ok(())
    }

    async fn resume_playback(&self) -> Result<()> {
        {
            let session = self.session.lock().await;
            if session.state != PlaybackState::Paused {
                return Ok(());
            }
        }

        self.decoder.resume().await?;

        let (index, position) = {
            let mut session = self.session.lock().await;
            session.tracker.resume();
            session.state = PlaybackState::Playing;
            let position = session.position();
            (session.book_index, position)
        };

        self.persist(index, position).await;
        self.play_notification().await;
        self.emit_state(PlaybackState::Playing);
        info!("Resumed at {}", format_clock(position));
        Ok(())
    }

    async fn switch_book(&self, step: isize) -> Result<usize> {
        let count = self.config.book_count() as isize;
        let (old_index, old_position) = {
            let mut session = self.session.lock().await;
            session.explicitly_stopped = true;
            session.sleep_timer.clear();
            let position = session.position();
            (session.book_index, position)
        };

        let new_index = (old_index as isize + step).rem_euclid(count) as usize;

        self.decoder.stop().await?;
        // Previous book's final position survives the switch
        self.persist(old_index, old_position).await;

        let resume = match self.store.book_position(new_index).await {
            Ok(position) => position,
            Err(e) => {
                warn!("Could not read resume position for book {}: {}", new_index, e);
                0.0
            }
        };

        // The user must hear which book was selected before audio resumes
        self.announce(new_index).await;
        self.begin_book(new_index, resume).await?;
        Ok(new_index)
    }

    async fn handle_natural_completion(&self, clean: bool) -> Result<()> {
        let (old_index, final_position) = {
            let mut session = self.session.lock().await;
            if session.state != PlaybackState::Playing || session.explicitly_stopped {
                return Ok(());
            }
            // Claim the transition so a racing user action sees it
            session.explicitly_stopped = true;
            session.sleep_timer.clear();
            (session.book_index, session.position())
        };

        if clean {
            info!("Book {} finished", old_index);
        } else {
            warn!("Decoder for book {} exited abnormally, advancing anyway", old_index);
        }

        self.decoder.stop().await?; // reap the exited process
        self.persist(old_index, final_position).await;
        self.events.emit_lossy(PlayerEvent::BookCompleted {
            book_index: old_index,
            timestamp: chrono::Utc::now(),
        });

        let count = self.config.book_count();
        if old_index + 1 >= count && self.config.book_advance == AdvancePolicy::Stop {
            {
                let mut session = self.session.lock().await;
                session.state = PlaybackState::Stopped;
                session.tracker.reset();
                session.last_known_position = 0.0;
            }
            // A finished final book replays from the start next time
            self.persist(old_index, 0.0).await;
            self.emit_state(PlaybackState::Stopped);
            info!("Last book finished, stopping");
            return Ok(());
        }

        let new_index = (old_index + 1) % count;
        self.announce(new_index).await;
        self.begin_book(new_index, 0.0).await
    }

    /// Start `index` at `position` and commit the session to it. The
    /// decoder must already be stopped. On launch failure the session is
    /// left Stopped but pointed at the new book, so a later play retries it.
    async fn begin_book(&self, index: usize, position: f64) -> Result<()> {
        let book = self
            .config
            .book(index)
            .ok_or_else(|| Error::Config(format!("book index {} out of range", index)))?;
        let label = book.label();

        if let Err(e) = self.decoder.start(&book.path, position).await {
            self.fall_back_to_stopped(index, position).await;
            self.emit_book_changed(index, &label);
            return Err(e);
        }

        {
            let mut session = self.session.lock().await;
            session.book_index = index;
            session.tracker.begin(position);
            session.state = PlaybackState::Playing;
            session.last_known_position = position;
            session.explicitly_stopped = false;
        }

        self.persist(index, position).await;
        self.emit_book_changed(index, &label);
        self.emit_state(PlaybackState::Playing);
        info!("Switched to book {} ({}) at {}", index, label, format_clock(position));
        Ok(())
    }

    /// Restore a consistent Stopped session after an unrecoverable decoder
    /// failure.
    async fn fall_back_to_stopped(&self, index: usize, position: f64) {
        {
            let mut session = self.session.lock().await;
            session.book_index = index;
            session.state = PlaybackState::Stopped;
            session.tracker.reset();
            session.sleep_timer.clear();
            session.last_known_position = position;
        }
        self.persist(index, position).await;
        self.emit_state(PlaybackState::Stopped);
    }

    /// Durable save; failures are logged and left to the next cycle.
    async fn persist(&self, book_index: usize, position_seconds: f64) {
        let state = PersistedState {
            book_index,
            position_seconds,
        };
        if let Err(e) = self.store.save(&state).await {
            warn!("State save failed (will retry on next autosave): {}", e);
        }
    }

    /// Blocking announcement for a book switch; tolerated on failure.
    async fn announce(&self, index: usize) {
        let Some(clip) = self.config.announcement_clip(index) else {
            return;
        };
        if let Err(e) = self
            .decoder
            .play_to_completion(&clip, ANNOUNCEMENT_TIMEOUT)
            .await
        {
            warn!("Announcement for book {} failed: {}", index, e);
        }
    }

    /// Fire-and-forget notification clip; tolerated on failure.
    async fn play_notification(&self) {
        let Some(clip) = &self.config.notification_sound else {
            return;
        };
        if let Err(e) = self.decoder.spawn_oneshot(clip).await {
            debug!("Notification sound failed: {}", e);
        }
    }

    fn emit_state(&self, state: PlaybackState) {
        self.events.emit_lossy(PlayerEvent::PlaybackStateChanged {
            state,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_book_changed(&self, book_index: usize, title: &str) {
        self.events.emit_lossy(PlayerEvent::BookChanged {
            book_index,
            title: title.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }
}
