//! Playback engine integration tests
//!
//! Drive the engine through an in-memory decoder fake so every scenario is
//! deterministic: the fake records starts/pauses/announcements and can
//! simulate the decoder exiting on its own. Clock-sensitive scenarios pause
//! tokio's clock after setup and advance it explicitly.

use abp_common::config::{AdvancePolicy, BookEntry, PlayerConfig};
use abp_common::events::{PlaybackState, PlayerEvent};
use abp_player::db::{PersistedState, StateStore};
use abp_player::error::{Error, Result};
use abp_player::playback::process::{DecoderControl, DecoderStatus};
use abp_player::PlaybackEngine;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{advance, pause};

#[derive(Debug, Default)]
struct FakeState {
    running: bool,
    paused: bool,
    /// Some(success) once the simulated process has exited on its own
    exit: Option<bool>,
    fail_next_start: bool,
    starts: Vec<(PathBuf, f64)>,
    stops: usize,
    pauses: usize,
    resumes: usize,
    announcements: Vec<PathBuf>,
}

/// In-memory decoder stand-in. Cloning shares the recorded state, so tests
/// keep a handle after moving the fake into the engine.
#[derive(Clone, Default)]
struct FakeDecoder {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDecoder {
    fn finish_naturally(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        state.exit = Some(success);
    }

    fn fail_next_start(&self) {
        self.state.lock().unwrap().fail_next_start = true;
    }

    fn starts(&self) -> Vec<(PathBuf, f64)> {
        self.state.lock().unwrap().starts.clone()
    }

    fn last_start(&self) -> (PathBuf, f64) {
        self.starts().last().cloned().expect("no decoder start recorded")
    }

    fn announcements(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().announcements.clone()
    }

    fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (state.pauses, state.resumes, state.stops)
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }
}

#[async_trait]
impl DecoderControl for FakeDecoder {
    async fn start(&self, path: &Path, start_offset: f64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(Error::Launch("simulated launch failure".to_string()));
        }
        state.starts.push((path.to_path_buf(), start_offset));
        state.running = true;
        state.paused = false;
        state.exit = None;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.running && !state.paused {
            state.paused = true;
            state.pauses += 1;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.paused {
            state.paused = false;
            state.resumes += 1;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.paused = false;
        state.exit = None;
        state.stops += 1;
        Ok(())
    }

    async fn status(&self) -> Result<DecoderStatus> {
        let state = self.state.lock().unwrap();
        Ok(match state.exit {
            Some(success) => DecoderStatus::Exited { success },
            None if state.running => DecoderStatus::Running,
            None => DecoderStatus::Idle,
        })
    }

    async fn play_to_completion(&self, path: &Path, _limit: Duration) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .announcements
            .push(path.to_path_buf());
        Ok(())
    }

    async fn spawn_oneshot(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

fn book_path(index: usize) -> PathBuf {
    PathBuf::from(format!("/books/{}.mp3", index + 1))
}

fn test_config(book_count: usize, advance_policy: AdvancePolicy) -> Arc<PlayerConfig> {
    Arc::new(PlayerConfig {
        books: (0..book_count)
            .map(|i| BookEntry {
                path: book_path(i),
                title: Some(format!("Book {}", i + 1)),
            })
            .collect(),
        decoder: PathBuf::from("madplay"),
        state_db: None,
        seek_seconds: 60,
        sleep_timer_minutes: 15,
        autosave_interval_seconds: 5,
        book_advance: advance_policy,
        announcements_dir: Some(PathBuf::from("/announcements")),
        notification_sound: None,
    })
}

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

async fn memory_pool() -> Pool<Sqlite> {
    // Clock-sensitive tests pause tokio's clock, which makes the runtime
    // auto-advance to the next armed timer whenever it would otherwise idle.
    // sqlx arms its acquire-timeout timer only on the slow path (no idle
    // connection ready). Keeping a pool of pre-warmed connections over a
    // shared-cache in-memory database means every acquire takes the
    // synchronous fast path, so no timer is ever armed while the decoder op
    // parks — and the mocked clock stays exact. A unique DB name per pool
    // keeps each test isolated; `min_connections` holds the shared cache
    // alive for the pool's lifetime.
    let id = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let url = format!("sqlite:file:abp_test_{}?mode=memory&cache=shared", id);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .test_before_acquire(false)
        .max_lifetime(None)
        .idle_timeout(None)
        .connect(&url)
        .await
        .unwrap();

    // Pre-open the full connection set now, while the clock still runs in real
    // time, so later acquires always take the synchronous fast path and never
    // arm a timeout timer under the paused clock. The spare connections absorb
    // the briefly-deferred return of a just-released connection, which would
    // otherwise force a slow-path acquire (and an armed timer the paused clock
    // would auto-advance toward).
    let mut warm = Vec::new();
    for _ in 0..8 {
        warm.push(pool.acquire().await.unwrap());
    }
    drop(warm);
    pool
}

struct Harness {
    engine: Arc<PlaybackEngine<FakeDecoder>>,
    decoder: FakeDecoder,
    /// Second store view over the same pool, for inspecting saved state
    store: StateStore,
}

/// Build a full engine over an in-memory store. `seed` pre-populates the
/// persisted record, as if left behind by a previous run.
async fn harness_with(
    book_count: usize,
    advance_policy: AdvancePolicy,
    seed: Option<PersistedState>,
) -> Harness {
    let pool = memory_pool().await;
    let store_view = StateStore::with_pool(pool.clone()).await.unwrap();
    if let Some(seed) = &seed {
        store_view.save(seed).await.unwrap();
    }

    let store = StateStore::with_pool(pool).await.unwrap();
    let decoder = FakeDecoder::default();
    let engine = Arc::new(
        PlaybackEngine::new(test_config(book_count, advance_policy), decoder.clone(), store)
            .await
            .unwrap(),
    );

    Harness {
        engine,
        decoder,
        store: store_view,
    }
}

async fn harness(book_count: usize) -> Harness {
    harness_with(book_count, AdvancePolicy::Wrap, None).await
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected ~{}, got {}",
        expected,
        actual
    );
}

#[tokio::test]
async fn play_pause_toggle_tracks_position_across_pauses() {
    let h = harness(2).await;
    pause();

    assert_eq!(h.engine.playback_state().await, PlaybackState::Stopped);

    // Stopped -> Playing launches book 0 at its persisted position (0)
    assert_eq!(h.engine.play_pause().await.unwrap(), PlaybackState::Playing);
    assert_eq!(h.decoder.last_start(), (book_path(0), 0.0));

    advance(Duration::from_secs(125)).await;
    assert_close(h.engine.current_position().await.unwrap(), 125.0);

    // Playing -> Paused freezes the position
    assert_eq!(h.engine.play_pause().await.unwrap(), PlaybackState::Paused);
    advance(Duration::from_secs(30)).await;
    assert_close(h.engine.current_position().await.unwrap(), 125.0);

    // Paused -> Playing; the 30s pause is excluded from the position
    assert_eq!(h.engine.play_pause().await.unwrap(), PlaybackState::Playing);
    advance(Duration::from_secs(10)).await;
    assert_close(h.engine.current_position().await.unwrap(), 135.0);

    let (pauses, resumes, _) = h.decoder.counts();
    assert_eq!(pauses, 1);
    assert_eq!(resumes, 1);
}

#[tokio::test]
async fn startup_resumes_from_persisted_state() {
    let seed = PersistedState {
        book_index: 1,
        position_seconds: 42.5,
    };
    let h = harness_with(3, AdvancePolicy::Wrap, Some(seed)).await;

    assert_eq!(h.engine.current_book().await, 1);
    assert_close(h.engine.current_position().await.unwrap(), 42.5);

    h.engine.play_pause().await.unwrap();
    assert_eq!(h.decoder.last_start(), (book_path(1), 42.5));
}

#[tokio::test]
async fn out_of_range_persisted_index_falls_back_to_defaults() {
    let seed = PersistedState {
        book_index: 9,
        position_seconds: 100.0,
    };
    let h = harness_with(2, AdvancePolicy::Wrap, Some(seed)).await;

    assert_eq!(h.engine.current_book().await, 0);
    assert_close(h.engine.current_position().await.unwrap(), 0.0);
}

#[tokio::test]
async fn corrupt_persisted_state_falls_back_to_defaults() {
    let pool = memory_pool().await;
    // Creates the table so the garbage rows can be inserted
    let _init = StateStore::with_pool(pool.clone()).await.unwrap();
    sqlx::query("INSERT INTO player_state (key, value) VALUES ('book_index', 'garbage')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO player_state (key, value) VALUES ('position_seconds', '12.5')")
        .execute(&pool)
        .await
        .unwrap();

    let store = StateStore::with_pool(pool).await.unwrap();
    let engine = PlaybackEngine::new(test_config(2, AdvancePolicy::Wrap), FakeDecoder::default(), store)
        .await
        .unwrap();

    assert_eq!(engine.current_book().await, 0);
    assert_close(engine.current_position().await.unwrap(), 0.0);
}

#[tokio::test]
async fn save_load_round_trip_through_engine_actions() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(90)).await;
    h.engine.play_pause().await.unwrap(); // pause persists the position

    let saved = h.store.load().await.unwrap().unwrap();
    assert_eq!(saved.book_index, 0);
    assert_close(saved.position_seconds, 90.0);
}

#[tokio::test]
async fn seek_restarts_decoder_at_new_offset() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(10)).await;

    let target = h.engine.seek(60.0).await.unwrap();
    assert_close(target, 70.0);
    assert_eq!(h.decoder.last_start(), (book_path(0), 70.0));
    assert_eq!(h.engine.playback_state().await, PlaybackState::Playing);

    // Playback continues from the seek target
    advance(Duration::from_secs(5)).await;
    assert_close(h.engine.current_position().await.unwrap(), 75.0);

    let saved = h.store.load().await.unwrap().unwrap();
    assert_close(saved.position_seconds, 70.0);
}

#[tokio::test]
async fn seek_backward_clamps_to_zero() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(10)).await;

    let target = h.engine.seek(-60.0).await.unwrap();
    assert_close(target, 0.0);
    assert_eq!(h.decoder.last_start(), (book_path(0), 0.0));
}

#[tokio::test]
async fn seek_while_paused_preserves_pause_state() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(30)).await;
    h.engine.play_pause().await.unwrap(); // pause

    let target = h.engine.seek(60.0).await.unwrap();
    assert_close(target, 90.0);
    assert_eq!(h.engine.playback_state().await, PlaybackState::Paused);
    assert!(h.decoder.is_paused());

    // Still frozen at the seek target
    advance(Duration::from_secs(20)).await;
    assert_close(h.engine.current_position().await.unwrap(), 90.0);

    // Resume continues from there
    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(5)).await;
    assert_close(h.engine.current_position().await.unwrap(), 95.0);
}

#[tokio::test]
async fn seek_ignored_while_stopped() {
    let seed = PersistedState {
        book_index: 0,
        position_seconds: 33.0,
    };
    let h = harness_with(2, AdvancePolicy::Wrap, Some(seed)).await;

    let position = h.engine.seek(60.0).await.unwrap();
    assert_close(position, 33.0);
    assert!(h.decoder.starts().is_empty());
    assert_eq!(h.engine.playback_state().await, PlaybackState::Stopped);
}

#[tokio::test]
async fn next_book_announces_and_persists_both_books() {
    let h = harness(3).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(100)).await;

    let new_index = h.engine.next_book().await.unwrap();
    assert_eq!(new_index, 1);
    assert_eq!(h.engine.playback_state().await, PlaybackState::Playing);

    // The announcement for the new book played before it started
    assert_eq!(
        h.decoder.announcements(),
        vec![PathBuf::from("/announcements/2.mp3")]
    );
    assert_eq!(h.decoder.last_start(), (book_path(1), 0.0));

    // Book 0's final position survives the switch; the active record moved on
    assert_close(h.store.book_position(0).await.unwrap(), 100.0);
    let saved = h.store.load().await.unwrap().unwrap();
    assert_eq!(saved.book_index, 1);
    assert_close(saved.position_seconds, 0.0);
}

#[tokio::test]
async fn switching_back_resumes_books_where_they_left_off() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(100)).await;

    h.engine.next_book().await.unwrap();
    advance(Duration::from_secs(25)).await;

    // Wraps back to book 0 and resumes it at 100s, not from the start
    let index = h.engine.next_book().await.unwrap();
    assert_eq!(index, 0);
    assert_eq!(h.decoder.last_start(), (book_path(0), 100.0));
    assert_close(h.store.book_position(1).await.unwrap(), 25.0);
}

#[tokio::test]
async fn next_book_wraps_past_last_index() {
    let seed = PersistedState {
        book_index: 6,
        position_seconds: 0.0,
    };
    let h = harness_with(7, AdvancePolicy::Wrap, Some(seed)).await;

    let index = h.engine.next_book().await.unwrap();
    assert_eq!(index, 0);
    assert_eq!(h.decoder.last_start(), (book_path(0), 0.0));
}

#[tokio::test]
async fn previous_book_wraps_below_zero() {
    let h = harness(3).await;

    let index = h.engine.previous_book().await.unwrap();
    assert_eq!(index, 2);
    assert_eq!(h.decoder.last_start(), (book_path(2), 0.0));
}

#[tokio::test]
async fn natural_completion_advances_to_next_book() {
    let h = harness(3).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(200)).await;

    // Decoder reaches end of file and exits on its own
    h.decoder.finish_naturally(true);
    h.engine.monitor_tick().await;

    assert_eq!(h.engine.current_book().await, 1);
    assert_eq!(h.engine.playback_state().await, PlaybackState::Playing);
    assert_eq!(h.decoder.last_start(), (book_path(1), 0.0));

    // Previous book's final position persisted, new book active at 0
    assert_close(h.store.book_position(0).await.unwrap(), 200.0);
    let saved = h.store.load().await.unwrap().unwrap();
    assert_eq!(saved.book_index, 1);
    assert_close(saved.position_seconds, 0.0);
}

#[tokio::test]
async fn natural_completion_wraps_from_last_book() {
    let seed = PersistedState {
        book_index: 2,
        position_seconds: 0.0,
    };
    let h = harness_with(3, AdvancePolicy::Wrap, Some(seed)).await;

    h.engine.play_pause().await.unwrap();
    h.decoder.finish_naturally(true);
    h.engine.monitor_tick().await;

    assert_eq!(h.engine.current_book().await, 0);
    assert_eq!(h.engine.playback_state().await, PlaybackState::Playing);
}

#[tokio::test]
async fn natural_completion_stops_at_last_book_with_stop_policy() {
    let seed = PersistedState {
        book_index: 1,
        position_seconds: 0.0,
    };
    let h = harness_with(2, AdvancePolicy::Stop, Some(seed)).await;

    h.engine.play_pause().await.unwrap();
    let starts_before = h.decoder.starts().len();

    h.decoder.finish_naturally(true);
    h.engine.monitor_tick().await;

    assert_eq!(h.engine.playback_state().await, PlaybackState::Stopped);
    assert_eq!(h.engine.current_book().await, 1);
    // No new launch; the finished book replays from the start next time
    assert_eq!(h.decoder.starts().len(), starts_before);
    let saved = h.store.load().await.unwrap().unwrap();
    assert_close(saved.position_seconds, 0.0);
}

#[tokio::test]
async fn explicit_stop_never_reads_as_natural_completion() {
    let h = harness(3).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(40)).await;

    // The process dies and the user stops before the monitor notices
    h.decoder.finish_naturally(true);
    h.engine.stop().await.unwrap();
    h.engine.monitor_tick().await;

    // No spurious book advance
    assert_eq!(h.engine.current_book().await, 0);
    assert_eq!(h.engine.playback_state().await, PlaybackState::Stopped);
    assert_eq!(h.decoder.starts().len(), 1);

    // Stop persisted the resume point
    let saved = h.store.load().await.unwrap().unwrap();
    assert_eq!(saved.book_index, 0);
    assert_close(saved.position_seconds, 40.0);
}

#[tokio::test]
async fn abnormal_decoder_exit_still_advances() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(10)).await;

    h.decoder.finish_naturally(false);
    h.engine.monitor_tick().await;

    assert_eq!(h.engine.current_book().await, 1);
    assert_eq!(h.engine.playback_state().await, PlaybackState::Playing);
}

#[tokio::test]
async fn sleep_timer_stacks_and_auto_pauses() {
    let h = harness(2).await;
    pause();

    h.engine.play_pause().await.unwrap();

    let first = h.engine.sleep_timer_add(15).await.unwrap().unwrap();
    assert_eq!(first, Duration::from_secs(15 * 60));

    // Second press extends the deadline instead of resetting it
    let second = h.engine.sleep_timer_add(15).await.unwrap().unwrap();
    assert_eq!(second, Duration::from_secs(30 * 60));

    advance(Duration::from_secs(29 * 60)).await;
    h.engine.monitor_tick().await;
    assert_eq!(h.engine.playback_state().await, PlaybackState::Playing);

    advance(Duration::from_secs(2 * 60)).await;
    h.engine.monitor_tick().await;
    assert_eq!(h.engine.playback_state().await, PlaybackState::Paused);

    // Timer was cleared after firing; a later tick does nothing more
    h.engine.monitor_tick().await;
    assert_eq!(h.engine.playback_state().await, PlaybackState::Paused);
}

#[tokio::test]
async fn sleep_timer_ignored_unless_playing() {
    let h = harness(2).await;

    assert_eq!(h.engine.sleep_timer_add(15).await.unwrap(), None);

    h.engine.play_pause().await.unwrap();
    h.engine.play_pause().await.unwrap(); // paused
    assert_eq!(h.engine.sleep_timer_add(15).await.unwrap(), None);
}

#[tokio::test]
async fn launch_failure_leaves_engine_stopped() {
    let h = harness(2).await;

    h.decoder.fail_next_start();
    let err = h.engine.play_pause().await.unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
    assert_eq!(h.engine.playback_state().await, PlaybackState::Stopped);

    // The engine is still usable afterwards
    assert_eq!(h.engine.play_pause().await.unwrap(), PlaybackState::Playing);
}

#[tokio::test]
async fn autosave_persists_only_while_playing() {
    let h = harness(2).await;
    pause();

    // Nothing playing, nothing saved
    h.engine.autosave_tick().await;
    assert_eq!(h.store.load().await.unwrap(), None);

    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(42)).await;
    h.engine.autosave_tick().await;

    let saved = h.store.load().await.unwrap().unwrap();
    assert_close(saved.position_seconds, 42.0);

    // Paused sessions are not re-saved by the autosave cycle
    h.engine.play_pause().await.unwrap();
    advance(Duration::from_secs(60)).await;
    h.engine.autosave_tick().await;
    let saved = h.store.load().await.unwrap().unwrap();
    assert_close(saved.position_seconds, 42.0);
}

#[tokio::test]
async fn events_reflect_transitions() {
    let h = harness(2).await;
    let mut events = h.engine.subscribe();

    h.engine.play_pause().await.unwrap();
    match events.try_recv().unwrap() {
        PlayerEvent::PlaybackStateChanged { state, .. } => {
            assert_eq!(state, PlaybackState::Playing);
        }
        other => panic!("unexpected event: {}", other.event_type()),
    }

    h.engine.next_book().await.unwrap();
    let mut saw_book_changed = false;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::BookChanged { book_index, .. } = event {
            assert_eq!(book_index, 1);
            saw_book_changed = true;
        }
    }
    assert!(saw_book_changed);
}

#[tokio::test]
async fn shutdown_stops_playback_and_joins_tasks() {
    let h = harness(2).await;

    h.engine.start_background().await;
    h.engine.play_pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.engine.shutdown().await;

    assert_eq!(h.engine.playback_state().await, PlaybackState::Stopped);
    let (_, _, stops) = h.decoder.counts();
    assert!(stops >= 1);
    assert!(h.store.load().await.unwrap().is_some());

    // Safe to call again from the stopped state
    h.engine.shutdown().await;
}
