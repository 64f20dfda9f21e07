//! Background tasks for playback
//!
//! Two periodic tasks run while the daemon is up:
//! - completion check (500 ms): detects natural end-of-book and a due
//!   sleep timer
//! - autosave (configured interval, 5 s default): persists the current
//!   position while playing
//!
//! Both observe the engine's shutdown signal and exit promptly; the engine
//! joins them with a bounded timeout during shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::playback::engine::PlaybackEngine;
use crate::playback::process::DecoderControl;

/// Polling interval for end-of-book and sleep timer checks.
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn the background tasks for an engine.
pub fn spawn_background_tasks<D: DecoderControl + 'static>(
    engine: Arc<PlaybackEngine<D>>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(completion_check_task(engine.clone())),
        tokio::spawn(autosave_task(engine)),
    ]
}

/// Detect decoder exit (natural completion) and sleep timer expiry.
async fn completion_check_task<D: DecoderControl + 'static>(engine: Arc<PlaybackEngine<D>>) {
    let mut shutdown = engine.shutdown_signal();
    let mut interval = time::interval(MONITOR_INTERVAL);

    info!("Completion check task started ({:?} interval)", MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => engine.monitor_tick().await,
        }
    }
    debug!("Completion check task stopped");
}

/// Persist the playing position on a fixed period.
async fn autosave_task<D: DecoderControl + 'static>(engine: Arc<PlaybackEngine<D>>) {
    let mut shutdown = engine.shutdown_signal();
    let period = engine.config().autosave_interval();
    let mut interval = time::interval(period);

    info!("Autosave task started ({:?} interval)", period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => engine.autosave_tick().await,
        }
    }
    debug!("Autosave task stopped");
}
