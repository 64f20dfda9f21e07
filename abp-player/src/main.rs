//! Audiobook Player (abp-player) - Main entry point
//!
//! Headless daemon controlling audiobook playback through an external
//! signal-driven decoder, with durable position persistence. Discrete
//! control actions arrive on a channel (keyboard shim here; hardware
//! buttons feed the same channel on the target device).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use abp_common::config::PlayerConfig;
use abp_common::events::PlayerEvent;
use abp_player::db::StateStore;
use abp_player::input::{self, ControlAction};
use abp_player::playback::MadplayController;
use abp_player::PlaybackEngine;

/// Command-line arguments for abp-player
#[derive(Parser, Debug)]
#[command(name = "abp-player")]
#[command(about = "Audiobook player daemon")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "abplayer.toml", env = "ABP_CONFIG")]
    config: PathBuf,

    /// Override the state database path
    #[arg(long, env = "ABP_STATE_DB")]
    state_db: Option<PathBuf>,

    /// Do not resume playback automatically on launch
    #[arg(long)]
    no_autoplay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abp_player=debug,abp_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = Arc::new(PlayerConfig::load(&args.config).with_context(|| {
        format!("Failed to load configuration from {}", args.config.display())
    })?);
    info!("Starting abp-player with {} configured books", config.book_count());

    let state_db = args.state_db.unwrap_or_else(|| config.state_db_path());
    let store = StateStore::open(&state_db)
        .await
        .context("Failed to open state database")?;

    let decoder = MadplayController::new(config.decoder.clone());
    let engine = Arc::new(
        PlaybackEngine::new(config.clone(), decoder, store)
            .await
            .context("Failed to initialize playback engine")?,
    );
    engine.start_background().await;
    info!("Playback engine initialized");

    spawn_indicator(engine.subscribe());

    // Resume the last book where it left off
    if !args.no_autoplay {
        if let Err(e) = engine.play_pause().await {
            error!("Could not resume playback on startup: {}", e);
        }
    }

    let (action_tx, mut action_rx) = mpsc::channel(16);
    input::spawn_keyboard_reader(action_tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            action = action_rx.recv() => match action {
                None | Some(ControlAction::Quit) => break,
                Some(action) => dispatch(&engine, &config, action).await,
            },
        }
    }

    engine.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Map a control action onto the engine; failures are signalled to the
/// user via the log, never fatal to the daemon.
async fn dispatch(
    engine: &Arc<PlaybackEngine<MadplayController>>,
    config: &PlayerConfig,
    action: ControlAction,
) {
    let result = match action {
        ControlAction::PlayPause => engine.play_pause().await.map(|_| ()),
        ControlAction::SleepTimer => engine
            .sleep_timer_add(config.sleep_timer_minutes)
            .await
            .map(|_| ()),
        ControlAction::NextBook => engine.next_book().await.map(|_| ()),
        ControlAction::PreviousBook => engine.previous_book().await.map(|_| ()),
        ControlAction::SeekForward => engine.seek(config.seek_step_seconds()).await.map(|_| ()),
        ControlAction::SeekBackward => engine.seek(-config.seek_step_seconds()).await.map(|_| ()),
        ControlAction::Quit => Ok(()),
    };

    if let Err(e) = result {
        warn!("Action {:?} failed: {}", action, e);
    }
}

/// Reflect engine events to the indicator shim. Log output stands in for
/// the per-book LEDs; a hardware backend subscribes the same way.
fn spawn_indicator(mut events: broadcast::Receiver<PlayerEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PlayerEvent::BookChanged { book_index, title, .. }) => {
                    info!("Indicator: book {} ({}) active", book_index + 1, title);
                }
                Ok(PlayerEvent::PlaybackStateChanged { state, .. }) => {
                    info!("Indicator: playback {}", state);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Indicator lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
