//! Input shim: discrete control actions
//!
//! The engine only ever sees [`ControlAction`] values arriving on a
//! channel; where they come from (physical buttons, a keyboard, a test
//! harness) is not its concern. This module provides the keyboard reader
//! used for bench testing: one letter per line on stdin, mirroring the
//! button set of the target hardware.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discrete control actions consumed by the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    PlayPause,
    SleepTimer,
    NextBook,
    PreviousBook,
    SeekForward,
    SeekBackward,
    Quit,
}

impl ControlAction {
    /// Map a key to an action: `p`=play/pause, `s`=sleep, `n`=next,
    /// `b`=previous, `f`=forward, `r`=rewind, `q`=quit.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'p' => Some(Self::PlayPause),
            's' => Some(Self::SleepTimer),
            'n' => Some(Self::NextBook),
            'b' => Some(Self::PreviousBook),
            'f' => Some(Self::SeekForward),
            'r' => Some(Self::SeekBackward),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Spawn a task translating stdin lines into control actions.
///
/// The task ends on EOF, on `q`, or when the receiving side closes.
pub fn spawn_keyboard_reader(tx: mpsc::Sender<ControlAction>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("Keyboard control active: p=play/pause s=sleep n=next b=previous f=forward r=rewind q=quit");

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break, // EOF
                Err(e) => {
                    warn!("Keyboard input error: {}", e);
                    break;
                }
            };

            let Some(key) = line.trim().chars().next() else {
                continue;
            };
            let Some(action) = ControlAction::from_key(key) else {
                debug!("Ignoring unmapped key '{}'", key);
                continue;
            };

            let quit = action == ControlAction::Quit;
            if tx.send(action).await.is_err() {
                break;
            }
            if quit {
                break;
            }
        }
        debug!("Keyboard reader stopped");
    })
}
