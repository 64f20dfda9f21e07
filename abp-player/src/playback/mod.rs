//! Playback control components

pub mod engine;
pub mod monitor;
pub mod position;
pub mod process;
pub mod session;
pub mod sleep_timer;

pub use engine::PlaybackEngine;
pub use process::{DecoderControl, DecoderStatus, MadplayController};
