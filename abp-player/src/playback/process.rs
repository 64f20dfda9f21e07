//! Decoder process control
//!
//! The decoder (`madplay`-style) has no pause/resume or position API, so it
//! is controlled purely through the OS: playback starts a fresh process in
//! its own process group, pause/resume are SIGSTOP/SIGCONT to the group,
//! seeking restarts the process with a `--start` offset, and stop is
//! SIGTERM with a bounded grace period before SIGKILL. Owning the whole
//! process group ensures no orphaned children survive the engine.
//!
//! [`DecoderControl`] is the capability seam: the engine is written against
//! the trait, so a decoder with native transport control (or the in-memory
//! fake used by tests) can slot in without engine changes.

use crate::error::{Error, Result};
use abp_common::time::format_start_offset;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Observed decoder process state, polled by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderStatus {
    /// No process associated
    Idle,
    /// Process running (or signal-stopped)
    Running,
    /// Process has exited; `success` distinguishes a clean end-of-file exit
    /// from an external kill
    Exited { success: bool },
}

/// Capability interface over the external decoder.
#[async_trait]
pub trait DecoderControl: Send + Sync {
    /// Launch the decoder for `path` at `start_offset` seconds, replacing
    /// any running instance.
    async fn start(&self, path: &Path, start_offset: f64) -> Result<()>;

    /// Suspend playback. No-op if already paused or nothing is running.
    async fn pause(&self) -> Result<()>;

    /// Continue suspended playback. No-op if not paused.
    async fn resume(&self) -> Result<()>;

    /// Terminate the process group and reap the process. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Non-blocking liveness check.
    async fn status(&self) -> Result<DecoderStatus>;

    /// Play a clip to completion, bounded by `limit`. Used for book
    /// announcements; failures are tolerated (logged by the caller).
    async fn play_to_completion(&self, path: &Path, limit: Duration) -> Result<()>;

    /// Fire-and-forget clip playback (notification sounds).
    async fn spawn_oneshot(&self, path: &Path) -> Result<()>;
}

struct ChildSlot {
    child: Option<Child>,
    paused: bool,
}

/// Signal-driven controller for a `madplay`-style decoder executable.
pub struct MadplayController {
    decoder: PathBuf,
    slot: Mutex<ChildSlot>,
}

impl MadplayController {
    pub fn new(decoder: PathBuf) -> Self {
        Self {
            decoder,
            slot: Mutex::new(ChildSlot {
                child: None,
                paused: false,
            }),
        }
    }

    fn base_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.decoder);
        cmd.arg("-Q")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

/// Process group id of a child, if it has not been reaped yet.
fn group_pid(child: &Child) -> Option<Pid> {
    child.id().map(|pid| Pid::from_raw(pid as i32))
}

fn signal_group(child: &Child, sig: Signal) -> Result<()> {
    match group_pid(child) {
        Some(pid) => signal::killpg(pid, sig)
            .map_err(|e| Error::Signal(format!("{} to group {}: {}", sig, pid, e))),
        None => Ok(()), // already reaped, nothing to signal
    }
}

/// Terminate a child's process group: SIGTERM, bounded wait, SIGKILL
/// escalation. A signal-stopped group gets SIGCONT first, otherwise it
/// would never see the SIGTERM and the grace period would always escalate.
async fn terminate_group(mut child: Child, paused: bool) {
    if child.id().is_none() {
        // Already reaped by a status() poll
        return;
    }

    if paused {
        if let Err(e) = signal_group(&child, Signal::SIGCONT) {
            debug!("SIGCONT before terminate failed: {}", e);
        }
    }

    if let Err(e) = signal_group(&child, Signal::SIGTERM) {
        debug!("SIGTERM failed (process likely gone): {}", e);
    }

    match time::timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("Decoder exited after SIGTERM: {}", status),
        Ok(Err(e)) => warn!("Error reaping decoder: {}", e),
        Err(_) => {
            warn!(
                "Decoder did not exit within {:?}, escalating to SIGKILL",
                STOP_GRACE
            );
            if let Err(e) = signal_group(&child, Signal::SIGKILL) {
                warn!("SIGKILL failed: {}", e);
            }
            if let Err(e) = child.wait().await {
                warn!("Error reaping decoder after SIGKILL: {}", e);
            }
        }
    }
}

#[async_trait]
impl DecoderControl for MadplayController {
    async fn start(&self, path: &Path, start_offset: f64) -> Result<()> {
        // Replace any existing instance first
        self.stop().await?;

        if !path.exists() {
            return Err(Error::Launch(format!(
                "audio file not found: {}",
                path.display()
            )));
        }

        let mut cmd = Command::new(&self.decoder);
        cmd.arg("-Q");
        if start_offset > 0.0 {
            cmd.arg("--start").arg(format_start_offset(start_offset));
        }
        cmd.arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group, so signals reach decoder children too
            .process_group(0);

        let child = cmd.spawn().map_err(|e| {
            Error::Launch(format!("{}: {}", self.decoder.display(), e))
        })?;

        info!(
            "Started decoder for {} at {}",
            path.display(),
            format_start_offset(start_offset)
        );

        let mut slot = self.slot.lock().await;
        slot.child = Some(child);
        slot.paused = false;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.paused {
            return Ok(());
        }
        let Some(child) = slot.child.as_ref() else {
            return Ok(());
        };

        signal_group(child, Signal::SIGSTOP)?;
        slot.paused = true;
        debug!("Decoder group stopped");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if !slot.paused {
            return Ok(());
        }
        let Some(child) = slot.child.as_ref() else {
            return Ok(());
        };

        signal_group(child, Signal::SIGCONT)?;
        slot.paused = false;
        debug!("Decoder group continued");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let (child, paused) = {
            let mut slot = self.slot.lock().await;
            let paused = slot.paused;
            slot.paused = false;
            (slot.child.take(), paused)
        };

        if let Some(child) = child {
            terminate_group(child, paused).await;
        }
        Ok(())
    }

    async fn status(&self) -> Result<DecoderStatus> {
        let mut slot = self.slot.lock().await;
        match slot.child.as_mut() {
            None => Ok(DecoderStatus::Idle),
            Some(child) => match child.try_wait()? {
                Some(status) => Ok(DecoderStatus::Exited {
                    success: status.success(),
                }),
                None => Ok(DecoderStatus::Running),
            },
        }
    }

    async fn play_to_completion(&self, path: &Path, limit: Duration) -> Result<()> {
        if !path.exists() {
            return Err(Error::Launch(format!(
                "clip not found: {}",
                path.display()
            )));
        }

        let mut child = self
            .base_command(path)
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.decoder.display(), e)))?;

        match time::timeout(limit, child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    warn!("Clip {} exited with {}", path.display(), status);
                }
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => {
                warn!("Clip {} exceeded {:?}, killing", path.display(), limit);
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill clip playback: {}", e);
                }
                let _ = child.wait().await;
                Ok(())
            }
        }
    }

    async fn spawn_oneshot(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            debug!("Notification clip not found: {}", path.display());
            return Ok(());
        }

        let mut child = self
            .base_command(path)
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.decoder.display(), e)))?;

        // Reap in the background so the clip never becomes a zombie
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}
