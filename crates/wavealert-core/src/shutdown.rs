//! Graceful process shutdown.
//!
//! A supervised child is asked to stop with SIGTERM, given a bounded drain
//! window, then killed. The same sequence is used by the supervisor when it
//! exits and by the updater when it signals peers after a tree change.

use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait after SIGTERM before escalating.
    #[serde(default = "default_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Whether to SIGKILL when the drain window elapses.
    #[serde(default = "default_force_kill")]
    pub force_kill: bool,
}

const fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_force_kill() -> bool {
    true
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            force_kill: true,
        }
    }
}

/// Send a signal to a process by PID.
///
/// # Errors
///
/// Returns an error when the PID is invalid or delivery fails. A PID that no
/// longer exists is reported as [`ShutdownError::NoSuchProcess`].
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), ShutdownError> {
    let raw = i32::try_from(pid).map_err(|_| ShutdownError::InvalidPid(pid))?;
    match nix::sys::signal::kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Err(ShutdownError::NoSuchProcess(pid)),
        Err(errno) => Err(ShutdownError::SignalFailed(pid, errno)),
    }
}

/// Ask a child process to stop, escalating to SIGKILL after the drain
/// window.
///
/// Returns the exit code when the child reported one.
///
/// # Errors
///
/// Returns an error when signal delivery fails or the child cannot be
/// reaped.
pub async fn stop_child(
    child: &mut tokio::process::Child,
    config: &ShutdownConfig,
) -> Result<Option<i32>, ShutdownError> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(None);
    };

    send_signal(pid, Signal::SIGTERM).or_else(|err| match err {
        ShutdownError::NoSuchProcess(_) => Ok(()),
        other => Err(other),
    })?;

    match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(status) => Ok(status.map(|s| s.code())?),
        Err(_) if config.force_kill => {
            tracing::warn!(pid, "graceful shutdown timed out, sending SIGKILL");
            child.kill().await?;
            Ok(child.wait().await.map(|s| s.code())?)
        }
        Err(_) => Err(ShutdownError::Timeout(config.timeout)),
    }
}

/// Shutdown errors.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// PID outside the valid range.
    #[error("invalid pid {0}")]
    InvalidPid(u32),

    /// Target process does not exist.
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    /// Signal could not be delivered.
    #[error("failed to signal pid {0}: {1}")]
    SignalFailed(u32, nix::errno::Errno),

    /// Child did not exit within the drain window.
    #[error("shutdown timed out after {0:?}")]
    Timeout(Duration),

    /// Wait or kill failed.
    #[error("shutdown I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn signaling_a_dead_pid_reports_no_such_process() {
        assert!(matches!(
            send_signal(999_999_999, Signal::SIGTERM),
            Err(ShutdownError::NoSuchProcess(_) | ShutdownError::InvalidPid(_))
        ));
    }

    #[tokio::test]
    async fn sigterm_stops_a_cooperative_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()
            .unwrap();

        let config = ShutdownConfig {
            timeout: Duration::from_secs(5),
            force_kill: true,
        };
        // sleep dies to SIGTERM; no exit code, terminated by signal.
        let code = stop_child(&mut child, &config).await.unwrap();
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn stubborn_children_are_killed_after_the_window() {
        // Ignores SIGTERM, so only SIGKILL ends it.
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();

        let config = ShutdownConfig {
            timeout: Duration::from_millis(300),
            force_kill: true,
        };
        let code = stop_child(&mut child, &config).await.unwrap();
        assert_eq!(code, None);
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
