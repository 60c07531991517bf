//! Supervised roles and process plumbing.
//!
//! The appliance runs a fixed set of roles, each as its own OS process so a
//! crash in one cannot corrupt another. A [`RoleSpec`] describes how to start
//! a role; [`spawn`] launches it; [`ProcessState`] tracks where an instance
//! is in its lifecycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

/// The supervised roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Exclusive LED hardware owner.
    LedService,

    /// Alert resolution and dispatch.
    Resolver,

    /// Source tree reconciliation.
    Updater,

    /// Web status dashboard (external process).
    Dashboard,

    /// The supervisor itself. Never spawned by anyone; exists so the role
    /// lock namespace covers it.
    Supervisor,
}

impl Role {
    /// Spawn order for supervised roles: the hardware owner first so
    /// downstream control-channel writes are seen quickly, the updater and
    /// dashboard last.
    pub const SPAWN_ORDER: [Self; 4] = [
        Self::LedService,
        Self::Resolver,
        Self::Updater,
        Self::Dashboard,
    ];

    /// Stable role name used for lock files, logs, and subcommands.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LedService => "led-service",
            Self::Resolver => "resolver",
            Self::Updater => "updater",
            Self::Dashboard => "dashboard",
            Self::Supervisor => "supervisor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How to start one role.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    /// The role this spec launches.
    pub role: Role,

    /// Executable to run.
    pub command: PathBuf,

    /// Arguments.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: HashMap<String, String>,
}

impl RoleSpec {
    /// Spec that re-invokes the current executable with the role's
    /// subcommand; this is how the supervisor launches its own peers.
    ///
    /// # Errors
    ///
    /// Returns an error when the current executable path cannot be resolved.
    pub fn for_self(role: Role, extra_args: &[String]) -> Result<Self, ProcessError> {
        let command = std::env::current_exe().map_err(|err| {
            ProcessError::SpawnFailed(format!("cannot resolve current executable: {err}"))
        })?;
        let mut args = vec![role.name().to_string()];
        args.extend_from_slice(extra_args);
        Ok(Self {
            role,
            command,
            args,
            env: HashMap::new(),
        })
    }

    /// Spec for an external command line (the dashboard).
    #[must_use]
    pub fn external(role: Role, command_line: &[String]) -> Option<Self> {
        let (command, args) = command_line.split_first()?;
        Some(Self {
            role,
            command: PathBuf::from(command),
            args: args.to_vec(),
            env: HashMap::new(),
        })
    }
}

/// Lifecycle state of a role instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Process is starting up.
    Starting,

    /// Process is running.
    Running,

    /// Process is being stopped.
    Stopping,

    /// Process exited on its own terms.
    Stopped {
        /// Exit code if available.
        exit_code: Option<i32>,
    },

    /// Process exited unexpectedly.
    Crashed {
        /// Exit code if available.
        exit_code: Option<i32>,
    },
}

impl ProcessState {
    /// Whether the instance counts as alive.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Whether the instance has exited.
    #[must_use]
    pub const fn has_exited(&self) -> bool {
        matches!(self, Self::Stopped { .. } | Self::Crashed { .. })
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped { exit_code } => match exit_code {
                Some(code) => write!(f, "stopped (exit code: {code})"),
                None => write!(f, "stopped"),
            },
            Self::Crashed { exit_code } => match exit_code {
                Some(code) => write!(f, "crashed (exit code: {code})"),
                None => write!(f, "crashed"),
            },
        }
    }
}

/// A spawned role process.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Child handle.
    pub child: Child,

    /// OS process ID.
    pub pid: u32,
}

/// Spawn a role process.
///
/// Stdio is inherited so child log lines land in the supervisor's journal.
///
/// # Errors
///
/// Returns [`ProcessError::SpawnFailed`] when the executable is missing,
/// not executable, or the PID cannot be obtained.
pub fn spawn(spec: &RoleSpec) -> Result<SpawnedProcess, ProcessError> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .kill_on_drop(false);

    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let child = cmd
        .spawn()
        .map_err(|err| ProcessError::SpawnFailed(format!("{}: {err}", spec.role)))?;

    let pid = child.id().ok_or_else(|| {
        ProcessError::SpawnFailed(format!("{}: failed to get process ID", spec.role))
    })?;

    Ok(SpawnedProcess { child, pid })
}

/// Process errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Failed to spawn.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// I/O failure while managing the process.
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}
