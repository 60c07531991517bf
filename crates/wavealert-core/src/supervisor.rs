//! Supervision registry.
//!
//! Bookkeeping for the supervised roles: one handle per role carrying the
//! lifecycle state, the recorded PID, and restart counters. The registry
//! enforces at most one live instance per role; the process-level guarantee
//! comes from the role locks each child acquires on startup.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::restart::{RestartConfig, RestartManager};
use crate::roles::{ProcessState, Role, RoleSpec};

/// Handle to one supervised role instance.
#[derive(Debug)]
pub struct RoleHandle {
    /// Spec used to (re)spawn the role.
    pub spec: RoleSpec,

    /// Current lifecycle state.
    pub state: ProcessState,

    /// OS process ID while running.
    pub pid: Option<u32>,

    /// When the current instance started.
    pub started_at: Option<DateTime<Utc>>,

    /// Total restarts since the supervisor came up.
    pub restart_count: u32,

    /// Most recent restart time.
    pub last_restart: Option<DateTime<Utc>>,

    /// Most recent failure reason, for the heartbeat log.
    pub last_failure: Option<String>,
}

impl RoleHandle {
    fn new(spec: RoleSpec) -> Self {
        Self {
            spec,
            state: ProcessState::Stopped { exit_code: None },
            pid: None,
            started_at: None,
            restart_count: 0,
            last_restart: None,
            last_failure: None,
        }
    }

    /// Uptime of the current instance in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> Option<i64> {
        self.started_at
            .map(|started| Utc::now().signed_duration_since(started).num_seconds())
    }
}

/// Registry of supervised roles.
#[derive(Debug, Default)]
pub struct Supervisor {
    handles: HashMap<Role, RoleHandle>,
    restart_managers: HashMap<Role, RestartManager>,
}

impl Supervisor {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role.
    ///
    /// # Errors
    ///
    /// Returns an error when the role is already registered.
    pub fn register(
        &mut self,
        spec: RoleSpec,
        restart: RestartConfig,
    ) -> Result<(), SupervisorError> {
        let role = spec.role;
        if self.handles.contains_key(&role) {
            return Err(SupervisorError::DuplicateRole(role));
        }
        self.handles.insert(role, RoleHandle::new(spec));
        self.restart_managers
            .insert(role, RestartManager::new(restart));
        Ok(())
    }

    /// Registered roles in spawn order.
    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        Role::SPAWN_ORDER
            .iter()
            .copied()
            .filter(|role| self.handles.contains_key(role))
            .collect()
    }

    /// Handle for a role.
    #[must_use]
    pub fn handle(&self, role: Role) -> Option<&RoleHandle> {
        self.handles.get(&role)
    }

    /// Mutable handle for a role.
    pub fn handle_mut(&mut self, role: Role) -> Option<&mut RoleHandle> {
        self.handles.get_mut(&role)
    }

    /// Restart manager for a role.
    pub fn restart_manager(&mut self, role: Role) -> Option<&mut RestartManager> {
        self.restart_managers.get_mut(&role)
    }

    /// Number of live instances.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.handles
            .values()
            .filter(|h| h.state.is_running())
            .count()
    }

    /// Record a (re)spawn.
    pub fn mark_started(&mut self, role: Role, pid: u32) {
        if let Some(handle) = self.handles.get_mut(&role) {
            handle.state = ProcessState::Running;
            handle.pid = Some(pid);
            handle.started_at = Some(Utc::now());
        }
    }

    /// Record an exit observed by the monitor.
    pub fn mark_exited(&mut self, role: Role, state: ProcessState, reason: Option<String>) {
        if let Some(handle) = self.handles.get_mut(&role) {
            handle.state = state;
            handle.pid = None;
            handle.last_failure = reason;
        }
    }

    /// Record a restart attempt.
    pub fn mark_restarted(&mut self, role: Role) {
        if let Some(handle) = self.handles.get_mut(&role) {
            handle.restart_count += 1;
            handle.last_restart = Some(Utc::now());
        }
    }
}

/// Supervision errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Role registered twice.
    #[error("role '{0}' is already registered")]
    DuplicateRole(Role),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Env;
    use std::path::PathBuf;

    fn spec(role: Role) -> RoleSpec {
        RoleSpec {
            role,
            command: PathBuf::from("true"),
            args: Vec::new(),
            env: Env::new(),
        }
    }

    #[test]
    fn register_and_look_up() {
        let mut supervisor = Supervisor::new();
        supervisor
            .register(spec(Role::Resolver), RestartConfig::default())
            .unwrap();

        assert!(supervisor.handle(Role::Resolver).is_some());
        assert!(supervisor.handle(Role::Updater).is_none());
        assert!(supervisor.restart_manager(Role::Resolver).is_some());
    }

    #[test]
    fn duplicate_roles_are_rejected() {
        let mut supervisor = Supervisor::new();
        supervisor
            .register(spec(Role::Updater), RestartConfig::default())
            .unwrap();
        assert!(matches!(
            supervisor.register(spec(Role::Updater), RestartConfig::default()),
            Err(SupervisorError::DuplicateRole(Role::Updater))
        ));
    }

    #[test]
    fn roles_come_back_in_spawn_order() {
        let mut supervisor = Supervisor::new();
        supervisor
            .register(spec(Role::Dashboard), RestartConfig::default())
            .unwrap();
        supervisor
            .register(spec(Role::LedService), RestartConfig::default())
            .unwrap();
        supervisor
            .register(spec(Role::Resolver), RestartConfig::default())
            .unwrap();

        assert_eq!(
            supervisor.roles(),
            vec![Role::LedService, Role::Resolver, Role::Dashboard]
        );
    }

    #[test]
    fn lifecycle_bookkeeping() {
        let mut supervisor = Supervisor::new();
        supervisor
            .register(spec(Role::LedService), RestartConfig::default())
            .unwrap();

        assert_eq!(supervisor.running_count(), 0);

        supervisor.mark_started(Role::LedService, 4242);
        assert_eq!(supervisor.running_count(), 1);
        assert_eq!(supervisor.handle(Role::LedService).unwrap().pid, Some(4242));

        supervisor.mark_exited(
            Role::LedService,
            ProcessState::Crashed { exit_code: Some(1) },
            Some("exit code 1".to_string()),
        );
        assert_eq!(supervisor.running_count(), 0);

        supervisor.mark_restarted(Role::LedService);
        assert_eq!(
            supervisor.handle(Role::LedService).unwrap().restart_count,
            1
        );
    }
}
