//! Supervisor role.
//!
//! Process guardian for the appliance. Spawns the LED service, resolver,
//! updater, and dashboard, then watches them on a fixed monitor tick:
//! exited children are respawned under the windowed restart policy, a
//! wedged LED service (live process, stale status document) is bounced, and
//! a heartbeat banner records per-role state. A role that exhausts its
//! restart budget sits in cool-down without affecting the others.

use std::collections::HashMap;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};

use wavealert_core::config::{Config, RuntimePaths};
use wavealert_core::lock::RoleLock;
use wavealert_core::roles::{self, ProcessState, Role, RoleSpec};
use wavealert_core::shutdown;
use wavealert_core::status::StatusFile;
use wavealert_core::supervisor::Supervisor;

use crate::shutdown_flag::ShutdownFlag;

/// Run the supervisor until a termination signal arrives.
///
/// # Errors
///
/// Fatal initialization failures only: lock contention, unusable run
/// directory, or an unresolvable own executable path.
pub async fn run(config: Config, passthrough_args: Vec<String>) -> anyhow::Result<()> {
    let paths = config.paths();
    paths.ensure().context("create run directory")?;
    let _lock = RoleLock::acquire(paths.role_lock(Role::Supervisor))
        .context("another supervisor instance is running")?;

    let shutdown = ShutdownFlag::install().context("install signal handlers")?;

    let mut supervisor = build_registry(&config, &passthrough_args)?;
    let mut children: HashMap<Role, tokio::process::Child> = HashMap::new();

    info!(
        roles = supervisor.roles().len(),
        interval_secs = config.supervisor.monitor_interval.as_secs(),
        "supervisor starting"
    );

    // Initial startup, in dependency order: hardware owner first.
    for role in supervisor.roles() {
        start_role(&mut supervisor, &mut children, &paths, role);
    }

    while !shutdown.is_set() {
        if shutdown
            .sleep_interruptible(config.supervisor.monitor_interval)
            .await
        {
            break;
        }

        monitor_tick(&config, &paths, &mut supervisor, &mut children, &shutdown).await;
        heartbeat(&supervisor);
    }

    info!("supervisor stopping, shutting down children");
    stop_all(&config, &paths, &mut supervisor, &mut children).await;
    Ok(())
}

/// Build the role registry from configuration.
///
/// # Errors
///
/// Returns an error when the current executable path cannot be resolved.
pub fn build_registry(
    config: &Config,
    passthrough_args: &[String],
) -> anyhow::Result<Supervisor> {
    let mut supervisor = Supervisor::new();

    for role in [Role::LedService, Role::Resolver, Role::Updater] {
        let spec = RoleSpec::for_self(role, passthrough_args)
            .context("resolve current executable")?;
        supervisor
            .register(spec, config.supervisor.restart.clone())
            .expect("roles are registered once");
    }

    match RoleSpec::external(Role::Dashboard, &config.supervisor.dashboard_command) {
        Some(spec) => {
            supervisor
                .register(spec, config.supervisor.restart.clone())
                .expect("roles are registered once");
        }
        None => info!("no dashboard command configured, dashboard role disabled"),
    }

    Ok(supervisor)
}

/// One monitor pass: reap exits, check the LED status document, respawn
/// under the policy.
async fn monitor_tick(
    config: &Config,
    paths: &RuntimePaths,
    supervisor: &mut Supervisor,
    children: &mut HashMap<Role, tokio::process::Child>,
    shutdown: &ShutdownFlag,
) {
    for role in supervisor.roles() {
        if shutdown.is_set() {
            return;
        }

        let exited = match children.get_mut(&role) {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status.code()),
                Ok(None) => None,
                Err(err) => {
                    warn!(%role, %err, "could not check child status");
                    None
                }
            },
            // Never started, or removed after a previous exit.
            None => Some(None),
        };

        if let Some(exit_code) = exited {
            if supervisor
                .handle(role)
                .is_some_and(|h| h.state.is_running())
            {
                error!(%role, ?exit_code, "process has stopped");
                supervisor.mark_exited(
                    role,
                    ProcessState::Crashed { exit_code },
                    exit_code.map(|c| format!("exit code {c}")),
                );
                if role == Role::Dashboard {
                    remove_dashboard_pid(paths);
                }
            }
            children.remove(&role);
            restart_role(config, paths, supervisor, children, role, shutdown).await;
            continue;
        }

        // The LED service can wedge with a live PID; the status document is
        // the tell.
        if role == Role::LedService {
            let status = StatusFile::new(paths.led_status());
            if !status.is_fresh(config.supervisor.status_max_age) {
                warn!(%role, "status document is stale, bouncing the LED service");
                if let Some(mut child) = children.remove(&role) {
                    if let Err(err) = shutdown::stop_child(&mut child, &config.supervisor.shutdown).await
                    {
                        warn!(%role, %err, "failed to stop wedged LED service");
                    }
                }
                supervisor.mark_exited(
                    role,
                    ProcessState::Crashed { exit_code: None },
                    Some("stale status document".to_string()),
                );
                restart_role(config, paths, supervisor, children, role, shutdown).await;
            } else if let Some(manager) = supervisor.restart_manager(role) {
                manager.record_stable();
            }
        }
    }
}

/// Respawn one role if its restart budget allows it.
async fn restart_role(
    config: &Config,
    paths: &RuntimePaths,
    supervisor: &mut Supervisor,
    children: &mut HashMap<Role, tokio::process::Child>,
    role: Role,
    shutdown: &ShutdownFlag,
) {
    let now = Utc::now();
    let Some(manager) = supervisor.restart_manager(role) else {
        return;
    };

    if !manager.should_restart(now) {
        warn!(
            %role,
            in_window = manager.restart_count(now),
            "restart budget exhausted, role in cool-down"
        );
        return;
    }

    let exit_code = match supervisor.handle(role).map(|h| h.state) {
        Some(ProcessState::Crashed { exit_code } | ProcessState::Stopped { exit_code }) => {
            exit_code
        }
        _ => None,
    };
    let delay = supervisor
        .restart_manager(role)
        .map(|m| m.record_restart(now, exit_code))
        .unwrap_or_default();
    supervisor.mark_restarted(role);

    if !delay.is_zero() {
        info!(%role, delay_secs = delay.as_secs(), "backing off before respawn");
        if shutdown.sleep_interruptible(delay).await {
            return;
        }
    }

    start_role(supervisor, children, paths, role);
}

/// Spawn one role and record the outcome.
fn start_role(
    supervisor: &mut Supervisor,
    children: &mut HashMap<Role, tokio::process::Child>,
    paths: &RuntimePaths,
    role: Role,
) {
    let Some(handle) = supervisor.handle(role) else {
        return;
    };
    let spec = handle.spec.clone();

    match roles::spawn(&spec) {
        Ok(spawned) => {
            info!(%role, pid = spawned.pid, "process started");
            if role == Role::Dashboard {
                record_dashboard_pid(paths, spawned.pid);
            }
            supervisor.mark_started(role, spawned.pid);
            children.insert(role, spawned.child);
        }
        Err(err) => {
            // Spawn failures count against the restart budget like crashes.
            error!(%role, %err, "failed to start process");
            supervisor.mark_exited(
                role,
                ProcessState::Crashed { exit_code: None },
                Some(err.to_string()),
            );
        }
    }
}

/// Heartbeat banner: one line per role.
fn heartbeat(supervisor: &Supervisor) {
    let mut all_running = true;
    for role in supervisor.roles() {
        let Some(handle) = supervisor.handle(role) else {
            continue;
        };
        all_running &= handle.state.is_running();
        info!(
            %role,
            state = %handle.state,
            pid = handle.pid,
            restarts = handle.restart_count,
            uptime_secs = handle.uptime_secs(),
            last_failure = handle.last_failure.as_deref(),
            "heartbeat"
        );
    }
    if all_running {
        info!("all processes running normally");
    }
}

/// Graceful-stop-then-kill every child, reverse of spawn order.
async fn stop_all(
    config: &Config,
    paths: &RuntimePaths,
    supervisor: &mut Supervisor,
    children: &mut HashMap<Role, tokio::process::Child>,
) {
    for role in supervisor.roles().into_iter().rev() {
        let Some(mut child) = children.remove(&role) else {
            continue;
        };
        info!(%role, "stopping");
        match shutdown::stop_child(&mut child, &config.supervisor.shutdown).await {
            Ok(exit_code) => {
                supervisor.mark_exited(role, ProcessState::Stopped { exit_code }, None);
            }
            Err(err) => warn!(%role, %err, "failed to stop child"),
        }
    }
    remove_dashboard_pid(paths);
    info!("all children stopped");
}

fn record_dashboard_pid(paths: &RuntimePaths, pid: u32) {
    let path = paths.dashboard_pid();
    if let Err(err) = std::fs::write(&path, format!("{pid}\n")) {
        warn!(path = %path.display(), %err, "failed to record dashboard pid");
    }
}

fn remove_dashboard_pid(paths: &RuntimePaths) {
    let path = paths.dashboard_pid();
    if let Err(err) = std::fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "failed to remove dashboard pid file");
        }
    }
}
