//! Updater role.
//!
//! Polls the remote for new commits on the tracked branch and brings the
//! deployed tree up to date: backup, fast-forward, record the new commit,
//! then signal the peers whose code changed. Respawning those peers is
//! always the supervisor's job; this role only mutates the tree and sends
//! signals, which keeps exactly one spawner per role.

use std::path::Path;

use anyhow::Context;
use nix::sys::signal::Signal;
use tracing::{error, info, warn};

use wavealert_core::config::{load_env_file, Config, RuntimePaths};
use wavealert_core::lock::{read_lock_holder, RoleLock};
use wavealert_core::roles::Role;
use wavealert_core::shutdown::send_signal;
use wavealert_core::update::{CommitInfo, GitWorkspace, RemoteRepo, UpdateState};

use crate::shutdown_flag::ShutdownFlag;

/// Peers signaled after a successful update, dashboard first.
const UPDATE_SIGNAL_TARGETS: [Role; 3] = [Role::Dashboard, Role::Resolver, Role::LedService];

/// Run the updater until a termination signal arrives.
///
/// # Errors
///
/// Fatal initialization failures only: lock contention or client
/// construction. Update failures are logged and retried on the next cycle.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let paths = config.paths();
    paths.ensure().context("create run directory")?;
    let _lock = RoleLock::acquire(paths.role_lock(Role::Updater))
        .context("another updater instance is running")?;

    let shutdown = ShutdownFlag::install().context("install signal handlers")?;

    let token = config
        .updater
        .token_file
        .as_deref()
        .and_then(|path| load_env_file(path).remove("GITHUB_TOKEN"))
        .filter(|t| !t.is_empty());
    if token.is_some() {
        info!("update token configured");
    } else {
        warn!("no update token configured, private repositories will be unreachable");
    }

    let remote = RemoteRepo::new(
        &config.updater.api_base,
        &config.updater.owner,
        &config.updater.repo,
        token,
    )
    .context("build remote client")?;
    let workspace = GitWorkspace::new(&config.paths.repo_dir);
    let state = UpdateState::new(paths.update_state());

    info!(
        repo = %format!("{}/{}", config.updater.owner, config.updater.repo),
        branch = %config.updater.branch,
        interval_secs = config.updater.check_interval.as_secs(),
        "updater starting"
    );

    startup_comparison(&remote, &workspace, &state, &config.updater.branch).await;

    loop {
        if shutdown
            .sleep_interruptible(config.updater.check_interval)
            .await
        {
            break;
        }

        check_cycle(&config, &paths, &remote, &workspace, &state).await;
    }

    info!("updater stopping");
    Ok(())
}

/// Log the local-vs-remote commit comparison once at startup.
async fn startup_comparison(
    remote: &RemoteRepo,
    workspace: &GitWorkspace,
    state: &UpdateState,
    branch: &str,
) {
    let local = match state.load() {
        Some(sha) => Some(sha),
        None => workspace.head_commit().await.ok(),
    };
    match &local {
        Some(sha) => info!(local = short(sha), "local commit"),
        None => info!("no local commit recorded, first update will deploy"),
    }

    match remote.latest_commit(branch).await {
        Ok(commit) => {
            info!(remote = short(&commit.sha), message = %commit.message, "remote commit");
            if local.as_deref() == Some(commit.sha.as_str()) {
                info!("commits match, system is up to date");
            } else {
                info!("commits differ, update will run on the next check");
            }
        }
        Err(err) => warn!(%err, "could not fetch remote commit at startup"),
    }
}

/// One update check.
async fn check_cycle(
    config: &Config,
    paths: &RuntimePaths,
    remote: &RemoteRepo,
    workspace: &GitWorkspace,
    state: &UpdateState,
) {
    if paths.emergency_stop_marker().exists() {
        warn!("emergency stop marker present, skipping update check");
        return;
    }

    let commit = match remote.latest_commit(&config.updater.branch).await {
        Ok(commit) => commit,
        Err(err) => {
            // Transient; the next cycle retries.
            warn!(%err, "update check failed");
            return;
        }
    };

    let deployed = state.load();
    if deployed.as_deref() == Some(commit.sha.as_str()) {
        info!(commit = short(&commit.sha), "no update needed");
        return;
    }

    info!(
        current = deployed.as_deref().map(short).unwrap_or("none"),
        latest = short(&commit.sha),
        message = %commit.message,
        "new update available"
    );

    if paths.manual_mode_marker().exists() {
        info!("manual mode marker present, update detected but not applied");
        return;
    }

    match apply_update(config, workspace, state, &commit).await {
        Ok(()) => {
            info!(commit = short(&commit.sha), "update complete, signaling peers");
            signal_peers(paths);
        }
        Err(err) => {
            error!(%err, "update failed, continuing with current version");
        }
    }
}

/// Apply one update: backup, fast-forward, record the new commit.
///
/// The deployed-commit record only advances after the tree mutation
/// succeeds; any failure leaves the old record so the next cycle retries.
///
/// # Errors
///
/// Returns the first fatal step failure. A failed backup is not fatal; the
/// archive exists for operators, not for automatic rollback.
pub async fn apply_update(
    config: &Config,
    workspace: &GitWorkspace,
    state: &UpdateState,
    commit: &CommitInfo,
) -> anyhow::Result<()> {
    match workspace.backup(&config.backup_dir()).await {
        Ok(archive) => info!(archive = %archive.display(), "backup created"),
        Err(err) => warn!(%err, "backup failed, continuing without one"),
    }

    workspace
        .fast_forward(&config.updater.branch)
        .await
        .context("fast-forward failed")?;

    // Stale dependencies are preferable to stale code, so a failed refresh
    // never blocks the update.
    run_post_update_command(config).await;

    state
        .store(&commit.sha)
        .context("failed to record deployed commit")?;
    Ok(())
}

/// Run the configured post-update command in the deployed tree.
async fn run_post_update_command(config: &Config) {
    let Some((program, args)) = config.updater.post_update_command.split_first() else {
        return;
    };

    let result = tokio::process::Command::new(program)
        .args(args)
        .current_dir(&config.paths.repo_dir)
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {
            info!(command = %program, "post-update command succeeded");
        }
        Ok(output) => {
            warn!(
                command = %program,
                code = output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "post-update command failed, continuing"
            );
        }
        Err(err) => warn!(command = %program, %err, "post-update command could not run"),
    }
}

/// SIGTERM the peers that must pick up the new code. The supervisor
/// respawns them.
fn signal_peers(paths: &RuntimePaths) {
    for role in UPDATE_SIGNAL_TARGETS {
        let pid_source = match role {
            Role::Dashboard => paths.dashboard_pid(),
            other => paths.role_lock(other),
        };
        signal_role(role, &pid_source);
    }
}

fn signal_role(role: Role, pid_source: &Path) {
    let Some(pid) = read_lock_holder(pid_source) else {
        info!(%role, "peer not running, nothing to signal");
        return;
    };
    match send_signal(pid, Signal::SIGTERM) {
        Ok(()) => info!(%role, pid, "signaled peer to restart"),
        Err(err) => warn!(%role, pid, %err, "failed to signal peer"),
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}
