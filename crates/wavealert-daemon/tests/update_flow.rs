//! Update application against real git trees: fast-forward, state
//! recording, and failure retention.

use std::path::Path;
use std::process::Command;

use wavealert_core::config::Config;
use wavealert_core::update::{CommitInfo, GitWorkspace, UpdateState};

use wavealert_daemon::updater::apply_update;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Build an origin repository with one commit and clone it as the deployed
/// tree. Returns (origin, deployed, initial sha).
fn fixture(root: &Path) -> (std::path::PathBuf, std::path::PathBuf, String) {
    let origin = root.join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "--quiet", "-b", "main"]);
    git(&origin, &["config", "user.email", "dev@example.net"]);
    git(&origin, &["config", "user.name", "Dev"]);
    std::fs::write(origin.join("settings.json"), r#"{"version": 1}"#).unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "--quiet", "-m", "initial deploy"]);
    let initial = git_stdout(&origin, &["rev-parse", "HEAD"]);

    let deployed = root.join("deployed");
    let status = Command::new("git")
        .arg("clone")
        .arg("--quiet")
        .arg(&origin)
        .arg(&deployed)
        .status()
        .unwrap();
    assert!(status.success());

    (origin, deployed, initial)
}

fn config_for(deployed: &Path, run_dir: &Path) -> Config {
    let mut config = Config::default();
    config.paths.repo_dir = deployed.to_path_buf();
    config.paths.run_dir = run_dir.to_path_buf();
    config.updater.branch = "main".to_string();
    config
}

#[tokio::test]
async fn update_fast_forwards_and_records_the_commit() {
    let root = tempfile::tempdir().unwrap();
    let (origin, deployed, initial) = fixture(root.path());

    // A new commit lands upstream.
    std::fs::write(origin.join("settings.json"), r#"{"version": 2}"#).unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "--quiet", "-m", "bump settings"]);
    let latest = git_stdout(&origin, &["rev-parse", "HEAD"]);
    assert_ne!(initial, latest);

    let run_dir = root.path().join("run");
    std::fs::create_dir_all(&run_dir).unwrap();
    let config = config_for(&deployed, &run_dir);
    let workspace = GitWorkspace::new(&deployed);
    let state = UpdateState::new(config.paths().update_state());
    state.store(&initial).unwrap();

    let commit = CommitInfo {
        sha: latest.clone(),
        message: "bump settings".to_string(),
        date: None,
    };
    apply_update(&config, &workspace, &state, &commit).await.unwrap();

    // Tree and state both advanced.
    assert_eq!(git_stdout(&deployed, &["rev-parse", "HEAD"]), latest);
    assert_eq!(state.load().as_deref(), Some(latest.as_str()));
    let contents = std::fs::read_to_string(deployed.join("settings.json")).unwrap();
    assert!(contents.contains("\"version\": 2"));

    // The backup archive was produced.
    let backups: Vec<_> = std::fs::read_dir(config.backup_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].to_string_lossy().starts_with("backup_"));
}

#[tokio::test]
async fn failed_pull_retains_the_old_state() {
    let root = tempfile::tempdir().unwrap();
    let (origin, deployed, initial) = fixture(root.path());

    // Break the remote so the fetch fails.
    std::fs::remove_dir_all(&origin).unwrap();

    let run_dir = root.path().join("run");
    std::fs::create_dir_all(&run_dir).unwrap();
    let config = config_for(&deployed, &run_dir);
    let workspace = GitWorkspace::new(&deployed);
    let state = UpdateState::new(config.paths().update_state());
    state.store(&initial).unwrap();

    let commit = CommitInfo {
        sha: "feedfacefeedfacefeedfacefeedfacefeedface".to_string(),
        message: "unreachable".to_string(),
        date: None,
    };
    let result = apply_update(&config, &workspace, &state, &commit).await;

    assert!(result.is_err());
    // Old state retained; the next cycle retries.
    assert_eq!(state.load().as_deref(), Some(initial.as_str()));
    assert_eq!(git_stdout(&deployed, &["rev-parse", "HEAD"]), initial);
}

#[tokio::test]
async fn no_change_cycle_leaves_the_tree_and_state_untouched() {
    let root = tempfile::tempdir().unwrap();
    let (_origin, deployed, initial) = fixture(root.path());

    let run_dir = root.path().join("run");
    std::fs::create_dir_all(&run_dir).unwrap();
    let config = config_for(&deployed, &run_dir);
    let state = UpdateState::new(config.paths().update_state());
    state.store(&initial).unwrap();

    let before = std::fs::metadata(state.path()).unwrap().modified().unwrap();
    // The updater compares and skips; storing the same hash is the only
    // write that could happen, and it must be a no-op.
    state.store(&initial).unwrap();
    let after = std::fs::metadata(state.path()).unwrap().modified().unwrap();
    assert_eq!(before, after);
    assert_eq!(git_stdout(&deployed, &["rev-parse", "HEAD"]), initial);
}
