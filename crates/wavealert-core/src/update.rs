//! Source update machinery.
//!
//! The updater reconciles the deployed working tree with a remote branch.
//! Three pieces live here: the persisted record of the deployed commit, a
//! REST client for latest-commit lookups, and a wrapper over the platform
//! `git` tool for backups and fast-forwards. The deployed-commit record is
//! only advanced after the tree mutation succeeds, so a failed pull leaves
//! the next cycle to retry.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

/// Persisted hash of the currently deployed commit.
#[derive(Debug, Clone)]
pub struct UpdateState {
    path: PathBuf,
}

impl UpdateState {
    /// Create a handle over the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the deployed commit hash. `None` before the first update.
    #[must_use]
    pub fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let sha = raw.trim();
        if sha.is_empty() {
            None
        } else {
            Some(sha.to_string())
        }
    }

    /// Persist a new deployed commit hash atomically.
    ///
    /// Writing the hash already on disk is a no-op, so an update cycle that
    /// detects no change leaves the file untouched.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn store(&self, sha: &str) -> Result<(), UpdateError> {
        if self.load().as_deref() == Some(sha) {
            return Ok(());
        }
        let dir = self.path.parent().ok_or_else(|| {
            UpdateError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "update state path has no parent",
            ))
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{sha}")?;
        tmp.persist(&self.path)
            .map_err(|err| UpdateError::Io(err.error))?;
        Ok(())
    }
}

/// Latest commit on the tracked branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full commit hash.
    pub sha: String,

    /// First line of the commit message.
    pub message: String,

    /// Committer date, as reported by the remote.
    pub date: Option<String>,
}

/// REST client for latest-commit lookups.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    api_base: String,
    owner: String,
    repo: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl RemoteRepo {
    /// Create a client. `token` enables access to private repositories.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, UpdateError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(UpdateError::Http)?;
        Ok(Self {
            api_base: api_base.into(),
            owner: owner.into(),
            repo: repo.into(),
            token,
            http,
        })
    }

    /// Fetch the latest commit on a branch.
    ///
    /// # Errors
    ///
    /// Transport failures, non-2xx statuses, and undecodable bodies.
    pub async fn latest_commit(&self, branch: &str) -> Result<CommitInfo, UpdateError> {
        let url = format!(
            "{}/repos/{}/{}/commits/{branch}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        );

        let mut request = self
            .http
            .get(&url)
            .header("User-Agent", "WaveAlert360-Updater")
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(UpdateError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Status(status.as_u16()));
        }

        let payload: RemoteCommit = response.json().await.map_err(UpdateError::Http)?;
        Ok(CommitInfo {
            sha: payload.sha,
            message: payload
                .commit
                .message
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
            date: payload.commit.committer.and_then(|c| c.date),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RemoteCommit {
    sha: String,
    commit: RemoteCommitDetail,
}

#[derive(Debug, Deserialize)]
struct RemoteCommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    committer: Option<RemoteCommitter>,
}

#[derive(Debug, Deserialize)]
struct RemoteCommitter {
    #[serde(default)]
    date: Option<String>,
}

/// Wrapper over the platform `git` tool for one working tree.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    dir: PathBuf,
}

impl GitWorkspace {
    /// Create a wrapper over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The working tree directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive the current tree into a timestamped tar under `backup_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the archive cannot be produced. Callers treat
    /// this as best-effort; the backup exists for operators, not for
    /// automatic rollback.
    pub async fn backup(&self, backup_dir: &Path) -> Result<PathBuf, UpdateError> {
        std::fs::create_dir_all(backup_dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive = backup_dir.join(format!("backup_{stamp}.tar"));

        let output_arg = format!("--output={}", archive.display());
        self.run_git(&["archive", "--format=tar", &output_arg, "HEAD"])
            .await?;
        Ok(archive)
    }

    /// Bring the tree to the tip of `origin/<branch>`.
    ///
    /// The reset is a single tool invocation, so consumers observe either
    /// the old tree or the new one.
    ///
    /// # Errors
    ///
    /// Returns an error when any git step fails; the tree is then left for
    /// the next cycle to retry.
    pub async fn fast_forward(&self, branch: &str) -> Result<(), UpdateError> {
        self.run_git(&["fetch", "origin", branch]).await?;
        self.run_git(&["reset", "--hard", &format!("origin/{branch}")])
            .await?;
        self.run_git(&["clean", "-fd"]).await?;
        Ok(())
    }

    /// The commit hash at HEAD.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory is not a git tree.
    pub async fn head_commit(&self) -> Result<String, UpdateError> {
        let out = self.run_git(&["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, UpdateError> {
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(UpdateError::Git {
                args: args.iter().map(ToString::to_string).collect(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Update errors.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Filesystem failure.
    #[error("update I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote lookup transport failure.
    #[error("remote lookup failed: {0}")]
    Http(reqwest::Error),

    /// Remote lookup returned a non-success status.
    #[error("remote lookup returned status {0}")]
    Status(u16),

    /// A git invocation failed.
    #[error("git {args:?} failed: {stderr}")]
    Git {
        /// Arguments passed to git.
        args: Vec<String>,
        /// Captured stderr.
        stderr: String,
    },
}
