//! Audio playback and retrieval.
//!
//! Playback goes through the [`AudioSink`] capability so the rest of the
//! system never knows which player binary is installed, or whether one is
//! installed at all. Audio files are fetched by URL into a small local cache
//! and re-downloaded only when the remote copy changes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Plays an audio file synchronously with a bounded timeout.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play the file at `path`, blocking the caller's cycle until playback
    /// finishes or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing file, a player failure, or a timeout.
    async fn play(&self, path: &Path) -> Result<(), AudioError>;
}

/// Sink backed by an external player command.
#[derive(Debug, Clone)]
pub struct PlayerCommand {
    command: Vec<String>,
    timeout: Duration,
}

impl PlayerCommand {
    /// Create a sink from a command vector; the file path is appended as the
    /// final argument.
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl AudioSink for PlayerCommand {
    async fn play(&self, path: &Path) -> Result<(), AudioError> {
        if !path.exists() {
            return Err(AudioError::FileMissing(path.to_path_buf()));
        }
        let Some((program, args)) = self.command.split_first() else {
            return Err(AudioError::NoPlayer);
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| AudioError::Spawn(program.clone(), err))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(AudioError::PlayerExit(status.code())),
            Ok(Err(err)) => Err(AudioError::Spawn(program.clone(), err)),
            Err(_) => {
                let _ = child.kill().await;
                Err(AudioError::Timeout(self.timeout))
            }
        }
    }
}

/// Sink that only logs. Used when no player is configured, and for headless
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, path: &Path) -> Result<(), AudioError> {
        tracing::info!(path = %path.display(), "audio playback skipped (no player configured)");
        Ok(())
    }
}

/// Build the sink appropriate for the configured player command.
#[must_use]
pub fn sink_for(command: &[String], timeout: Duration) -> Box<dyn AudioSink> {
    if command.is_empty() {
        Box::new(NullSink)
    } else {
        Box::new(PlayerCommand::new(command.to_vec(), timeout))
    }
}

/// URL-keyed audio file cache.
///
/// Files are stored under a digest of their URL. A sidecar file records the
/// ETag of the cached copy; when the server supplies validators a conditional
/// GET avoids re-downloading, otherwise URL equality is the cache key.
#[derive(Debug)]
pub struct AudioCache {
    dir: PathBuf,
    http: reqwest::Client,
}

impl AudioCache {
    /// Create a cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the HTTP
    /// client cannot be built.
    pub fn new(dir: impl Into<PathBuf>, request_timeout: Duration) -> Result<Self, AudioError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| AudioError::Cache(dir.clone(), err))?;
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout.min(Duration::from_secs(5)))
            .timeout(request_timeout)
            .build()
            .map_err(AudioError::Http)?;
        Ok(Self { dir, http })
    }

    /// Local path a URL caches to.
    #[must_use]
    pub fn path_for(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let mut name = String::with_capacity(20);
        for byte in digest.iter().take(10) {
            name.push_str(&format!("{byte:02x}"));
        }
        self.dir.join(format!("{name}.mp3"))
    }

    /// Fetch a URL into the cache, returning the local file path.
    ///
    /// A cached copy is reused when the remote copy is unchanged. When the
    /// download fails but a cached copy exists, the stale copy is returned so
    /// the device keeps a voice offline.
    ///
    /// # Errors
    ///
    /// Returns an error only when the download fails and no cached copy
    /// exists.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, AudioError> {
        let path = self.path_for(url);
        let etag_path = path.with_extension("etag");
        let cached = path.exists();

        let mut request = self.http.get(url);
        if cached {
            if let Ok(etag) = std::fs::read_to_string(&etag_path) {
                request = request.header("If-None-Match", etag.trim());
            } else {
                // No validator on disk; URL equality is the cache key.
                return Ok(path);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if cached => {
                tracing::warn!(%err, url, "audio refresh failed, using cached copy");
                return Ok(path);
            }
            Err(err) => return Err(AudioError::Http(err)),
        };

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(path);
        }
        if !response.status().is_success() {
            if cached {
                tracing::warn!(status = %response.status(), url, "audio refresh failed, using cached copy");
                return Ok(path);
            }
            return Err(AudioError::Status(response.status().as_u16()));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response.bytes().await.map_err(AudioError::Http)?;

        std::fs::write(&path, &body).map_err(|err| AudioError::Cache(path.clone(), err))?;
        match etag {
            Some(etag) => {
                let _ = std::fs::write(&etag_path, etag);
            }
            None => {
                let _ = std::fs::remove_file(&etag_path);
            }
        }
        tracing::debug!(url, path = %path.display(), bytes = body.len(), "audio cached");
        Ok(path)
    }
}

/// Audio errors.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// Audio file does not exist.
    #[error("audio file missing: {}", .0.display())]
    FileMissing(PathBuf),

    /// No player command configured.
    #[error("no audio player configured")]
    NoPlayer,

    /// Player could not be spawned.
    #[error("failed to run audio player {0:?}: {1}")]
    Spawn(String, std::io::Error),

    /// Player exited with a failure.
    #[error("audio player exited with code {0:?}")]
    PlayerExit(Option<i32>),

    /// Playback exceeded the configured timeout.
    #[error("audio playback timed out after {0:?}")]
    Timeout(Duration),

    /// Cache directory or file failure.
    #[error("audio cache path {}: {}", .0.display(), .1)]
    Cache(PathBuf, std::io::Error),

    /// Download failure.
    #[error("audio download failed: {0}")]
    Http(reqwest::Error),

    /// Download returned a non-success status.
    #[error("audio download returned status {0}")]
    Status(u16),
}
