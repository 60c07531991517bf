//! LED service status document.
//!
//! Published by the LED service after every action; read by the dashboard,
//! the supervisor (freshness check), and tests. Consumers never write it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::ControlToken;

/// Status snapshot of the LED service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedServiceStatus {
    /// PID of the publishing process.
    pub pid: u32,

    /// Whether real hardware is attached and responding.
    pub hardware_available: bool,

    /// The level currently displayed, as the wire token, or `null` before
    /// the first token arrives.
    pub current_level: Option<String>,

    /// When this snapshot was written.
    pub last_updated: DateTime<Utc>,
}

impl LedServiceStatus {
    /// Build a snapshot for the current process, stamped now.
    #[must_use]
    pub fn now(hardware_available: bool, current: Option<ControlToken>) -> Self {
        Self {
            pid: std::process::id(),
            hardware_available,
            current_level: current.map(|t| t.as_wire().to_string()),
            last_updated: Utc::now(),
        }
    }
}

/// Reader/writer for the status document.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a handle over the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The status file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the document atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn publish(&self, status: &LedServiceStatus) -> Result<(), StatusError> {
        let dir = self.path.parent().ok_or_else(|| {
            StatusError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "status path has no parent",
            ))
        })?;
        let json = serde_json::to_vec_pretty(status)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path)
            .map_err(|err| StatusError::Io(err.error))?;
        Ok(())
    }

    /// Read the current document. `None` when absent or unreadable.
    #[must_use]
    pub fn read(&self) -> Option<LedServiceStatus> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "corrupt status document");
                None
            }
        }
    }

    /// Whether the document exists and was written within `max_age`.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let Some(status) = self.read() else {
            return false;
        };
        let age = Utc::now().signed_duration_since(status.last_updated);
        let bound =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        age <= bound
    }

    /// Remove the document. Missing files are fine.
    pub fn remove(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), %err, "failed to remove status document");
            }
        }
    }
}

/// Status document errors.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Filesystem failure.
    #[error("status I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("status encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = StatusFile::new(dir.path().join("status.json"));

        assert!(file.read().is_none());

        let status = LedServiceStatus::now(true, Some(ControlToken::Green));
        file.publish(&status).unwrap();

        let read = file.read().unwrap();
        assert_eq!(read, status);
        assert_eq!(read.current_level.as_deref(), Some("PATTERN:GREEN"));
    }

    #[test]
    fn freshness_follows_the_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let file = StatusFile::new(dir.path().join("status.json"));

        let mut status = LedServiceStatus::now(false, None);
        file.publish(&status).unwrap();
        assert!(file.is_fresh(Duration::from_secs(60)));

        status.last_updated = Utc::now() - chrono::Duration::minutes(10);
        file.publish(&status).unwrap();
        assert!(!file.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn missing_or_corrupt_documents_are_never_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let file = StatusFile::new(dir.path().join("status.json"));
        assert!(!file.is_fresh(Duration::from_secs(60)));

        std::fs::write(file.path(), "<html>").unwrap();
        assert!(!file.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = StatusFile::new(dir.path().join("status.json"));
        file.remove();
        file.publish(&LedServiceStatus::now(true, None)).unwrap();
        file.remove();
        assert!(file.read().is_none());
    }
}
