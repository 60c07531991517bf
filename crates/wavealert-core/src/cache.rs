//! Last-known-good decision cache.
//!
//! Written only after a successful cloud resolution, read back on startup and
//! whenever the cloud is unreachable. Absent, corrupt, or stale entries all
//! collapse to "no cache" so the caller falls through to the fail-safe path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::alert::ResolverDecision;

/// On-disk cache of the last successful [`ResolverDecision`].
#[derive(Debug, Clone)]
pub struct LkgCache {
    path: PathBuf,
    max_age: Duration,
}

impl LkgCache {
    /// Create a cache over the given path with a freshness bound.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    /// The cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a decision atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails; the previous cache contents are
    /// left intact in that case.
    pub fn store(&self, decision: &ResolverDecision) -> Result<(), CacheError> {
        let dir = self.path.parent().ok_or_else(|| {
            CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cache path has no parent",
            ))
        })?;
        let json = serde_json::to_vec_pretty(decision)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path).map_err(|err| CacheError::Io(err.error))?;
        Ok(())
    }

    /// Load the cached decision if it is present, intact, and fresh.
    ///
    /// Corrupt cache contents are logged and treated as absent.
    #[must_use]
    pub fn load(&self) -> Option<ResolverDecision> {
        let decision = self.load_any()?;
        let age = Utc::now().signed_duration_since(decision.obtained_at);
        let bound = chrono::Duration::from_std(self.max_age).unwrap_or_else(|_| chrono::Duration::zero());
        if age > bound {
            tracing::info!(age_secs = age.num_seconds(), "cached decision is stale, ignoring");
            return None;
        }
        Some(decision)
    }

    /// Load the cached decision regardless of age.
    ///
    /// Used for configuration that survives in the cache, such as the demo
    /// mode flag, where staleness does not matter.
    #[must_use]
    pub fn load_any(&self) -> Option<ResolverDecision> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "failed to read cache");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(decision) => Some(decision),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "corrupt cache, ignoring");
                None
            }
        }
    }
}

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("cache encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
