//! File-backed LED control channel.
//!
//! The resolver expresses intent by writing a single-line token to a
//! well-known path; the LED service is the only component that acts on it.
//! The token is a latest-wins signal, not a queue. Writes go through a
//! temp-file-and-rename so readers observe either the old or the new value,
//! never a torn one.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::alert::LedColor;

/// A control token understood by the LED service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    /// Blink the red strip.
    Red,
    /// Blink the yellow strip.
    Yellow,
    /// Blink the green strip.
    Green,
    /// All strips off.
    Off,
}

impl ControlToken {
    /// The wire form written to the control file.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Red => "PATTERN:RED",
            Self::Yellow => "PATTERN:YELLOW",
            Self::Green => "PATTERN:GREEN",
            Self::Off => "OFF",
        }
    }

    /// Parse a wire-form token.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidToken`] for anything outside the
    /// four-value token set.
    pub fn parse(value: &str) -> Result<Self, ControlError> {
        match value.trim() {
            "PATTERN:RED" => Ok(Self::Red),
            "PATTERN:YELLOW" => Ok(Self::Yellow),
            "PATTERN:GREEN" => Ok(Self::Green),
            "OFF" => Ok(Self::Off),
            other => Err(ControlError::InvalidToken(other.to_string())),
        }
    }

    /// The token for an LED color.
    #[must_use]
    pub const fn for_color(color: LedColor) -> Self {
        match color {
            LedColor::Red => Self::Red,
            LedColor::Yellow => Self::Yellow,
            LedColor::Green => Self::Green,
        }
    }
}

impl std::fmt::Display for ControlToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Writer/reader for the control token file.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    path: PathBuf,
}

impl ControlChannel {
    /// Create a channel over the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The control file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish a token atomically.
    ///
    /// Falls back to a plain in-place write when the atomic rename cannot be
    /// performed, so a degraded filesystem still gets a best-effort signal.
    ///
    /// # Errors
    ///
    /// Returns an error only when both the atomic and the fallback write
    /// fail.
    pub fn publish(&self, token: ControlToken) -> Result<(), ControlError> {
        match self.write_atomic(token) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "atomic token write failed, falling back to in-place write");
                std::fs::write(&self.path, format!("{}\n", token.as_wire()))
                    .map_err(|source| ControlError::Io {
                        path: self.path.clone(),
                        source,
                    })
            }
        }
    }

    fn write_atomic(&self, token: ControlToken) -> Result<(), ControlError> {
        let dir = self.path.parent().ok_or_else(|| ControlError::Io {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| ControlError::Io {
            path: self.path.clone(),
            source,
        })?;
        writeln!(tmp, "{}", token.as_wire()).map_err(|source| ControlError::Io {
            path: self.path.clone(),
            source,
        })?;
        tmp.persist(&self.path).map_err(|err| ControlError::Io {
            path: self.path.clone(),
            source: err.error,
        })?;
        Ok(())
    }

    /// Read the current token.
    ///
    /// `Ok(None)` means no token has been published yet.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidToken`] when the file holds a value
    /// outside the token set, and an I/O error for unreadable files.
    pub fn read(&self) -> Result<Option<ControlToken>, ControlError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => ControlToken::parse(&raw).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ControlError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Control channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Value outside the token set.
    #[error("invalid control token: {0:?}")]
    InvalidToken(String),

    /// Filesystem failure on the control file.
    #[error("control file {}: {source}", .path.display())]
    Io {
        /// Control file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
