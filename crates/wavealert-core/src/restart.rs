//! Restart policy.
//!
//! Bounds how often a role may be respawned: at most `max_restarts` within
//! the sliding window. Once the cap is hit the role is in cool-down and
//! further attempts are suppressed until the window advances past the oldest
//! attempt; the counters for each role are independent, so one crashing role
//! never starves the others.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Restart configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Maximum restarts within the window.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Sliding window restarts are counted over.
    #[serde(default = "default_restart_window")]
    #[serde(with = "humantime_serde")]
    pub restart_window: Duration,

    /// Backoff between consecutive respawns.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_max_restarts() -> u32 {
    5
}

const fn default_restart_window() -> Duration {
    Duration::from_secs(600)
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_window: default_restart_window(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay between restarts.
    Fixed {
        /// Delay duration.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffConfig {
    /// Delay for a given attempt number (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
            } => {
                let shift = attempt.saturating_sub(1).min(16);
                let delay = initial_delay.saturating_mul(1u32 << shift);
                delay.min(*max_delay)
            }
        }
    }
}

/// One recorded restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartEntry {
    /// When the restart happened.
    pub timestamp: DateTime<Utc>,

    /// Exit code of the previous run, when known.
    pub exit_code: Option<i32>,

    /// Backoff applied before the respawn.
    pub delay: Duration,
}

/// Tracks restart decisions for one role.
#[derive(Debug)]
pub struct RestartManager {
    config: RestartConfig,
    history: Vec<RestartEntry>,
    attempt: u32,
}

impl RestartManager {
    /// Create a manager.
    #[must_use]
    pub const fn new(config: RestartConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            attempt: 0,
        }
    }

    /// Whether a restart is allowed at `now`.
    ///
    /// Returns `false` while the role is in cool-down; the cool-down ends on
    /// its own when the window rolls past the oldest in-window attempt.
    #[must_use]
    pub fn should_restart(&self, now: DateTime<Utc>) -> bool {
        self.in_window_count(now) < self.config.max_restarts as usize
    }

    /// Record a restart at `now`, returning the backoff delay to apply
    /// before the respawn.
    pub fn record_restart(&mut self, now: DateTime<Utc>, exit_code: Option<i32>) -> Duration {
        self.attempt += 1;
        let delay = self.config.backoff.delay_for_attempt(self.attempt);
        self.history.push(RestartEntry {
            timestamp: now,
            exit_code,
            delay,
        });
        self.prune(now);
        delay
    }

    /// Record that the role ran long enough to be considered stable; resets
    /// the backoff ramp but leaves the window history intact.
    pub const fn record_stable(&mut self) {
        self.attempt = 0;
    }

    /// Restarts within the window ending at `now`.
    #[must_use]
    pub fn restart_count(&self, now: DateTime<Utc>) -> usize {
        self.in_window_count(now)
    }

    /// Whether the role is currently in cool-down.
    #[must_use]
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        !self.should_restart(now)
    }

    /// The configuration in force.
    #[must_use]
    pub const fn config(&self) -> &RestartConfig {
        &self.config
    }

    fn in_window_count(&self, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(self.config.restart_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let window_start = now - window;
        self.history
            .iter()
            .filter(|entry| entry.timestamp >= window_start)
            .count()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.config.restart_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let window_start = now - window;
        self.history.retain(|entry| entry.timestamp >= window_start);
    }
}


mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
