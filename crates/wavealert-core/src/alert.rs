//! Alert model.
//!
//! Canonical alert levels, device operating modes, and the resolver decision
//! record that every poll cycle produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical alert severity driving LED color and audio choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    /// No hazardous conditions.
    Safe,

    /// Elevated beach hazards.
    Caution,

    /// Dangerous coastal conditions.
    Danger,

    /// Scripted demonstration cycle.
    Demo,
}

impl AlertLevel {
    /// Normalize a wire-format level string.
    ///
    /// Matching is case-insensitive. Returns the level and whether the input
    /// had to be normalized to the fail-safe default because it was not a
    /// recognized value.
    #[must_use]
    pub fn from_wire(value: &str) -> (Self, bool) {
        match value.trim().to_ascii_uppercase().as_str() {
            "SAFE" => (Self::Safe, false),
            "CAUTION" => (Self::Caution, false),
            "DANGER" => (Self::Danger, false),
            "DEMO" => (Self::Demo, false),
            _ => (Self::Safe, true),
        }
    }

    /// The LED color this level maps to.
    ///
    /// `Demo` has no color of its own; the demo cycle dispatches the three
    /// concrete levels in sequence.
    #[must_use]
    pub const fn color(self) -> LedColor {
        match self {
            Self::Safe | Self::Demo => LedColor::Green,
            Self::Caution => LedColor::Yellow,
            Self::Danger => LedColor::Red,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Caution => write!(f, "CAUTION"),
            Self::Danger => write!(f, "DANGER"),
            Self::Demo => write!(f, "DEMO"),
        }
    }
}

/// LED bank colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedColor {
    /// Safe conditions.
    Green,
    /// Moderate caution.
    Yellow,
    /// High danger.
    Red,
}

impl std::fmt::Display for LedColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "GREEN"),
            Self::Yellow => write!(f, "YELLOW"),
            Self::Red => write!(f, "RED"),
        }
    }
}

/// Device operating mode as reported by the cloud service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceMode {
    /// Normal operation against live upstream data.
    #[default]
    Live,

    /// Operator-pinned test scenario.
    Test,

    /// Scripted cycling demonstration.
    Demo,
}

impl DeviceMode {
    /// Normalize a wire-format mode string; unknown values mean `Live`.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TEST" => Self::Test,
            "DEMO" => Self::Demo,
            _ => Self::Live,
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Test => write!(f, "TEST"),
            Self::Demo => write!(f, "DEMO"),
        }
    }
}

/// Provenance of a resolver decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    /// Cloud service, live upstream data.
    Live,

    /// Cloud service, pinned test scenario.
    Test,

    /// Cloud service, demo mode.
    Demo,

    /// Last-known-good cache after the cloud was unreachable.
    Cache,

    /// No authoritative signal available anywhere.
    Failsafe,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Test => write!(f, "TEST"),
            Self::Demo => write!(f, "DEMO"),
            Self::Cache => write!(f, "CACHE"),
            Self::Failsafe => write!(f, "FAILSAFE"),
        }
    }
}

/// The structured outcome of one resolver poll.
///
/// This record is also the last-known-good cache payload, so the operating
/// mode and demo pause survive offline restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverDecision {
    /// Resolved alert level.
    pub level: AlertLevel,

    /// Audio file to play for this level, if the service supplied one.
    #[serde(default)]
    pub audio_url: Option<String>,

    /// Where the decision came from.
    pub source: DecisionSource,

    /// Operating mode in effect when the decision was made.
    #[serde(default)]
    pub device_mode: DeviceMode,

    /// Pause between demo scenario steps, when the device is in demo mode.
    #[serde(default, with = "opt_duration_secs")]
    pub demo_pause: Option<Duration>,

    /// When the decision was obtained.
    pub obtained_at: DateTime<Utc>,
}

impl ResolverDecision {
    /// A fail-safe decision: `SAFE`, no audio, stamped now.
    #[must_use]
    pub fn failsafe() -> Self {
        Self {
            level: AlertLevel::Safe,
            audio_url: None,
            source: DecisionSource::Failsafe,
            device_mode: DeviceMode::Live,
            demo_pause: None,
            obtained_at: Utc::now(),
        }
    }

    /// Whether the demo cycle should run for this decision.
    #[must_use]
    pub const fn is_demo(&self) -> bool {
        matches!(self.device_mode, DeviceMode::Demo) || matches!(self.level, AlertLevel::Demo)
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
