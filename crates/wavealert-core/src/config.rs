//! Runtime configuration.
//!
//! All tunables live in one immutable [`Config`] value built at startup from
//! defaults, an optional JSON settings document, and `WAVEALERT_*`
//! environment overrides. Components receive the value through their
//! constructors; nothing re-reads configuration while running, so a process
//! only observes new settings after a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::roles::Role;

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Monitored location.
    #[serde(default)]
    pub location: LocationConfig,

    /// Cloud alert service.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Upstream weather API used as fallback.
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Resolver poll behavior.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Source update behavior.
    #[serde(default)]
    pub updater: UpdaterConfig,

    /// Audio playback.
    #[serde(default)]
    pub audio: AudioConfig,

    /// LED service behavior.
    #[serde(default)]
    pub led: LedConfig,

    /// Supervision behavior.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Filesystem layout.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Geographic point the appliance watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Latitude in decimal degrees.
    pub latitude: f64,

    /// Longitude in decimal degrees.
    pub longitude: f64,

    /// Human-readable location name, used in logs.
    pub name: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 37.504,
            longitude: -122.467,
            name: "Cowell Ranch State Beach".to_string(),
        }
    }
}

/// Cloud alert service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Service base URL.
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent on every call.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: "https://wavealert360-device-service.azurewebsites.net".to_string(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Upstream weather API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// API base URL.
    pub base_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.weather.gov".to_string(),
        }
    }
}

/// Resolver poll behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Interval between polls.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum age of a cached decision before it stops being trusted.
    #[serde(default = "default_lkg_max_age", with = "humantime_serde")]
    pub lkg_max_age: Duration,

    /// Pause between demo scenario steps when the service does not supply one.
    #[serde(default = "default_demo_pause", with = "humantime_serde")]
    pub demo_pause: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            lkg_max_age: default_lkg_max_age(),
            demo_pause: default_demo_pause(),
        }
    }
}

/// Source update behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Repository owner.
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Branch the device tracks.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// REST API base for latest-commit lookups.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Interval between remote checks.
    #[serde(default = "default_update_interval", with = "humantime_serde")]
    pub check_interval: Duration,

    /// Env-file holding the access token (`GITHUB_TOKEN=...`).
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Command run in the deployed tree after a successful fast-forward
    /// (dependency refresh, asset rebuild). Failures are logged and never
    /// block the update.
    #[serde(default)]
    pub post_update_command: Vec<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            owner: "wavealert360".to_string(),
            repo: "wavealert360-device".to_string(),
            branch: default_branch(),
            api_base: default_api_base(),
            check_interval: default_update_interval(),
            token_file: None,
            post_update_command: Vec::new(),
        }
    }
}

/// Audio playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Player command and arguments; the file path is appended. Empty means
    /// no player is installed and playback is log-only.
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,

    /// Hard cap on a single playback.
    #[serde(default = "default_play_timeout", with = "humantime_serde")]
    pub play_timeout: Duration,

    /// Directory for downloaded audio files.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            player_command: default_player_command(),
            play_timeout: default_play_timeout(),
            cache_dir: None,
        }
    }
}

/// LED service behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    /// Pixels per strip.
    #[serde(default = "default_pixels")]
    pub pixels_per_strip: u16,

    /// Interval between control-file checks.
    #[serde(default = "default_led_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Blink iterations per pattern run.
    #[serde(default = "default_blink_iterations")]
    pub blink_iterations: u32,

    /// On/off step duration inside a blink cycle.
    #[serde(default = "default_blink_step", with = "humantime_serde")]
    pub blink_step: Duration,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            pixels_per_strip: default_pixels(),
            monitor_interval: default_led_interval(),
            blink_iterations: default_blink_iterations(),
            blink_step: default_blink_step(),
        }
    }
}

/// Supervision behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Interval between monitor ticks.
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Restart policy applied to every supervised role.
    #[serde(default)]
    pub restart: crate::restart::RestartConfig,

    /// Graceful shutdown policy for children.
    #[serde(default)]
    pub shutdown: crate::shutdown::ShutdownConfig,

    /// Dashboard command and arguments. Empty disables the dashboard role.
    #[serde(default)]
    pub dashboard_command: Vec<String>,

    /// How stale the LED status document may be before the LED service is
    /// considered wedged even though its process exists.
    #[serde(default = "default_status_max_age", with = "humantime_serde")]
    pub status_max_age: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: default_monitor_interval(),
            restart: crate::restart::RestartConfig::default(),
            shutdown: crate::shutdown::ShutdownConfig::default(),
            dashboard_command: Vec::new(),
            status_max_age: default_status_max_age(),
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for runtime state: control token, status documents, caches,
    /// locks, markers.
    pub run_dir: PathBuf,

    /// Deployed working tree the updater reconciles.
    pub repo_dir: PathBuf,

    /// Where tree backups are archived before an update.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("/var/run/wavealert360"),
            repo_dir: PathBuf::from("/opt/wavealert360"),
            backup_dir: None,
        }
    }
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    "WaveAlert360-Device".to_string()
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_lkg_max_age() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

const fn default_demo_pause() -> Duration {
    Duration::from_secs(3)
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

const fn default_update_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_player_command() -> Vec<String> {
    vec![
        "cvlc".to_string(),
        "--intf".to_string(),
        "dummy".to_string(),
        "--play-and-exit".to_string(),
    ]
}

const fn default_play_timeout() -> Duration {
    Duration::from_secs(120)
}

const fn default_pixels() -> u16 {
    48
}

const fn default_led_interval() -> Duration {
    Duration::from_secs(2)
}

const fn default_blink_iterations() -> u32 {
    10
}

const fn default_blink_step() -> Duration {
    Duration::from_millis(500)
}

const fn default_monitor_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_status_max_age() -> Duration {
    Duration::from_secs(180)
}

impl Config {
    /// Load configuration from a settings document, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for hosts without a settings
    /// document.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("WAVEALERT_CLOUD_BASE_URL") {
            self.cloud.base_url = value;
        }
        if let Ok(value) = std::env::var("WAVEALERT_WEATHER_BASE_URL") {
            self.weather.base_url = value;
        }
        if let Ok(value) = std::env::var("WAVEALERT_RUN_DIR") {
            self.paths.run_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("WAVEALERT_REPO_DIR") {
            self.paths.repo_dir = PathBuf::from(value);
        }
        if let Some(interval) = env_duration("WAVEALERT_POLL_INTERVAL") {
            self.resolver.poll_interval = interval;
        }
        if let Some(interval) = env_duration("WAVEALERT_UPDATE_INTERVAL") {
            self.updater.check_interval = interval;
        }
        if let Some(interval) = env_duration("WAVEALERT_MONITOR_INTERVAL") {
            self.supervisor.monitor_interval = interval;
        }
    }

    /// Well-known file locations derived from the run directory.
    #[must_use]
    pub fn paths(&self) -> RuntimePaths {
        RuntimePaths {
            run_dir: self.paths.run_dir.clone(),
        }
    }

    /// Audio cache directory, defaulting to a subdirectory of the run dir.
    #[must_use]
    pub fn audio_cache_dir(&self) -> PathBuf {
        self.audio
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.paths.run_dir.join("audio_cache"))
    }

    /// Backup directory, defaulting to a sibling of the deployed tree.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.paths
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.paths.repo_dir.join("backup"))
    }
}

/// Well-known runtime file locations.
///
/// Everything lives under the run directory so a single mount point carries
/// the appliance's mutable state.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    run_dir: PathBuf,
}

impl RuntimePaths {
    /// The run directory itself.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Single-line control token consumed by the LED service.
    #[must_use]
    pub fn control_token(&self) -> PathBuf {
        self.run_dir.join("led_control_signal")
    }

    /// LED service status document.
    #[must_use]
    pub fn led_status(&self) -> PathBuf {
        self.run_dir.join("led_service_status.json")
    }

    /// Last-known-good resolver decision.
    #[must_use]
    pub fn lkg_cache(&self) -> PathBuf {
        self.run_dir.join("lkg_cache.json")
    }

    /// Currently deployed commit hash.
    #[must_use]
    pub fn update_state(&self) -> PathBuf {
        self.run_dir.join("deployed_commit")
    }

    /// Advisory lock file for a role.
    #[must_use]
    pub fn role_lock(&self, role: Role) -> PathBuf {
        self.run_dir.join(format!(".{}.lock", role.name()))
    }

    /// PID of the dashboard child, recorded by the supervisor so the
    /// updater can signal it. The dashboard is an external process and
    /// does not maintain a role lock of its own.
    #[must_use]
    pub fn dashboard_pid(&self) -> PathBuf {
        self.run_dir.join(".dashboard.pid")
    }

    /// Presence disables the updater entirely.
    #[must_use]
    pub fn emergency_stop_marker(&self) -> PathBuf {
        self.run_dir.join("emergency_stop")
    }

    /// Presence disables automatic application of updates.
    #[must_use]
    pub fn manual_mode_marker(&self) -> PathBuf {
        self.run_dir.join("manual_mode")
    }

    /// Create the run directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.run_dir)
    }
}

/// Read a `KEY=VALUE` env-file and return its entries.
///
/// Lines starting with `#` and blank lines are skipped. Used for the update
/// token so credentials stay out of the settings document.
#[must_use]
pub fn load_env_file(path: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let Ok(raw) = std::fs::read_to_string(path) else {
        return vars;
    };
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            vars.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    vars
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match humantime::parse_duration(&raw) {
        Ok(duration) => Some(duration),
        Err(err) => {
            tracing::warn!(variable = name, %err, "ignoring unparseable duration override");
            None
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file could not be read.
    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Settings file is not valid JSON for the expected schema.
    #[error("invalid settings file {}: {source}", .path.display())]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.resolver.poll_interval, Duration::from_secs(30));
        assert_eq!(config.updater.check_interval, Duration::from_secs(120));
        assert_eq!(config.led.pixels_per_strip, 48);
        assert_eq!(config.supervisor.monitor_interval, Duration::from_secs(60));
    }

    #[test]
    fn settings_document_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "location": {"latitude": 36.95, "longitude": -122.02, "name": "Main Beach"},
                "resolver": {"poll_interval": "15s"},
                "paths": {"run_dir": "/tmp/wa-test", "repo_dir": "/tmp/wa-repo"}
            }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.location.name, "Main Beach");
        assert_eq!(config.resolver.poll_interval, Duration::from_secs(15));
        assert_eq!(config.paths.run_dir, PathBuf::from("/tmp/wa-test"));
        // Untouched sections keep their defaults.
        assert_eq!(config.updater.branch, "main");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"resolvr": {}}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn env_file_parsing_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.env");
        std::fs::write(
            &path,
            "# device credentials\nGITHUB_TOKEN=ghp_example123\n\nOTHER = spaced value\n",
        )
        .unwrap();

        let vars = load_env_file(&path);
        assert_eq!(vars.get("GITHUB_TOKEN").unwrap(), "ghp_example123");
        assert_eq!(vars.get("OTHER").unwrap(), "spaced value");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn runtime_paths_are_keyed_by_role() {
        let config = Config::default();
        let paths = config.paths();
        assert_ne!(
            paths.role_lock(Role::Resolver),
            paths.role_lock(Role::LedService)
        );
        assert!(paths
            .control_token()
            .starts_with(&config.paths.run_dir));
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
