//! Cloud alert service client.
//!
//! The cloud endpoint is the authoritative source for the device's alert
//! level. The response is decoded leniently: unknown fields are ignored and a
//! missing level means `SAFE`, so a newer service never breaks an older
//! device.

use std::time::Duration;

use serde::Deserialize;

use crate::alert::{AlertLevel, DeviceMode};
use crate::identity::DeviceIdentity;

/// How much of an undecodable body is kept for the log line.
const BODY_SNIPPET_LEN: usize = 256;

/// Client for the device alert endpoint.
#[derive(Debug, Clone)]
pub struct CloudClient {
    base_url: String,
    user_agent: String,
    http: reqwest::Client,
}

impl CloudClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout.min(Duration::from_secs(5)))
            .timeout(request_timeout)
            .build()
            .map_err(CloudError::Http)?;
        Ok(Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            http,
        })
    }

    /// Fetch the current alert for a device.
    ///
    /// # Errors
    ///
    /// Transport failures, non-2xx statuses, and undecodable bodies are all
    /// reported as typed errors so the resolver can count them and fall back.
    pub async fn fetch_alert(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<AlertResponse, CloudError> {
        let url = format!(
            "{}/api/alert/{}",
            self.base_url.trim_end_matches('/'),
            identity
        );

        let response = self
            .http
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(CloudError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(CloudError::Http)?;
        serde_json::from_str(&body).map_err(|err| CloudError::Decode {
            source: err,
            body: truncate(&body),
        })
    }
}

/// Alert endpoint response.
///
/// Every field is optional on the wire; decoding never fails on a missing
/// field, only on malformed JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertResponse {
    /// Alert level string; absent means `SAFE`.
    #[serde(default)]
    pub alert_level: Option<String>,

    /// Advisory LED color derived from the level. Informational only; the
    /// device derives color from the normalized level itself.
    #[serde(default)]
    pub led_color: Option<String>,

    /// Audio file for this level.
    #[serde(default)]
    pub audio_url: Option<String>,

    /// Operating mode of the device record.
    #[serde(default)]
    pub device_mode: Option<String>,

    /// Pause between demo steps, seconds. Only meaningful in demo mode.
    #[serde(default)]
    pub demo_pause_seconds: Option<u64>,

    /// Service-side timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl AlertResponse {
    /// Normalize the wire level. Returns the level and whether normalization
    /// replaced an unrecognized value.
    #[must_use]
    pub fn level(&self) -> (AlertLevel, bool) {
        match &self.alert_level {
            Some(raw) => AlertLevel::from_wire(raw),
            None => (AlertLevel::Safe, false),
        }
    }

    /// Normalize the operating mode.
    #[must_use]
    pub fn mode(&self) -> DeviceMode {
        self.device_mode
            .as_deref()
            .map_or(DeviceMode::Live, DeviceMode::from_wire)
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LEN {
        body.to_string()
    } else {
        let mut end = BODY_SNIPPET_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

/// Cloud client errors.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// Transport-level failure, including timeouts.
    #[error("cloud request failed: {0}")]
    Http(reqwest::Error),

    /// Service returned a non-success status.
    #[error("cloud service returned status {0}")]
    Status(u16),

    /// Body did not decode as the expected JSON.
    #[error("cloud response did not decode: {source} (body: {body:?})")]
    Decode {
        /// Decode failure.
        source: serde_json::Error,
        /// Truncated response body for diagnosis.
        body: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_level_means_safe() {
        let response: AlertResponse = serde_json::from_str(r#"{"device_mode": "LIVE"}"#).unwrap();
        assert_eq!(response.level(), (AlertLevel::Safe, false));
        assert_eq!(response.mode(), DeviceMode::Live);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let response: AlertResponse = serde_json::from_str(
            r#"{
                "alert_level": "DANGER",
                "led_color": "RED",
                "audio_url": "https://cdn.example.net/danger.mp3",
                "device_mode": "TEST",
                "timestamp": "2025-06-01T12:00:00Z",
                "firmware_hint": {"nested": true}
            }"#,
        )
        .unwrap();
        assert_eq!(response.level(), (AlertLevel::Danger, false));
        assert_eq!(response.mode(), DeviceMode::Test);
        assert_eq!(
            response.audio_url.as_deref(),
            Some("https://cdn.example.net/danger.mp3")
        );
    }

    #[test]
    fn unrecognized_level_normalizes_and_reports() {
        let response: AlertResponse =
            serde_json::from_str(r#"{"alert_level": "APOCALYPTIC"}"#).unwrap();
        assert_eq!(response.level(), (AlertLevel::Safe, true));
    }

    #[test]
    fn body_snippet_is_bounded() {
        let long = "x".repeat(1000);
        let snippet = truncate(&long);
        assert!(snippet.len() <= BODY_SNIPPET_LEN + 3);
        assert!(snippet.ends_with("..."));
    }
}
