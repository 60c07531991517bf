//! Upstream weather fallback.
//!
//! When the cloud service is unreachable the resolver calls the public
//! weather API directly with the device's coordinates and performs severity
//! analysis locally. The analysis can produce `DANGER` only from a matching
//! active upstream alert, never from an error path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::alert::AlertLevel;

/// Event keywords mapping to `DANGER`.
const DANGER_TRIGGERS: [&str; 4] = ["high surf warning", "tsunami", "hurricane", "storm surge"];

/// Event keywords mapping to `CAUTION`.
const CAUTION_TRIGGERS: [&str; 4] = [
    "beach hazards",
    "rip current",
    "high surf advisory",
    "coastal flood",
];

/// Client for the active-alerts endpoint.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    base_url: String,
    user_agent: String,
    http: reqwest::Client,
}

impl WeatherClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout.min(Duration::from_secs(5)))
            .timeout(request_timeout)
            .build()
            .map_err(WeatherError::Http)?;
        Ok(Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            http,
        })
    }

    /// Fetch active alert features for a point.
    ///
    /// # Errors
    ///
    /// Transport failures, non-2xx statuses, and undecodable bodies.
    pub async fn active_alerts(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<AlertFeature>, WeatherError> {
        let url = format!(
            "{}/alerts/active?point={latitude},{longitude}",
            self.base_url.trim_end_matches('/'),
        );

        let response = self
            .http
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(WeatherError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let collection: FeatureCollection =
            response.json().await.map_err(WeatherError::Http)?;
        Ok(collection.features)
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

/// One alert feature from the upstream API.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertFeature {
    /// Feature properties carrying the alert text and timing.
    #[serde(default)]
    pub properties: AlertProperties,
}

/// Properties of an alert feature.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertProperties {
    /// Event name, e.g. "High Surf Warning".
    #[serde(default)]
    pub event: Option<String>,

    /// Headline text.
    #[serde(default)]
    pub headline: Option<String>,

    /// When the hazard begins.
    #[serde(default)]
    pub onset: Option<String>,

    /// When the alert takes effect; used when onset is absent.
    #[serde(default)]
    pub effective: Option<String>,

    /// When the alert expires.
    #[serde(default)]
    pub expires: Option<String>,
}

/// Derive the alert level from active features.
///
/// Only features whose time window covers `now` count. Features with
/// unparseable or missing times are treated as active, leaning toward caution
/// rather than silence. Danger triggers win over caution triggers; no match
/// means `SAFE`.
#[must_use]
pub fn classify(features: &[AlertFeature], now: DateTime<Utc>) -> AlertLevel {
    let mut found_caution = false;

    for feature in features {
        let props = &feature.properties;
        if !is_active(props, now) {
            continue;
        }

        let text = match (&props.event, &props.headline) {
            (Some(event), _) => event.clone(),
            (None, Some(headline)) => headline.clone(),
            (None, None) => continue,
        };
        let text = text.to_ascii_lowercase();

        if DANGER_TRIGGERS.iter().any(|t| text.contains(t)) {
            return AlertLevel::Danger;
        }
        if CAUTION_TRIGGERS.iter().any(|t| text.contains(t)) {
            found_caution = true;
        }
    }

    if found_caution {
        AlertLevel::Caution
    } else {
        AlertLevel::Safe
    }
}

fn is_active(props: &AlertProperties, now: DateTime<Utc>) -> bool {
    let start = props.onset.as_deref().or(props.effective.as_deref());
    let (Some(start), Some(expires)) = (start, props.expires.as_deref()) else {
        return true;
    };
    match (parse_time(start), parse_time(expires)) {
        (Some(start), Some(end)) => start <= now && now <= end,
        // Unparseable timing counts as active.
        _ => true,
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Weather client errors.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    /// Transport-level failure, including timeouts.
    #[error("weather request failed: {0}")]
    Http(reqwest::Error),

    /// API returned a non-success status.
    #[error("weather API returned status {0}")]
    Status(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(event: &str, onset: Option<&str>, expires: Option<&str>) -> AlertFeature {
        AlertFeature {
            properties: AlertProperties {
                event: Some(event.to_string()),
                headline: None,
                onset: onset.map(String::from),
                effective: None,
                expires: expires.map(String::from),
            },
        }
    }

    #[test]
    fn no_features_is_safe() {
        assert_eq!(classify(&[], Utc::now()), AlertLevel::Safe);
    }

    #[test]
    fn danger_outranks_caution() {
        let features = vec![
            feature("Beach Hazards Statement", None, None),
            feature("High Surf Warning", None, None),
        ];
        assert_eq!(classify(&features, Utc::now()), AlertLevel::Danger);
    }

    #[test]
    fn rip_current_maps_to_caution() {
        let features = vec![feature("Rip Current Statement", None, None)];
        assert_eq!(classify(&features, Utc::now()), AlertLevel::Caution);
    }

    #[test]
    fn expired_alerts_do_not_count() {
        let features = vec![feature(
            "High Surf Warning",
            Some("2020-01-01T00:00:00Z"),
            Some("2020-01-02T00:00:00Z"),
        )];
        assert_eq!(classify(&features, Utc::now()), AlertLevel::Safe);
    }

    #[test]
    fn future_alerts_do_not_count() {
        let now = Utc::now();
        let onset = (now + chrono::Duration::hours(6)).to_rfc3339();
        let expires = (now + chrono::Duration::hours(12)).to_rfc3339();
        let features = vec![feature("High Surf Warning", Some(&onset), Some(&expires))];
        assert_eq!(classify(&features, now), AlertLevel::Safe);
    }

    #[test]
    fn unparseable_times_count_as_active() {
        let features = vec![feature(
            "Beach Hazards Statement",
            Some("not-a-time"),
            Some("also-not"),
        )];
        assert_eq!(classify(&features, Utc::now()), AlertLevel::Caution);
    }

    #[test]
    fn unrelated_events_are_safe() {
        let features = vec![feature("Red Flag Warning", None, None)];
        assert_eq!(classify(&features, Utc::now()), AlertLevel::Safe);
    }

    #[test]
    fn headline_is_used_when_event_is_missing() {
        let features = vec![AlertFeature {
            properties: AlertProperties {
                event: None,
                headline: Some("High Surf Advisory in effect until noon".to_string()),
                ..Default::default()
            },
        }];
        assert_eq!(classify(&features, Utc::now()), AlertLevel::Caution);
    }
}
