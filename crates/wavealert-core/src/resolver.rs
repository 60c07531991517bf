//! Alert resolution pipeline.
//!
//! Each poll produces exactly one [`ResolverDecision`], whatever happens
//! upstream. The stages are tried in order: cloud service, direct weather
//! fallback, last-known-good cache, fail-safe `SAFE`. Downstream consumers
//! (control channel, audio) always see a concrete decision and never an
//! error.

use std::time::Duration;

use chrono::Utc;

use crate::alert::{AlertLevel, DecisionSource, DeviceMode, ResolverDecision};
use crate::cache::LkgCache;
use crate::cloud::CloudClient;
use crate::identity::DeviceIdentity;
use crate::weather::{self, WeatherClient};

/// The deterministic demo sequence. Each step is dispatched like a live
/// decision of that level.
pub const DEMO_SEQUENCE: [AlertLevel; 3] =
    [AlertLevel::Safe, AlertLevel::Caution, AlertLevel::Danger];

/// Running failure counters, logged with each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Cloud calls that failed (transport, status, or decode).
    pub cloud_errors: u64,

    /// Fallback weather calls that failed.
    pub fallback_errors: u64,

    /// Wire levels that had to be normalized to `SAFE`.
    pub normalized_levels: u64,

    /// Decisions served from the cache.
    pub cache_hits: u64,

    /// Decisions that fell all the way through to fail-safe.
    pub failsafes: u64,
}

/// Resolves the current alert level with offline fallback.
#[derive(Debug)]
pub struct Resolver {
    cloud: CloudClient,
    weather: WeatherClient,
    cache: LkgCache,
    identity: DeviceIdentity,
    latitude: f64,
    longitude: f64,
    default_demo_pause: Duration,
    stats: ResolveStats,
}

impl Resolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        cloud: CloudClient,
        weather: WeatherClient,
        cache: LkgCache,
        identity: DeviceIdentity,
        latitude: f64,
        longitude: f64,
        default_demo_pause: Duration,
    ) -> Self {
        Self {
            cloud,
            weather,
            cache,
            identity,
            latitude,
            longitude,
            default_demo_pause,
            stats: ResolveStats::default(),
        }
    }

    /// Current failure counters.
    #[must_use]
    pub const fn stats(&self) -> ResolveStats {
        self.stats
    }

    /// Run one resolution.
    ///
    /// Never fails; every upstream error is absorbed into the fallback
    /// chain. Only successful cloud resolutions update the cache.
    pub async fn resolve(&mut self) -> ResolverDecision {
        match self.cloud.fetch_alert(&self.identity).await {
            Ok(response) => {
                let (level, normalized) = response.level();
                if normalized {
                    self.stats.normalized_levels += 1;
                    tracing::warn!(
                        raw = ?response.alert_level,
                        "unrecognized alert level normalized to SAFE"
                    );
                }
                let mode = response.mode();
                let decision = ResolverDecision {
                    level,
                    audio_url: response.audio_url.clone(),
                    source: match mode {
                        DeviceMode::Live => DecisionSource::Live,
                        DeviceMode::Test => DecisionSource::Test,
                        DeviceMode::Demo => DecisionSource::Demo,
                    },
                    device_mode: mode,
                    demo_pause: response
                        .demo_pause_seconds
                        .map(Duration::from_secs)
                        .or_else(|| {
                            matches!(mode, DeviceMode::Demo).then_some(self.default_demo_pause)
                        }),
                    obtained_at: Utc::now(),
                };
                if let Err(err) = self.cache.store(&decision) {
                    tracing::warn!(%err, "failed to persist last-known-good decision");
                }
                decision
            }
            Err(err) => {
                self.stats.cloud_errors += 1;
                tracing::warn!(%err, "cloud resolution failed, trying weather fallback");
                self.resolve_fallback().await
            }
        }
    }

    async fn resolve_fallback(&mut self) -> ResolverDecision {
        match self
            .weather
            .active_alerts(self.latitude, self.longitude)
            .await
        {
            Ok(features) => {
                let level = weather::classify(&features, Utc::now());
                tracing::info!(%level, features = features.len(), "resolved from weather fallback");
                ResolverDecision {
                    level,
                    audio_url: None,
                    source: DecisionSource::Live,
                    device_mode: DeviceMode::Live,
                    demo_pause: None,
                    obtained_at: Utc::now(),
                }
            }
            Err(err) => {
                self.stats.fallback_errors += 1;
                tracing::warn!(%err, "weather fallback failed, trying cache");
                self.resolve_cached()
            }
        }
    }

    fn resolve_cached(&mut self) -> ResolverDecision {
        if let Some(cached) = self.cache.load() {
            self.stats.cache_hits += 1;
            tracing::info!(level = %cached.level, "serving last-known-good decision");
            return ResolverDecision {
                source: DecisionSource::Cache,
                obtained_at: Utc::now(),
                ..cached
            };
        }

        // A stale cache no longer vouches for an alert level, but it still
        // pins the operating mode: a demo appliance keeps cycling offline.
        if let Some(stale) = self.cache.load_any() {
            if stale.is_demo() {
                self.stats.cache_hits += 1;
                tracing::info!("stale cache still holds demo mode, continuing the cycle");
                return ResolverDecision {
                    source: DecisionSource::Cache,
                    obtained_at: Utc::now(),
                    ..stale
                };
            }
        }

        self.stats.failsafes += 1;
        tracing::warn!("no authoritative signal available, emitting fail-safe SAFE");
        ResolverDecision::failsafe()
    }

    /// The pause to hold each demo step, from the decision or the configured
    /// default.
    #[must_use]
    pub fn demo_pause(&self, decision: &ResolverDecision) -> Duration {
        decision.demo_pause.unwrap_or(self.default_demo_pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve `responses` over HTTP/1.1, one per connection, then stop.
    fn serve(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let reason = if status == 200 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    fn resolver(cloud_base: &str, weather_base: &str, dir: &std::path::Path) -> Resolver {
        let timeout = Duration::from_secs(2);
        Resolver::new(
            CloudClient::new(cloud_base, "test-agent", timeout).unwrap(),
            WeatherClient::new(weather_base, "test-agent", timeout).unwrap(),
            LkgCache::new(dir.join("lkg.json"), Duration::from_secs(3600)),
            DeviceIdentity::from_value("aa:bb:cc:dd:ee:ff"),
            36.95,
            -122.02,
            Duration::from_secs(3),
        )
    }

    #[tokio::test]
    async fn cloud_success_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = serve(vec![(
            200,
            r#"{"alert_level":"DANGER","audio_url":"https://cdn.example.net/danger.mp3","device_mode":"LIVE"}"#.to_string(),
        )]);
        // Unreachable fallback; must not be consulted.
        let mut resolver = resolver(&cloud, "http://127.0.0.1:1", dir.path());

        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Danger);
        assert_eq!(decision.source, DecisionSource::Live);
        assert_eq!(resolver.stats().cloud_errors, 0);

        // The decision must now be on disk.
        let cache = LkgCache::new(dir.path().join("lkg.json"), Duration::from_secs(3600));
        assert_eq!(cache.load().unwrap().level, AlertLevel::Danger);
    }

    #[tokio::test]
    async fn cloud_failure_falls_back_to_weather() {
        let dir = tempfile::tempdir().unwrap();
        let weather = serve(vec![(
            200,
            r#"{"features":[{"properties":{"event":"Rip Current Statement"}}]}"#.to_string(),
        )]);
        let mut resolver = resolver("http://127.0.0.1:1", &weather, dir.path());

        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Caution);
        assert_eq!(resolver.stats().cloud_errors, 1);
        // Fallback decisions are not persisted.
        assert!(LkgCache::new(dir.path().join("lkg.json"), Duration::from_secs(3600))
            .load()
            .is_none());
    }

    #[tokio::test]
    async fn double_failure_serves_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LkgCache::new(dir.path().join("lkg.json"), Duration::from_secs(3600));
        cache
            .store(&ResolverDecision {
                level: AlertLevel::Caution,
                audio_url: None,
                source: DecisionSource::Live,
                device_mode: DeviceMode::Live,
                demo_pause: None,
                obtained_at: Utc::now(),
            })
            .unwrap();

        let mut resolver = resolver("http://127.0.0.1:1", "http://127.0.0.1:1", dir.path());
        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Caution);
        assert_eq!(decision.source, DecisionSource::Cache);
        assert_eq!(resolver.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn double_failure_without_cache_is_failsafe_green() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver("http://127.0.0.1:1", "http://127.0.0.1:1", dir.path());

        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Safe);
        assert_eq!(decision.source, DecisionSource::Failsafe);
        assert_eq!(resolver.stats().failsafes, 1);
    }

    #[tokio::test]
    async fn malformed_cloud_body_triggers_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = serve(vec![(200, "{definitely not json".to_string())]);
        let weather = serve(vec![(200, r#"{"features":[]}"#.to_string())]);
        let mut resolver = resolver(&cloud, &weather, dir.path());

        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Safe);
        assert_eq!(resolver.stats().cloud_errors, 1);
    }

    #[tokio::test]
    async fn server_error_status_triggers_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = serve(vec![(500, "{}".to_string())]);
        let weather = serve(vec![(200, r#"{"features":[]}"#.to_string())]);
        let mut resolver = resolver(&cloud, &weather, dir.path());

        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Safe);
        assert_ne!(decision.source, DecisionSource::Failsafe);
    }

    #[tokio::test]
    async fn demo_mode_survives_in_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = serve(vec![(
            200,
            r#"{"alert_level":"DEMO","device_mode":"DEMO","demo_pause_seconds":5}"#.to_string(),
        )]);
        let mut resolver = resolver(&cloud, "http://127.0.0.1:1", dir.path());

        let live = resolver.resolve().await;
        assert!(live.is_demo());
        assert_eq!(resolver.demo_pause(&live), Duration::from_secs(5));

        // Next cycle: network gone entirely. The cached decision still
        // carries the demo flag and pause.
        let offline = resolver.resolve().await;
        assert_eq!(offline.source, DecisionSource::Cache);
        assert!(offline.is_demo());
        assert_eq!(resolver.demo_pause(&offline), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stale_cache_keeps_demo_mode_but_not_alert_levels() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LkgCache::new(dir.path().join("lkg.json"), Duration::from_secs(60));

        // A demo-mode decision from two hours ago, well past the freshness
        // bound.
        cache
            .store(&ResolverDecision {
                level: AlertLevel::Demo,
                audio_url: None,
                source: DecisionSource::Demo,
                device_mode: DeviceMode::Demo,
                demo_pause: Some(Duration::from_secs(3)),
                obtained_at: Utc::now() - chrono::Duration::hours(2),
            })
            .unwrap();

        let mut resolver = resolver("http://127.0.0.1:1", "http://127.0.0.1:1", dir.path());
        let decision = resolver.resolve().await;
        assert!(decision.is_demo());
        assert_eq!(decision.source, DecisionSource::Cache);

        // The same staleness for a plain alert level falls through to
        // fail-safe instead.
        cache
            .store(&ResolverDecision {
                level: AlertLevel::Danger,
                audio_url: None,
                source: DecisionSource::Live,
                device_mode: DeviceMode::Live,
                demo_pause: None,
                obtained_at: Utc::now() - chrono::Duration::hours(2),
            })
            .unwrap();
        let decision = resolver.resolve().await;
        assert_eq!(decision.level, AlertLevel::Safe);
        assert_eq!(decision.source, DecisionSource::Failsafe);
    }

    #[test]
    fn demo_sequence_is_deterministic() {
        assert_eq!(
            DEMO_SEQUENCE,
            [AlertLevel::Safe, AlertLevel::Caution, AlertLevel::Danger]
        );
    }
}
