//! Resolver role.
//!
//! Drives the appliance's visible behavior. Each cycle obtains one decision
//! from the resolution pipeline, writes the control token, then plays the
//! matching audio. The token is always written before audio begins, and
//! cycles never overlap: a long cycle delays the next one.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use wavealert_core::alert::{AlertLevel, ResolverDecision};
use wavealert_core::audio::{self, AudioCache, AudioSink};
use wavealert_core::cache::LkgCache;
use wavealert_core::cloud::CloudClient;
use wavealert_core::config::Config;
use wavealert_core::control::{ControlChannel, ControlToken};
use wavealert_core::identity::DeviceIdentity;
use wavealert_core::lock::RoleLock;
use wavealert_core::resolver::{Resolver, DEMO_SEQUENCE};
use wavealert_core::roles::Role;
use wavealert_core::weather::WeatherClient;

use crate::shutdown_flag::ShutdownFlag;

/// Run the resolver until a termination signal arrives.
///
/// # Errors
///
/// Fatal initialization failures only: lock contention or client
/// construction. Steady-state failures are absorbed by the pipeline.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let paths = config.paths();
    paths.ensure().context("create run directory")?;
    let _lock = RoleLock::acquire(paths.role_lock(Role::Resolver))
        .context("another resolver instance is running")?;

    let shutdown = ShutdownFlag::install().context("install signal handlers")?;

    let identity = DeviceIdentity::detect();
    info!(%identity, location = %config.location.name, "resolver starting");

    let cloud = CloudClient::new(
        &config.cloud.base_url,
        &config.cloud.user_agent,
        config.cloud.request_timeout,
    )
    .context("build cloud client")?;
    let weather = WeatherClient::new(
        &config.weather.base_url,
        &config.cloud.user_agent,
        config.cloud.request_timeout,
    )
    .context("build weather client")?;
    let cache = LkgCache::new(paths.lkg_cache(), config.resolver.lkg_max_age);
    let mut resolver = Resolver::new(
        cloud,
        weather,
        cache,
        identity,
        config.location.latitude,
        config.location.longitude,
        config.resolver.demo_pause,
    );

    let channel = ControlChannel::new(paths.control_token());
    let sink = audio::sink_for(&config.audio.player_command, config.audio.play_timeout);
    let audio_cache = AudioCache::new(config.audio_cache_dir(), config.cloud.request_timeout)
        .context("create audio cache")?;

    // First check runs immediately; subsequent ones on the poll interval.
    loop {
        let decision = resolver.resolve().await;
        info!(
            level = %decision.level,
            source = %decision.source,
            mode = %decision.device_mode,
            "cycle resolved"
        );

        if decision.is_demo() {
            let pause = resolver.demo_pause(&decision);
            run_demo_cycle(&decision, pause, &channel, sink.as_ref(), &audio_cache, &shutdown)
                .await;
        } else {
            dispatch(&decision, &channel, sink.as_ref(), &audio_cache).await;
        }

        let stats = resolver.stats();
        tracing::debug!(?stats, "cycle complete");

        if shutdown.is_set()
            || shutdown
                .sleep_interruptible(config.resolver.poll_interval)
                .await
        {
            break;
        }
    }

    info!("resolver stopping");
    Ok(())
}

/// Dispatch one decision: control token first, then audio.
pub async fn dispatch(
    decision: &ResolverDecision,
    channel: &ControlChannel,
    sink: &dyn AudioSink,
    audio_cache: &AudioCache,
) {
    dispatch_level(decision.level, decision.audio_url.as_deref(), channel, sink, audio_cache)
        .await;
}

async fn dispatch_level(
    level: AlertLevel,
    audio_url: Option<&str>,
    channel: &ControlChannel,
    sink: &dyn AudioSink,
    audio_cache: &AudioCache,
) {
    let token = ControlToken::for_color(level.color());
    if let Err(err) = channel.publish(token) {
        warn!(%err, "failed to publish control token");
    }

    let Some(url) = audio_url else {
        return;
    };
    // Audio failures are logged and left for the next cycle.
    match audio_cache.fetch(url).await {
        Ok(path) => {
            if let Err(err) = sink.play(&path).await {
                warn!(%err, url, "audio playback failed");
            }
        }
        Err(err) => warn!(%err, url, "audio fetch failed"),
    }
}

/// Run one demo cycle: `SAFE`, `CAUTION`, `DANGER`, each held for `pause`
/// after its token and audio. Interruptible at every step.
pub async fn run_demo_cycle(
    decision: &ResolverDecision,
    pause: Duration,
    channel: &ControlChannel,
    sink: &dyn AudioSink,
    audio_cache: &AudioCache,
    shutdown: &ShutdownFlag,
) {
    info!(pause_secs = pause.as_secs(), "running demo cycle");
    for level in DEMO_SEQUENCE {
        if shutdown.is_set() {
            return;
        }
        info!(%level, "demo scenario");

        // Clear the previous scenario so the color change is visible.
        if let Err(err) = channel.publish(ControlToken::Off) {
            warn!(%err, "failed to clear LEDs between demo scenarios");
        }
        if shutdown.sleep_interruptible(Duration::from_secs(1)).await {
            return;
        }

        dispatch_level(
            level,
            decision.audio_url.as_deref(),
            channel,
            sink,
            audio_cache,
        )
        .await;

        if shutdown.sleep_interruptible(pause).await {
            return;
        }
    }
    info!("demo cycle finished, repeats on next check");
}
