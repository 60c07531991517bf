//! LED pattern execution: single active strip, preemption on token change,
//! prompt interruption on shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use wavealert_core::control::{ControlChannel, ControlToken};
use wavealert_core::led::{LedDriver, LedError, Pattern, Rgb, Strip, OFF};

use wavealert_daemon::led_service::{run_pattern, PatternRun};
use wavealert_daemon::shutdown_flag::ShutdownFlag;

/// Driver that records every write.
#[derive(Clone, Default)]
struct RecordingDriver {
    writes: Arc<Mutex<Vec<(Strip, Rgb)>>>,
}

impl RecordingDriver {
    fn lit_strips(&self) -> Vec<Strip> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, color)| *color != OFF)
            .map(|(strip, _)| *strip)
            .collect()
    }
}

impl LedDriver for RecordingDriver {
    fn fill(&mut self, strip: Strip, color: Rgb) -> Result<(), LedError> {
        self.writes.lock().unwrap().push((strip, color));
        Ok(())
    }

    fn is_hardware(&self) -> bool {
        true
    }
}

/// Driver whose writes always fail.
struct BrokenDriver;

impl LedDriver for BrokenDriver {
    fn fill(&mut self, _strip: Strip, _color: Rgb) -> Result<(), LedError> {
        Err(LedError::Write("dma transfer failed".to_string()))
    }

    fn is_hardware(&self) -> bool {
        true
    }
}

fn fast_pattern(token: ControlToken) -> Pattern {
    Pattern::for_token(token, 3, Duration::from_millis(10))
}

#[tokio::test]
async fn only_the_matching_strip_is_ever_lit() {
    let dir = tempfile::tempdir().unwrap();
    let channel = ControlChannel::new(dir.path().join("token"));
    channel.publish(ControlToken::Red).unwrap();

    let mut driver = RecordingDriver::default();
    let outcome = run_pattern(
        &mut driver,
        fast_pattern(ControlToken::Red),
        &channel,
        Some(ControlToken::Red),
        &ShutdownFlag::inert(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, PatternRun::Completed);
    let lit = driver.lit_strips();
    assert!(!lit.is_empty());
    assert!(lit.iter().all(|s| *s == Strip::Red));
}

#[tokio::test]
async fn off_token_clears_every_strip() {
    let dir = tempfile::tempdir().unwrap();
    let channel = ControlChannel::new(dir.path().join("token"));
    channel.publish(ControlToken::Off).unwrap();

    let mut driver = RecordingDriver::default();
    let outcome = run_pattern(
        &mut driver,
        Pattern::for_token(ControlToken::Off, 3, Duration::from_millis(10)),
        &channel,
        Some(ControlToken::Off),
        &ShutdownFlag::inert(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, PatternRun::Completed);
    assert!(driver.lit_strips().is_empty());
    // All three banks received an explicit off write.
    let writes = driver.writes.lock().unwrap();
    for strip in Strip::ALL {
        assert!(writes.iter().any(|(s, c)| *s == strip && *c == OFF));
    }
}

#[tokio::test]
async fn a_new_token_preempts_the_running_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let channel = ControlChannel::new(dir.path().join("token"));
    channel.publish(ControlToken::Green).unwrap();

    // Long pattern; the writer thread flips the token mid-run.
    let pattern = Pattern::for_token(ControlToken::Green, 200, Duration::from_millis(10));
    let writer = ControlChannel::new(dir.path().join("token"));
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(60));
        writer.publish(ControlToken::Red).unwrap();
    });

    let mut driver = RecordingDriver::default();
    let start = std::time::Instant::now();
    let outcome = run_pattern(
        &mut driver,
        pattern,
        &channel,
        Some(ControlToken::Green),
        &ShutdownFlag::inert(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, PatternRun::Preempted);
    // Far sooner than the 4 seconds the full pattern would take.
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn shutdown_interrupts_within_one_step() {
    let dir = tempfile::tempdir().unwrap();
    let channel = ControlChannel::new(dir.path().join("token"));
    channel.publish(ControlToken::Yellow).unwrap();

    let shutdown = ShutdownFlag::inert();
    let setter = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        setter.set();
    });

    let mut driver = RecordingDriver::default();
    let outcome = run_pattern(
        &mut driver,
        Pattern::for_token(ControlToken::Yellow, 1000, Duration::from_millis(20)),
        &channel,
        Some(ControlToken::Yellow),
        &shutdown,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PatternRun::Interrupted);
}

#[tokio::test]
async fn hardware_failures_surface_instead_of_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let channel = ControlChannel::new(dir.path().join("token"));

    let mut driver = BrokenDriver;
    let result = run_pattern(
        &mut driver,
        fast_pattern(ControlToken::Red),
        &channel,
        Some(ControlToken::Red),
        &ShutdownFlag::inert(),
    )
    .await;

    assert!(matches!(result, Err(LedError::Write(_))));
}

#[test]
fn failsafe_pattern_is_the_slow_yellow_blink() {
    let pattern = Pattern::failsafe();
    assert_eq!(pattern.active_strip(), Some(Strip::Yellow));
    assert!(pattern.max_duration() <= Duration::from_secs(2));
}
