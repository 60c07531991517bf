//! LED service role.
//!
//! Sole owner of the LED hardware. Reads the control token on a short
//! monitor tick, runs the bounded blink pattern it prescribes, and publishes
//! a status document after every action. When hardware init fails the
//! service degrades to a simulation driver but keeps consuming tokens and
//! publishing status, which is how headless test rigs run it.

use anyhow::Context;
use tracing::{info, warn};

use wavealert_core::config::Config;
use wavealert_core::control::{ControlChannel, ControlError, ControlToken};
use wavealert_core::led::{LedDriver, Pattern, SimulationDriver, Strip, OFF};
use wavealert_core::lock::RoleLock;
use wavealert_core::roles::Role;
use wavealert_core::status::{LedServiceStatus, StatusFile};

use crate::shutdown_flag::ShutdownFlag;

/// Outcome of one pattern run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternRun {
    /// The pattern ran all its steps.
    Completed,

    /// A different token arrived and the pattern stopped at a step boundary.
    Preempted,

    /// Shutdown was requested mid-pattern.
    Interrupted,
}

/// Run the LED service until a termination signal arrives.
///
/// # Errors
///
/// Fatal initialization failures only: lock contention or an unusable run
/// directory. Hardware failures degrade the service instead of stopping it.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let paths = config.paths();
    paths.ensure().context("create run directory")?;
    let _lock = RoleLock::acquire(paths.role_lock(Role::LedService))
        .context("another LED service instance is running")?;

    let shutdown = ShutdownFlag::install().context("install signal handlers")?;

    let (mut driver, mut hardware_available) = init_hardware(&config);
    info!(
        hardware_available,
        pixels = config.led.pixels_per_strip,
        "LED service starting"
    );

    let channel = ControlChannel::new(paths.control_token());
    let status = StatusFile::new(paths.led_status());

    let mut current: Option<ControlToken> = None;
    publish_status(&status, hardware_available, current);

    while !shutdown.is_set() {
        let (pattern, token) = match channel.read() {
            Ok(Some(token)) => (
                Pattern::for_token(token, config.led.blink_iterations, config.led.blink_step),
                Some(token),
            ),
            Ok(None) => (Pattern::failsafe(), None),
            Err(ControlError::InvalidToken(raw)) => {
                warn!(raw = %raw, "invalid control token, holding failsafe pattern");
                (Pattern::failsafe(), None)
            }
            Err(err) => {
                warn!(%err, "control file unreadable, holding failsafe pattern");
                (Pattern::failsafe(), None)
            }
        };

        if token != current {
            info!(token = ?token.map(ControlToken::as_wire), "control token changed");
            current = token;
        }

        let outcome = match run_pattern(driver.as_mut(), pattern, &channel, token, &shutdown).await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, "hardware write failed, degrading to simulation");
                driver = Box::new(SimulationDriver);
                hardware_available = false;
                PatternRun::Completed
            }
        };

        publish_status(&status, hardware_available, current);

        match outcome {
            PatternRun::Interrupted => break,
            PatternRun::Preempted => continue,
            PatternRun::Completed => {}
        }

        if shutdown
            .sleep_interruptible(config.led.monitor_interval)
            .await
        {
            break;
        }
    }

    info!("LED service stopping, clearing strips");
    if let Err(err) = driver.clear_all() {
        warn!(%err, "failed to clear strips on shutdown");
    }
    status.remove();
    Ok(())
}

/// Initialize the hardware driver.
///
/// The real strip driver is injected at integration time; when it is absent
/// or fails to come up the service runs against the simulation driver and
/// reports `hardware_available = false`.
#[must_use]
pub fn init_hardware(config: &Config) -> (Box<dyn LedDriver>, bool) {
    let _ = config.led.pixels_per_strip;
    let driver = SimulationDriver;
    let hardware = driver.is_hardware();
    if !hardware {
        warn!("LED hardware unavailable, running in simulation mode");
    }
    (Box::new(driver), hardware)
}

/// Execute one bounded pattern run.
///
/// The control file is re-read at every step boundary; a different token
/// preempts the pattern so a change is observed within one monitor tick plus
/// one step. Only the pattern's strip is ever lit.
///
/// # Errors
///
/// Returns the first hardware write error; the caller degrades the service.
pub async fn run_pattern(
    driver: &mut dyn LedDriver,
    pattern: Pattern,
    channel: &ControlChannel,
    token: Option<ControlToken>,
    shutdown: &ShutdownFlag,
) -> Result<PatternRun, wavealert_core::led::LedError> {
    match pattern {
        Pattern::AllOff { hold } => {
            driver.clear_all()?;
            if shutdown.sleep_interruptible(hold).await {
                return Ok(PatternRun::Interrupted);
            }
            Ok(PatternRun::Completed)
        }
        Pattern::Blink {
            strip,
            iterations,
            step,
        } => {
            // Everything but the active strip stays dark.
            for other in Strip::ALL {
                if other != strip {
                    driver.fill(other, OFF)?;
                }
            }

            for _ in 0..iterations {
                driver.fill(strip, strip.color())?;
                if shutdown.sleep_interruptible(step).await {
                    return Ok(PatternRun::Interrupted);
                }
                driver.fill(strip, OFF)?;
                if shutdown.sleep_interruptible(step).await {
                    return Ok(PatternRun::Interrupted);
                }

                if token_changed(channel, token) {
                    return Ok(PatternRun::Preempted);
                }
            }
            Ok(PatternRun::Completed)
        }
    }
}

fn token_changed(channel: &ControlChannel, current: Option<ControlToken>) -> bool {
    match channel.read() {
        Ok(token) => token != current,
        // Unreadable now; let the main loop decide what that means.
        Err(_) => current.is_some(),
    }
}

fn publish_status(status: &StatusFile, hardware_available: bool, current: Option<ControlToken>) {
    let snapshot = LedServiceStatus::now(hardware_available, current);
    if let Err(err) = status.publish(&snapshot) {
        warn!(%err, "failed to publish status document");
    }
}
