//! LED hardware model.
//!
//! Three independent strips, one per alert color. The service drives them
//! through the [`LedDriver`] capability; when real hardware fails to
//! initialize the service keeps running against [`SimulationDriver`] so the
//! control channel and status document stay live for headless testing.
//!
//! Hardware I/O happens from a single thread. Patterns are bounded plans of
//! on/off steps, never unbounded animations, so a token change is observed
//! within one monitor tick plus one step.

use std::time::Duration;

use crate::alert::LedColor;
use crate::control::ControlToken;

/// One of the three physical strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strip {
    /// Danger bank.
    Red,
    /// Caution bank.
    Yellow,
    /// Safe bank.
    Green,
}

impl Strip {
    /// All strips, in a fixed order.
    pub const ALL: [Self; 3] = [Self::Red, Self::Yellow, Self::Green];

    /// The strip carrying a color.
    #[must_use]
    pub const fn for_color(color: LedColor) -> Self {
        match color {
            LedColor::Red => Self::Red,
            LedColor::Yellow => Self::Yellow,
            LedColor::Green => Self::Green,
        }
    }

    /// The lit color of this strip.
    #[must_use]
    pub const fn color(self) -> Rgb {
        match self {
            Self::Red => Rgb(255, 0, 0),
            Self::Yellow => Rgb(255, 100, 0),
            Self::Green => Rgb(0, 255, 0),
        }
    }
}

impl std::fmt::Display for Strip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Red => write!(f, "red"),
            Self::Yellow => write!(f, "yellow"),
            Self::Green => write!(f, "green"),
        }
    }
}

/// An RGB color value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// All pixels off.
pub const OFF: Rgb = Rgb(0, 0, 0);

/// Driver over the three addressable strips.
///
/// The service owns exactly one driver and calls it from one thread.
pub trait LedDriver: Send {
    /// Set every pixel of a strip to one color.
    ///
    /// # Errors
    ///
    /// Returns an error when the hardware write fails. The service treats
    /// that as degradation, not a crash.
    fn fill(&mut self, strip: Strip, color: Rgb) -> Result<(), LedError>;

    /// Turn every strip off.
    ///
    /// # Errors
    ///
    /// Returns an error when any hardware write fails.
    fn clear_all(&mut self) -> Result<(), LedError> {
        for strip in Strip::ALL {
            self.fill(strip, OFF)?;
        }
        Ok(())
    }

    /// Whether this driver talks to real hardware.
    fn is_hardware(&self) -> bool;
}

/// No-op driver that logs pixel writes.
#[derive(Debug, Default)]
pub struct SimulationDriver;

impl LedDriver for SimulationDriver {
    fn fill(&mut self, strip: Strip, color: Rgb) -> Result<(), LedError> {
        let state = if color == OFF { "off" } else { "on" };
        tracing::debug!(%strip, state, "simulated strip write");
        Ok(())
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

/// A bounded animation plan for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Blink one strip, others forced off.
    Blink {
        /// Strip to blink.
        strip: Strip,
        /// On/off iterations.
        iterations: u32,
        /// Duration of each on and each off step.
        step: Duration,
    },

    /// Everything off, then hold.
    AllOff {
        /// Idle hold after clearing.
        hold: Duration,
    },
}

impl Pattern {
    /// The plan prescribed by a control token.
    #[must_use]
    pub const fn for_token(token: ControlToken, iterations: u32, step: Duration) -> Self {
        match token {
            ControlToken::Red => Self::Blink {
                strip: Strip::Red,
                iterations,
                step,
            },
            ControlToken::Yellow => Self::Blink {
                strip: Strip::Yellow,
                iterations,
                step,
            },
            ControlToken::Green => Self::Blink {
                strip: Strip::Green,
                iterations,
                step,
            },
            ControlToken::Off => Self::AllOff {
                hold: Duration::from_secs(1),
            },
        }
    }

    /// The plan used when no valid token is available: a slow yellow blink
    /// that signals "unattended" without ever claiming danger.
    #[must_use]
    pub const fn failsafe() -> Self {
        Self::Blink {
            strip: Strip::Yellow,
            iterations: 1,
            step: Duration::from_secs(1),
        }
    }

    /// The strip this pattern lights, if any.
    #[must_use]
    pub const fn active_strip(&self) -> Option<Strip> {
        match self {
            Self::Blink { strip, .. } => Some(*strip),
            Self::AllOff { .. } => None,
        }
    }

    /// Worst-case wall-clock duration of one run of this pattern.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        match self {
            Self::Blink {
                iterations, step, ..
            } => *step * iterations.saturating_mul(2),
            Self::AllOff { hold } => *hold,
        }
    }
}

/// LED hardware errors.
#[derive(Debug, thiserror::Error)]
pub enum LedError {
    /// Strip initialization failed.
    #[error("LED strip init failed: {0}")]
    Init(String),

    /// A pixel write failed.
    #[error("LED write failed: {0}")]
    Write(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_patterns_light_the_matching_strip_only() {
        let step = Duration::from_millis(500);
        assert_eq!(
            Pattern::for_token(ControlToken::Red, 10, step).active_strip(),
            Some(Strip::Red)
        );
        assert_eq!(
            Pattern::for_token(ControlToken::Yellow, 10, step).active_strip(),
            Some(Strip::Yellow)
        );
        assert_eq!(
            Pattern::for_token(ControlToken::Green, 10, step).active_strip(),
            Some(Strip::Green)
        );
        assert_eq!(
            Pattern::for_token(ControlToken::Off, 10, step).active_strip(),
            None
        );
    }

    #[test]
    fn patterns_are_bounded() {
        let pattern = Pattern::for_token(ControlToken::Red, 10, Duration::from_millis(500));
        assert_eq!(pattern.max_duration(), Duration::from_secs(10));

        let failsafe = Pattern::failsafe();
        assert_eq!(failsafe.max_duration(), Duration::from_secs(2));
    }

    #[test]
    fn failsafe_never_claims_danger() {
        assert_ne!(Pattern::failsafe().active_strip(), Some(Strip::Red));
    }

    #[test]
    fn simulation_driver_accepts_all_writes() {
        let mut driver = SimulationDriver;
        for strip in Strip::ALL {
            driver.fill(strip, strip.color()).unwrap();
        }
        driver.clear_all().unwrap();
        assert!(!driver.is_hardware());
    }

    #[test]
    fn strip_color_mapping() {
        assert_eq!(Strip::for_color(LedColor::Red), Strip::Red);
        assert_eq!(Strip::for_color(LedColor::Green), Strip::Green);
        assert_eq!(Strip::Yellow.color(), Rgb(255, 100, 0));
    }
}
