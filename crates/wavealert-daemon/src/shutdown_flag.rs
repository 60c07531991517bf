//! Signal-driven shutdown flag.
//!
//! Each role process installs one of these at startup. SIGTERM and SIGINT
//! set the flag; the role's loop checks it at every tick boundary and at
//! every animation or backoff step, so teardown happens within one step of
//! the signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

/// Cancellation flag set by termination signals.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag and install SIGTERM/SIGINT handlers that set it.
    ///
    /// # Errors
    ///
    /// Returns an error when the signal handlers cannot be installed.
    pub fn install() -> std::io::Result<Self> {
        let this = Self::default();

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let flag = Arc::clone(&this.flag);
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
            flag.store(true, Ordering::SeqCst);
        });

        Ok(this)
    }

    /// A flag nobody will ever set, for tests.
    #[must_use]
    pub fn inert() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown directly.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Sleep for `duration`, returning early (true) when shutdown is
    /// requested mid-sleep.
    pub async fn sleep_interruptible(&self, duration: std::time::Duration) -> bool {
        const SLICE: std::time::Duration = std::time::Duration::from_millis(100);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_set() {
                return true;
            }
            let step = remaining.min(SLICE);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        self.is_set()
    }
}
