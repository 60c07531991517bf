//! # wavealert-core
//!
//! Core library for the WaveAlert360 coastal-hazard alerting appliance.
//!
//! The appliance runs four cooperating processes: a supervisor, an alert
//! resolver, an LED service, and a source updater. This crate provides the
//! building blocks they share: the alert model and resolution pipeline, the
//! file-backed control channel and status documents, advisory role locks,
//! restart and shutdown policies, and the clients for the cloud alert
//! service, the weather fallback, and the update remote.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wavealert_core::alert::AlertLevel;
//! use wavealert_core::control::{ControlChannel, ControlToken};
//!
//! let channel = ControlChannel::new("/var/run/wavealert360/led_control_signal");
//! let token = ControlToken::for_color(AlertLevel::Caution.color());
//! channel.publish(token).expect("publish control token");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod audio;
pub mod cache;
pub mod cloud;
pub mod config;
pub mod control;
pub mod identity;
pub mod led;
pub mod lock;
pub mod resolver;
pub mod restart;
pub mod roles;
pub mod shutdown;
pub mod status;
pub mod supervisor;
pub mod update;
pub mod weather;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::alert::{AlertLevel, DecisionSource, DeviceMode, ResolverDecision};
    pub use crate::config::Config;
    pub use crate::control::{ControlChannel, ControlToken};
    pub use crate::roles::Role;
    pub use crate::supervisor::Supervisor;
}

/// Re-export commonly used types at the crate root.
pub use alert::{AlertLevel, ResolverDecision};
pub use config::Config;
pub use control::ControlToken;
pub use roles::Role;
pub use supervisor::Supervisor;
