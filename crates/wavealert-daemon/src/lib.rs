//! Runtime loops for the WaveAlert360 appliance.
//!
//! Each supervised role has a long-running entry point here; the binary in
//! `main.rs` picks one from its subcommand. Every loop follows the same
//! shape: acquire the role lock (or exit), tick on a fixed interval, react
//! to SIGTERM/SIGINT by cleaning up and returning promptly.

#![warn(clippy::all)]

pub mod led_service;
pub mod resolver;
pub mod shutdown_flag;
pub mod supervisor;
pub mod updater;
