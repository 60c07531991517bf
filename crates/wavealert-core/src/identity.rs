//! Device identity.
//!
//! The device identifies itself to the cloud service by its primary network
//! interface hardware address, read once at startup and immutable for the
//! process lifetime.

use std::path::Path;

/// Opaque device key used in all cloud calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

/// Interfaces probed for a hardware address, in preference order.
const INTERFACES: [&str; 2] = ["eth0", "wlan0"];

impl DeviceIdentity {
    /// Detect the device identity from the primary network interface.
    ///
    /// Tries the wired interface first, then wireless. When no interface
    /// exposes an address (development hosts, containers) a hostname-derived
    /// identifier is used instead so the device can still be addressed.
    #[must_use]
    pub fn detect() -> Self {
        for iface in INTERFACES {
            let path = format!("/sys/class/net/{iface}/address");
            if let Some(mac) = read_address(Path::new(&path)) {
                tracing::debug!(interface = iface, identity = %mac, "device identity from interface");
                return Self(mac);
            }
        }

        let fallback = match hostname() {
            Some(name) => format!("test-{name}"),
            None => "unknown-device".to_string(),
        };
        tracing::warn!(identity = %fallback, "no network interface address, using fallback identity");
        Self(fallback)
    }

    /// Build an identity from a known value (tests, operator override).
    #[must_use]
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn read_address(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mac = raw.trim();
    if mac.is_empty() || mac == "00:00:00:00:00:00" {
        return None;
    }
    Some(mac.to_string())
}

fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}
