//! Value types for daemon-side concepts: signals, versions and display
//! addresses.

use crate::error::ControlError;
use std::fmt;
use std::str::FromStr;

/// Suffix of the anonymity network's pseudo top-level domain.
pub const ONION_SUFFIX: &str = ".onion";

/// A signal that can be sent via the SIGNAL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload configuration items.
    Reload,
    /// Controlled shutdown.
    Shutdown,
    /// Dump stats.
    Dump,
    /// Switch all open logs to loglevel debug.
    Debug,
    /// Immediate shutdown.
    Halt,
    /// Switch to clean circuits.
    NewNym,
    /// Forget client-side cached IPs.
    ClearDnsCache,
    /// Dump an unscheduled heartbeat message.
    Heartbeat,
    /// Become dormant.
    Dormant,
    /// Stop being dormant.
    Active,
}

impl Signal {
    /// Get the signal name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Reload => "RELOAD",
            Signal::Shutdown => "SHUTDOWN",
            Signal::Dump => "DUMP",
            Signal::Debug => "DEBUG",
            Signal::Halt => "HALT",
            Signal::NewNym => "NEWNYM",
            Signal::ClearDnsCache => "CLEARDNSCACHE",
            Signal::Heartbeat => "HEARTBEAT",
            Signal::Dormant => "DORMANT",
            Signal::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "RELOAD" | "HUP" => Signal::Reload,
            "SHUTDOWN" | "INT" => Signal::Shutdown,
            "DUMP" | "USR1" => Signal::Dump,
            "DEBUG" | "USR2" => Signal::Debug,
            "HALT" | "TERM" => Signal::Halt,
            "NEWNYM" => Signal::NewNym,
            "CLEARDNSCACHE" => Signal::ClearDnsCache,
            "HEARTBEAT" => Signal::Heartbeat,
            "DORMANT" => Signal::Dormant,
            "ACTIVE" => Signal::Active,
            _ => {
                return Err(ControlError::InvalidArgument(format!(
                    "Unknown signal: {}",
                    s
                )))
            }
        })
    }
}

/// A daemon version as reported by `GETINFO version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorVersion {
    /// The full version string.
    pub version_string: String,
    /// Major version number.
    pub major: u32,
    /// Minor version number.
    pub minor: u32,
    /// Micro version number.
    pub micro: u32,
    /// Patch version number.
    pub patch: u32,
}

impl FromStr for TorVersion {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "0.4.8.10", "Tor 0.4.8.10" or "0.4.8.10 (git-abc123)"
        let version_part = s
            .strip_prefix("Tor ")
            .unwrap_or(s)
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()
            .unwrap_or("");

        let mut numbers = version_part.split('.').map(|p| p.parse::<u32>());
        let mut next = || -> Result<u32, ControlError> {
            match numbers.next() {
                Some(Ok(n)) => Ok(n),
                Some(Err(_)) => Err(ControlError::Protocol(format!("Invalid version: '{}'", s))),
                None => Ok(0),
            }
        };

        let major = next()?;
        let minor = next()?;
        let micro = next()?;
        let patch = next()?;

        Ok(TorVersion {
            version_string: s.to_string(),
            major,
            minor,
            micro,
            patch,
        })
    }
}

impl fmt::Display for TorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version_string)
    }
}

/// Onion address in display form.
///
/// Holds the service identifier; the `.onion` suffix is only added when the
/// address is displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress {
    service_id: String,
}

impl OnionAddress {
    /// Create an address from a service identifier, with or without suffix.
    pub fn new(address: impl Into<String>) -> Self {
        let mut service_id = address.into().to_lowercase();
        if service_id.ends_with(ONION_SUFFIX) {
            service_id.truncate(service_id.len() - ONION_SUFFIX.len());
        }
        OnionAddress { service_id }
    }

    /// The service identifier, without suffix.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Check if this is a current-generation address (56 characters).
    pub fn is_v3(&self) -> bool {
        self.service_id.len() == 56
    }

    /// Check if this is a legacy address (16 characters).
    pub fn is_v2(&self) -> bool {
        self.service_id.len() == 16
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.service_id, ONION_SUFFIX)
    }
}

impl FromStr for OnionAddress {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OnionAddress::new(s))
    }
}
