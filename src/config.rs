//! Configuration for a control connection.
//!
//! [`ControllerConfig`] bundles where to connect, how to authenticate and
//! the optional deadlines applied to connecting and to each transaction.

use crate::auth::AuthCredential;
use crate::error::{ControlError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// The daemon's default control endpoint.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9051";

/// Environment variable holding the control address (`host:port` or a bare port).
pub const ENV_CONTROL_PORT: &str = "TOR_CONTROL_PORT";

/// Environment variable holding the control password.
pub const ENV_PASSWORD: &str = "TOR_PASSWORD";

/// Environment variable holding an explicit cookie file path.
pub const ENV_COOKIE_FILE: &str = "TOR_COOKIE_FILE";

/// Configuration for connecting to a control port.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The `host:port` to connect to.
    pub address: String,
    /// Credentials used by [`crate::Controller::connect_with_config`].
    pub auth: AuthCredential,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Option<Duration>,
    /// Deadline for each request/response round trip.
    pub request_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONTROL_ADDR.to_string(),
            auth: AuthCredential::None,
            connect_timeout: None,
            request_timeout: None,
        }
    }
}

impl ControllerConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `TOR_CONTROL_PORT`, `TOR_PASSWORD` and
    /// `TOR_COOKIE_FILE`. Unset variables keep their defaults; a password
    /// takes precedence over a cookie file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ControllerConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_CONTROL_PORT).filter(|v| !v.is_empty()) {
            config.address = if addr.contains(':') {
                addr
            } else {
                let port: u16 = addr.parse().map_err(|_| {
                    ControlError::InvalidArgument(format!(
                        "{} is not a port or address: '{}'",
                        ENV_CONTROL_PORT, addr
                    ))
                })?;
                format!("127.0.0.1:{}", port)
            };
        }

        if let Some(password) = lookup(ENV_PASSWORD) {
            config.auth = AuthCredential::Password(password);
        } else if let Some(path) = lookup(ENV_COOKIE_FILE).filter(|v| !v.is_empty()) {
            config.auth = AuthCredential::CookieFile(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Set the control address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set authentication credentials.
    pub fn auth(mut self, auth: AuthCredential) -> Self {
        self.auth = auth;
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthCredential::Password(password.into());
        self
    }

    /// Authenticate with the cookie file the daemon advertises.
    pub fn cookie(mut self) -> Self {
        self.auth = AuthCredential::Cookie;
        self
    }

    /// Authenticate with an explicit cookie file.
    pub fn cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth = AuthCredential::CookieFile(path.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.address, "127.0.0.1:9051");
        assert!(matches!(config.auth, AuthCredential::None));
        assert!(config.connect_timeout.is_none());
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ControllerConfig::new()
            .address("localhost:9151")
            .password("mypassword")
            .connect_timeout(Duration::from_secs(10))
            .request_timeout(Duration::from_secs(5));

        assert_eq!(config.address, "localhost:9151");
        assert!(matches!(config.auth, AuthCredential::Password(_)));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));

        let config = config.cookie_file("/run/tor/control.authcookie");
        assert!(matches!(config.auth, AuthCredential::CookieFile(_)));
        assert!(matches!(config.cookie().auth, AuthCredential::Cookie));
    }

    #[test]
    fn test_from_lookup() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.address, DEFAULT_CONTROL_ADDR);

        let config = ControllerConfig::from_lookup(lookup(&[
            (ENV_CONTROL_PORT, "9151"),
            (ENV_PASSWORD, "secret"),
            (ENV_COOKIE_FILE, "/tmp/cookie"),
        ]))
        .unwrap();
        assert_eq!(config.address, "127.0.0.1:9151");
        assert!(matches!(config.auth, AuthCredential::Password(ref p) if p == "secret"));

        let config = ControllerConfig::from_lookup(lookup(&[
            (ENV_CONTROL_PORT, "10.0.0.2:9051"),
            (ENV_COOKIE_FILE, "/tmp/cookie"),
        ]))
        .unwrap();
        assert_eq!(config.address, "10.0.0.2:9051");
        assert!(matches!(config.auth, AuthCredential::CookieFile(_)));
    }

    #[test]
    fn test_from_lookup_rejects_bad_port() {
        let err = ControllerConfig::from_lookup(lookup(&[(ENV_CONTROL_PORT, "ninety")]));
        assert!(matches!(err, Err(ControlError::InvalidArgument(_))));
    }
}
