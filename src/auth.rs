//! Authentication negotiation for the control protocol.
//!
//! A session starts `Unauthenticated`. `PROTOCOLINFO 1` moves it to
//! `Negotiated` and reports which methods the daemon accepts. Exactly one
//! `AUTHENTICATE` then moves it to `Authenticated` or `Failed`; both are
//! terminal. Nothing here falls back to another method on failure.

use crate::error::{ControlError, Result};
use crate::protocol::{parse_key_value_pairs, quote, unquote};
use std::fmt;
use std::path::{Path, PathBuf};

/// Authentication methods a daemon may advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required.
    Null,
    /// Password authentication.
    HashedPassword,
    /// Cookie file authentication.
    Cookie,
    /// HMAC-based cookie authentication.
    SafeCookie,
    /// A method this client does not know about.
    Other(String),
}

impl AuthMethod {
    /// Parse an auth method name.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "NULL" => AuthMethod::Null,
            "HASHEDPASSWORD" => AuthMethod::HashedPassword,
            "COOKIE" => AuthMethod::Cookie,
            "SAFECOOKIE" => AuthMethod::SafeCookie,
            _ => AuthMethod::Other(s.to_string()),
        }
    }

    /// The method name as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            AuthMethod::Null => "NULL",
            AuthMethod::HashedPassword => "HASHEDPASSWORD",
            AuthMethod::Cookie => "COOKIE",
            AuthMethod::SafeCookie => "SAFECOOKIE",
            AuthMethod::Other(name) => name,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information retrieved from the PROTOCOLINFO command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Protocol info version (currently always 1).
    pub protocol_version: u32,
    /// Daemon version string, if reported.
    pub tor_version: Option<String>,
    /// Advertised authentication methods, in the daemon's order.
    pub auth_methods: Vec<AuthMethod>,
    /// Path to the authentication cookie, if advertised.
    pub cookie_file: Option<PathBuf>,
}

impl ProtocolInfo {
    /// Parse the text lines of a PROTOCOLINFO reply.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self> {
        let mut info = ProtocolInfo {
            protocol_version: 1,
            ..Default::default()
        };
        let mut saw_auth = false;

        for line in lines {
            let line = line.as_ref().trim();

            if let Some(rest) = line.strip_prefix("PROTOCOLINFO ") {
                info.protocol_version = rest.trim().parse().map_err(|_| {
                    ControlError::Protocol(format!("Invalid PROTOCOLINFO version: '{}'", rest))
                })?;
            } else if let Some(rest) = line.strip_prefix("AUTH ") {
                // AUTH METHODS=NULL,COOKIE COOKIEFILE="..."
                let pairs = parse_key_value_pairs(rest)?;
                let methods = pairs.get("METHODS").ok_or_else(|| {
                    ControlError::Protocol(format!("AUTH line without METHODS: '{}'", line))
                })?;
                info.auth_methods = methods
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(AuthMethod::parse)
                    .collect();
                info.cookie_file = pairs.get("COOKIEFILE").map(PathBuf::from);
                saw_auth = true;
            } else if let Some(rest) = line.strip_prefix("VERSION ") {
                let pairs = parse_key_value_pairs(rest)?;
                info.tor_version = pairs.get("Tor").cloned();
            }
        }

        if !saw_auth {
            return Err(ControlError::Protocol(
                "PROTOCOLINFO reply has no AUTH line".to_string(),
            ));
        }

        Ok(info)
    }

    /// Check if NULL authentication is supported.
    pub fn supports_null(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::Null)
    }

    /// Check if password authentication is supported.
    pub fn supports_password(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::HashedPassword)
    }

    /// Check if cookie authentication is supported.
    pub fn supports_cookie(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::Cookie)
    }
}

/// Where a session stands in the authentication handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Connected, PROTOCOLINFO not yet answered.
    Unauthenticated,
    /// Supported methods are known.
    Negotiated,
    /// The daemon accepted our credentials.
    Authenticated,
    /// The daemon rejected our credentials.
    Failed,
}

impl AuthState {
    /// Whether no further authentication attempt is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }
}

/// Credentials for the AUTHENTICATE command.
#[derive(Clone, Default)]
pub enum AuthCredential {
    /// Empty AUTHENTICATE, for the NULL method.
    #[default]
    None,
    /// Shared secret, sent as a quoted string.
    Password(String),
    /// Read the cookie from the path the daemon advertised.
    Cookie,
    /// Read the cookie from an explicit path.
    CookieFile(PathBuf),
}

impl AuthCredential {
    /// Create password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        AuthCredential::Password(password.into())
    }

    /// Create cookie file credentials.
    pub fn cookie_file(path: impl Into<PathBuf>) -> Self {
        AuthCredential::CookieFile(path.into())
    }

    /// The advertised method these credentials correspond to.
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthCredential::None => AuthMethod::Null,
            AuthCredential::Password(_) => AuthMethod::HashedPassword,
            AuthCredential::Cookie | AuthCredential::CookieFile(_) => AuthMethod::Cookie,
        }
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCredential::None => f.write_str("None"),
            AuthCredential::Password(_) => f.write_str("Password(<redacted>)"),
            AuthCredential::Cookie => f.write_str("Cookie"),
            AuthCredential::CookieFile(path) => f.debug_tuple("CookieFile").field(path).finish(),
        }
    }
}

/// Build the AUTHENTICATE line for a NULL authentication.
pub fn authenticate_none_command() -> String {
    "AUTHENTICATE".to_string()
}

/// Build the AUTHENTICATE line for a password, quoting it.
pub fn authenticate_password_command(password: &str) -> String {
    format!("AUTHENTICATE {}", quote(password))
}

/// Build the AUTHENTICATE line for raw cookie bytes.
pub fn authenticate_cookie_command(cookie: &[u8]) -> String {
    format!("AUTHENTICATE {}", format_cookie_hex(cookie))
}

/// Recover the password from an AUTHENTICATE line built by
/// [`authenticate_password_command`].
pub fn password_from_command(line: &str) -> Result<String> {
    let arg = line.strip_prefix("AUTHENTICATE ").ok_or_else(|| {
        ControlError::InvalidArgument(format!("Not an AUTHENTICATE command: '{}'", line))
    })?;
    unquote(arg)
}

/// Read the authentication cookie from a file.
pub async fn read_cookie_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ControlError::CookieFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Format cookie data as hex for the AUTHENTICATE command.
pub fn format_cookie_hex(cookie: &[u8]) -> String {
    hex::encode_upper(cookie)
}
