//! Control connection and client.
//!
//! A [`Controller`] owns one TCP connection to the control port. The
//! protocol has no request identifiers, so replies are matched to commands
//! purely by arrival order: every round trip runs while holding the
//! session lock, and commands never overlap.

use crate::auth::{
    authenticate_cookie_command, authenticate_none_command, authenticate_password_command,
    read_cookie_file, AuthCredential, AuthMethod, AuthState, ProtocolInfo,
};
use crate::config::{ControllerConfig, DEFAULT_CONTROL_ADDR};
use crate::error::{ControlError, Result};
use crate::onion::{delete_command, Onion};
use crate::protocol::{encode_command, format_command, read_reply, redact, Reply};
use crate::types::{Signal, TorVersion};

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Success code of every command used here.
const OK: u16 = 250;

/// Commands that move the authentication state; only
/// [`Controller::authenticate`] sends them.
const AUTH_COMMANDS: &[&str] = &["AUTHENTICATE", "AUTHCHALLENGE"];

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    state: AuthState,
    closed: bool,
    /// Set from the first byte written until the reply is fully read. Still
    /// set on entry means a caller dropped a round trip halfway.
    in_flight: bool,
}

impl Session {
    async fn round_trip(&mut self, encoded: &str) -> Result<Reply> {
        self.in_flight = true;
        self.writer.write_all(encoded.as_bytes()).await?;
        self.writer.flush().await?;
        let reply = read_reply(&mut self.reader).await;
        self.in_flight = false;
        reply
    }
}

/// A client for one control port session.
///
/// Methods take `&self`; a controller can be shared behind an `Arc` and
/// concurrent callers are serialized.
pub struct Controller {
    session: Mutex<Session>,
    protocol_info: ProtocolInfo,
    request_timeout: Option<Duration>,
}

impl Controller {
    /// Connect to a control port and negotiate with `PROTOCOLINFO`.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::open(addr, None, None).await
    }

    /// Connect to the default control port (127.0.0.1:9051).
    pub async fn connect_default() -> Result<Self> {
        Self::connect(DEFAULT_CONTROL_ADDR).await
    }

    /// Connect, negotiate and authenticate as described by `config`.
    pub async fn connect_with_config(config: &ControllerConfig) -> Result<Self> {
        let controller =
            Self::open(&config.address, config.connect_timeout, config.request_timeout).await?;
        controller.authenticate(&config.auth).await?;
        Ok(controller)
    }

    async fn open(
        addr: &str,
        connect_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = with_deadline(connect_timeout, async {
            TcpStream::connect(addr)
                .await
                .map_err(|e| ControlError::Connection(format!("{}: {}", addr, e)))
        })
        .await?;
        debug!("Connected to control port {}", addr);

        let (read_half, write_half) = stream.into_split();
        let mut session = Session {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            state: AuthState::Unauthenticated,
            closed: false,
            in_flight: false,
        };

        let reply = transact(&mut session, request_timeout, "PROTOCOLINFO 1")
            .await?
            .expect_code(OK)?;
        let lines: Vec<&str> = reply.lines.iter().map(|l| l.text.as_str()).collect();
        let protocol_info = ProtocolInfo::parse(&lines)?;
        session.state = AuthState::Negotiated;
        debug!(
            "Negotiated: methods={:?} cookie_file={:?} version={:?}",
            protocol_info.auth_methods, protocol_info.cookie_file, protocol_info.tor_version
        );

        Ok(Self {
            session: Mutex::new(session),
            protocol_info,
            request_timeout,
        })
    }

    /// What the daemon advertised when the session was negotiated.
    pub fn protocol_info(&self) -> &ProtocolInfo {
        &self.protocol_info
    }

    /// The current authentication state.
    pub async fn auth_state(&self) -> AuthState {
        self.session.lock().await.state
    }

    /// Whether the session has been closed or invalidated.
    ///
    /// A round trip abandoned halfway (its future dropped by an outer
    /// timeout or `select!`) leaves the session unusable as well.
    pub async fn is_closed(&self) -> bool {
        let session = self.session.lock().await;
        session.closed || session.in_flight
    }

    /// Send one command line and return the reply, whatever its code.
    ///
    /// Only QUIT is allowed until authentication has succeeded.
    /// AUTHENTICATE and AUTHCHALLENGE are always refused here with
    /// [`ControlError::InvalidArgument`]; use [`Controller::authenticate`].
    pub async fn send_command(&self, line: &str) -> Result<Reply> {
        let mut session = self.session.lock().await;
        check_allowed(session.state, line)?;
        transact(&mut session, self.request_timeout, line).await
    }

    /// Send one command and require the reply code to equal `expected`.
    ///
    /// Any other code yields [`ControlError::CommandRejected`] carrying the
    /// code and the daemon's text.
    pub async fn request(&self, line: &str, expected: u16) -> Result<Reply> {
        self.send_command(line).await?.expect_code(expected)
    }

    /// Authenticate with the given credentials.
    ///
    /// Exactly one attempt is made. A rejection moves the session to
    /// [`AuthState::Failed`]; no other method is tried.
    pub async fn authenticate(&self, credential: &AuthCredential) -> Result<()> {
        let info = &self.protocol_info;
        let method = credential.method();
        let advertised = match method {
            AuthMethod::Null => info.supports_null(),
            AuthMethod::HashedPassword => info.supports_password(),
            _ => info.supports_cookie(),
        };
        if !advertised {
            return Err(ControlError::InvalidArgument(format!(
                "Daemon does not offer {} authentication",
                method
            )));
        }

        let line = match credential {
            AuthCredential::None => authenticate_none_command(),
            AuthCredential::Password(password) => authenticate_password_command(password),
            AuthCredential::Cookie => {
                let path = info.cookie_file.as_deref().ok_or_else(|| {
                    ControlError::InvalidArgument("Daemon advertised no cookie file".to_string())
                })?;
                authenticate_cookie_command(&read_cookie_file(path).await?)
            }
            AuthCredential::CookieFile(path) => {
                authenticate_cookie_command(&read_cookie_file(path).await?)
            }
        };

        let mut session = self.session.lock().await;
        match session.state {
            AuthState::Negotiated => {}
            AuthState::Authenticated => {
                return Err(ControlError::InvalidState("Already authenticated".to_string()))
            }
            state => {
                return Err(ControlError::InvalidState(format!(
                    "Cannot authenticate in state {:?}",
                    state
                )))
            }
        }

        debug!("Authenticating with {} method", method);
        let reply = transact(&mut session, self.request_timeout, &line).await?;
        if reply.code == OK {
            session.state = AuthState::Authenticated;
            debug!("Authentication successful");
            Ok(())
        } else {
            session.state = AuthState::Failed;
            debug!("Authentication rejected with code {}", reply.code);
            Err(ControlError::AuthenticationFailed {
                code: reply.code,
                message: reply.message(),
            })
        }
    }

    /// Pick one advertised method (NULL, then COOKIE) and attempt it once.
    pub async fn auto_authenticate(&self) -> Result<()> {
        let info = &self.protocol_info;
        let credential = if info.supports_null() {
            AuthCredential::None
        } else if info.supports_cookie() && info.cookie_file.is_some() {
            AuthCredential::Cookie
        } else if info.supports_password() {
            return Err(ControlError::InvalidArgument(
                "Daemon requires password authentication".to_string(),
            ));
        } else {
            return Err(ControlError::InvalidArgument(format!(
                "No usable authentication method among {:?}",
                info.auth_methods
            )));
        };
        self.authenticate(&credential).await
    }

    // ==================== Status ====================

    /// Query one `GETINFO` key.
    pub async fn get_info(&self, key: &str) -> Result<String> {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ControlError::InvalidArgument(format!(
                "Invalid GETINFO key: '{}'",
                key
            )));
        }
        let reply = self.request(&format_command("GETINFO", &[key]), OK).await?;
        reply.value(key).map(str::to_string).ok_or_else(|| {
            ControlError::Protocol(format!("Key '{}' not found in GETINFO reply", key))
        })
    }

    /// The daemon version.
    pub async fn get_version(&self) -> Result<TorVersion> {
        self.get_info("version").await?.parse()
    }

    /// The daemon's best guess of its external IP address.
    pub async fn get_address(&self) -> Result<String> {
        self.get_info("address").await
    }

    /// Total bytes read by the daemon.
    pub async fn get_bytes_read(&self) -> Result<u64> {
        self.get_number("traffic/read").await
    }

    /// Total bytes written by the daemon.
    pub async fn get_bytes_written(&self) -> Result<u64> {
        self.get_number("traffic/written").await
    }

    /// Path of the daemon's configuration file.
    pub async fn get_config_file(&self) -> Result<PathBuf> {
        self.get_info("config-file").await.map(PathBuf::from)
    }

    /// Process id of the daemon.
    pub async fn get_pid(&self) -> Result<u32> {
        let pid = self.get_number("process/pid").await?;
        u32::try_from(pid).map_err(|_| ControlError::Protocol(format!("Invalid pid: {}", pid)))
    }

    async fn get_number(&self, key: &str) -> Result<u64> {
        let value = self.get_info(key).await?;
        value.trim().parse().map_err(|_| {
            ControlError::Protocol(format!("Expected a number for '{}', got '{}'", key, value))
        })
    }

    // ==================== Signals ====================

    /// Send a signal to the daemon.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.request(&format_command("SIGNAL", &[signal.as_str()]), OK)
            .await?;
        debug!("Sent signal {}", signal);
        Ok(())
    }

    /// Switch to clean circuits.
    pub async fn new_identity(&self) -> Result<()> {
        self.signal(Signal::NewNym).await
    }

    /// Reload the daemon's configuration.
    pub async fn reload(&self) -> Result<()> {
        self.signal(Signal::Reload).await
    }

    // ==================== Onion services ====================

    /// Create an ephemeral onion service.
    ///
    /// On success the onion's service id is set, and so is its private key
    /// when the daemon generated and returned one. On any error the onion is
    /// left as it was.
    pub async fn add_onion(&self, onion: &mut Onion) -> Result<()> {
        let line = onion.add_command()?;
        let reply = self.request(&line, OK).await?;
        onion.apply_add_reply(&reply)?;
        debug!(
            "Added onion service {}",
            onion.service_id.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Remove an onion service by its service id.
    ///
    /// The onion is not modified. Removing the same service twice surfaces
    /// the daemon's rejection of the second attempt.
    pub async fn remove_onion(&self, onion: &Onion) -> Result<()> {
        self.request(&onion.remove_command()?, OK).await?;
        debug!(
            "Removed onion service {}",
            onion.service_id.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Remove an onion service given only its service id.
    pub async fn delete_onion(&self, service_id: &str) -> Result<()> {
        self.request(&delete_command(service_id)?, OK).await?;
        debug!("Removed onion service {}", service_id);
        Ok(())
    }

    /// Send `QUIT` and close the connection.
    ///
    /// Closing an already closed controller is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.closed {
            return Ok(());
        }
        if let Err(e) = transact(&mut session, self.request_timeout, "QUIT").await {
            debug!("QUIT failed: {}", e);
        }
        session.closed = true;
        let _ = session.writer.shutdown().await;
        debug!("Control connection closed");
        Ok(())
    }
}

/// Refuse raw commands the current authentication state does not allow.
fn check_allowed(state: AuthState, line: &str) -> Result<()> {
    let keyword = line.split(' ').next().unwrap_or_default().to_ascii_uppercase();
    if AUTH_COMMANDS.contains(&keyword.as_str()) {
        return Err(ControlError::InvalidArgument(format!(
            "{} is sent by Controller::authenticate",
            keyword
        )));
    }
    match state {
        AuthState::Authenticated => Ok(()),
        _ if keyword == "QUIT" => Ok(()),
        AuthState::Failed => Err(ControlError::InvalidState(
            "Authentication failed; session is unusable".to_string(),
        )),
        // The daemon answers it once before authentication, at connect.
        _ if keyword == "PROTOCOLINFO" => Err(ControlError::InvalidState(
            "PROTOCOLINFO was already exchanged; see Controller::protocol_info".to_string(),
        )),
        _ => Err(ControlError::InvalidState(format!(
            "{} requires authentication",
            keyword
        ))),
    }
}

/// One round trip on the session. Fatal errors invalidate the session.
async fn transact(session: &mut Session, deadline: Option<Duration>, line: &str) -> Result<Reply> {
    if session.in_flight {
        warn!("Control session invalidated: previous command was abandoned mid-reply");
        session.closed = true;
        session.in_flight = false;
    }
    if session.closed {
        return Err(ControlError::ConnectionClosed);
    }
    let encoded = encode_command(line)?;
    trace!("Sending command: {}", redact(line));

    let result = with_deadline(deadline, session.round_trip(&encoded)).await;
    if let Err(e) = &result {
        if e.is_fatal() {
            warn!("Control session invalidated: {}", e);
            session.closed = true;
            session.in_flight = false;
        }
    }
    result
}

async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| ControlError::Timeout)?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_allowed_before_auth() {
        assert!(check_allowed(AuthState::Negotiated, "quit").is_ok());
        assert!(matches!(
            check_allowed(AuthState::Negotiated, "PROTOCOLINFO 1"),
            Err(ControlError::InvalidState(_))
        ));
        assert!(matches!(
            check_allowed(AuthState::Negotiated, "GETINFO version"),
            Err(ControlError::InvalidState(_))
        ));
    }

    #[test]
    fn test_check_allowed_after_failure() {
        assert!(check_allowed(AuthState::Failed, "GETINFO version").is_err());
        assert!(check_allowed(AuthState::Failed, "QUIT").is_ok());
        assert!(check_allowed(AuthState::Authenticated, "ADD_ONION NEW:BEST").is_ok());
        assert!(check_allowed(AuthState::Authenticated, "PROTOCOLINFO 1").is_ok());
    }

    #[test]
    fn test_auth_commands_never_sent_raw() {
        for state in [
            AuthState::Negotiated,
            AuthState::Authenticated,
            AuthState::Failed,
        ] {
            assert!(matches!(
                check_allowed(state, "AUTHENTICATE \"x\""),
                Err(ControlError::InvalidArgument(_))
            ));
            assert!(matches!(
                check_allowed(state, "authchallenge SAFECOOKIE 00"),
                Err(ControlError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let result: Result<()> = with_deadline(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ControlError::Timeout)));

        let result = with_deadline(None, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
