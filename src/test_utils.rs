//! # Test utilities
//!
//! A scripted control-port stub, a reply builder and canned replies for
//! testing code that drives a [`crate::Controller`].
//!
//! Enable this module outside of this crate's own tests with the
//! `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! onion-control = { version = "0.1", features = ["test-utils"] }
//! ```
//!
//! ## Mock daemon
//!
//! ```rust,ignore
//! use onion_control::test_utils::{fixtures, Action, MockDaemon};
//! use onion_control::Controller;
//!
//! #[tokio::test]
//! async fn test_with_mock_daemon() {
//!     let daemon = MockDaemon::start(vec![
//!         Action::reply(fixtures::protocolinfo_null()),
//!         Action::reply(fixtures::ok()),
//!     ])
//!     .await
//!     .unwrap();
//!
//!     let controller = Controller::connect(&daemon.address()).await.unwrap();
//!     controller.auto_authenticate().await.unwrap();
//!     assert_eq!(daemon.received().await, ["PROTOCOLINFO 1", "AUTHENTICATE"]);
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// What the stub does after receiving one command line.
#[derive(Debug, Clone)]
pub enum Action {
    /// Write this raw text (CRLF-terminated lines).
    Reply(String),
    /// Write this raw text, possibly a partial reply, then hang up.
    Close(String),
    /// Never answer; keep the connection open.
    Stall,
}

impl Action {
    /// Answer with `text`.
    pub fn reply(text: impl Into<String>) -> Self {
        Action::Reply(text.into())
    }

    /// Answer with `text` and close the connection.
    pub fn close(text: impl Into<String>) -> Self {
        Action::Close(text.into())
    }
}

/// A single-connection control port stub on `127.0.0.1`.
///
/// Each received line is recorded and answered by the next [`Action`] of the
/// script. The connection is closed once the script runs out.
pub struct MockDaemon {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockDaemon {
    /// Bind an ephemeral port and serve `script` to the first client.
    pub async fn start(script: Vec<Action>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        let handle = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            for action in script {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                log.lock()
                    .await
                    .push(line.trim_end_matches(['\r', '\n']).to_string());

                match action {
                    Action::Reply(text) => {
                        if write_half.write_all(text.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Action::Close(text) => {
                        let _ = write_half.write_all(text.as_bytes()).await;
                        let _ = write_half.shutdown().await;
                        return;
                    }
                    Action::Stall => std::future::pending::<()>().await,
                }
            }
        });

        Ok(Self {
            addr,
            received,
            handle,
        })
    }

    /// The `host:port` the stub listens on.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Lines received so far, without terminators.
    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Canned daemon replies.
pub mod fixtures {
    /// Cookie path advertised by [`protocolinfo_response`].
    pub const COOKIE_PATH: &str = "/var/run/tor/control.authcookie";

    /// PROTOCOLINFO reply advertising every method and a cookie file.
    pub fn protocolinfo_response() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL,HASHEDPASSWORD,COOKIE,SAFECOOKIE COOKIEFILE=\"/var/run/tor/control.authcookie\"\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// PROTOCOLINFO reply of a daemon without authentication.
    pub fn protocolinfo_null() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// PROTOCOLINFO reply of a password-protected daemon.
    pub fn protocolinfo_password() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=HASHEDPASSWORD\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// PROTOCOLINFO reply advertising cookie authentication at `path`.
    pub fn protocolinfo_cookie(path: &str) -> String {
        format!(
            "250-PROTOCOLINFO 1\r\n\
             250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE={}\r\n\
             250-VERSION Tor=\"0.4.8.12\"\r\n\
             250 OK\r\n",
            crate::protocol::quote(path)
        )
    }

    /// Plain success.
    pub fn ok() -> &'static str {
        "250 OK\r\n"
    }

    /// Rejected credentials.
    pub fn auth_failed() -> &'static str {
        "515 Authentication failed: Password did not match HashedControlPassword value from configuration\r\n"
    }

    /// GETINFO version reply.
    pub fn version_response() -> &'static str {
        "250-version=0.4.8.12 (git-abc123)\r\n\
         250 OK\r\n"
    }

    /// ADD_ONION reply with a generated key.
    pub fn add_onion_response(service_id: &str, private_key: &str) -> String {
        format!(
            "250-ServiceID={}\r\n250-PrivateKey={}\r\n250 OK\r\n",
            service_id, private_key
        )
    }

    /// DEL_ONION reply for an unknown service.
    pub fn unknown_onion() -> &'static str {
        "552 Unknown Onion Service id\r\n"
    }

    /// Reply to an unknown command.
    pub fn unrecognized_command() -> &'static str {
        "510 Unrecognized command \"BOGUS\"\r\n"
    }
}

/// Control protocol reply builder.
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    lines: Vec<String>,
}

impl MockReply {
    /// Create a new empty reply builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single `250 OK` line.
    pub fn ok() -> Self {
        Self::new().finish()
    }

    /// A single error line.
    pub fn error(code: u16, message: &str) -> Self {
        Self {
            lines: vec![format!("{} {}", code, message)],
        }
    }

    /// Add a `250-` line.
    pub fn line(mut self, text: &str) -> Self {
        self.lines.push(format!("250-{}", text));
        self
    }

    /// Add a `250+key=` data block, doubling leading dots.
    pub fn data(mut self, key: &str, body: &[&str]) -> Self {
        self.lines.push(format!("250+{}=", key));
        for line in body {
            if line.starts_with('.') {
                self.lines.push(format!(".{}", line));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Add the final `250 OK` line.
    pub fn finish(mut self) -> Self {
        self.lines.push("250 OK".to_string());
        self
    }

    /// Build the reply as wire text.
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{}\r\n", l)).collect()
    }
}

impl From<MockReply> for Action {
    fn from(reply: MockReply) -> Self {
        Action::Reply(reply.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_reply;

    #[test]
    fn test_mock_reply_ok() {
        assert_eq!(MockReply::ok().build(), "250 OK\r\n");
        assert_eq!(
            MockReply::error(552, "Unknown option").build(),
            "552 Unknown option\r\n"
        );
    }

    #[test]
    fn test_mock_reply_with_lines() {
        let reply = MockReply::new()
            .line("version=0.4.8.12")
            .line("config-file=/etc/tor/torrc")
            .finish();
        assert_eq!(
            reply.build(),
            "250-version=0.4.8.12\r\n250-config-file=/etc/tor/torrc\r\n250 OK\r\n"
        );
    }

    #[tokio::test]
    async fn test_mock_reply_data_block_decodes() {
        let text = MockReply::new()
            .data("config-text", &["SocksPort 0", ".hidden"])
            .finish()
            .build();
        let reply = read_reply(&mut text.as_bytes()).await.unwrap();
        assert_eq!(reply.value("config-text"), Some("SocksPort 0\n.hidden"));
    }

    #[tokio::test]
    async fn test_mock_daemon_records_lines() {
        use tokio::io::AsyncReadExt;

        let daemon = MockDaemon::start(vec![Action::reply(fixtures::ok())])
            .await
            .unwrap();
        let mut stream = tokio::net::TcpStream::connect(daemon.address()).await.unwrap();
        stream.write_all(b"GETINFO version\r\n").await.unwrap();

        let mut answer = String::new();
        stream.read_to_string(&mut answer).await.unwrap();
        assert_eq!(answer, "250 OK\r\n");
        assert_eq!(daemon.received().await, ["GETINFO version"]);
    }
}
