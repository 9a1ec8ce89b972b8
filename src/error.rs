//! Error types for the control client.
//!
//! Every fallible operation in this crate returns [`ControlError`]. Errors are
//! always handed back to the immediate caller; nothing is retried internally.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for all control operations.
#[derive(Error, Debug)]
pub enum ControlError {
    /// I/O error on the control connection. Fatal to the controller.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The control endpoint could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The controller was already closed, by either side or after a fatal error.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed or truncated reply framing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with a code other than the expected one.
    #[error("Command rejected (code {code}): {message}")]
    CommandRejected {
        /// The status code returned by the daemon.
        code: u16,
        /// The daemon's reply text, verbatim.
        message: String,
    },

    /// The daemon rejected an AUTHENTICATE command.
    #[error("Authentication failed (code {code}): {message}")]
    AuthenticationFailed {
        /// The status code returned by the daemon.
        code: u16,
        /// The daemon's rejection text, verbatim.
        message: String,
    },

    /// The authentication cookie file could not be read.
    #[error("Failed to read cookie file '{}': {source}", path.display())]
    CookieFile {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error (usually a permissions problem).
        #[source]
        source: io::Error,
    },

    /// Key material is malformed or has the wrong size for its family.
    #[error("Invalid key: {0}")]
    KeyFormat(String),

    /// Invalid argument provided to a command.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The command is not valid in the controller's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A caller-configured deadline expired.
    #[error("Operation timed out")]
    Timeout,
}

impl ControlError {
    /// The daemon status code carried by this error, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            ControlError::CommandRejected { code, .. }
            | ControlError::AuthenticationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error leaves the controller unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControlError::Io(_)
                | ControlError::Connection(_)
                | ControlError::ConnectionClosed
                | ControlError::Protocol(_)
                | ControlError::Timeout
        )
    }
}

/// Result type alias for control operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Reply status codes defined by the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 250 - OK
    Ok = 250,
    /// 251 - Operation was unnecessary
    OperationUnnecessary = 251,
    /// 451 - Resource exhausted
    ResourceExhausted = 451,
    /// 500 - Syntax error: protocol
    SyntaxErrorProtocol = 500,
    /// 510 - Unrecognized command
    UnrecognizedCommand = 510,
    /// 511 - Unimplemented command
    UnimplementedCommand = 511,
    /// 512 - Syntax error in command argument
    SyntaxErrorArgument = 512,
    /// 513 - Unrecognized command argument
    UnrecognizedArgument = 513,
    /// 514 - Authentication required
    AuthenticationRequired = 514,
    /// 515 - Bad authentication
    BadAuthentication = 515,
    /// 550 - Unspecified error
    UnspecifiedError = 550,
    /// 551 - Internal error
    InternalError = 551,
    /// 552 - Unrecognized entity
    UnrecognizedEntity = 552,
    /// 553 - Invalid configuration value
    InvalidConfigValue = 553,
    /// 554 - Invalid descriptor
    InvalidDescriptor = 554,
    /// 555 - Unmanaged entity
    UnmanagedEntity = 555,
    /// 650 - Asynchronous event notification
    AsyncEvent = 650,
    /// Unknown status code
    Unknown = 0,
}

impl StatusCode {
    /// Parse a status code from a u16 value.
    pub fn from_u16(code: u16) -> Self {
        match code {
            250 => StatusCode::Ok,
            251 => StatusCode::OperationUnnecessary,
            451 => StatusCode::ResourceExhausted,
            500 => StatusCode::SyntaxErrorProtocol,
            510 => StatusCode::UnrecognizedCommand,
            511 => StatusCode::UnimplementedCommand,
            512 => StatusCode::SyntaxErrorArgument,
            513 => StatusCode::UnrecognizedArgument,
            514 => StatusCode::AuthenticationRequired,
            515 => StatusCode::BadAuthentication,
            550 => StatusCode::UnspecifiedError,
            551 => StatusCode::InternalError,
            552 => StatusCode::UnrecognizedEntity,
            553 => StatusCode::InvalidConfigValue,
            554 => StatusCode::InvalidDescriptor,
            555 => StatusCode::UnmanagedEntity,
            650 => StatusCode::AsyncEvent,
            _ => StatusCode::Unknown,
        }
    }

    /// Check if this status code indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::OperationUnnecessary)
    }

    /// Get the numeric value of this status code.
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::from_u16(code)
    }
}
