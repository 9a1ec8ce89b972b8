//! # onion-control
//!
//! An async client for the Tor control protocol, focused on ephemeral onion
//! services, plus offline derivation of onion addresses from keys.
//!
//! With this crate you can:
//!
//! - Negotiate and authenticate (NULL, password, cookie)
//! - Create and remove ephemeral onion services
//! - Compute v3 (Ed25519) and legacy v2 (RSA1024) service ids without a daemon
//! - Query daemon status and send signals (NEWNYM, RELOAD, ...)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use onion_control::{Controller, Onion, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Connect to 127.0.0.1:9051; PROTOCOLINFO is exchanged on connect
//!     let controller = Controller::connect_default().await?;
//!     controller.auto_authenticate().await?;
//!
//!     let mut onion = Onion::new().port(80, "127.0.0.1:8080");
//!     controller.add_onion(&mut onion).await?;
//!     println!("Serving on {}", onion.address().unwrap());
//!
//!     controller.remove_onion(&onion).await?;
//!     controller.close().await
//! }
//! ```
//!
//! ## Authentication
//!
//! ```rust,no_run
//! use onion_control::{AuthCredential, Controller, ControllerConfig};
//!
//! # async fn example() -> onion_control::Result<()> {
//! let controller = Controller::connect_default().await?;
//! controller.authenticate(&AuthCredential::password("secret")).await?;
//!
//! // Or configure everything up front
//! let config = ControllerConfig::new()
//!     .address("127.0.0.1:9051")
//!     .cookie_file("/run/tor/control.authcookie");
//! let controller = Controller::connect_with_config(&config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Offline address derivation
//!
//! ```rust
//! use onion_control::keys::{onion_from_key, KeyMaterial};
//!
//! let seed = [7u8; 32];
//! let key = KeyMaterial::ed25519_from_seed(&seed).unwrap();
//! let onion = onion_from_key(&key, [(80, "127.0.0.1:8080")]).unwrap();
//! assert_eq!(onion.service_id.as_deref().map(str::len), Some(56));
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils`: export `test_utils` (scripted control-port stub and
//!   canned replies) for downstream tests

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod keys;
pub mod onion;
pub mod protocol;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export main types for convenience
pub use auth::{AuthCredential, AuthMethod, AuthState, ProtocolInfo};
pub use config::ControllerConfig;
pub use connection::Controller;
pub use error::{ControlError, Result, StatusCode};
pub use keys::{onion_from_key, service_id_from_ed25519, service_id_from_rsa, KeyMaterial, PublicKey};
pub use onion::{KeyRequest, KeyType, Onion, OnionFlag, PrivateKey};
pub use protocol::{Reply, ReplyLine};
pub use types::{OnionAddress, Signal, TorVersion};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Control protocol version requested in PROTOCOLINFO.
pub const PROTOCOL_VERSION: u32 = 1;
