//! Ephemeral onion service model.
//!
//! An [`Onion`] is built client-side with a port mapping and, optionally, a
//! private key. Adding it through the controller fills in the service
//! identifier and, when the daemon generated the key, the key itself.

use crate::error::{ControlError, Result};
use crate::protocol::{format_command, Reply};
use crate::types::OnionAddress;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Concrete private key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Legacy 1024-bit RSA key (16-character addresses).
    Rsa1024,
    /// Ed25519 key (56-character addresses).
    Ed25519V3,
}

impl KeyType {
    /// The key type tag as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa1024 => "RSA1024",
            KeyType::Ed25519V3 => "ED25519-V3",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RSA1024" => Ok(KeyType::Rsa1024),
            "ED25519-V3" => Ok(KeyType::Ed25519V3),
            "NEW" | "BEST" => Err(ControlError::KeyFormat(format!(
                "'{}' requests key generation and is not a key type",
                s
            ))),
            _ => Err(ControlError::KeyFormat(format!("Unknown key type: '{}'", s))),
        }
    }
}

/// Algorithm requested from the daemon when it generates the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyRequest {
    /// Let the daemon pick its preferred algorithm.
    #[default]
    Best,
    /// Ask for a specific algorithm.
    Specific(KeyType),
}

impl KeyRequest {
    /// The argument following `NEW:`.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRequest::Best => "BEST",
            KeyRequest::Specific(key_type) => key_type.as_str(),
        }
    }
}

/// A private key in the daemon's textual form, `<type>:<blob>`.
///
/// This is also the format of key files: split at the first colon, the left
/// side must name a concrete [`KeyType`].
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    key_type: KeyType,
    blob: String,
}

impl PrivateKey {
    /// Create a key from its type and opaque blob.
    pub fn new(key_type: KeyType, blob: impl Into<String>) -> Result<Self> {
        let blob = blob.into();
        if blob.is_empty() {
            return Err(ControlError::KeyFormat("Empty key blob".to_string()));
        }
        if blob.contains(|c: char| c.is_whitespace()) {
            return Err(ControlError::KeyFormat(
                "Key blob contains whitespace".to_string(),
            ));
        }
        Ok(PrivateKey { key_type, blob })
    }

    /// The algorithm that produced this key.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The opaque secret payload.
    pub fn blob(&self) -> &str {
        &self.blob
    }
}

impl FromStr for PrivateKey {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let (key_type, blob) = s.trim().split_once(':').ok_or_else(|| {
            ControlError::KeyFormat("Expected '<keytype>:<key>'".to_string())
        })?;
        PrivateKey::new(key_type.parse()?, blob)
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_type, self.blob)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({}:<redacted>)", self.key_type)
    }
}

/// Flags accepted by ADD_ONION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnionFlag {
    /// Do not return the generated private key.
    DiscardPk,
    /// Keep the service after the control connection closes.
    Detach,
    /// Single-hop (non-anonymous) service.
    NonAnonymous,
    /// Close the circuit when the stream limit is exceeded.
    MaxStreamsCloseCircuit,
}

impl OnionFlag {
    /// The flag name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OnionFlag::DiscardPk => "DiscardPK",
            OnionFlag::Detach => "Detach",
            OnionFlag::NonAnonymous => "NonAnonymous",
            OnionFlag::MaxStreamsCloseCircuit => "MaxStreamsCloseCircuit",
        }
    }
}

/// One hidden service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Onion {
    /// Virtual port to local target (`address:port`). Iteration order is
    /// ascending by virtual port.
    pub ports: BTreeMap<u16, String>,
    /// Service identifier, without the `.onion` suffix.
    pub service_id: Option<String>,
    /// Key used for the service; `None` asks the daemon to generate one.
    pub private_key: Option<PrivateKey>,
    /// Algorithm to request when the daemon generates the key.
    pub key_request: KeyRequest,
    /// Extra ADD_ONION flags.
    pub flags: Vec<OnionFlag>,
}

impl Onion {
    /// Create an onion with no ports and a daemon-generated key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an onion from a port mapping.
    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        Onion {
            ports: ports.into_iter().map(|(p, t)| (p, t.into())).collect(),
            ..Default::default()
        }
    }

    /// Map a virtual port to a local target.
    pub fn port(mut self, virtual_port: u16, target: impl Into<String>) -> Self {
        self.ports.insert(virtual_port, target.into());
        self
    }

    /// Use an existing private key.
    pub fn key(mut self, key: PrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    /// Request a specific algorithm for a generated key.
    pub fn key_request(mut self, request: KeyRequest) -> Self {
        self.key_request = request;
        self
    }

    /// Add an ADD_ONION flag.
    pub fn flag(mut self, flag: OnionFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    /// The display address, if the service identifier is known.
    pub fn address(&self) -> Option<OnionAddress> {
        self.service_id.as_deref().map(OnionAddress::new)
    }

    /// The key argument of ADD_ONION: `NEW:<algorithm>` or `<type>:<blob>`.
    pub fn key_spec(&self) -> String {
        match &self.private_key {
            Some(key) => key.to_string(),
            None => format!("NEW:{}", self.key_request.as_str()),
        }
    }

    /// Build the ADD_ONION command line.
    ///
    /// Port clauses are emitted in ascending virtual-port order so that
    /// equivalent mappings always produce the same command text.
    pub fn add_command(&self) -> Result<String> {
        if self.ports.is_empty() {
            return Err(ControlError::InvalidArgument(
                "Onion has no port mappings".to_string(),
            ));
        }

        let mut args = vec![self.key_spec()];

        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(OnionFlag::as_str).collect();
            args.push(format!("Flags={}", flags.join(",")));
        }

        for (virtual_port, target) in &self.ports {
            if *virtual_port == 0 {
                return Err(ControlError::InvalidArgument(
                    "Virtual port must be positive".to_string(),
                ));
            }
            if target.is_empty() || target.contains(char::is_whitespace) {
                return Err(ControlError::InvalidArgument(format!(
                    "Invalid target for port {}: '{}'",
                    virtual_port, target
                )));
            }
            args.push(format!("Port={},{}", virtual_port, target));
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("ADD_ONION", &arg_refs))
    }

    /// Fill in the service identifier and generated key from a successful
    /// ADD_ONION reply.
    ///
    /// `ServiceID=` is mandatory. `PrivateKey=` only appears when the daemon
    /// generated a key it was allowed to disclose; when it is absent the key
    /// fields are left unset. On error the onion is left untouched.
    pub fn apply_add_reply(&mut self, reply: &Reply) -> Result<()> {
        let mut service_id = None;
        let mut private_key = None;

        for line in &reply.lines {
            if let Some(id) = line.text.strip_prefix("ServiceID=") {
                if id.is_empty() {
                    return Err(ControlError::Protocol("Empty ServiceID in reply".to_string()));
                }
                service_id = Some(id.to_string());
            } else if let Some(key) = line.text.strip_prefix("PrivateKey=") {
                let key: PrivateKey = key.parse().map_err(|e| {
                    ControlError::Protocol(format!("Invalid PrivateKey in reply: {}", e))
                })?;
                private_key = Some(key);
            }
        }

        let service_id = service_id.ok_or_else(|| {
            ControlError::Protocol("ADD_ONION reply is missing ServiceID".to_string())
        })?;

        self.service_id = Some(service_id);
        if self.private_key.is_none() {
            self.private_key = private_key;
        }
        Ok(())
    }

    /// Build the DEL_ONION command line.
    pub fn remove_command(&self) -> Result<String> {
        let service_id = self.service_id.as_deref().ok_or_else(|| {
            ControlError::InvalidArgument("Onion has no ServiceID".to_string())
        })?;
        delete_command(service_id)
    }
}

/// Build a DEL_ONION command line for a service identifier.
pub fn delete_command(service_id: &str) -> Result<String> {
    if service_id.is_empty() || !service_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ControlError::InvalidArgument(format!(
            "Invalid ServiceID: '{}'",
            service_id
        )));
    }
    Ok(format_command("DEL_ONION", &[service_id]))
}
