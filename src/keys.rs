//! Offline onion address derivation.
//!
//! Service identifiers are computed from public keys without talking to the
//! daemon:
//!
//! * Ed25519 (v3): `base32(pubkey || SHA3-256(".onion checksum" || pubkey || 0x03)[..2] || 0x03)`,
//!   56 characters.
//! * RSA1024 (v2): `base32(SHA1(PKCS#1 DER public key)[..10])`, 16 characters.
//!
//! Both are lowercased. The `.onion` suffix is not part of the identifier.

use crate::error::{ControlError, Result};
use crate::onion::{KeyType, Onion, PrivateKey};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::hazmat::ExpandedSecretKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha512};
use sha3::Sha3_256;
use std::fmt;

/// Version byte of current-generation addresses.
const ONION_VERSION: u8 = 0x03;

/// Domain separation label of the address checksum.
const CHECKSUM_LABEL: &[u8] = b".onion checksum";

/// Ed25519 public key length.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 seed length.
pub const ED25519_SEED_LEN: usize = 32;

/// Length of the expanded Ed25519 secret the daemon exchanges.
pub const ED25519_EXPANDED_KEY_LEN: usize = 64;

/// Modulus size of legacy keys, in bytes.
pub const RSA1024_MODULUS_LEN: usize = 128;

/// Bytes of the SHA-1 digest kept for legacy identifiers.
const RSA_DIGEST_PREFIX_LEN: usize = 10;

const BASE32: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// A public key of either supported family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// Ed25519 public key bytes.
    Ed25519([u8; ED25519_PUBLIC_KEY_LEN]),
    /// 1024-bit RSA public key.
    Rsa1024(RsaPublicKey),
}

impl PublicKey {
    /// Parse an Ed25519 public key, which must be exactly 32 bytes.
    pub fn ed25519(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; ED25519_PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            ControlError::KeyFormat(format!(
                "Ed25519 public key must be {} bytes, got {}",
                ED25519_PUBLIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(PublicKey::Ed25519(bytes))
    }

    /// Parse a PKCS#1 DER encoded RSA public key with a 1024-bit modulus.
    pub fn rsa1024_from_der(der: &[u8]) -> Result<Self> {
        let key = RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| ControlError::KeyFormat(format!("Invalid RSA public key: {}", e)))?;
        check_rsa_size(key.size())?;
        Ok(PublicKey::Rsa1024(key))
    }

    /// The key family.
    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519(_) => KeyType::Ed25519V3,
            PublicKey::Rsa1024(_) => KeyType::Rsa1024,
        }
    }

    /// Compute the service identifier for this key.
    pub fn service_id(&self) -> Result<String> {
        match self {
            PublicKey::Ed25519(bytes) => Ok(ed25519_service_id(bytes)),
            PublicKey::Rsa1024(key) => rsa_service_id(key),
        }
    }
}

fn check_rsa_size(size: usize) -> Result<()> {
    if size != RSA1024_MODULUS_LEN {
        return Err(ControlError::KeyFormat(format!(
            "RSA key must be 1024 bits, got {}",
            size * 8
        )));
    }
    Ok(())
}

fn ed25519_service_id(public_key: &[u8; ED25519_PUBLIC_KEY_LEN]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(CHECKSUM_LABEL);
    hasher.update(public_key);
    hasher.update([ONION_VERSION]);
    let checksum = hasher.finalize();

    let mut address = [0u8; ED25519_PUBLIC_KEY_LEN + 3];
    address[..32].copy_from_slice(public_key);
    address[32..34].copy_from_slice(&checksum[..2]);
    address[34] = ONION_VERSION;

    base32::encode(BASE32, &address).to_lowercase()
}

fn rsa_service_id(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| ControlError::KeyFormat(format!("Cannot encode RSA public key: {}", e)))?;
    let digest = Sha1::digest(der.as_bytes());
    Ok(base32::encode(BASE32, &digest[..RSA_DIGEST_PREFIX_LEN]).to_lowercase())
}

/// Service identifier for a raw Ed25519 public key.
pub fn service_id_from_ed25519(public_key: &[u8]) -> Result<String> {
    PublicKey::ed25519(public_key)?.service_id()
}

/// Service identifier for a PKCS#1 DER encoded 1024-bit RSA public key.
pub fn service_id_from_rsa(der: &[u8]) -> Result<String> {
    PublicKey::rsa1024_from_der(der)?.service_id()
}

/// Recover the Ed25519 public key from a 56-character service identifier,
/// checking the version byte and checksum.
pub fn ed25519_from_service_id(service_id: &str) -> Result<[u8; ED25519_PUBLIC_KEY_LEN]> {
    let decoded = base32::decode(BASE32, &service_id.to_uppercase())
        .ok_or_else(|| ControlError::KeyFormat("Service ID is not base32".to_string()))?;
    if decoded.len() != ED25519_PUBLIC_KEY_LEN + 3 {
        return Err(ControlError::KeyFormat(format!(
            "Service ID decodes to {} bytes, expected 35",
            decoded.len()
        )));
    }
    if decoded[34] != ONION_VERSION {
        return Err(ControlError::KeyFormat(format!(
            "Unsupported address version {}",
            decoded[34]
        )));
    }

    let mut public_key = [0u8; ED25519_PUBLIC_KEY_LEN];
    public_key.copy_from_slice(&decoded[..32]);
    if ed25519_service_id(&public_key) != service_id.to_lowercase() {
        return Err(ControlError::KeyFormat("Service ID checksum mismatch".to_string()));
    }
    Ok(public_key)
}

/// A private key of either supported family, with its public half.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Ed25519 key in the daemon's expanded form.
    Ed25519 {
        /// Clamped scalar followed by the nonce prefix.
        expanded: [u8; ED25519_EXPANDED_KEY_LEN],
        /// Matching public key.
        public: [u8; ED25519_PUBLIC_KEY_LEN],
    },
    /// 1024-bit RSA private key.
    Rsa1024(Box<RsaPrivateKey>),
}

impl KeyMaterial {
    /// Build an Ed25519 key from a 32-byte seed.
    pub fn ed25519_from_seed(seed: &[u8]) -> Result<Self> {
        let seed: [u8; ED25519_SEED_LEN] = seed.try_into().map_err(|_| {
            ControlError::KeyFormat(format!(
                "Ed25519 seed must be {} bytes, got {}",
                ED25519_SEED_LEN,
                seed.len()
            ))
        })?;

        let public = SigningKey::from_bytes(&seed).verifying_key().to_bytes();

        let mut expanded = [0u8; ED25519_EXPANDED_KEY_LEN];
        expanded.copy_from_slice(&Sha512::digest(seed));
        expanded[0] &= 248;
        expanded[31] &= 127;
        expanded[31] |= 64;

        Ok(KeyMaterial::Ed25519 { expanded, public })
    }

    /// Build an Ed25519 key from its 64-byte expanded form.
    pub fn ed25519_from_expanded(bytes: &[u8]) -> Result<Self> {
        let expanded: [u8; ED25519_EXPANDED_KEY_LEN] = bytes.try_into().map_err(|_| {
            ControlError::KeyFormat(format!(
                "Expanded Ed25519 key must be {} bytes, got {}",
                ED25519_EXPANDED_KEY_LEN,
                bytes.len()
            ))
        })?;
        let secret = ExpandedSecretKey::from_bytes(&expanded);
        let public = VerifyingKey::from(&secret).to_bytes();
        Ok(KeyMaterial::Ed25519 { expanded, public })
    }

    /// Parse a PKCS#1 DER encoded RSA private key with a 1024-bit modulus.
    pub fn rsa1024_from_der(der: &[u8]) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| ControlError::KeyFormat(format!("Invalid RSA private key: {}", e)))?;
        check_rsa_size(key.size())?;
        Ok(KeyMaterial::Rsa1024(Box::new(key)))
    }

    /// Decode a key in the daemon's `<type>:<base64>` form.
    pub fn from_private_key(key: &PrivateKey) -> Result<Self> {
        let bytes = BASE64
            .decode(key.blob())
            .map_err(|e| ControlError::KeyFormat(format!("Key blob is not base64: {}", e)))?;
        match key.key_type() {
            KeyType::Ed25519V3 => Self::ed25519_from_expanded(&bytes),
            KeyType::Rsa1024 => Self::rsa1024_from_der(&bytes),
        }
    }

    /// The key family.
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyMaterial::Ed25519 { .. } => KeyType::Ed25519V3,
            KeyMaterial::Rsa1024(_) => KeyType::Rsa1024,
        }
    }

    /// The public half.
    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyMaterial::Ed25519 { public, .. } => PublicKey::Ed25519(*public),
            KeyMaterial::Rsa1024(key) => PublicKey::Rsa1024(key.to_public_key()),
        }
    }

    /// The service identifier of this key.
    pub fn service_id(&self) -> Result<String> {
        self.public_key().service_id()
    }

    /// Serialize in the same textual form the daemon returns from ADD_ONION.
    pub fn to_private_key(&self) -> Result<PrivateKey> {
        let blob = match self {
            KeyMaterial::Ed25519 { expanded, .. } => BASE64.encode(expanded),
            KeyMaterial::Rsa1024(key) => {
                let der = key.to_pkcs1_der().map_err(|e| {
                    ControlError::KeyFormat(format!("Cannot encode RSA private key: {}", e))
                })?;
                BASE64.encode(der.as_bytes())
            }
        };
        PrivateKey::new(self.key_type(), blob)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Ed25519 { public, .. } => f
                .debug_struct("Ed25519")
                .field("public", &hex::encode(public))
                .finish_non_exhaustive(),
            KeyMaterial::Rsa1024(_) => f.write_str("Rsa1024(<redacted>)"),
        }
    }
}

/// Build an [`Onion`] for `key` without contacting the daemon.
///
/// The service identifier and private key are filled in, so passing the
/// result to `Controller::add_onion` starts the service under the expected
/// address. Ports are validated when the add command is built.
pub fn onion_from_key<I, S>(key: &KeyMaterial, ports: I) -> Result<Onion>
where
    I: IntoIterator<Item = (u16, S)>,
    S: Into<String>,
{
    let mut onion = Onion::with_ports(ports);
    onion.service_id = Some(key.service_id()?);
    onion.private_key = Some(key.to_private_key()?);
    Ok(onion)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 8032 test 1 key pair.
    const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const PUBLIC: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";
    const V3_ID: &str = "25njqamcweflpvkl73j4szahhihoc4xt3ktcgjnpaingr5yhkenl5sid";
    const EXPANDED_B64: &str = "MHyDhk8oM8tCei7xwAoBPP3/J2jZgMCjpSDwBpBN6U+bTwr+KAt0aneGhOdUQlAgV7dHOgPwj5b1o46Sh+Afjw==";

    const RSA_PUBLIC_B64: &str = "MIGJAoGBAMAWbtOZcNix4jn2SVTYdfbYkrWeBHALILtI+htpMM+9BLNPtu6xf35UseWYrkBnIKwfxmZ9OTYqsmVlnpcwx63a9VAIE/kT9N3TPwwa8wB44GxD93vA6np8ws02+zN7GLIOxExJLCIJFXjqCeirBQWaTzCJLcwrLuPVrZgvASORAgMBAAE=";
    const RSA_PRIVATE_B64: &str = "MIICWwIBAAKBgQDAFm7TmXDYseI59klU2HX22JK1ngRwCyC7SPobaTDPvQSzT7busX9+VLHlmK5AZyCsH8ZmfTk2KrJlZZ6XMMet2vVQCBP5E/Td0z8MGvMAeOBsQ/d7wOp6fMLNNvszexiyDsRMSSwiCRV46gnoqwUFmk8wiS3MKy7j1a2YLwEjkQIDAQABAoGAFWSqNTDaq5esLW5rnmJ5SOO3+zg9IEls/M7U5CakBA72Lg5LvmvQWj6OjZaimZOixOjJDPMXYxwAQGC/9/C73ER4NWg5v7QOU2ShtyZ+QNp+PiNHhqkxqjKYtcLStUj9c7pfYOUy79HbslJYnB2JjVYS+KX+OwY1PKYvnRg0vK0CQQDx/tJm+PMw0czcFYRXifYWEGmbB8N8++zdvIfg/GmwpUqu5MSuwD1J2XzWG2SHrJaqRcV22ZYdXsBz/xnBESSXAkEAyzQ5XIgjdfzkCb9NCxYCidiC1aGvDQfcxb+n34lJ9ZCqMf5ZiB58cjr2FC37jrdqkQwp6Brdnmk8+GHiShk2FwJAXh1Mlt+bNRFjKvTzU1hEbLBVYgXS8XjI1jPMZKPGNv0R3pL6Kzx4mZAMDPj6UAm/TtlzwpU83I9NKc+8pGmWYQJASR2Aaj/96m1VLACuWwfPYAQMh4vGrbyffnPIlpESkI49/wES+/xkMMHwWzB0bFSovooO5hoMlfwt2P13a8wIfwJAAWRuUTgMWOWw3Wqe+CHbbPKp+VSIn91tMhikfziGaypQLnlgKcbeGAcr09gc4XmD9zPcieVDQc10CpChKSfTkA==";
    const RSA_ID: &str = "pjhkh7m3uyk7qwwt";
    const RSA512_PUBLIC_B64: &str = "MEgCQQDFKETN41VhAd28h6aJ4s1Eiv2H8mJnfIYidp9BM/XN09YWcMPieqwI/4AOJ09iUrb4hBl3Yp5vn4EWex9l+cpbAgMBAAE=";

    fn b64(s: &str) -> Vec<u8> {
        BASE64.decode(s).unwrap()
    }

    #[test]
    fn test_v3_golden_vector() {
        let id = service_id_from_ed25519(&hex::decode(PUBLIC).unwrap()).unwrap();
        assert_eq!(id, V3_ID);
        assert_eq!(id.len(), 56);
    }

    #[test]
    fn test_v3_address_decodes_to_public_key() {
        let public = ed25519_from_service_id(V3_ID).unwrap();
        assert_eq!(hex::encode(public), PUBLIC);

        let mut tampered = V3_ID.to_string();
        tampered.replace_range(0..1, "a");
        assert!(ed25519_from_service_id(&tampered).is_err());
        assert!(ed25519_from_service_id("pjhkh7m3uyk7qwwt").is_err());
    }

    #[test]
    fn test_ed25519_wrong_lengths_rejected() {
        for len in [0usize, 1, 31, 33, 64] {
            let err = service_id_from_ed25519(&vec![7u8; len]).unwrap_err();
            assert!(matches!(err, ControlError::KeyFormat(_)), "len {}", len);
            assert!(matches!(
                KeyMaterial::ed25519_from_seed(&vec![7u8; len]),
                Err(ControlError::KeyFormat(_))
            ));
        }
        for len in [0usize, 32, 63, 65] {
            assert!(matches!(
                KeyMaterial::ed25519_from_expanded(&vec![7u8; len]),
                Err(ControlError::KeyFormat(_))
            ));
        }
    }

    #[test]
    fn test_ed25519_from_seed() {
        let key = KeyMaterial::ed25519_from_seed(&hex::decode(SEED).unwrap()).unwrap();
        assert_eq!(key.key_type(), KeyType::Ed25519V3);
        assert_eq!(key.public_key().service_id().unwrap(), V3_ID);

        let private = key.to_private_key().unwrap();
        assert_eq!(private.to_string(), format!("ED25519-V3:{}", EXPANDED_B64));
    }

    #[test]
    fn test_ed25519_from_daemon_key() {
        let private: PrivateKey = format!("ED25519-V3:{}", EXPANDED_B64).parse().unwrap();
        let key = KeyMaterial::from_private_key(&private).unwrap();
        assert_eq!(key.service_id().unwrap(), V3_ID);
        assert_eq!(key.to_private_key().unwrap(), private);
    }

    #[test]
    fn test_v2_golden_vector() {
        let id = service_id_from_rsa(&b64(RSA_PUBLIC_B64)).unwrap();
        assert_eq!(id, RSA_ID);
        assert_eq!(id.len(), 16);
    }

    #[test]
    fn test_rsa_private_key_round_trip() {
        let private: PrivateKey = format!("RSA1024:{}", RSA_PRIVATE_B64).parse().unwrap();
        let key = KeyMaterial::from_private_key(&private).unwrap();
        assert_eq!(key.key_type(), KeyType::Rsa1024);
        assert_eq!(key.service_id().unwrap(), RSA_ID);

        let reencoded = KeyMaterial::from_private_key(&key.to_private_key().unwrap()).unwrap();
        assert_eq!(reencoded.service_id().unwrap(), RSA_ID);
    }

    #[test]
    fn test_rsa_wrong_size_rejected() {
        let err = service_id_from_rsa(&b64(RSA512_PUBLIC_B64)).unwrap_err();
        assert!(matches!(err, ControlError::KeyFormat(_)));
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn test_rsa_malformed_der_rejected() {
        let der = b64(RSA_PUBLIC_B64);
        for len in [0usize, 1, 16, der.len() - 1] {
            assert!(matches!(
                service_id_from_rsa(&der[..len]),
                Err(ControlError::KeyFormat(_))
            ));
        }
        assert!(KeyMaterial::rsa1024_from_der(&der).is_err());
    }

    #[test]
    fn test_from_private_key_rejects_bad_blob() {
        let not_base64 = PrivateKey::new(KeyType::Ed25519V3, "!!!").unwrap();
        assert!(KeyMaterial::from_private_key(&not_base64).is_err());

        let short = PrivateKey::new(KeyType::Ed25519V3, BASE64.encode([1u8; 32])).unwrap();
        assert!(matches!(
            KeyMaterial::from_private_key(&short),
            Err(ControlError::KeyFormat(_))
        ));
    }

    #[test]
    fn test_onion_from_key() {
        let key = KeyMaterial::ed25519_from_seed(&hex::decode(SEED).unwrap()).unwrap();
        let onion = onion_from_key(&key, [(443, "127.0.0.1:8443"), (80, "127.0.0.1:8080")]).unwrap();

        assert_eq!(onion.service_id.as_deref(), Some(V3_ID));
        assert_eq!(
            onion.add_command().unwrap(),
            format!(
                "ADD_ONION ED25519-V3:{} Port=80,127.0.0.1:8080 Port=443,127.0.0.1:8443",
                EXPANDED_B64
            )
        );
    }

    #[test]
    fn test_key_material_debug_redacts_secret() {
        let key = KeyMaterial::ed25519_from_seed(&hex::decode(SEED).unwrap()).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains(PUBLIC));
        assert!(!debug.contains("expanded"));
    }
}
