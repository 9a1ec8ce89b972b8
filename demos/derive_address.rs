//! Example: Derive an onion address offline
//!
//! Reads a key file in `<type>:<key>` form (as saved by the onion_service
//! example) and prints the address it serves, without contacting Tor.
//! Without an argument a fixed demo seed is used.
//!
//! Run with: cargo run --example derive_address -- [KEYFILE]

use onion_control::{KeyMaterial, OnionAddress, PrivateKey, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let key = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            let private: PrivateKey = text.parse()?;
            KeyMaterial::from_private_key(&private)?
        }
        None => KeyMaterial::ed25519_from_seed(&[0x42; 32])?,
    };

    let address = OnionAddress::new(key.service_id()?);
    println!("Key type: {}", key.key_type());
    println!("Address:  {}", address);
    println!("Key:      {}", key.to_private_key()?);

    Ok(())
}
