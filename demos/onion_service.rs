//! Example: Create an onion service
//!
//! Maps virtual port 80 to 127.0.0.1:8080. If a key file is given and
//! exists, its `<type>:<key>` content is reused so the address stays the
//! same across runs; otherwise a new key is generated and written there.
//!
//! Run with: cargo run --example onion_service -- [KEYFILE]

use onion_control::{Controller, ControllerConfig, KeyRequest, KeyType, Onion, PrivateKey, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let key_file = std::env::args().nth(1).map(PathBuf::from);

    let mut onion = Onion::new()
        .port(80, "127.0.0.1:8080")
        .key_request(KeyRequest::Specific(KeyType::Ed25519V3));

    if let Some(path) = key_file.as_ref().filter(|p| p.exists()) {
        let key: PrivateKey = tokio::fs::read_to_string(path).await?.parse()?;
        println!("Using {} key from {}", key.key_type(), path.display());
        onion = onion.key(key);
    }

    let config = ControllerConfig::from_env()?;
    let controller = Controller::connect_with_config(&config).await?;
    println!("Connected and authenticated!\n");

    controller.add_onion(&mut onion).await?;
    if let Some(address) = onion.address() {
        println!("Onion service created!");
        println!("  URL: http://{}", address);
    }

    if let (Some(path), Some(key)) = (key_file.as_ref(), onion.private_key.as_ref()) {
        if !path.exists() {
            tokio::fs::write(path, key.to_string()).await?;
            println!("  Key saved to {}", path.display());
        }
    }

    println!("\nMake sure you have a web server running on 127.0.0.1:8080");
    println!("Press Ctrl-C to delete the service and exit...");
    let _ = tokio::signal::ctrl_c().await;

    controller.remove_onion(&onion).await?;
    println!("Onion service deleted.");

    controller.close().await
}
