//! Example: Basic connection and authentication
//!
//! Connects to the control port, authenticates with the first usable
//! advertised method and prints some daemon status.
//!
//! Run with: RUST_LOG=onion_control=trace cargo run --example basic

use onion_control::{Controller, ControllerConfig, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ControllerConfig::from_env()?;
    println!("Connecting to {}...", config.address);

    let controller = Controller::connect(&config.address).await?;
    let info = controller.protocol_info();
    println!("Tor version: {:?}", info.tor_version);
    println!("Auth methods: {:?}", info.auth_methods);
    if let Some(ref cookie) = info.cookie_file {
        println!("Cookie file: {}", cookie.display());
    }

    println!("\nAuthenticating...");
    match config.auth {
        onion_control::AuthCredential::None => controller.auto_authenticate().await?,
        ref credential => controller.authenticate(credential).await?,
    }
    println!("Authentication successful!");

    let version = controller.get_version().await?;
    println!("\nTor version: {}", version);
    println!("Config file: {}", controller.get_config_file().await?.display());
    println!("PID: {}", controller.get_pid().await?);
    println!("Traffic read: {} bytes", controller.get_bytes_read().await?);
    println!("Traffic written: {} bytes", controller.get_bytes_written().await?);

    controller.close().await?;
    println!("\nDisconnected.");

    Ok(())
}
