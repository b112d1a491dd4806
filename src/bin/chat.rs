//! Realtime Chat
//!
//! Talk to a realtime speech model from the terminal: the microphone is
//! streamed up, the reply is played on the speaker and its transcript printed.
//!
//! Usage: `realtime-chat [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_voice::{
    audio::list_devices,
    config::AppConfig,
    network,
    session::SessionController,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Realtime Chat");
    network::install_crypto_provider();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;

    // List available devices
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        let format_marker = if device.supports_session_format {
            ""
        } else {
            " (unsupported format)"
        };
        println!(
            "  {} ({}){}{}",
            device.name, device_type, default_marker, format_marker
        );
        println!("    ID: {}", device.id);
    }
    println!();

    let controller = SessionController::new();
    tracing::info!("Session {} - press Ctrl+C to stop", controller.id());
    println!("Realtime conversation started. Press Ctrl+C to stop.");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match controller.run(&config, shutdown).await {
        Ok(report) => {
            println!("\nSession ended: {}", report.end);
            if report.end.is_failure() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(e) if e.is_startup_fatal() => {
            eprintln!("\nCould not start session: {}", e);
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}
