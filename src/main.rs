//! telemetryd - Main Entry Point
//!
//! Boots the telemetry device: loads configuration, builds the MQTT
//! transport and sensor, and runs the device lifecycle until a fatal
//! error or a shutdown signal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use telemetryd::config::DeviceConfig;
use telemetryd::device::DeviceLifecycle;
use telemetryd::encoding::PayloadSchema;
use telemetryd::observability::init_default_logging;
use telemetryd::sensor::SimulatedSensor;
use telemetryd::transport::MqttTransport;
use tokio::signal;
use tracing::{error, info};

/// Embedded-style cloud telemetry device
#[derive(Parser)]
#[command(name = "telemetryd")]
#[command(about = "Periodic sensor telemetry with remote settings over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the telemetry device
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting telemetryd v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(DeviceConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = vec!["telemetryd.toml", "config/telemetryd.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(DeviceConfig::load_from_file(&path)?);
                }
            }

            error!(
                "No configuration file found. Please provide one with -c/--config or create telemetryd.toml"
            );
            process::exit(1);
        }
    }
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Application starting with device ID: {}", config.device.id);

    let transport = MqttTransport::new(&config.device.id, config.mqtt.clone())?;
    let sensor = match config.telemetry.schema {
        PayloadSchema::Temperature => SimulatedSensor::temperature_only(),
        PayloadSchema::Weather => SimulatedSensor::weather(),
    };

    let lifecycle = DeviceLifecycle::new(config, transport, sensor);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = lifecycle.run() => {
            // The lifecycle only returns on a fatal error
            match result {
                Ok(()) => info!("Device lifecycle ended"),
                Err(e) => {
                    error!("Device aborted: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    Ok(())
}

fn handle_config_command(
    config: DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");

    if show {
        let rendered = toml::to_string_pretty(&config)?;
        println!("{rendered}");
    }

    Ok(())
}
