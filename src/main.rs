//! CLI Entry Point for photonic-daq
//!
//! Command-line access to SmarAct MCS2 stages:
//! - Discover logical stage addresses
//! - Read position and per-axis status
//! - Relative and absolute moves, stop
//!
//! # Usage
//!
//! ```bash
//! photonic-daq discover
//! photonic-daq position usb:sn:MCS2-00001234_Ch1-3
//! photonic-daq move-rel usb:sn:MCS2-00001234_Ch4-6 10 -5 0
//! photonic-daq --no-wait move-abs usb:sn:MCS2-00001234_Ch1-3 --x 100
//! ```
//!
//! Without real hardware, enable the simulator in `photonic_daq.toml`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_core::capabilities::MultiAxisStage;
use daq_core::stage::Axis;
use photonic_daq::config::AppConfig;
use photonic_daq::hardware::Hardware;
use photonic_daq::logging;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "photonic-daq")]
#[command(about = "Motion control for SmarAct MCS2 piezo stages", long_about = None)]
struct Cli {
    /// Configuration file (default: photonic_daq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Return as soon as a move was issued instead of waiting for it to settle
    #[arg(long, global = true)]
    no_wait: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List logical stage addresses of connected dual-module controllers
    Discover,

    /// Show the status flags of every axis
    Status {
        /// Stage address, e.g. usb:sn:MCS2-00001234_Ch1-3
        address: String,
    },

    /// Print the current position in micrometers
    Position {
        /// Stage address
        address: String,
    },

    /// Move relative to the current position (um)
    MoveRel {
        /// Stage address
        address: String,
        #[arg(allow_negative_numbers = true)]
        dx: f64,
        #[arg(allow_negative_numbers = true)]
        dy: f64,
        #[arg(allow_negative_numbers = true, default_value_t = 0.0)]
        dz: f64,
    },

    /// Move to an absolute position (um); omitted axes stay put
    MoveAbs {
        /// Stage address
        address: String,
        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
    },

    /// Stop all axes of a stage
    Stop {
        /// Stage address
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let hardware = Hardware::from_config(&config)?;
    let wait = !cli.no_wait;

    match cli.command {
        Commands::Discover => discover(&hardware),
        Commands::Status { address } => status(&hardware, &address).await,
        Commands::Position { address } => position(&hardware, &address).await,
        Commands::MoveRel {
            address,
            dx,
            dy,
            dz,
        } => {
            let open = hardware.open_stage(&address).await?;
            open.stage
                .move_relative(dx, dy, dz, wait)
                .await
                .with_context(|| format!("Relative move on {address} failed"))?;
            report_position(&open.stage, wait).await
        }
        Commands::MoveAbs { address, x, y, z } => {
            let open = hardware.open_stage(&address).await?;
            open.stage
                .move_absolute(x, y, z, wait)
                .await
                .with_context(|| format!("Absolute move on {address} failed"))?;
            report_position(&open.stage, wait).await
        }
        Commands::Stop { address } => {
            let open = hardware.open_stage(&address).await?;
            open.stage.stop().await.context("Stop failed")?;
            println!("{address}: stopped");
            Ok(())
        }
    }
}

fn discover(hardware: &Hardware) -> Result<()> {
    let addresses = hardware.discover()?;
    if addresses.is_empty() {
        println!("No dual-module MCS2 controllers found");
    }
    for address in &addresses {
        println!("{address}");
    }

    let configured = hardware.configured_addresses();
    if !configured.is_empty() {
        println!();
        println!("Configured stages:");
        for address in configured {
            let marker = if addresses.iter().any(|a| a == address) {
                "found"
            } else {
                "missing"
            };
            println!("  {address} ({marker})");
        }
    }
    Ok(())
}

async fn status(hardware: &Hardware, address: &str) -> Result<()> {
    let open = hardware.open_stage(address).await?;
    let flags = open.stage.status().await?;

    println!("{}", open.stage.identifier());
    for (axis, flags) in Axis::ALL.iter().zip(flags) {
        println!("  {axis}: {}", flags.join(", "));
    }
    println!("  stopped: {}", open.stage.is_stopped().await?);
    Ok(())
}

async fn position(hardware: &Hardware, address: &str) -> Result<()> {
    let open = hardware.open_stage(address).await?;
    println!("{}", open.stage.position().await?);
    Ok(())
}

async fn report_position(stage: &Arc<dyn MultiAxisStage>, settled: bool) -> Result<()> {
    let position = stage.position().await?;
    if settled {
        println!("{position}");
    } else {
        println!("{position} (moving)");
    }
    Ok(())
}
