//! canflash - ECU flashing, measurement and calibration over CAN
//!
//! Flashes S-record images over UDS or CCP, runs CCP DAQ measurements and
//! writes calibration values.

mod commands;
mod config;
mod device;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::Protocol;
use crate::config::{parse_int, Config};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "canflash")]
#[command(author, version, about = "ECU flashing and measurement over CAN")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CANFLASH_CONFIG")]
    config: Option<PathBuf>,

    /// Override a configuration option, e.g. `--set ccp.cro_id=0x6A0`
    #[arg(long = "set", value_name = "GROUP.OPTION=VALUE")]
    overrides: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show segments, CRC and EPK of an S-record file
    Info {
        /// S-record file
        file: PathBuf,

        /// Look up the EPK string at this address
        #[arg(long, value_parser = parse_address)]
        epk_address: Option<u32>,
    },

    /// Flash an S-record file to the ECU
    Flash {
        /// S-record file
        file: PathBuf,

        /// Flashing protocol
        #[arg(short, long, value_enum, default_value = "uds")]
        protocol: Protocol,
    },

    /// Measure items over CCP DAQ until Ctrl+C
    Measure {
        /// Item description file (YAML)
        #[arg(short, long)]
        items: PathBuf,

        /// Measurement names; the last selection for this ECU software is
        /// used when none are given
        names: Vec<String>,

        /// Put every item on this DAQ list
        #[arg(long)]
        daq: Option<u8>,
    },

    /// Write a calibration value over CCP
    Calibrate {
        /// Item description file (YAML)
        #[arg(short, long)]
        items: PathBuf,

        /// Calibration name
        name: String,

        /// Physical value to write
        value: String,
    },

    /// Show the effective configuration
    Config {
        /// Show only these options (group.option)
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins unless --verbose asks for debug output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load default config")?,
    };
    for assignment in &cli.overrides {
        config
            .apply_override(assignment)
            .with_context(|| format!("Invalid --set {}", assignment))?;
    }

    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    let result = match &cli.command {
        Commands::Info { file, epk_address } => commands::info(file, *epk_address, &ctx),
        Commands::Flash { file, protocol } => {
            commands::flash(&config, file, *protocol, &ctx).await
        }
        Commands::Measure { items, names, daq } => {
            commands::measure(&config, items, names, *daq, &ctx).await
        }
        Commands::Calibrate { items, name, value } => {
            commands::calibrate(&config, items, name, value, &ctx).await
        }
        Commands::Config { keys } => show_config(&config, keys, &ctx),
    };

    if let Err(e) = &result {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

fn show_config(config: &Config, keys: &[String], ctx: &OutputContext) -> Result<()> {
    let entries = if keys.is_empty() {
        config.entries()
    } else {
        keys.iter()
            .map(|key| Ok((key.clone(), config.get(key)?)))
            .collect::<Result<Vec<_>>>()?
    };
    let pairs: Vec<(&str, String)> = entries
        .iter()
        .map(|(key, value)| (key.as_str(), value.clone()))
        .collect();
    ctx.print_kv(&pairs);
    Ok(())
}

fn parse_address(value: &str) -> Result<u32, String> {
    parse_int(value)
}
