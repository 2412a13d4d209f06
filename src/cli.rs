//! Command-line harness for exercising the driver outside a host process.

use crate::config::DriverConfig;
use crate::constants::{DEFAULT_CONFIG_PATH, DRIVER_NAME, DRIVER_VERSION};
use crate::document::XmlDocument;
use crate::driver::LoopDriver;
use crate::models::LoopPacket;
use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{CommandFactory, Parser};
use colored::*;
use futures::StreamExt;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Parser, Debug, Clone)]
#[command(name = "xmlparse")]
#[command(about = "Poll an XML file and emit weather observation packets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Configuration file with the driver settings
    #[arg(long = "config", value_name = "CONFIG_FILE")]
    pub config_path: Option<PathBuf>,

    /// Log verbosity: 0 info, 1 debug, 2 and above trace
    #[arg(long, value_name = "LEVEL", default_value_t = 0)]
    pub debug: u8,

    /// XML file to read, overriding the configured path
    #[arg(long = "path", value_name = "XML_PATH")]
    pub xml_path: Option<PathBuf>,

    /// Run the driver and print every packet
    #[arg(long)]
    pub run_driver: bool,

    /// Print the parsed XML document
    #[arg(long)]
    pub display_xml: bool,

    /// Print the parsed XML document indented
    #[arg(long)]
    pub pretty_print_xml: bool,
}

impl Args {
    pub fn has_action(&self) -> bool {
        self.run_driver || self.display_xml || self.pretty_print_xml
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn log_level(&self) -> &'static str {
        match self.debug {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Write the usage text, shown when no action flag is given
pub fn write_help(out: &mut impl Write) -> Result<()> {
    Args::command()
        .write_help(out)
        .context("Failed to write help text")
}

pub fn print_help() -> Result<()> {
    let mut stdout = io::stdout().lock();
    write_help(&mut stdout)?;
    stdout.flush().context("Failed to write help text")
}

/// Set up structured logging; `RUST_LOG` overrides `--debug`
pub fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("xmlparse_driver={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Failed to initialise logging")?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Run the selected action
pub async fn run(args: Args, shutdown: CancellationToken) -> Result<()> {
    if args.run_driver {
        run_driver(&args, shutdown).await
    } else if args.pretty_print_xml {
        print_xml(&args, true)
    } else if args.display_xml {
        print_xml(&args, false)
    } else {
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<DriverConfig> {
    let config_path = args.config_path();
    println!("Using configuration file {}", config_path.display());
    let mut config = DriverConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(path) = &args.xml_path {
        config.path = path.clone();
    }
    Ok(config)
}

async fn run_driver(args: &Args, shutdown: CancellationToken) -> Result<()> {
    let settings = load_config(args)?
        .validate()
        .context("Invalid driver configuration")?;

    println!(
        "{} {}",
        format!("{} driver", DRIVER_NAME).bright_green().bold(),
        DRIVER_VERSION
    );

    let driver = LoopDriver::new(settings).with_shutdown(shutdown);
    let mut packets = Box::pin(driver.into_stream());
    while let Some(packet) = packets.next().await {
        println!("{}", format_packet(&packet)?);
    }
    Ok(())
}

fn print_xml(args: &Args, pretty: bool) -> Result<()> {
    let path = match &args.xml_path {
        Some(path) => path.clone(),
        None => load_config(args)?.path,
    };
    let document = XmlDocument::open(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rendered = if pretty {
        document.to_pretty_string()?
    } else {
        document.to_xml_string()?
    };
    println!("{}", rendered);
    Ok(())
}

/// `<local time> <packet as JSON>`
pub fn format_packet(packet: &LoopPacket) -> Result<String> {
    let timestamp = Local
        .timestamp_opt(packet.date_time, 0)
        .single()
        .map(|time| time.format("%Y-%m-%d %H:%M:%S %Z").to_string())
        .unwrap_or_else(|| packet.date_time.to_string());
    let json = serde_json::to_string(packet).context("Failed to serialise packet")?;
    Ok(format!("{} ({}) {}", timestamp.bright_white().bold(), packet.date_time, json))
}
