//! canscope - Command-line front end for live CAN bus sessions
//!
//! Query endpoint capabilities, monitor a bus with the latest-state table
//! or the sequential log, and send single frames.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use canscope_core::{FrameEntry, IdKey};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::{LogView, MonitorOptions};
use crate::config::{Config, SessionArgs};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "canscope")]
#[command(author, version, about = "Live CAN bus monitor")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CANSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
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
    /// Show what an endpoint supports
    Caps {
        /// Bus endpoint, e.g. virtual://bench or socketcan://can0
        endpoint: String,
    },

    /// Watch the bus until Ctrl+C
    Monitor {
        #[command(flatten)]
        session: SessionArgs,

        /// What to print
        #[arg(long, value_enum, default_value = "table")]
        view: LogView,

        /// Also follow one identifier, e.g. 0x1AB
        #[arg(long)]
        detail: Option<String>,

        /// Table refresh interval in milliseconds
        #[arg(long, default_value = "1000")]
        refresh_ms: u64,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Start the [[periodic]] items from the config file
        #[arg(long)]
        periodic: bool,
    },

    /// Transmit one frame
    Send {
        #[command(flatten)]
        session: SessionArgs,

        /// Identifier, 0x-prefixed hex or decimal
        id: String,

        /// Payload as hex bytes, e.g. "01 02 03"
        #[arg(default_value = "")]
        data: String,

        /// Use a 29-bit identifier
        #[arg(short = 'x', long)]
        extended: bool,

        /// Send an FD frame (needs --fd)
        #[arg(long)]
        fd_frame: bool,

        /// Bit rate switch (FD frames)
        #[arg(long)]
        brs: bool,

        /// Error state indicator (FD frames)
        #[arg(long)]
        esi: bool,

        /// Remote transmission request
        #[arg(long)]
        remote: bool,

        /// Explicit DLC; derived from the data when omitted
        #[arg(long)]
        dlc: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let no_color = cli.no_color || config.no_color.unwrap_or(false);
    let ctx = OutputContext::new(cli.output, no_color, cli.quiet);

    match &cli.command {
        Commands::Caps { endpoint } => {
            commands::caps(endpoint, &ctx)?;
        }

        Commands::Monitor {
            session,
            view,
            detail,
            refresh_ms,
            duration,
            periodic,
        } => {
            let session = config.session(session)?;
            let detail = detail
                .as_deref()
                .map(IdKey::parse)
                .transpose()
                .context("Invalid --detail identifier")?;
            let periodic = if *periodic {
                config.periodic_items(session.mode)?
            } else {
                Vec::new()
            };
            let options = MonitorOptions {
                view: *view,
                detail,
                refresh: Duration::from_millis((*refresh_ms).max(1)),
                duration: duration.map(Duration::from_secs),
                periodic,
            };
            commands::monitor(session, options, &ctx).await?;
        }

        Commands::Send {
            session,
            id,
            data,
            extended,
            fd_frame,
            brs,
            esi,
            remote,
            dlc,
        } => {
            let session = config.session(session)?;
            let entry = FrameEntry {
                id: id.clone(),
                extended: *extended,
                fd: *fd_frame,
                brs: *brs,
                esi: *esi,
                remote: *remote,
                dlc: *dlc,
                data: data.clone(),
            };
            commands::send(session, &entry, &ctx).await?;
        }
    }

    Ok(())
}
