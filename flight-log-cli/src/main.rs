//! Flight Log Reader CLI Application
//!
//! This is the command-line interface for the flight log reader.
//! It uses the flight-log-decoder library and adds:
//! - `run`: batch conversion of a DataFlash .bin log into a JSON file
//! - `session`: the interactive parse/loadType/trimFile protocol over stdio
//! - TOML configuration for the export sink and logging

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

mod config;
mod convert;
mod interactive;

/// Flight Log Reader - Decode flight telemetry logs into JSON
#[derive(Parser, Debug)]
#[command(name = "flight-log-cli")]
#[command(about = "Decode flight telemetry logs (tlog, DataFlash, DJI) into JSON", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a DataFlash .bin log into a JSON file
    Run {
        /// DataFlash log to decode (must end in .bin)
        #[arg(value_name = "INPUT")]
        input: Option<PathBuf>,

        /// Output file (default: <input-stem>_processed.json in the working directory)
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
    /// Serve interactive actions as JSON lines on stdin/stdout
    Session,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let app_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::AppConfig::default(),
    };

    // Initialize logging
    init_logging(args.verbose, args.quiet, app_config.logging.level);

    log::info!("Flight Log Reader CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", flight_log_decoder::VERSION);

    match args.command {
        Some(Command::Run { input, output }) => {
            let written = convert::run(input.as_deref(), output.as_deref())?;
            log::info!("Results written to {:?}", written);
        }
        Some(Command::Session) => interactive::run(app_config.session_config())?,
        None => bail!(
            "No command given. Usage: flight-log-cli run <input.bin> [output.json] | flight-log-cli session"
        ),
    }

    Ok(())
}

/// Initialize logging based on verbosity level
///
/// Command-line flags take precedence over the configured level.
fn init_logging(verbose: u8, quiet: bool, configured: Option<LevelFilter>) {
    use env_logger::Builder;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => configured.unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    // Logs go to stderr so `session` can own stdout
    Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
