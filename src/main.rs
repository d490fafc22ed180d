use clap::{Parser, Subcommand};
use spc_nrt::acquisition::{self, StoreSettings};
use spc_nrt::config::Config;
use spc_nrt::{convert, store};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spc-nrt")]
#[command(about = "Snow particle counter acquisition and log conversion")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read telegrams from the serial port into daily store files
    Acquire,
    /// Convert a recorded binary log into a store file
    Convert {
        /// Binary log written by the sensor
        input: PathBuf,
        /// Text log receiving one decoded record per line
        #[arg(long, default_value = "converted.dat")]
        text_log: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    store::disable_file_locking();

    // Load configuration
    let config = Config::load_or_default(&cli.config);

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("spc-nrt v{}", env!("CARGO_PKG_VERSION"));

    let settings = StoreSettings::new(&config.store, &config.station);

    match cli.command {
        Command::Acquire => {
            info!("Station: {}", config.station.location);
            // Only returns on failure; stop with Ctrl+C
            acquisition::run_live(&config.serial, &settings)?;
        }
        Command::Convert { input, text_log } => {
            let summary = convert::convert(&input, &text_log, &settings)?;
            info!(
                "{} records written to {:?}",
                summary.records, summary.store_path
            );
        }
    }

    Ok(())
}
