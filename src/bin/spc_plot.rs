//! Heatmap plots of a store file
//!
//! Usage:
//!   spc-plot 20230101_0000_raw.nc
//!   spc-plot latest

use clap::Parser;
use spc_nrt::config::Config;
use spc_nrt::plot::{self, LATEST};
use spc_nrt::store;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spc-plot")]
#[command(about = "Render heatmaps of particle counts from a store file")]
#[command(version)]
struct Cli {
    /// Store file to plot, or `latest` for the newest file in the store directory
    filename: String,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    store::disable_file_locking();
    let config = Config::load_or_default(&cli.config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let latest = cli.filename == LATEST;
    let input = if latest {
        let path = plot::find_latest(&config.store.output_dir)?;
        info!("Latest store file: {:?}", path);
        path
    } else {
        PathBuf::from(&cli.filename)
    };

    plot::plot_file(&input, &config.plot, latest)?;
    Ok(())
}
