use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::StationInfo;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub store: StoreConfig,
    pub station: StationInfo,
    pub plot: PlotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    /// Read timeout of the port; a timeout only means the device was quiet
    pub timeout_ms: u64,
    /// Delay after each configuration command
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub output_dir: PathBuf,
    /// fsync after every appended record
    pub sync_on_append: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub output_dir: PathBuf,
    /// Samples at or before this Unix time are treated as clock glitches
    pub valid_after: i64,
    /// Upper end of the colour scale for the 1-minute plot
    pub minute_vmax: f32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }

    /// Load the file, falling back to defaults with a warning on stderr
    ///
    /// Logging is not set up yet when this runs, hence `eprintln!`.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config from {:?}: {}", path, e);
            eprintln!("Using default configuration");
            Self::default()
        })
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 1000,
            settle_ms: 200,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            sync_on_append: true,
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("plots"),
            valid_after: 1_672_200_000,
            minute_vmax: 25.0,
            width: 1600,
            height: 800,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
