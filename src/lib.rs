//! Near-real-time data chain for a snow particle counter
//!
//! Telegrams from the sensor's serial port (or from its recorded log files)
//! are decoded into size distributions and appended, one record per sample,
//! to daily netCDF files that the plot tool turns into heatmaps.

pub mod acquisition;
pub mod config;
pub mod convert;
pub mod plot;
pub mod store;
pub mod telegram;
