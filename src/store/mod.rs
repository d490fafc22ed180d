//! Append-only time-series store
//!
//! Each store file is an HDF5 file laid out like a netCDF-4 file: three
//! datasets growing along an unlimited `time` axis and one fixed table over
//! the 64 size bins. The file is created once, then reopened for every sample
//! and grown by exactly one row. There is no locking: one writer at a time.

use anyhow::{Context, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{File, Group};
use ndarray::{s, ArrayView1, ArrayView2};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::telegram::{Sample, BIN_COUNT};

pub const VAR_TIMESTAMP: &str = "timestamp";
pub const VAR_SENSOR_T: &str = "sensor_T";
pub const VAR_COUNTS: &str = "counts_raw";
pub const VAR_DIAMETER: &str = "average_particle_diameter";
/// Diameter table name used by files from the first station software
pub const LEGACY_VAR_DIAMETER: &str = "average_particle_diamater";

/// Extension of store files
pub const FILE_EXTENSION: &str = "nc";

/// Environment switch read by the HDF5 library when opening files
pub const FILE_LOCKING_ENV: &str = "HDF5_USE_FILE_LOCKING";

/// Rows per chunk of the growing datasets
const CHUNK_ROWS: usize = 512;

/// Station metadata written as global attributes
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StationInfo {
    pub location: String,
    /// Latitude, longitude in degrees
    pub coordinates: [f64; 2],
    /// Sensor height above snow in meters, -999 when unknown
    pub height_above_snow: i32,
    pub contact: String,
}

impl Default for StationInfo {
    fn default() -> Self {
        Self {
            location: "Neumayer-Station III, Antarctica".to_string(),
            coordinates: [-70.6667, -8.2667],
            height_above_snow: -999,
            contact: "operator@example.org".to_string(),
        }
    }
}

impl StationInfo {
    fn write_attrs(&self, file: &File) -> Result<()> {
        set_attr_str(file, "location", &self.location)?;
        file.new_attr::<f64>()
            .shape((self.coordinates.len(),))
            .create("coordinates")?
            .write(ArrayView1::from(&self.coordinates[..]))?;
        file.new_attr::<i32>()
            .create("height_above_snow")?
            .write_scalar(&self.height_above_snow)?;
        set_attr_str(file, "contact", &self.contact)?;
        Ok(())
    }
}

/// Disable HDF5 file locking for this process unless the environment already sets it
///
/// Call before any store file is opened and before other threads start.
pub fn disable_file_locking() {
    if std::env::var_os(FILE_LOCKING_ENV).is_none() {
        std::env::set_var(FILE_LOCKING_ENV, "FALSE");
    }
}

/// Create a new, empty store file
///
/// An existing file at `path` is overwritten.
pub fn create(path: &Path, diameters: &[f64; BIN_COUNT], station: &StationInfo) -> Result<()> {
    if path.exists() {
        warn!("Overwriting existing store file {:?}", path);
    }

    let file =
        File::create(path).with_context(|| format!("failed to create store file {:?}", path))?;
    write_schema(&file, diameters, station)
        .with_context(|| format!("failed to write store layout to {:?}", path))?;
    file.flush()
        .with_context(|| format!("failed to flush store file {:?}", path))?;

    debug!("Created store file {:?}", path);
    Ok(())
}

fn write_schema(file: &File, diameters: &[f64; BIN_COUNT], station: &StationInfo) -> Result<()> {
    station.write_attrs(file)?;

    let timestamp = file
        .new_dataset::<i32>()
        .shape((0..,))
        .chunk((CHUNK_ROWS,))
        .create(VAR_TIMESTAMP)?;
    set_attr_str(&timestamp, "units", "Unix timestamp")?;

    let sensor_t = file
        .new_dataset::<f32>()
        .shape((0..,))
        .chunk((CHUNK_ROWS,))
        .create(VAR_SENSOR_T)?;
    set_attr_str(&sensor_t, "units", "deg C")?;
    set_attr_str(&sensor_t, "long_name", "Sensor temperature")?;

    file.new_dataset::<f32>()
        .shape((0.., BIN_COUNT))
        .chunk((CHUNK_ROWS, BIN_COUNT))
        .create(VAR_COUNTS)?;

    let values: Vec<f32> = diameters.iter().map(|&d| d as f32).collect();
    let diameter = file
        .new_dataset::<f32>()
        .shape((BIN_COUNT,))
        .create(VAR_DIAMETER)?;
    diameter.write_raw(&values)?;
    set_attr_str(&diameter, "units", "m")?;
    Ok(())
}

/// The three growing datasets of an open store file
struct RecordSets {
    timestamp: hdf5::Dataset,
    sensor_t: hdf5::Dataset,
    counts: hdf5::Dataset,
}

impl RecordSets {
    fn open(group: &Group) -> Result<Self> {
        let sets = Self {
            timestamp: record_dataset(group, VAR_TIMESTAMP)?,
            sensor_t: record_dataset(group, VAR_SENSOR_T)?,
            counts: record_dataset(group, VAR_COUNTS)?,
        };
        let shape = sets.counts.shape();
        if shape.len() != 2 || shape[1] != BIN_COUNT {
            anyhow::bail!("{} has shape {:?}, expected (time, {})", VAR_COUNTS, shape, BIN_COUNT);
        }
        if sets.timestamp.ndim() != 1 || sets.sensor_t.ndim() != 1 {
            anyhow::bail!("{} and {} must be one-dimensional", VAR_TIMESTAMP, VAR_SENSOR_T);
        }
        Ok(sets)
    }

    /// Rows present in every record dataset
    ///
    /// An interrupted append can leave one dataset a row longer than the
    /// others; that row does not count.
    fn complete_rows(&self) -> usize {
        let lens = [
            self.timestamp.shape()[0],
            self.sensor_t.shape()[0],
            self.counts.shape()[0],
        ];
        lens.into_iter().min().unwrap_or(0)
    }

    fn is_ragged(&self) -> bool {
        let rows = self.complete_rows();
        self.timestamp.shape()[0] != rows
            || self.sensor_t.shape()[0] != rows
            || self.counts.shape()[0] != rows
    }
}

fn record_dataset(group: &Group, name: &str) -> Result<hdf5::Dataset> {
    let dataset = group
        .dataset(name)
        .with_context(|| format!("store file has no {} variable", name))?;
    if !dataset.is_resizable() {
        anyhow::bail!("{} does not grow along time", name);
    }
    Ok(dataset)
}

/// Append one sample as a new row
///
/// The timestamp is written last, after the counts and temperature rows.
/// Returns the new row count.
pub fn append(path: &Path, sample: &Sample, sync: bool) -> Result<u32> {
    let timestamp = i32::try_from(sample.timestamp)
        .with_context(|| format!("timestamp {} does not fit the store", sample.timestamp))?;

    let file =
        File::open_rw(path).with_context(|| format!("failed to open store file {:?}", path))?;
    let sets = RecordSets::open(&file).with_context(|| format!("unexpected schema in {:?}", path))?;

    let row = sets.complete_rows();
    if sets.is_ragged() {
        warn!(
            "{:?} has an unfinished row; appending after the last complete one ({})",
            path, row
        );
    }

    let counts: Vec<f32> = sample.histogram.iter().map(|&c| f32::from(c)).collect();
    let counts = ArrayView2::from_shape((1, BIN_COUNT), &counts[..])?;
    let temperature = [sample.temperature_celsius as f32];

    sets.counts
        .resize((row + 1, BIN_COUNT))
        .and_then(|_| sets.counts.write_slice(counts, s![row..row + 1, ..]))
        .with_context(|| format!("failed to write {} row {} to {:?}", VAR_COUNTS, row, path))?;
    append_value(&sets.sensor_t, row, &temperature)
        .with_context(|| format!("failed to write {} row {} to {:?}", VAR_SENSOR_T, row, path))?;
    append_value(&sets.timestamp, row, &[timestamp])
        .with_context(|| format!("failed to write {} row {} to {:?}", VAR_TIMESTAMP, row, path))?;

    if sync {
        file.flush()
            .with_context(|| format!("failed to flush store file {:?}", path))?;
    }

    u32::try_from(row + 1).context("row count overflow")
}

fn append_value<T: H5Type>(dataset: &hdf5::Dataset, row: usize, value: &[T]) -> hdf5::Result<()> {
    dataset.resize((row + 1,))?;
    dataset.write_slice(ArrayView1::from(value), s![row..row + 1])
}

/// Whole store file read back into memory
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub timestamps: Vec<i32>,
    pub sensor_t: Vec<f32>,
    pub counts: Vec<[f32; BIN_COUNT]>,
    /// Bin diameters in meters
    pub diameters: Vec<f32>,
    /// `location` attribute, when present
    pub location: Option<String>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Read every complete row of a store file
pub fn load(path: &Path) -> Result<Dataset> {
    let file = File::open(path).with_context(|| format!("failed to open store file {:?}", path))?;
    let sets = RecordSets::open(&file).with_context(|| format!("unexpected schema in {:?}", path))?;

    let rows = sets.complete_rows();
    if sets.is_ragged() {
        warn!("{:?} has an unfinished row; reading {} complete rows", path, rows);
    }

    let mut timestamps = sets
        .timestamp
        .read_raw::<i32>()
        .with_context(|| format!("failed to read {} from {:?}", VAR_TIMESTAMP, path))?;
    timestamps.truncate(rows);
    let mut sensor_t = sets
        .sensor_t
        .read_raw::<f32>()
        .with_context(|| format!("failed to read {} from {:?}", VAR_SENSOR_T, path))?;
    sensor_t.truncate(rows);
    let flat = sets
        .counts
        .read_raw::<f32>()
        .with_context(|| format!("failed to read {} from {:?}", VAR_COUNTS, path))?;
    let counts = flat
        .chunks_exact(BIN_COUNT)
        .take(rows)
        .map(|row| {
            let mut bins = [0f32; BIN_COUNT];
            bins.copy_from_slice(row);
            bins
        })
        .collect();

    let diameter = file
        .dataset(VAR_DIAMETER)
        .or_else(|_| file.dataset(LEGACY_VAR_DIAMETER))
        .with_context(|| format!("{:?} has no {} variable", path, VAR_DIAMETER))?;
    let diameters = diameter
        .read_raw::<f32>()
        .with_context(|| format!("failed to read {} from {:?}", VAR_DIAMETER, path))?;
    if diameters.len() != BIN_COUNT {
        anyhow::bail!(
            "{} in {:?} holds {} values, expected {}",
            VAR_DIAMETER,
            path,
            diameters.len(),
            BIN_COUNT
        );
    }

    Ok(Dataset {
        timestamps,
        sensor_t,
        counts,
        diameters,
        location: read_attr_str(&file, "location"),
    })
}

fn set_attr_str(location: &hdf5::Location, name: &str, value: &str) -> Result<()> {
    let value = VarLenUnicode::from_str(value)
        .map_err(|e| anyhow::anyhow!("invalid text for attribute {}: {}", name, e))?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

/// Text attribute, if present and stored as a variable-length string
fn read_attr_str(location: &hdf5::Location, name: &str) -> Option<String> {
    let attr = location.attr(name).ok()?;
    let value: VarLenUnicode = attr.read_scalar().ok()?;
    Some(value.to_string())
}
