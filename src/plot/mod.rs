//! Quick-look plots of store files
//!
//! A store file is loaded, samples with implausible device times are removed,
//! and two heatmaps of counts per size bin over time are drawn: one column
//! per sample, and one column per minute holding the mean counts.

pub mod render;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::PlotConfig;
use crate::store::{self, Dataset, FILE_EXTENSION};
use crate::telegram::BIN_COUNT;
use render::{Column, Heatmap};

/// Argument selecting the newest store file
pub const LATEST: &str = "latest";

/// Width of a resampling bucket in seconds
pub const MINUTE: i64 = 60;

/// Samples kept for plotting
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub times: Vec<i64>,
    pub counts: Vec<[f32; BIN_COUNT]>,
    /// Bin diameters in meters
    pub diameters: Vec<f32>,
}

/// A sample removed by [`filter_valid`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub index: usize,
    pub timestamp: i64,
}

/// Split a dataset into samples after `valid_after` and the rejected rest
pub fn filter_valid(ds: &Dataset, valid_after: i64) -> (Series, Vec<Rejected>) {
    let mut series = Series {
        times: Vec::with_capacity(ds.len()),
        counts: Vec::with_capacity(ds.len()),
        diameters: ds.diameters.clone(),
    };
    let mut rejected = Vec::new();

    for (index, (&t, counts)) in ds.timestamps.iter().zip(&ds.counts).enumerate() {
        let timestamp = i64::from(t);
        if timestamp > valid_after {
            series.times.push(timestamp);
            series.counts.push(*counts);
        } else {
            rejected.push(Rejected { index, timestamp });
        }
    }

    (series, rejected)
}

/// Mean counts per bin over buckets of `period` seconds aligned to the epoch
///
/// Only buckets holding samples become columns; time between them is left
/// uncovered and renders as a gap.
pub fn resample_mean(series: &Series, period: i64) -> Vec<Column> {
    let mut buckets: BTreeMap<i64, ([f64; BIN_COUNT], u32)> = BTreeMap::new();
    for (&t, counts) in series.times.iter().zip(&series.counts) {
        let (sums, hits) = buckets
            .entry(t.div_euclid(period))
            .or_insert(([0.0; BIN_COUNT], 0));
        *hits += 1;
        for (sum, &c) in sums.iter_mut().zip(counts) {
            *sum += f64::from(c);
        }
    }

    buckets
        .into_iter()
        .map(|(bucket, (sums, hits))| Column {
            start: bucket * period,
            end: (bucket + 1) * period,
            values: Some(sums.map(|s| (s / f64::from(hits)) as f32)),
        })
        .collect()
}

/// One column per sample, each lasting until the next sample
pub fn raw_columns(series: &Series) -> Vec<Column> {
    let mut order: Vec<usize> = (0..series.times.len()).collect();
    order.sort_by_key(|&i| series.times[i]);

    order
        .iter()
        .enumerate()
        .map(|(k, &i)| {
            let start = series.times[i];
            let end = order
                .get(k + 1)
                .map(|&j| series.times[j])
                .filter(|&next| next > start)
                .unwrap_or(start + 1);
            Column {
                start,
                end,
                values: Some(series.counts[i]),
            }
        })
        .collect()
}

/// Newest store file in `dir`, by name
pub fn find_latest(dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == FILE_EXTENSION))
        .collect();
    candidates.sort();
    candidates
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no .{} files in {:?}", FILE_EXTENSION, dir))
}

/// Images written for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotOutputs {
    pub full: PathBuf,
    pub minute: PathBuf,
}

/// Load `input` and write its full-resolution and 1-minute heatmaps
///
/// With `latest` set, the images are also copied to `latest_1sec.png` and
/// `latest_1min.png`.
pub fn plot_file(input: &Path, config: &PlotConfig, latest: bool) -> Result<PlotOutputs> {
    let ds = store::load(input)?;
    if let Some(location) = &ds.location {
        info!("{:?} recorded at {}", input, location);
    }
    let (series, rejected) = filter_valid(&ds, config.valid_after);

    if !rejected.is_empty() {
        warn!("{} samples with implausible times:", rejected.len());
        for r in &rejected {
            let time = DateTime::<Utc>::from_timestamp(r.timestamp, 0)
                .map(|t| t.to_string())
                .unwrap_or_else(|| r.timestamp.to_string());
            warn!("  index {}: {}", r.index, time);
        }
    }
    if series.times.is_empty() {
        anyhow::bail!("{:?} has no samples after {}", input, config.valid_after);
    }

    let total: f64 = series
        .counts
        .iter()
        .flat_map(|row| row.iter())
        .map(|&c| f64::from(c))
        .sum();
    info!(
        "{:?}: {} samples × {} bins, {} counts",
        input,
        series.times.len(),
        BIN_COUNT,
        total
    );

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("{:?} has no file name", input))?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {:?}", config.output_dir))?;

    let full = Heatmap::new(raw_columns(&series), series.diameters.clone(), None)
        .render(config.width, config.height);
    let minute = Heatmap::new(
        resample_mean(&series, MINUTE),
        series.diameters.clone(),
        Some(config.minute_vmax),
    )
    .render(config.width, config.height);

    let outputs = PlotOutputs {
        full: config.output_dir.join(format!("{}_1sec.png", stem)),
        minute: config.output_dir.join(format!("{}_1min.png", stem)),
    };
    render::save(&full, &outputs.full)?;
    render::save(&minute, &outputs.minute)?;
    if latest {
        render::save(&full, &config.output_dir.join("latest_1sec.png"))?;
        render::save(&minute, &config.output_dir.join("latest_1min.png"))?;
    }
    info!("Wrote {:?} and {:?}", outputs.full, outputs.minute);

    Ok(outputs)
}
