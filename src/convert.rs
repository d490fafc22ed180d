//! Batch conversion of recorded telegram logs
//!
//! The sensor's own log files are back-to-back telegrams with clean framing,
//! so they are read in fixed 142-byte chunks with no delimiter search. All
//! records go into one store file named after the first record, and every
//! record is also written to a text log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::acquisition::{session, StoreSettings};
use crate::store;
use crate::telegram::{self, TELEGRAM_LEN};

/// Outcome of a conversion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertSummary {
    pub records: u64,
    pub store_path: PathBuf,
}

/// Read up to one chunk, stopping early only at end of file
fn read_chunk<R: Read>(reader: &mut R, chunk: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        match reader.read(&mut chunk[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Decode `input` into a new store file and append a text line per record to `text_log`
pub fn convert(input: &Path, text_log: &Path, settings: &StoreSettings) -> Result<ConvertSummary> {
    let file = File::open(input).with_context(|| format!("failed to open log {:?}", input))?;
    let mut reader = BufReader::new(file);

    let mut chunk = [0u8; TELEGRAM_LEN];
    let mut len = read_chunk(&mut reader, &mut chunk)
        .with_context(|| format!("failed to read {:?}", input))?;
    if len == 0 {
        anyhow::bail!("log file {:?} is empty", input);
    }

    let first = telegram::peek_timestamp(&chunk[..len])
        .with_context(|| format!("cannot read first timestamp of {:?}", input))?;
    let start = DateTime::<Utc>::from_timestamp(i64::from(first), 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid first timestamp {}", first))?;
    let store_path = settings.path_for(&session::file_name(&start));
    info!("Converting {:?} into {:?}", input, store_path);
    settings.create(&store_path)?;

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(text_log)
        .with_context(|| format!("failed to open text log {:?}", text_log))?;
    let mut log = BufWriter::new(log);

    let mut records = 0u64;
    while len > 0 {
        let sample = telegram::decode(&chunk[..len])
            .with_context(|| format!("record {} of {:?}", records, input))?;
        writeln!(log, "{}", sample)
            .with_context(|| format!("failed to write text log {:?}", text_log))?;
        store::append(&store_path, &sample, settings.sync_on_append)?;
        records += 1;
        debug!("Record {}: t={} T={:.2}°C", records, sample.timestamp, sample.temperature_celsius);

        len = read_chunk(&mut reader, &mut chunk)
            .with_context(|| format!("failed to read {:?}", input))?;
    }
    log.flush()
        .with_context(|| format!("failed to write text log {:?}", text_log))?;

    info!("Converted {} records", records);
    Ok(ConvertSummary {
        records,
        store_path,
    })
}
