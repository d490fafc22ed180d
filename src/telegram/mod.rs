//! Particle counter binary telegram
//!
//! One telegram is a fixed 142-byte record, big-endian throughout:
//!
//!   Tag(3) | Status(1,i8) | Timestamp(4,u32) | Counts(64×2,u16) | TempCode(2,u16) | Trailing(1,i8) | Tag(3)
//!
//! The tag bytes carry no data for us and are skipped. There is no checksum,
//! so bit errors inside a frame pass through undetected.

pub mod diameters;
pub mod encoder;

use bytes::Buf;
use std::fmt;

/// Size of one telegram on the wire
pub const TELEGRAM_LEN: usize = 142;

/// Number of particle size bins in the histogram
pub const BIN_COUNT: usize = 64;

/// Number of tag bytes at either end of the telegram
pub const TAG_LEN: usize = 3;

/// The temperature code is Kelvin scaled by this factor
pub const TEMPERATURE_SCALE: f64 = 200.0;

/// Offset between Kelvin and degrees Celsius
pub const KELVIN_OFFSET: f64 = 273.15;

/// One decoded telegram
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Device status byte, passed through as-is
    pub status_byte: i8,
    /// Unix timestamp (seconds) from the device clock
    pub timestamp: u32,
    /// Raw particle counts per size bin, ordered by increasing diameter
    pub histogram: [u16; BIN_COUNT],
    /// Sensor temperature in degrees Celsius
    pub temperature_celsius: f64,
    /// Byte following the temperature, passed through as-is
    pub trailing_byte: i8,
}

impl Sample {
    /// Copy of this sample carrying a different timestamp
    pub fn with_timestamp(&self, timestamp: u32) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// Sum of all bins
    pub fn total_counts(&self) -> u32 {
        self.histogram.iter().map(|&c| u32::from(c)).sum()
    }
}

/// Text log rendering: `[status, timestamp, (c0, ..., c63), temperature, trailing]`
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, (", self.status_byte, self.timestamp)?;
        for (i, count) in self.histogram.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", count)?;
        }
        write!(
            f,
            "), {}, {}]",
            self.temperature_celsius, self.trailing_byte
        )
    }
}

/// Convert the raw temperature code to degrees Celsius
pub fn temperature_from_code(code: u16) -> f64 {
    f64::from(code) / TEMPERATURE_SCALE - KELVIN_OFFSET
}

/// Decode one telegram
///
/// The buffer must be exactly [`TELEGRAM_LEN`] bytes. Fields are unpacked
/// positionally; no field is range-checked.
pub fn decode(data: &[u8]) -> anyhow::Result<Sample> {
    if data.len() != TELEGRAM_LEN {
        return Err(anyhow::anyhow!(
            "Telegram must be {} bytes, got {}",
            TELEGRAM_LEN,
            data.len()
        ));
    }

    let mut buf = data;

    buf.advance(TAG_LEN);
    let status_byte = buf.get_i8();
    let timestamp = buf.get_u32();

    let mut histogram = [0u16; BIN_COUNT];
    for count in histogram.iter_mut() {
        *count = buf.get_u16();
    }

    let temperature_celsius = temperature_from_code(buf.get_u16());
    let trailing_byte = buf.get_i8();
    buf.advance(TAG_LEN);

    Ok(Sample {
        status_byte,
        timestamp,
        histogram,
        temperature_celsius,
        trailing_byte,
    })
}

/// Read just the timestamp field from the start of a telegram
pub fn peek_timestamp(data: &[u8]) -> anyhow::Result<u32> {
    if data.len() < TAG_LEN + 5 {
        return Err(anyhow::anyhow!(
            "Need {} bytes to read the timestamp, got {}",
            TAG_LEN + 5,
            data.len()
        ));
    }
    let mut buf = &data[TAG_LEN + 1..];
    Ok(buf.get_u32())
}
