//! Telegram encoder
//!
//! Builds raw 142-byte telegrams the way the sensor emits them. Used by the
//! telegram simulator and as a fixture source in tests.
//!
//! Frame structure:
//!   0xAA 0x00 0x00 | Status | Timestamp | Counts[64] | TempCode | Trailing | 0x55 0x55 0x55

use bytes::BufMut;

use super::{BIN_COUNT, KELVIN_OFFSET, TAG_LEN, TELEGRAM_LEN, TEMPERATURE_SCALE};

/// Leading tag bytes; the first one doubles as the resync marker
pub const LEAD_TAG: [u8; TAG_LEN] = [0xAA, 0x00, 0x00];

/// Trailing tag bytes; identical to the serial frame delimiter
pub const TRAIL_TAG: [u8; TAG_LEN] = [0x55, 0x55, 0x55];

/// Parameters for building one telegram
#[derive(Debug, Clone)]
pub struct TelegramBuilder {
    pub status_byte: i8,
    pub timestamp: u32,
    pub histogram: [u16; BIN_COUNT],
    /// Raw temperature code, Kelvin × 200
    pub temperature_code: u16,
    pub trailing_byte: i8,
}

impl TelegramBuilder {
    /// Empty histogram at 0 °C
    pub fn new(timestamp: u32) -> Self {
        Self {
            status_byte: 0,
            timestamp,
            histogram: [0; BIN_COUNT],
            temperature_code: celsius_to_code(0.0),
            trailing_byte: 0,
        }
    }

    pub fn histogram(mut self, histogram: [u16; BIN_COUNT]) -> Self {
        self.histogram = histogram;
        self
    }

    pub fn temperature(mut self, celsius: f64) -> Self {
        self.temperature_code = celsius_to_code(celsius);
        self
    }

    /// Build the raw telegram bytes
    pub fn build(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(TELEGRAM_LEN);

        frame.put_slice(&LEAD_TAG);
        frame.put_i8(self.status_byte);
        frame.put_u32(self.timestamp);
        for &count in &self.histogram {
            frame.put_u16(count);
        }
        frame.put_u16(self.temperature_code);
        frame.put_i8(self.trailing_byte);
        frame.put_slice(&TRAIL_TAG);

        frame
    }
}

/// Temperature code for a Celsius value, rounded to the nearest step
pub fn celsius_to_code(celsius: f64) -> u16 {
    ((celsius + KELVIN_OFFSET) * TEMPERATURE_SCALE).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::decode;

    #[test]
    fn test_build_layout() {
        let frame = TelegramBuilder::new(0x0102_0304).build();

        assert_eq!(frame.len(), TELEGRAM_LEN);
        assert_eq!(&frame[..3], &LEAD_TAG);
        assert_eq!(&frame[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&frame[TELEGRAM_LEN - 3..], &TRAIL_TAG);
    }

    #[test]
    fn test_build_decodes() {
        let mut histogram = [0u16; BIN_COUNT];
        histogram[0] = 7;
        histogram[63] = 500;
        let frame = TelegramBuilder::new(1_672_531_200)
            .histogram(histogram)
            .temperature(-21.3)
            .build();

        let sample = decode(&frame).expect("should decode successfully");
        assert_eq!(sample.timestamp, 1_672_531_200);
        assert_eq!(sample.histogram, histogram);
        assert!((sample.temperature_celsius + 21.3).abs() < 0.005);
    }

    #[test]
    fn test_celsius_to_code() {
        assert_eq!(celsius_to_code(0.35), 54_700);
        assert_eq!(celsius_to_code(0.0), 54_630);
    }
}
