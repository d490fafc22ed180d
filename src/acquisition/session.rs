//! Per-process acquisition state
//!
//! The device clock occasionally resets to 1970. Timestamps that would go
//! backwards are replaced by one second after the previous sample, which
//! also keeps every sample in the file of the day it was taken.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;

/// State carried from one sample to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Samples stored so far
    pub sample_count: u64,
    /// Frames skipped by the framing rules
    pub dropped_frames: u64,
    /// Corrected time of the last stored sample
    pub previous: Option<DateTime<Utc>>,
    /// Store file receiving the current day's samples
    pub current_file: Option<PathBuf>,
}

/// What to do with the next sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Time to record, after the clock-jump guard
    pub timestamp: DateTime<Utc>,
    /// Whether the device time was replaced
    pub corrected: bool,
    /// Whether a new store file must be started
    pub rollover: bool,
}

impl Tick {
    /// Unix seconds of the corrected time
    pub fn unix(&self) -> Result<u32> {
        u32::try_from(self.timestamp.timestamp())
            .map_err(|_| anyhow::anyhow!("Timestamp {} out of range", self.timestamp))
    }
}

impl SessionState {
    /// Apply the clock-jump guard and day rollover rule to a device timestamp
    pub fn tick(&self, device_time: u32) -> Result<Tick> {
        let device = DateTime::<Utc>::from_timestamp(i64::from(device_time), 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid device timestamp {}", device_time))?;

        let (timestamp, corrected) = match self.previous {
            Some(previous) if device < previous => (previous + Duration::seconds(1), true),
            _ => (device, false),
        };

        let rollover = self.sample_count == 0
            || self
                .previous
                .map_or(true, |previous| previous.date_naive() != timestamp.date_naive());

        Ok(Tick {
            timestamp,
            corrected,
            rollover,
        })
    }

    /// State after a sample has been stored
    pub fn advance(self, tick: &Tick, file: PathBuf) -> Self {
        Self {
            sample_count: self.sample_count + 1,
            previous: Some(tick.timestamp),
            current_file: Some(file),
            ..self
        }
    }

    /// State after a frame was skipped
    pub fn dropped(self) -> Self {
        Self {
            dropped_frames: self.dropped_frames + 1,
            ..self
        }
    }
}

/// Store file name for a session starting at `start`
pub fn file_name(start: &DateTime<Utc>) -> String {
    format!("{}_raw.{}", start.format("%Y%m%d_%H%M"), crate::store::FILE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(times: &[u32]) -> Vec<Tick> {
        let mut state = SessionState::default();
        let mut ticks = Vec::new();
        for &t in times {
            let tick = state.tick(t).unwrap();
            let file = PathBuf::from(file_name(&tick.timestamp));
            let file = if tick.rollover {
                file
            } else {
                state.current_file.clone().unwrap()
            };
            state = state.advance(&tick, file);
            ticks.push(tick);
        }
        ticks
    }

    #[test]
    fn test_clock_jump_guard() {
        let ticks = run(&[100, 90, 91]);
        let unix: Vec<u32> = ticks.iter().map(|t| t.unix().unwrap()).collect();
        assert_eq!(unix, vec![100, 101, 102]);
        assert_eq!(
            ticks.iter().map(|t| t.corrected).collect::<Vec<_>>(),
            vec![false, true, true]
        );
    }

    #[test]
    fn test_first_sample_is_never_corrected() {
        let ticks = run(&[5]);
        assert_eq!(ticks[0].unix().unwrap(), 5);
        assert!(!ticks[0].corrected);
        assert!(ticks[0].rollover);
    }

    #[test]
    fn test_equal_timestamps_are_kept() {
        let ticks = run(&[100, 100]);
        assert_eq!(ticks[1].unix().unwrap(), 100);
        assert!(!ticks[1].corrected);
    }

    #[test]
    fn test_epoch_reset_stays_on_current_day() {
        // 2023-01-01 12:00:00 followed by a reset to 1970
        let ticks = run(&[1_672_574_400, 3]);
        assert_eq!(ticks[1].unix().unwrap(), 1_672_574_401);
        assert!(!ticks[1].rollover);
    }

    #[test]
    fn test_day_rollover() {
        // 2023-01-01 23:59:59, 2023-01-02 00:00:00, 2023-01-02 00:00:01
        let ticks = run(&[1_672_617_599, 1_672_617_600, 1_672_617_601]);
        assert_eq!(
            ticks.iter().map(|t| t.rollover).collect::<Vec<_>>(),
            vec![true, true, false]
        );
    }

    #[test]
    fn test_same_day_single_file() {
        let ticks = run(&[1_672_531_200, 1_672_531_260]);
        assert!(ticks[0].rollover);
        assert!(!ticks[1].rollover);
    }

    #[test]
    fn test_state_counters() {
        let state = SessionState::default().dropped().dropped();
        let tick = state.tick(10).unwrap();
        let state = state.advance(&tick, PathBuf::from("a.nc"));
        assert_eq!(state.sample_count, 1);
        assert_eq!(state.dropped_frames, 2);
        assert_eq!(state.current_file, Some(PathBuf::from("a.nc")));
    }

    #[test]
    fn test_file_name() {
        let start = DateTime::<Utc>::from_timestamp(1_672_574_430, 0).unwrap();
        assert_eq!(file_name(&start), "20230101_1200_raw.nc");
    }
}
