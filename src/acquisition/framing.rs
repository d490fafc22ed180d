//! Serial framing
//!
//! The sensor does not length-prefix its telegrams. The stream is cut at the
//! `0x55 0x55 0x55` trailer, which is also the last three bytes of every
//! telegram. When the GPS time sync output gets mixed into the stream the cut
//! yields an oversized frame; everything before the first `0xAA` byte (the
//! telegram's lead tag) is then discarded.

use std::fmt;

use crate::telegram::{self, Sample, TELEGRAM_LEN};

/// End-of-frame marker
pub const FRAME_DELIMITER: [u8; 3] = [0x55, 0x55, 0x55];

/// Start-of-telegram byte searched for when resynchronizing
pub const RESYNC_MARKER: u8 = 0xAA;

/// Why a frame was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not a telegram length after resync (length given)
    WrongLength(usize),
    /// Oversized frame without a resync marker (length given)
    NoResyncMarker(usize),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::WrongLength(len) => {
                write!(f, "frame is {} bytes, expected {}", len, TELEGRAM_LEN)
            }
            DropReason::NoResyncMarker(len) => {
                write!(f, "oversized frame ({} bytes) without resync marker", len)
            }
        }
    }
}

/// Result of handling one delimited frame; fatal errors travel as `Err`
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Accepted(Sample),
    Dropped(DropReason),
}

/// Cut an oversized frame back to the telegram, if possible
///
/// Returns the slice that should be decoded, or the reason it cannot be.
pub fn extract_telegram(raw: &[u8]) -> Result<&[u8], DropReason> {
    let frame = if raw.len() > TELEGRAM_LEN {
        let start = raw
            .iter()
            .position(|&b| b == RESYNC_MARKER)
            .ok_or(DropReason::NoResyncMarker(raw.len()))?;
        &raw[start..]
    } else {
        raw
    };

    if frame.len() == TELEGRAM_LEN {
        Ok(frame)
    } else {
        Err(DropReason::WrongLength(frame.len()))
    }
}

/// Resync, length-check and decode one frame
pub fn process_frame(raw: &[u8]) -> anyhow::Result<FrameOutcome> {
    match extract_telegram(raw) {
        Ok(frame) => Ok(FrameOutcome::Accepted(telegram::decode(frame)?)),
        Err(reason) => Ok(FrameOutcome::Dropped(reason)),
    }
}
