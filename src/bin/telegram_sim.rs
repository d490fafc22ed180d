//! Telegram Simulator
//!
//! Writes synthetic particle counter telegrams, back to back, the same
//! format the sensor records to its memory card. Written to a file, the
//! output feeds `spc-nrt convert`; written to one end of a pty pair
//! (`socat -d -d pty,raw,echo=0 pty,raw,echo=0`) with pacing, it stands in
//! for the serial port of `spc-nrt acquire`.
//!
//! Usage: cargo run --bin telegram-sim [output] [count] [start_unix]
//!
//! Options (env vars):
//!   SIM_INTERVAL_MS=<ms>  Pause between telegrams (default 0)
//!   SIM_CLOCK_RESET=<n>   Stamp telegram n with a 1970 time, like a device clock reset
//!   SIM_GPS_NOISE=1       Put a GPS sync sentence before every 10th telegram

use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::thread::sleep;
use std::time::Duration;

use spc_nrt::telegram::encoder::TelegramBuilder;
use spc_nrt::telegram::BIN_COUNT;

const GPS_SENTENCE: &[u8] = b"$GPZDA,000000.00,01,01,2023,00,00*6F\r\n";

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let output = args.next().unwrap_or_else(|| "sim.LOG".to_string());
    let count: u32 = args.next().unwrap_or_else(|| "600".to_string()).parse()?;
    let start: u32 = args
        .next()
        .unwrap_or_else(|| "1672531200".to_string())
        .parse()?;
    let clock_reset: Option<u32> = env::var("SIM_CLOCK_RESET").ok().map(|v| v.parse()).transpose()?;
    let gps_noise = env::var("SIM_GPS_NOISE").is_ok_and(|v| v == "1");
    let interval = Duration::from_millis(
        env::var("SIM_INTERVAL_MS").ok().map(|v| v.parse()).transpose()?.unwrap_or(0),
    );

    println!("Telegram Simulator");
    println!("  Output: {}", output);
    println!("  Telegrams: {} starting at {}", count, start);
    if let Some(n) = clock_reset {
        println!("  Clock reset at telegram {}", n);
    }
    if gps_noise {
        println!("  GPS sync noise enabled (serial use only, convert cannot read it)");
    }

    let mut out = BufWriter::new(File::create(&output)?);
    for i in 0..count {
        let timestamp = if clock_reset == Some(i) { i } else { start + i };
        let telegram = TelegramBuilder::new(timestamp)
            .histogram(histogram(i))
            .temperature(-15.0 + f64::from(i % 100) * 0.01)
            .build();

        if gps_noise && i % 10 == 0 {
            out.write_all(GPS_SENTENCE)?;
        }
        out.write_all(&telegram)?;
        if !interval.is_zero() {
            out.flush()?;
            sleep(interval);
        }
    }
    out.flush()?;

    println!("Done.");
    Ok(())
}

/// Counts falling off with diameter, varying slowly over time
fn histogram(i: u32) -> [u16; BIN_COUNT] {
    let mut bins = [0u16; BIN_COUNT];
    let scale = 20 + (i / 60) % 30;
    for (bin, count) in bins.iter_mut().enumerate() {
        // Keep the values clear of the 0x55 0x55 0x55 delimiter
        *count = ((scale * 64) / (bin as u32 + 4)) as u16 & 0x3F3F;
    }
    bins
}
