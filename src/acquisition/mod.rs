//! Live acquisition from the particle counter's serial port
//!
//! Connecting → Configuring → Streaming. The sensor is switched into binary
//! loop output, then every delimited frame is decoded and appended to the
//! store file of its day. Any serial or storage error ends the session.

pub mod framing;
pub mod session;

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{SerialConfig, StoreConfig};
use crate::store::{self, StationInfo};
use crate::telegram::{diameters, Sample};
use framing::{FrameOutcome, FRAME_DELIMITER};
use session::{SessionState, Tick};

/// Stop any running output
pub const CMD_STOP_OUTPUT: &str = "DA0\r";
/// Select binary telegram output
pub const CMD_BINARY_MODE: &str = "DB0\r";
/// Repeat the binary telegram continuously
pub const CMD_LOOP_MODE: &str = "DBloop\r";

/// Configuration commands in the order they are sent
pub const CONFIGURE_SEQUENCE: [&str; 3] = [CMD_STOP_OUTPUT, CMD_BINARY_MODE, CMD_LOOP_MODE];

/// Response lines drained after each command
const RESPONSE_LINES: usize = 2;

/// Where and how samples are stored
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub output_dir: PathBuf,
    pub station: StationInfo,
    pub sync_on_append: bool,
}

impl StoreSettings {
    pub fn new(store: &StoreConfig, station: &StationInfo) -> Self {
        Self {
            output_dir: store.output_dir.clone(),
            station: station.clone(),
            sync_on_append: store.sync_on_append,
        }
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Create a fresh store file with the fixed diameter table
    pub fn create(&self, path: &Path) -> Result<()> {
        store::create(path, &diameters::average_diameters_m(), &self.station)
    }
}

/// Byte stream to the sensor, buffered for delimiter scanning
pub struct SerialLink<S> {
    reader: BufReader<S>,
}

impl<S: Read + Write> SerialLink<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Send one ASCII command
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        let port = self.reader.get_mut();
        port.write_all(command.as_bytes())
            .and_then(|_| port.flush())
            .with_context(|| format!("failed to send command {:?}", command.trim_end()))
    }

    /// Read one response line; `None` if the device stayed quiet
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(_) => Ok(Some(line)),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e).context("failed to read response line"),
        }
    }

    /// Read up to and including the next frame delimiter
    ///
    /// Read timeouts are retried. Returns `None` once the stream has ended;
    /// bytes pending at that point are returned as a final short frame.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut frame = Vec::with_capacity(2 * crate::telegram::TELEGRAM_LEN);
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok((!frame.is_empty()).then_some(frame)),
                Ok(_) => {
                    frame.push(byte[0]);
                    if frame.ends_with(&FRAME_DELIMITER) {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }
}

/// Switch the sensor into continuous binary output
///
/// Responses are logged but not checked.
pub fn configure<S: Read + Write>(link: &mut SerialLink<S>, settle: Duration) -> Result<()> {
    info!("Configuring sensor for binary loop output");
    sleep(settle);
    for command in CONFIGURE_SEQUENCE {
        link.send_command(command)?;
        sleep(settle);
        for _ in 0..RESPONSE_LINES {
            match link.read_line()? {
                Some(line) => info!(
                    "  {} → {:?}",
                    command.trim_end(),
                    String::from_utf8_lossy(&line).trim_end()
                ),
                None => warn!("  {} → no response", command.trim_end()),
            }
        }
    }
    Ok(())
}

/// Store one decoded sample, starting a new file on the first sample of a day
pub fn handle_sample(
    state: SessionState,
    sample: &Sample,
    settings: &StoreSettings,
) -> Result<SessionState> {
    let tick: Tick = state.tick(sample.timestamp)?;
    if tick.corrected {
        warn!(
            "Device time {} went backwards, recording {} instead",
            sample.timestamp, tick.timestamp
        );
    }

    let file = match (&state.current_file, tick.rollover) {
        (Some(file), false) => file.clone(),
        _ => {
            let path = settings.path_for(&session::file_name(&tick.timestamp));
            info!("Starting store file {:?}", path);
            settings.create(&path)?;
            path
        }
    };

    let stored = sample.with_timestamp(tick.unix()?);
    let rows = store::append(&file, &stored, settings.sync_on_append)?;
    info!(
        "{} T={:.2}°C counts={} rows={}",
        tick.timestamp,
        stored.temperature_celsius,
        stored.total_counts(),
        rows
    );

    Ok(state.advance(&tick, file))
}

/// Stream frames until the link ends
///
/// Returns the final session state when the stream closes; serial, decode
/// and storage errors are returned as-is.
pub fn stream<S: Read + Write>(
    link: &mut SerialLink<S>,
    settings: &StoreSettings,
) -> Result<SessionState> {
    let mut state = SessionState::default();

    while let Some(raw) = link.next_frame().context("serial read failed")? {
        debug!("Frame ({} bytes): {}", raw.len(), hex::encode(&raw));

        state = match framing::process_frame(&raw)? {
            FrameOutcome::Accepted(sample) => handle_sample(state, &sample, settings)?,
            FrameOutcome::Dropped(reason) => {
                warn!("Dropping frame: {}", reason);
                state.dropped()
            }
        };
    }

    Ok(state)
}

/// Configure the sensor and stream from it
pub fn run<S: Read + Write>(
    stream_port: S,
    settle: Duration,
    settings: &StoreSettings,
) -> Result<SessionState> {
    let mut link = SerialLink::new(stream_port);
    configure(&mut link, settle)?;
    info!("Streaming telegrams into {:?}", settings.output_dir);
    stream(&mut link, settings)
}

/// Open the configured serial device and acquire until it fails
pub fn run_live(serial: &SerialConfig, settings: &StoreSettings) -> Result<SessionState> {
    info!(
        "Opening {} at {} baud (8N1)",
        serial.device, serial.baud_rate
    );
    let port = serialport::new(&serial.device, serial.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(Duration::from_millis(serial.timeout_ms))
        .open()
        .map_err(|e| anyhow::anyhow!("Failed to open serial port {}: {}", serial.device, e))?;
    info!("Established serial connection");

    let state = run(port, Duration::from_millis(serial.settle_ms), settings)?;
    Err(anyhow::anyhow!(
        "serial stream from {} closed after {} samples ({} frames dropped)",
        serial.device,
        state.sample_count,
        state.dropped_frames
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::encoder::TelegramBuilder;
    use std::io::Cursor;

    /// In-memory port: scripted input, captured output
    struct MockPort {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl MockPort {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                written: Vec::new(),
            }
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Port that times out once before every chunk of data
    struct SleepyPort {
        chunks: Vec<Vec<u8>>,
        timed_out: bool,
    }

    impl Read for SleepyPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            if !self.timed_out {
                self.timed_out = true;
                return Err(io::Error::new(ErrorKind::TimedOut, "quiet"));
            }
            self.timed_out = false;
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for SleepyPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn settings(dir: &tempfile::TempDir) -> StoreSettings {
        StoreSettings {
            output_dir: dir.path().to_path_buf(),
            station: StationInfo::default(),
            sync_on_append: false,
        }
    }

    fn nc_files(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_configure_sends_commands() {
        let responses = b"DA0\r\nOK\r\nDB0\r\nOK\r\nDBloop\r\nOK\r\n".to_vec();
        let mut link = SerialLink::new(MockPort::new(responses));

        configure(&mut link, Duration::ZERO).unwrap();

        assert_eq!(link.get_ref().written, b"DA0\rDB0\rDBloop\r".to_vec());
    }

    #[test]
    fn test_next_frame_splits_on_delimiter() {
        let a = TelegramBuilder::new(1).build();
        let b = TelegramBuilder::new(2).build();
        let mut link = SerialLink::new(MockPort::new([a.clone(), b.clone()].concat()));

        assert_eq!(link.next_frame().unwrap(), Some(a));
        assert_eq!(link.next_frame().unwrap(), Some(b));
        assert_eq!(link.next_frame().unwrap(), None);
    }

    #[test]
    fn test_next_frame_returns_trailing_bytes() {
        let mut link = SerialLink::new(MockPort::new(vec![1, 2, 3]));
        assert_eq!(link.next_frame().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(link.next_frame().unwrap(), None);
    }

    #[test]
    fn test_next_frame_retries_timeouts() {
        let telegram = TelegramBuilder::new(7).build();
        let port = SleepyPort {
            chunks: telegram.chunks(50).map(|c| c.to_vec()).collect(),
            timed_out: false,
        };
        let mut link = SerialLink::new(port);
        assert_eq!(link.next_frame().unwrap(), Some(telegram));
    }

    #[test]
    fn test_stream_same_day_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = [
            TelegramBuilder::new(1_672_531_200).build(),
            TelegramBuilder::new(1_672_531_201).build(),
        ]
        .concat();
        let mut link = SerialLink::new(MockPort::new(input));

        let state = stream(&mut link, &settings(&dir)).unwrap();

        assert_eq!(state.sample_count, 2);
        assert_eq!(nc_files(&dir), vec!["20230101_0000_raw.nc"]);
        let ds = store::load(&dir.path().join("20230101_0000_raw.nc")).unwrap();
        assert_eq!(ds.timestamps, vec![1_672_531_200, 1_672_531_201]);
    }

    #[test]
    fn test_stream_day_rollover_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = [
            TelegramBuilder::new(1_672_617_599).build(), // 2023-01-01 23:59:59
            TelegramBuilder::new(1_672_617_600).build(), // 2023-01-02 00:00:00
        ]
        .concat();
        let mut link = SerialLink::new(MockPort::new(input));

        stream(&mut link, &settings(&dir)).unwrap();

        assert_eq!(
            nc_files(&dir),
            vec!["20230101_2359_raw.nc", "20230102_0000_raw.nc"]
        );
        let first = store::load(&dir.path().join("20230101_2359_raw.nc")).unwrap();
        let second = store::load(&dir.path().join("20230102_0000_raw.nc")).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_stream_stores_corrected_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let input = [
            TelegramBuilder::new(1_672_531_200).build(),
            TelegramBuilder::new(90).build(),
            TelegramBuilder::new(91).build(),
        ]
        .concat();
        let mut link = SerialLink::new(MockPort::new(input));

        stream(&mut link, &settings(&dir)).unwrap();

        let ds = store::load(&dir.path().join("20230101_0000_raw.nc")).unwrap();
        assert_eq!(
            ds.timestamps,
            vec![1_672_531_200, 1_672_531_201, 1_672_531_202]
        );
    }

    #[test]
    fn test_stream_resyncs_and_drops() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = b"$GPZDA,000001.00,01,01,2023*6F\r\n".to_vec();
        input.extend_from_slice(&TelegramBuilder::new(1_672_531_200).build());
        // Truncated telegram: only the delimiter survived
        input.extend_from_slice(&[0x01, 0x02, 0x55, 0x55, 0x55]);
        input.extend_from_slice(&TelegramBuilder::new(1_672_531_201).build());
        let mut link = SerialLink::new(MockPort::new(input));

        let state = stream(&mut link, &settings(&dir)).unwrap();

        assert_eq!(state.sample_count, 2);
        assert_eq!(state.dropped_frames, 1);
    }

    #[test]
    fn test_run_configures_then_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = b"a\nb\nc\nd\ne\nf\n".to_vec();
        input.extend_from_slice(&TelegramBuilder::new(1_672_531_200).build());

        let state = run(MockPort::new(input), Duration::ZERO, &settings(&dir)).unwrap();

        assert_eq!(state.sample_count, 1);
        assert_eq!(nc_files(&dir).len(), 1);
    }

    #[test]
    fn test_storage_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bad = StoreSettings {
            output_dir: dir.path().join("does/not/exist"),
            ..settings(&dir)
        };
        let input = TelegramBuilder::new(1_672_531_200).build();
        let mut link = SerialLink::new(MockPort::new(input));

        assert!(stream(&mut link, &bad).is_err());
    }
}
