use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lms_common::state::LatestRecord;
use lms_common::telemetry::{RecordParser, TelemetryError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::source::{LineSource, SerialError};

/// Granularity of interruptible pauses.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Counters for one reader, updated from its thread and read by the API.
#[derive(Debug, Default)]
pub struct ReaderStats {
    lines_read: AtomicU64,
    records_published: AtomicU64,
    errors: AtomicU64,
    connected: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderSnapshot {
    pub connected: bool,
    pub lines_read: u64,
    pub records_published: u64,
    pub errors: u64,
}

impl ReaderStats {
    pub fn snapshot(&self) -> ReaderSnapshot {
        ReaderSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

pub struct ReaderLoop<P: RecordParser> {
    name: String,
    parser: P,
    slot: Arc<LatestRecord<P::Record>>,
    stats: Arc<ReaderStats>,
    error_pause: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<P: RecordParser> ReaderLoop<P> {
    pub fn new(
        name: impl Into<String>,
        parser: P,
        slot: Arc<LatestRecord<P::Record>>,
        error_pause: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            parser,
            slot,
            stats: Arc::new(ReaderStats::default()),
            error_pause,
            shutdown,
        }
    }

    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Parse one line and publish it. Returns `Ok(false)` for blank lines,
    /// which are skipped without touching the slot or the counters.
    pub fn process_line(&self, line: &str) -> Result<bool, TelemetryError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }
        self.stats.lines_read.fetch_add(1, Ordering::Relaxed);

        let record = self.parser.parse(line)?;
        self.slot.replace(record);
        let published = self.stats.records_published.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(reader = %self.name, parser = self.parser.name(), published, "record published");
        Ok(true)
    }

    /// Read until shutdown. Every failure is transient: log, pause, carry on.
    pub fn run<L: LineSource>(&self, source: &mut L) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match source.read_line() {
                Ok(None) => {}
                Ok(Some(line)) => {
                    if let Err(e) = self.process_line(&line) {
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(reader = %self.name, error = %e, line = %line, "discarding line");
                        self.pause(self.error_pause);
                    }
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(reader = %self.name, error = %e, "serial read error");
                    self.pause(self.error_pause);
                }
            }
        }
    }

    /// Start the loop on its own named thread. `open` runs on that thread;
    /// if it fails the reader logs and exits for good.
    pub fn spawn<L, F>(self, open: F, boot_delay: Duration) -> std::io::Result<JoinHandle<()>>
    where
        L: LineSource + 'static,
        F: FnOnce() -> Result<L, SerialError> + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("serial-{}", self.name))
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => source,
                    Err(e) => {
                        error!(
                            reader = %self.name,
                            error = %e,
                            "serial source unavailable, reader stopped"
                        );
                        return;
                    }
                };
                self.stats.connected.store(true, Ordering::Relaxed);

                // Boards reset when the port opens; let them boot.
                self.pause(boot_delay);
                info!(reader = %self.name, "reader running");

                self.run(&mut source);

                self.stats.connected.store(false, Ordering::Relaxed);
                let stats = self.stats.snapshot();
                info!(
                    reader = %self.name,
                    lines = stats.lines_read,
                    published = stats.records_published,
                    errors = stats.errors,
                    "reader stopped"
                );
            })
    }

    /// Sleep for `total`, waking early on shutdown.
    fn pause(&self, total: Duration) {
        let mut left = total;
        while !left.is_zero() && !self.shutdown.load(Ordering::Relaxed) {
            let step = left.min(SHUTDOWN_POLL);
            thread::sleep(step);
            left -= step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_common::telemetry::{MotionParser, VitalsParser, VitalsRecord, VitalsStatus};
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Yields scripted lines, then raises the shutdown flag.
    struct ScriptedLines {
        lines: VecDeque<Result<Option<String>, SerialError>>,
        shutdown: Arc<AtomicBool>,
    }

    impl ScriptedLines {
        fn new(lines: &[&str], shutdown: &Arc<AtomicBool>) -> Self {
            Self {
                lines: lines.iter().map(|l| Ok(Some(l.to_string()))).collect(),
                shutdown: Arc::clone(shutdown),
            }
        }
    }

    impl LineSource for ScriptedLines {
        fn read_line(&mut self) -> Result<Option<String>, SerialError> {
            match self.lines.pop_front() {
                Some(next) => next,
                None => {
                    self.shutdown.store(true, Ordering::SeqCst);
                    Ok(None)
                }
            }
        }
    }

    type VitalsSlot = Arc<LatestRecord<VitalsRecord>>;

    fn vitals_loop(shutdown: &Arc<AtomicBool>) -> (ReaderLoop<VitalsParser>, VitalsSlot) {
        let slot = Arc::new(LatestRecord::new());
        let reader = ReaderLoop::new(
            "vitals",
            VitalsParser::default(),
            Arc::clone(&slot),
            Duration::ZERO,
            Arc::clone(shutdown),
        );
        (reader, slot)
    }

    #[test]
    fn publishes_corrected_records_and_skips_bad_lines() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (reader, slot) = vitals_loop(&shutdown);
        let mut source = ScriptedLines::new(
            &[
                "{\"heartRate\": 130, \"spo2\": 80}",
                "",
                "not json",
                "[1, 2]",
                "   ",
            ],
            &shutdown,
        );

        reader.run(&mut source);

        let record = slot.get().unwrap();
        assert_eq!(record.heart_rate, 105);
        assert_eq!(record.spo2, 80);
        assert_eq!(record.status, VitalsStatus::HighHeartRate);

        let stats = reader.stats().snapshot();
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.records_published, 1);
        assert_eq!(stats.errors, 2);
    }

    #[test]
    fn malformed_line_leaves_previous_record() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (reader, slot) = vitals_loop(&shutdown);

        assert!(reader.process_line("{\"heartRate\": 72, \"spo2\": 97}").unwrap());
        let before = slot.get();
        assert!(reader.process_line("{\"heartRate\": \"fast\"}").is_err());
        assert!(reader.process_line("{\"heartRate\": 7").is_err());
        assert_eq!(slot.get(), before);
        assert!(!reader.process_line("").unwrap());
    }

    #[test]
    fn read_errors_are_transient() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(LatestRecord::new());
        let reader = ReaderLoop::new(
            "motion",
            MotionParser,
            Arc::clone(&slot),
            Duration::ZERO,
            Arc::clone(&shutdown),
        );
        let mut source = ScriptedLines::new(&[], &shutdown);
        source.lines.push_back(Err(SerialError::LineTooLong));
        source
            .lines
            .push_back(Ok(Some("{\"moving\": true, \"steps\": 12}".into())));

        reader.run(&mut source);

        let record = slot.get().unwrap();
        assert!(record.moving);
        assert_eq!(record.steps, 12);
        assert_eq!(reader.stats().snapshot().errors, 1);
    }

    #[test]
    fn failed_open_ends_reader_without_publishing() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (reader, slot) = vitals_loop(&shutdown);
        let stats = reader.stats();

        let handle = reader
            .spawn(
                || -> Result<ScriptedLines, SerialError> { Err(SerialError::LineTooLong) },
                Duration::ZERO,
            )
            .unwrap();
        handle.join().unwrap();

        assert!(slot.is_empty());
        assert!(!stats.snapshot().connected);
    }

    #[test]
    fn shutdown_interrupts_boot_delay() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (reader, _) = vitals_loop(&shutdown);
        let lines_shutdown = Arc::clone(&shutdown);

        let started = Instant::now();
        let handle = reader
            .spawn(
                move || Ok(ScriptedLines::new(&[], &lines_shutdown)),
                Duration::from_secs(30),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
