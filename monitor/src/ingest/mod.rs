pub mod reader;
pub mod source;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use lms_common::config::{SerialConfig, SerialSourceConfig, VitalsConfig};
use lms_common::state::{LatestRecord, TelemetryState};
use lms_common::telemetry::{MotionParser, PlausibilityRules, RecordParser, VitalsParser};
use tracing::{info, warn};

use self::reader::{ReaderLoop, ReaderStats};
use self::source::SerialLineSource;

/// Starts one OS thread per serial source. The sources never wait on each
/// other.
pub struct Ingestor;

impl Ingestor {
    /// Spawn a reader thread for every enabled serial source.
    pub fn start(
        serial: &SerialConfig,
        vitals: &VitalsConfig,
        state: &TelemetryState,
    ) -> std::io::Result<IngestorHandle> {
        let mut handle = IngestorHandle {
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            stats: BTreeMap::new(),
        };

        let parser = VitalsParser::new(
            PlausibilityRules::new(vitals.rules.clone()),
            vitals.baseline_status,
        );
        handle.launch("vitals", parser, state.vitals_slot(), &serial.vitals)?;
        handle.launch("motion", MotionParser, state.motion_slot(), &serial.motion)?;

        Ok(handle)
    }
}

/// Owns the reader threads. Dropping it without [`shutdown`] leaves the
/// threads running until the process exits.
///
/// [`shutdown`]: IngestorHandle::shutdown
pub struct IngestorHandle {
    shutdown: Arc<AtomicBool>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
    stats: BTreeMap<&'static str, Arc<ReaderStats>>,
}

impl IngestorHandle {
    fn launch<P: RecordParser>(
        &mut self,
        name: &'static str,
        parser: P,
        slot: Arc<LatestRecord<P::Record>>,
        config: &SerialSourceConfig,
    ) -> std::io::Result<()> {
        if !config.enabled {
            info!(reader = name, port = config.port, "serial source disabled");
            return Ok(());
        }

        let reader = ReaderLoop::new(
            name,
            parser,
            slot,
            Duration::from_millis(config.error_pause_ms),
            Arc::clone(&self.shutdown),
        );
        self.stats.insert(name, reader.stats());

        let port = config.port.clone();
        let baud_rate = config.baud_rate;
        let timeout = Duration::from_millis(config.read_timeout_ms);
        let thread = reader.spawn(
            move || SerialLineSource::open(&port, baud_rate, timeout),
            Duration::from_millis(config.boot_delay_ms),
        )?;
        info!(reader = name, port = config.port, baud_rate, "serial reader started");
        self.threads.push((name, thread));
        Ok(())
    }

    /// Live counters per started reader, keyed by source name.
    pub fn stats(&self) -> BTreeMap<&'static str, Arc<ReaderStats>> {
        self.stats.clone()
    }

    /// Raise the stop flag and wait for every reader. Each thread notices
    /// within one read timeout.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for (name, thread) in self.threads {
            if thread.join().is_err() {
                warn!(reader = name, "reader thread panicked");
            }
        }
        info!("ingestor stopped");
    }
}
