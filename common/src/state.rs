use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::telemetry::{MotionRecord, VitalsRecord};

/// Holds the most recent complete record from one source.
///
/// Writers swap the whole value under the lock, so a reader sees either the
/// previous record or the next one, never a mix.
#[derive(Debug)]
pub struct LatestRecord<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> LatestRecord<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Copy of the current record, `None` until the first publish.
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }

    /// Swap in a new record, returning the one it displaced.
    pub fn replace(&self, record: T) -> Option<T> {
        self.lock().replace(record)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    // The slot only ever holds whole records, so a panic elsewhere while the
    // lock was held cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for LatestRecord<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort view over both sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedSnapshot {
    pub vitals: Option<VitalsRecord>,
    pub motion: Option<MotionRecord>,
}

/// Process-wide telemetry: one cell per serial source.
#[derive(Debug, Default)]
pub struct TelemetryState {
    vitals: Arc<LatestRecord<VitalsRecord>>,
    motion: Arc<LatestRecord<MotionRecord>>,
}

impl TelemetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vitals(&self) -> &LatestRecord<VitalsRecord> {
        &self.vitals
    }

    pub fn motion(&self) -> &LatestRecord<MotionRecord> {
        &self.motion
    }

    /// Shared handle for the vitals reader thread.
    pub fn vitals_slot(&self) -> Arc<LatestRecord<VitalsRecord>> {
        Arc::clone(&self.vitals)
    }

    /// Shared handle for the motion reader thread.
    pub fn motion_slot(&self) -> Arc<LatestRecord<MotionRecord>> {
        Arc::clone(&self.motion)
    }

    /// Read both records. Locks are always taken vitals first, then motion.
    pub fn combined(&self) -> CombinedSnapshot {
        let vitals = self.vitals.lock();
        let motion = self.motion.lock();
        CombinedSnapshot {
            vitals: vitals.clone(),
            motion: motion.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::VitalsStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn vitals(n: i64) -> VitalsRecord {
        VitalsRecord {
            heart_rate: n,
            spo2: n,
            status: if n % 2 == 0 {
                VitalsStatus::Normal
            } else {
                VitalsStatus::HighHeartRate
            },
            timestamp: n as f64,
        }
    }

    #[test]
    fn empty_until_first_replace() {
        let cell = LatestRecord::<VitalsRecord>::new();
        assert!(cell.is_empty());
        assert!(cell.get().is_none());
        assert!(cell.replace(vitals(1)).is_none());
        assert_eq!(cell.get(), Some(vitals(1)));
        assert_eq!(cell.replace(vitals(2)), Some(vitals(1)));
    }

    #[test]
    fn combined_reports_missing_sources_as_none() {
        let state = TelemetryState::new();
        state.vitals().replace(vitals(4));
        let snap = state.combined();
        assert_eq!(snap.vitals, Some(vitals(4)));
        assert!(snap.motion.is_none());

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["motion"].is_null());
        assert_eq!(json["vitals"]["heartRate"], 4);
    }

    #[test]
    fn concurrent_readers_never_see_torn_records() {
        let state = Arc::new(TelemetryState::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let slot = state.vitals_slot();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for n in 0..20_000 {
                    slot.replace(vitals(n));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut observed = 0u64;
                    let mut last = -1i64;
                    while !done.load(Ordering::SeqCst) {
                        let snap = state.combined();
                        let got = state.vitals().get();
                        for r in [snap.vitals, got].into_iter().flatten() {
                            assert_eq!(r, vitals(r.heart_rate), "torn record {r:?}");
                            observed += 1;
                        }
                        if let Some(r) = state.vitals().get() {
                            assert!(r.heart_rate >= last, "went backwards");
                            last = r.heart_rate;
                        }
                    }
                    observed
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(state.vitals().get(), Some(vitals(19_999)));
    }
}
