#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_metrics` defines the capability through which the mirror reports
//! what it is doing. Every component emits named string pairs; the engine
//! holds the capability, not a concrete collector, so operators can route the
//! stream wherever they like.
//!
//! # Design
//!
//! Anything offering [`MetricsSink::record`] and [`MetricsSink::collect`] is
//! an acceptable sink. [`MetricsRecorder`] is the bundled implementation: a
//! mutex-guarded vector of timestamped samples that `collect` drains, matching
//! the periodic drain-and-report loop the service binary runs.

use std::sync::Mutex;
use std::time::SystemTime;

/// One recorded metric event.
#[derive(Debug, Clone)]
pub struct MetricSample {
    /// Metric name, e.g. `tx_completed`.
    pub name: String,
    /// Free-form value, typically a path or transaction id.
    pub value: String,
    /// Wall-clock time the sample was recorded.
    pub timestamp: SystemTime,
}

/// Capability for emitting and draining named metric events.
///
/// Implementations must be thread-safe; every worker and sweeper in the
/// engine records through a shared handle.
pub trait MetricsSink: Send + Sync {
    /// Records one named event.
    fn record(&self, name: &str, value: &str);

    /// Drains and returns every sample recorded since the last drain.
    fn collect(&self) -> Vec<MetricSample>;
}

/// In-memory sink that accumulates samples until drained.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    samples: Mutex<Vec<MetricSample>>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().expect("metrics lock poisoned").len()
    }

    /// True when no samples are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsSink for MetricsRecorder {
    fn record(&self, name: &str, value: &str) {
        let sample = MetricSample {
            name: name.to_string(),
            value: value.to_string(),
            timestamp: SystemTime::now(),
        };
        self.samples
            .lock()
            .expect("metrics lock poisoned")
            .push(sample);
    }

    fn collect(&self) -> Vec<MetricSample> {
        std::mem::take(&mut *self.samples.lock().expect("metrics lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn collect_drains_recorded_samples() {
        let recorder = MetricsRecorder::new();
        recorder.record("file_queued", "/tmp/a.txt");
        recorder.record("tx_started", "tx-1-1");

        let drained = recorder.collect();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].name, "file_queued");
        assert_eq!(drained[1].value, "tx-1-1");
        assert!(recorder.collect().is_empty());
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let recorder = Arc::new(MetricsRecorder::new());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let recorder = Arc::clone(&recorder);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    recorder.record("tick", &format!("{worker}-{i}"));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker join");
        }

        assert_eq!(recorder.collect().len(), 1000);
    }
}
