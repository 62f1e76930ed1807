use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct RunMetrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    qa_pairs_generated: AtomicU64,
}

impl RunMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pipeline run entering the Running state.
    pub fn record_start(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that finished normally and the pairs it produced.
    pub fn record_completion(&self, qa_pairs: u64) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.qa_pairs_generated.fetch_add(qa_pairs, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            qa_pairs_generated: self.qa_pairs_generated.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of run counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of pipeline runs started since process start.
    pub runs_started: u64,
    /// Number of runs that reached the Finished state.
    pub runs_completed: u64,
    /// Total QA pairs accumulated across completed runs.
    pub qa_pairs_generated: u64,
}
