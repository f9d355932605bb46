//! Session metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::streaming::SessionStats;

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records that a session started consuming a stream.
    fn record_session_started(&self);

    /// Records a session that reached `complete`.
    fn record_session_completed(&self, stats: &SessionStats, duration: Duration);

    /// Records a session that ended with `error`.
    fn record_session_failed(&self, error_kind: &str, stats: &SessionStats);

    /// Records an attempt to open a stream with a model.
    fn record_model_attempt(&self, model: &str, success: bool);

    /// Gets current metrics.
    fn get_metrics(&self) -> SessionMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Session metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetrics {
    /// Sessions started.
    pub sessions_started: u64,
    /// Sessions that reached `complete`.
    pub sessions_completed: u64,
    /// Sessions that ended with `error`.
    pub sessions_failed: u64,
    /// Slides emitted while streaming.
    pub slides_streamed: u64,
    /// Slides emitted by the finalization flush.
    pub slides_flushed: u64,
    /// Malformed transport frames skipped.
    pub malformed_frames: u64,
    /// Total duration of completed sessions in milliseconds.
    pub total_duration_ms: u64,
    /// Successful repairs per heuristic.
    pub repairs: HashMap<String, u64>,
    /// Failures per error kind.
    pub errors: HashMap<String, u64>,
    /// Stream attempts per model, `(successes, failures)`.
    pub models: HashMap<String, (u64, u64)>,
}

impl SessionMetrics {
    /// Percentage of finished sessions that completed.
    pub fn success_rate(&self) -> f64 {
        let finished = self.sessions_completed + self.sessions_failed;
        if finished == 0 {
            100.0
        } else {
            (self.sessions_completed as f64 / finished as f64) * 100.0
        }
    }

    /// Average duration of completed sessions in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.sessions_completed == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.sessions_completed as f64
        }
    }

    /// Share of slides that were only delivered by the finalization flush.
    ///
    /// A high value means incremental parsing rarely caught up with the
    /// stream.
    pub fn flush_ratio(&self) -> f64 {
        let total = self.slides_streamed + self.slides_flushed;
        if total == 0 {
            0.0
        } else {
            self.slides_flushed as f64 / total as f64
        }
    }
}

/// In-memory metrics collector.
pub struct InMemoryMetricsCollector {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    slides_streamed: AtomicU64,
    slides_flushed: AtomicU64,
    malformed_frames: AtomicU64,
    total_duration_ms: AtomicU64,
    repairs: RwLock<HashMap<String, u64>>,
    errors: RwLock<HashMap<String, u64>>,
    models: RwLock<HashMap<String, (u64, u64)>>,
}

impl InMemoryMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            slides_streamed: AtomicU64::new(0),
            slides_flushed: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            repairs: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
        }
    }

    fn record_stats(&self, stats: &SessionStats) {
        self.slides_streamed
            .fetch_add(stats.slides_streamed as u64, Ordering::Relaxed);
        self.slides_flushed
            .fetch_add(stats.slides_flushed as u64, Ordering::Relaxed);
        self.malformed_frames
            .fetch_add(stats.malformed_frames as u64, Ordering::Relaxed);
    }
}

impl Default for InMemoryMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_session_completed(&self, stats: &SessionStats, duration: Duration) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.record_stats(stats);

        if let Some(heuristic) = stats.repair_heuristic {
            if let Ok(mut repairs) = self.repairs.write() {
                *repairs.entry(heuristic.to_string()).or_insert(0) += 1;
            }
        }
    }

    fn record_session_failed(&self, error_kind: &str, stats: &SessionStats) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
        self.record_stats(stats);

        if let Ok(mut errors) = self.errors.write() {
            *errors.entry(error_kind.to_string()).or_insert(0) += 1;
        }
    }

    fn record_model_attempt(&self, model: &str, success: bool) {
        if let Ok(mut models) = self.models.write() {
            let entry = models.entry(model.to_string()).or_insert((0, 0));
            if success {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }

    fn get_metrics(&self) -> SessionMetrics {
        SessionMetrics {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            slides_streamed: self.slides_streamed.load(Ordering::Relaxed),
            slides_flushed: self.slides_flushed.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
            repairs: self.repairs.read().map(|r| r.clone()).unwrap_or_default(),
            errors: self.errors.read().map(|e| e.clone()).unwrap_or_default(),
            models: self.models.read().map(|m| m.clone()).unwrap_or_default(),
        }
    }

    fn reset(&self) {
        self.sessions_started.store(0, Ordering::Relaxed);
        self.sessions_completed.store(0, Ordering::Relaxed);
        self.sessions_failed.store(0, Ordering::Relaxed);
        self.slides_streamed.store(0, Ordering::Relaxed);
        self.slides_flushed.store(0, Ordering::Relaxed);
        self.malformed_frames.store(0, Ordering::Relaxed);
        self.total_duration_ms.store(0, Ordering::Relaxed);

        if let Ok(mut repairs) = self.repairs.write() {
            repairs.clear();
        }
        if let Ok(mut errors) = self.errors.write() {
            errors.clear();
        }
        if let Ok(mut models) = self.models.write() {
            models.clear();
        }
    }
}

impl std::fmt::Debug for InMemoryMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetricsCollector")
            .field("sessions_started", &self.sessions_started.load(Ordering::Relaxed))
            .field(
                "sessions_completed",
                &self.sessions_completed.load(Ordering::Relaxed),
            )
            .field("sessions_failed", &self.sessions_failed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Collector that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_session_started(&self) {}

    fn record_session_completed(&self, _stats: &SessionStats, _duration: Duration) {}

    fn record_session_failed(&self, _error_kind: &str, _stats: &SessionStats) {}

    fn record_model_attempt(&self, _model: &str, _success: bool) {}

    fn get_metrics(&self) -> SessionMetrics {
        SessionMetrics::default()
    }

    fn reset(&self) {}
}
