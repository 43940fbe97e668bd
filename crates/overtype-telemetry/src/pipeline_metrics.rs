use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared metrics for cross-task pipeline monitoring
#[derive(Clone)]
pub struct PipelineMetrics {
    // Observer
    pub keys_seen: Arc<AtomicU64>,
    pub keys_suppressed: Arc<AtomicU64>, // echo-suppressed synthetic keys
    pub keys_dropped: Arc<AtomicU64>,    // queue overflow drops
    pub focus_changes: Arc<AtomicU64>,

    // Buffer
    pub buffer_resets: Arc<AtomicU64>,
    pub buffer_overflows: Arc<AtomicU64>,

    // Triggers
    pub triggers_backtick: Arc<AtomicU64>,
    pub triggers_live: Arc<AtomicU64>,
    pub triggers_extension: Arc<AtomicU64>,
    pub triggers_hotkey: Arc<AtomicU64>,
    pub triggers_dropped_sensitive: Arc<AtomicU64>,
    pub triggers_dropped_paused: Arc<AtomicU64>,

    // Sessions
    pub sessions_started: Arc<AtomicU64>,
    pub sessions_completed: Arc<AtomicU64>,
    pub sessions_canceled: Arc<AtomicU64>,
    pub sessions_timed_out: Arc<AtomicU64>,
    pub chunks_received: Arc<AtomicU64>,

    // Injection
    pub injections: Arc<AtomicU64>,
    pub injection_fallbacks: Arc<AtomicU64>,
    pub injection_failures: Arc<AtomicU64>,

    // Supervision
    pub worker_restarts: Arc<AtomicU64>,
    pub probe_failures: Arc<AtomicU64>,

    // Activity indicators
    pub session_in_flight: Arc<AtomicBool>,
    pub last_trigger_time: Arc<RwLock<Option<Instant>>>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            keys_seen: Arc::new(AtomicU64::new(0)),
            keys_suppressed: Arc::new(AtomicU64::new(0)),
            keys_dropped: Arc::new(AtomicU64::new(0)),
            focus_changes: Arc::new(AtomicU64::new(0)),

            buffer_resets: Arc::new(AtomicU64::new(0)),
            buffer_overflows: Arc::new(AtomicU64::new(0)),

            triggers_backtick: Arc::new(AtomicU64::new(0)),
            triggers_live: Arc::new(AtomicU64::new(0)),
            triggers_extension: Arc::new(AtomicU64::new(0)),
            triggers_hotkey: Arc::new(AtomicU64::new(0)),
            triggers_dropped_sensitive: Arc::new(AtomicU64::new(0)),
            triggers_dropped_paused: Arc::new(AtomicU64::new(0)),

            sessions_started: Arc::new(AtomicU64::new(0)),
            sessions_completed: Arc::new(AtomicU64::new(0)),
            sessions_canceled: Arc::new(AtomicU64::new(0)),
            sessions_timed_out: Arc::new(AtomicU64::new(0)),
            chunks_received: Arc::new(AtomicU64::new(0)),

            injections: Arc::new(AtomicU64::new(0)),
            injection_fallbacks: Arc::new(AtomicU64::new(0)),
            injection_failures: Arc::new(AtomicU64::new(0)),

            worker_restarts: Arc::new(AtomicU64::new(0)),
            probe_failures: Arc::new(AtomicU64::new(0)),

            session_in_flight: Arc::new(AtomicBool::new(false)),
            last_trigger_time: Arc::new(RwLock::new(None)),
        }
    }
}

impl PipelineMetrics {
    pub fn mark_trigger(&self) {
        *self.last_trigger_time.write() = Some(Instant::now());
    }

    /// One-line summary, logged on demand (SIGUSR-style dumps and shutdown).
    pub fn log_summary(&self) {
        tracing::info!(
            keys_seen = self.keys_seen.load(Ordering::Relaxed),
            keys_suppressed = self.keys_suppressed.load(Ordering::Relaxed),
            keys_dropped = self.keys_dropped.load(Ordering::Relaxed),
            buffer_resets = self.buffer_resets.load(Ordering::Relaxed),
            buffer_overflows = self.buffer_overflows.load(Ordering::Relaxed),
            sessions_started = self.sessions_started.load(Ordering::Relaxed),
            sessions_completed = self.sessions_completed.load(Ordering::Relaxed),
            sessions_canceled = self.sessions_canceled.load(Ordering::Relaxed),
            sessions_timed_out = self.sessions_timed_out.load(Ordering::Relaxed),
            chunks_received = self.chunks_received.load(Ordering::Relaxed),
            injections = self.injections.load(Ordering::Relaxed),
            injection_fallbacks = self.injection_fallbacks.load(Ordering::Relaxed),
            worker_restarts = self.worker_restarts.load(Ordering::Relaxed),
            probe_failures = self.probe_failures.load(Ordering::Relaxed),
            "pipeline metrics"
        );
    }
}
