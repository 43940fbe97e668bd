//! Overtype's concrete liveness probes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use overtype_foundation::{HealthHandle, HealthMonitor, HealthProbe};
use overtype_input::EventQueue;
use overtype_telemetry::PipelineMetrics;

use crate::orchestrator::SharedBackend;

const PROBE_CADENCE: Duration = Duration::from_secs(30);

/// Degraded while no worker client occupies the backend slot (the
/// supervisor is between restarts, or gave up).
pub struct WorkerAttached {
    backend_slot: SharedBackend,
}

impl HealthProbe for WorkerAttached {
    fn name(&self) -> &'static str {
        "ai-worker"
    }

    fn probe(&self) -> Result<(), String> {
        if self.backend_slot.read().is_some() {
            Ok(())
        } else {
            Err("no worker attached".to_string())
        }
    }
}

/// Degraded only while the observer queue keeps dropping events; a
/// historical overflow does not pin the probe red.
pub struct ObserverQueuePressure {
    queue: EventQueue,
    last_seen_dropped: AtomicU64,
}

impl HealthProbe for ObserverQueuePressure {
    fn name(&self) -> &'static str {
        "observer-queue"
    }

    fn probe(&self) -> Result<(), String> {
        let dropped = self.queue.dropped();
        let previous = self.last_seen_dropped.swap(dropped, Ordering::Relaxed);
        let fresh = dropped.saturating_sub(previous);
        if fresh == 0 {
            Ok(())
        } else {
            Err(format!("dropped {fresh} events since last probe"))
        }
    }
}

pub fn spawn_monitor(
    backend_slot: SharedBackend,
    queue: EventQueue,
    metrics: PipelineMetrics,
) -> HealthHandle {
    HealthMonitor::new(PROBE_CADENCE, metrics)
        .probe(Box::new(WorkerAttached { backend_slot }))
        .probe(Box::new(ObserverQueuePressure {
            queue,
            last_seen_dropped: AtomicU64::new(0),
        }))
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use overtype_input::{LogicalKey, ObserverEvent, RawKeyEvent};

    #[test]
    fn worker_probe_follows_the_backend_slot() {
        let slot: SharedBackend = std::sync::Arc::new(parking_lot::RwLock::new(None));
        let probe = WorkerAttached {
            backend_slot: slot.clone(),
        };
        assert!(probe.probe().is_err());
    }

    #[test]
    fn queue_probe_clears_once_drops_stop() {
        let queue = EventQueue::with_capacity(1);
        let probe = ObserverQueuePressure {
            queue: queue.clone(),
            last_seen_dropped: AtomicU64::new(0),
        };
        assert!(probe.probe().is_ok());

        // Overflow the queue so an event drops.
        for ch in ['a', 'b'] {
            queue.push(ObserverEvent::Key(RawKeyEvent::down(LogicalKey::Printable(
                ch,
            ))));
        }
        assert!(probe.probe().is_err());

        // No further drops: pressure cleared on the next probe.
        assert!(probe.probe().is_ok());
    }
}
