//! Echo-suppression window shared between the injector and the observer.
//!
//! While the gate is open every incoming keystroke is treated as synthetic:
//! it must not update the buffer and must not fire triggers. The injector
//! holds a guard for the duration of a delete-and-type; a short burst tail
//! after the guard drops covers OS events still in flight.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tail kept open after the last synthetic keystroke is confirmed.
const BURST_TAIL: Duration = Duration::from_millis(150);

#[derive(Clone, Default)]
pub struct EchoGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    open_count: AtomicU32,
    burst_deadline: Mutex<Option<Instant>>,
}

impl EchoGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open for an injection; the returned guard closes the gate on drop,
    /// leaving the burst tail armed.
    pub fn open(&self) -> EchoGuard {
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        EchoGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Orchestrator-opened burst window for backends that cannot flag
    /// injected events themselves.
    pub fn open_burst(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut slot = self.inner.burst_deadline.lock();
        match *slot {
            Some(existing) if existing >= deadline => {}
            _ => *slot = Some(deadline),
        }
    }

    pub fn is_open(&self) -> bool {
        if self.inner.open_count.load(Ordering::SeqCst) > 0 {
            return true;
        }
        let mut slot = self.inner.burst_deadline.lock();
        match *slot {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *slot = None;
                false
            }
            None => false,
        }
    }

    /// Cancellation path: close immediately, dropping any burst tail.
    pub fn force_close(&self) {
        self.inner.open_count.store(0, Ordering::SeqCst);
        *self.inner.burst_deadline.lock() = None;
    }
}

pub struct EchoGuard {
    inner: Arc<GateInner>,
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        let prev = self.inner.open_count.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            // Last guard out arms the tail.
            *self.inner.burst_deadline.lock() = Some(Instant::now() + BURST_TAIL);
        }
    }
}
