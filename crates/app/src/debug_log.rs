//! Opt-in keystroke debug log.
//!
//! A ring of the most recent buffer states, capped in entry count and
//! entry length, cleared on demand. Never fed while a sensitive window
//! holds focus (the pipeline withholds those records).

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use overtype_input::DebugRecord;

pub const DEBUG_LOG_CAPACITY: usize = 500;

#[derive(Clone, Default)]
pub struct DebugLog {
    entries: Arc<Mutex<VecDeque<DebugRecord>>>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: DebugRecord) {
        let mut entries = self.entries.lock();
        if entries.len() >= DEBUG_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<DebugRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drain pipeline debug records into the ring until the sender closes.
    pub fn spawn_collector(
        &self,
        mut rx: mpsc::UnboundedReceiver<DebugRecord>,
    ) -> tokio::task::JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                log.push(record);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> DebugRecord {
        DebugRecord {
            buffer: format!("entry {n}"),
            raw_count: n,
            window_title: "Editor".to_string(),
        }
    }

    #[test]
    fn caps_at_capacity_dropping_oldest() {
        let log = DebugLog::new();
        for n in 0..DEBUG_LOG_CAPACITY + 10 {
            log.push(record(n));
        }
        assert_eq!(log.len(), DEBUG_LOG_CAPACITY);
        assert_eq!(log.snapshot().first().unwrap().raw_count, 10);
    }

    #[test]
    fn clear_empties_the_ring() {
        let log = DebugLog::new();
        log.push(record(1));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn collector_drains_the_channel() {
        let log = DebugLog::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = log.spawn_collector(rx);
        tx.send(record(1)).unwrap();
        tx.send(record(2)).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(log.len(), 2);
    }
}
