//! Debounced liveness probes over the daemon's moving parts.
//!
//! Each registered probe runs on a fixed cadence. A probe only counts as
//! degraded after several consecutive failures, the same debouncing the
//! input side applies to noisy signals, so a single missed beat during a
//! worker restart does not flip the daemon unhealthy. Failures are
//! tallied in the shared pipeline metrics and the worst degraded probe
//! can be surfaced as an `OvertypeError::Unhealthy`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use overtype_telemetry::PipelineMetrics;

use crate::error::OvertypeError;

/// Consecutive failures before a probe is reported degraded.
pub const DEGRADED_AFTER: u32 = 3;

/// One observed facet of the daemon (worker attached, queue pressure, …).
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;
    fn probe(&self) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct ProbeStatus {
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_probe_at: Instant,
}

impl ProbeStatus {
    fn fresh() -> Self {
        Self {
            degraded: false,
            consecutive_failures: 0,
            last_error: None,
            last_probe_at: Instant::now(),
        }
    }
}

type StatusMap = Arc<RwLock<HashMap<&'static str, ProbeStatus>>>;

pub struct HealthMonitor {
    probes: Vec<Box<dyn HealthProbe>>,
    statuses: StatusMap,
    cadence: Duration,
    metrics: PipelineMetrics,
}

impl HealthMonitor {
    pub fn new(cadence: Duration, metrics: PipelineMetrics) -> Self {
        Self {
            probes: Vec::new(),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            cadence,
            metrics,
        }
    }

    pub fn probe(mut self, probe: Box<dyn HealthProbe>) -> Self {
        self.statuses.write().insert(probe.name(), ProbeStatus::fresh());
        self.probes.push(probe);
        self
    }

    /// Start the probe loop; it runs until the handle drops.
    pub fn spawn(self) -> HealthHandle {
        let statuses = Arc::clone(&self.statuses);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for probe in &self.probes {
                    let result = probe.probe();
                    let mut statuses = self.statuses.write();
                    let status = statuses
                        .entry(probe.name())
                        .or_insert_with(ProbeStatus::fresh);
                    status.last_probe_at = Instant::now();
                    match result {
                        Ok(()) => {
                            if status.degraded {
                                tracing::info!(probe = probe.name(), "probe back to healthy");
                            }
                            status.degraded = false;
                            status.consecutive_failures = 0;
                            status.last_error = None;
                        }
                        Err(reason) => {
                            status.consecutive_failures =
                                status.consecutive_failures.saturating_add(1);
                            status.last_error = Some(reason.clone());
                            self.metrics
                                .probe_failures
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            if !status.degraded
                                && status.consecutive_failures >= DEGRADED_AFTER
                            {
                                status.degraded = true;
                                tracing::warn!(
                                    probe = probe.name(),
                                    failures = status.consecutive_failures,
                                    %reason,
                                    "probe degraded"
                                );
                            }
                        }
                    }
                }
            }
        });
        HealthHandle { statuses, handle }
    }
}

pub struct HealthHandle {
    statuses: StatusMap,
    handle: JoinHandle<()>,
}

impl HealthHandle {
    pub fn statuses(&self) -> HashMap<&'static str, ProbeStatus> {
        self.statuses.read().clone()
    }

    pub fn degraded(&self) -> Vec<&'static str> {
        self.statuses
            .read()
            .iter()
            .filter(|(_, status)| status.degraded)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn all_healthy(&self) -> bool {
        self.statuses.read().values().all(|status| !status.degraded)
    }

    /// The longest-degraded probe as an error, for surfacing to the user.
    pub fn as_error(&self) -> Option<OvertypeError> {
        self.statuses
            .read()
            .iter()
            .filter(|(_, status)| status.degraded)
            .max_by_key(|(_, status)| status.consecutive_failures)
            .map(|(name, status)| OvertypeError::Unhealthy {
                component: name.to_string(),
                reason: status
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no probe detail".to_string()),
            })
    }
}

impl Drop for HealthHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagProbe {
        name: &'static str,
        ok: Arc<AtomicBool>,
    }

    impl HealthProbe for FlagProbe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn probe(&self) -> Result<(), String> {
            if self.ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("flag down".to_string())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn degradation_is_debounced_and_recovers() {
        let ok = Arc::new(AtomicBool::new(false));
        let metrics = PipelineMetrics::default();
        let handle = HealthMonitor::new(Duration::from_millis(10), metrics.clone())
            .probe(Box::new(FlagProbe {
                name: "worker",
                ok: ok.clone(),
            }))
            .spawn();

        // The interval ticks at 0 and 10 ms: two failures, under the
        // threshold, so still healthy.
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(handle.all_healthy());

        // Past the threshold: degraded, failures tallied, error available.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(handle.degraded(), vec!["worker"]);
        assert!(metrics.probe_failures.load(Ordering::Relaxed) >= DEGRADED_AFTER as u64);
        match handle.as_error() {
            Some(OvertypeError::Unhealthy { component, reason }) => {
                assert_eq!(component, "worker");
                assert_eq!(reason, "flag down");
            }
            other => panic!("expected unhealthy error, got {:?}", other),
        }

        // One good probe clears the streak.
        ok.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.all_healthy());
        assert!(handle.as_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn statuses_track_every_registered_probe() {
        let handle = HealthMonitor::new(Duration::from_millis(10), PipelineMetrics::default())
            .probe(Box::new(FlagProbe {
                name: "a",
                ok: Arc::new(AtomicBool::new(true)),
            }))
            .probe(Box::new(FlagProbe {
                name: "b",
                ok: Arc::new(AtomicBool::new(true)),
            }))
            .spawn();

        tokio::time::sleep(Duration::from_millis(15)).await;
        let statuses = handle.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.values().all(|s| !s.degraded));
    }
}
