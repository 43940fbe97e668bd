//! Child supervision: spawn, watch, restart with bounded backoff.
//!
//! One supervision task per child guarantees a single live instance. A
//! child that keeps dying is declared failed after five strikes inside a
//! ten-minute window; the orchestrator then marks AI triggers unavailable
//! until the master switch is cycled.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use overtype_foundation::OvertypeError;

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failures tolerated inside `window` before giving up.
    pub max_restarts: u32,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            max_restarts: 5,
            window: Duration::from_secs(600),
        }
    }
}

impl RestartPolicy {
    /// Exponential backoff: 2s, 4s, 8s, ... capped at `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        (self.initial_backoff * factor as u32).min(self.max_backoff)
    }
}

/// A supervised child process (or hook thread).
#[async_trait]
pub trait Supervised: Send {
    fn name(&self) -> &'static str;
    async fn start(&mut self) -> Result<(), OvertypeError>;
    /// Resolves when the running child dies; returns the reason.
    async fn wait(&mut self) -> String;
    async fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Ready { name: &'static str },
    Down { name: &'static str, reason: String },
    Failed { name: &'static str },
}

/// Supervise `child` until the event channel closes. The `enabled` watch
/// mirrors the master switch: turning it off stops the child cleanly and
/// cancels any pending backoff; turning it back on resets the strikes.
pub fn supervise<C: Supervised + 'static>(
    mut child: C,
    policy: RestartPolicy,
    mut enabled: watch::Receiver<bool>,
    events: mpsc::Sender<ChildEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let name = child.name();
        let mut strikes: VecDeque<Instant> = VecDeque::new();
        let mut attempt: u32 = 0;

        loop {
            // Hold while disabled; re-enabling starts a clean slate.
            if !*enabled.borrow() {
                strikes.clear();
                attempt = 0;
                if enabled.changed().await.is_err() {
                    return;
                }
                continue;
            }

            match child.start().await {
                Ok(()) => {
                    tracing::info!(child = name, "child started");
                    attempt = 0;
                    if events.send(ChildEvent::Ready { name }).await.is_err() {
                        child.stop().await;
                        return;
                    }

                    tokio::select! {
                        reason = child.wait() => {
                            tracing::warn!(child = name, %reason, "child exited");
                            if events
                                .send(ChildEvent::Down { name, reason })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        _ = wait_for_disable(&mut enabled) => {
                            tracing::info!(child = name, "stopping child (disabled)");
                            child.stop().await;
                            let _ = events
                                .send(ChildEvent::Down {
                                    name,
                                    reason: "disabled".to_string(),
                                })
                                .await;
                            continue;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(child = name, "child failed to start: {err}");
                    if events
                        .send(ChildEvent::Down {
                            name,
                            reason: err.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            let now = Instant::now();
            strikes.push_back(now);
            while let Some(front) = strikes.front() {
                if now.duration_since(*front) > policy.window {
                    strikes.pop_front();
                } else {
                    break;
                }
            }
            if strikes.len() as u32 >= policy.max_restarts {
                tracing::error!(child = name, strikes = strikes.len(), "supervisor gave up");
                let _ = events.send(ChildEvent::Failed { name }).await;
                // Only cycling the master switch clears a failed child.
                loop {
                    if enabled.changed().await.is_err() {
                        return;
                    }
                    if !*enabled.borrow() {
                        strikes.clear();
                        attempt = 0;
                        break;
                    }
                }
                continue;
            }

            let backoff = policy.backoff_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::info!(child = name, ?backoff, "restarting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = wait_for_disable(&mut enabled) => {}
            }
        }
    })
}

async fn wait_for_disable(enabled: &mut watch::Receiver<bool>) {
    loop {
        if enabled.changed().await.is_err() {
            // Sender gone; treat as disabled forever.
            std::future::pending::<()>().await;
        }
        if !*enabled.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyChild {
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
        /// How many starts die immediately before one lives forever.
        failures_before_stable: u32,
    }

    #[async_trait]
    impl Supervised for FlakyChild {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn start(&mut self) -> Result<(), OvertypeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait(&mut self) -> String {
            let nth = self.starts.load(Ordering::SeqCst);
            if nth <= self.failures_before_stable {
                "crashed".to_string()
            } else {
                std::future::pending::<String>().await
            }
        }

        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(16));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(30));
        assert_eq!(policy.backoff_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_until_stable() {
        let starts = Arc::new(AtomicU32::new(0));
        let child = FlakyChild {
            starts: starts.clone(),
            stops: Arc::new(AtomicU32::new(0)),
            failures_before_stable: 2,
        };
        let (_enabled_tx, enabled_rx) = watch::channel(true);
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let handle = supervise(child, RestartPolicy::default(), enabled_rx, events_tx);

        let mut readies = 0;
        let mut downs = 0;
        while readies < 3 {
            match events_rx.recv().await.unwrap() {
                ChildEvent::Ready { .. } => readies += 1,
                ChildEvent::Down { .. } => downs += 1,
                ChildEvent::Failed { .. } => panic!("should not fail"),
            }
        }
        assert_eq!(downs, 2);
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_strikes() {
        let child = FlakyChild {
            starts: Arc::new(AtomicU32::new(0)),
            stops: Arc::new(AtomicU32::new(0)),
            failures_before_stable: u32::MAX,
        };
        let (_enabled_tx, enabled_rx) = watch::channel(true);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let policy = RestartPolicy {
            max_restarts: 3,
            ..Default::default()
        };
        let handle = supervise(child, policy, enabled_rx, events_tx);

        let mut saw_failed = false;
        for _ in 0..16 {
            match events_rx.recv().await.unwrap() {
                ChildEvent::Failed { name } => {
                    assert_eq!(name, "flaky");
                    saw_failed = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_failed, "expected the supervisor to give up");
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn disable_stops_the_child() {
        let stops = Arc::new(AtomicU32::new(0));
        let child = FlakyChild {
            starts: Arc::new(AtomicU32::new(0)),
            stops: stops.clone(),
            failures_before_stable: 0,
        };
        let (enabled_tx, enabled_rx) = watch::channel(true);
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let handle = supervise(child, RestartPolicy::default(), enabled_rx, events_tx);

        assert!(matches!(
            events_rx.recv().await.unwrap(),
            ChildEvent::Ready { .. }
        ));
        enabled_tx.send(true).ok(); // no-op change
        enabled_tx.send(false).unwrap();

        loop {
            match events_rx.recv().await.unwrap() {
                ChildEvent::Down { reason, .. } if reason == "disabled" => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
