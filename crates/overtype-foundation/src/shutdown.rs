//! Coordinated process shutdown.
//!
//! One watch flag fans out to every task that needs to wind down, the
//! same signaling primitive the supervisor uses for the master switch.
//! Ctrl-C and panics both flip it, so a crashed task still produces an
//! orderly exit instead of a hung daemon.

use tokio::signal;
use tokio::sync::watch;

pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hook Ctrl-C and the panic path to the shutdown flag and hand back
    /// a signal for the caller to wait on.
    pub fn install(&self) -> ShutdownSignal {
        let ctrl_c_tx = self.tx.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_err() {
                tracing::error!("Ctrl-C handler could not be installed");
                return;
            }
            tracing::info!("Ctrl-C received, winding down");
            let _ = ctrl_c_tx.send(true);
        });

        let panic_tx = self.tx.clone();
        let original_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!("PANIC: {panic_info}");
            eprintln!("overtype panicked: {panic_info}");
            let _ = panic_tx.send(true);
            original_panic(panic_info);
        }));

        self.signal()
    }

    /// Another observer of the same flag; any number may exist.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Programmatic shutdown (supervisor exhaustion, settings teardown).
    pub fn trigger(&self, reason: &str) {
        tracing::info!(reason, "shutdown triggered");
        let _ = self.tx.send(true);
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                // Coordinator gone; nothing left to wait for.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_every_signal() {
        let coordinator = ShutdownCoordinator::new();
        let mut first = coordinator.signal();
        let mut second = first.clone();
        assert!(!first.is_shutting_down());

        let waiter = tokio::spawn(async move { first.wait().await });
        tokio::task::yield_now().await;
        coordinator.trigger("test teardown");

        waiter.await.unwrap();
        second.wait().await;
        assert!(second.is_shutting_down());
    }

    #[tokio::test]
    async fn dropped_coordinator_releases_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        drop(coordinator);
        signal.wait().await;
        assert!(!signal.is_shutting_down());
    }
}
