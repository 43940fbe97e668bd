//! Serialized injection task.
//!
//! At most one delete-and-type is in flight at a time. The echo gate is
//! held open for the whole operation and only released after the last
//! event is confirmed, so the observer never sees our own output.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use overtype_foundation::InjectionError;
use overtype_input::EchoGate;
use overtype_telemetry::PipelineMetrics;

use crate::{InjectionOp, TextInjector};

#[derive(Debug, Clone, PartialEq)]
pub struct InjectionOutcome {
    pub method: &'static str,
    pub latency_ms: u64,
    pub fell_back: bool,
}

pub struct InjectionRequest {
    pub op: InjectionOp,
    pub respond_to: oneshot::Sender<Result<InjectionOutcome, InjectionError>>,
}

pub struct InjectionProcessor {
    request_rx: mpsc::Receiver<InjectionRequest>,
    primary: Box<dyn TextInjector>,
    fallback: Option<Box<dyn TextInjector>>,
    echo: EchoGate,
    metrics: PipelineMetrics,
}

impl InjectionProcessor {
    pub fn new(
        request_rx: mpsc::Receiver<InjectionRequest>,
        primary: Box<dyn TextInjector>,
        fallback: Option<Box<dyn TextInjector>>,
        echo: EchoGate,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            request_rx,
            primary,
            fallback,
            echo,
            metrics,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::debug!("Injection processor started");
        while let Some(request) = self.request_rx.recv().await {
            let result = self.execute(&request.op).await;
            if request.respond_to.send(result).is_err() {
                tracing::debug!("injection requester went away");
            }
        }
        tracing::debug!("Injection processor stopped");
    }

    async fn execute(&self, op: &InjectionOp) -> Result<InjectionOutcome, InjectionError> {
        let start = Instant::now();
        let guard = self.echo.open();

        let primary_err = if self.primary.is_available() {
            match self.primary.inject(op).await {
                Ok(()) => {
                    drop(guard);
                    self.metrics.injections.fetch_add(1, Ordering::Relaxed);
                    return Ok(InjectionOutcome {
                        method: self.primary.name(),
                        latency_ms: start.elapsed().as_millis() as u64,
                        fell_back: false,
                    });
                }
                Err(err) => err,
            }
        } else {
            InjectionError::BackendUnavailable(self.primary.name().into())
        };
        tracing::warn!("primary injector failed: {primary_err}");

        if let Some(fallback) = &self.fallback {
            if fallback.is_available() {
                match fallback.inject(op).await {
                    Ok(()) => {
                        drop(guard);
                        self.metrics.injections.fetch_add(1, Ordering::Relaxed);
                        self.metrics
                            .injection_fallbacks
                            .fetch_add(1, Ordering::Relaxed);
                        return Ok(InjectionOutcome {
                            method: fallback.name(),
                            latency_ms: start.elapsed().as_millis() as u64,
                            fell_back: true,
                        });
                    }
                    Err(fallback_err) => {
                        tracing::error!("fallback injector failed: {fallback_err}");
                    }
                }
            }
        }

        drop(guard);
        self.metrics
            .injection_failures
            .fetch_add(1, Ordering::Relaxed);
        // Hand the text back so the user can be told where to find it.
        Err(InjectionError::Exhausted {
            text: op.text.clone(),
            cause: primary_err.to_string(),
        })
    }
}

/// Convenience used by the runtime and tests.
pub fn channel(capacity: usize) -> (mpsc::Sender<InjectionRequest>, mpsc::Receiver<InjectionRequest>)
{
    mpsc::channel(capacity)
}

pub async fn submit(
    tx: &mpsc::Sender<InjectionRequest>,
    op: InjectionOp,
) -> Result<InjectionOutcome, InjectionError> {
    let (respond_to, response) = oneshot::channel();
    tx.send(InjectionRequest { op, respond_to })
        .await
        .map_err(|_| InjectionError::BackendUnavailable("injection processor stopped".into()))?;
    response
        .await
        .map_err(|_| InjectionError::BackendUnavailable("injection processor dropped".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopInjector;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FailingInjector;

    #[async_trait]
    impl TextInjector for FailingInjector {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn inject(&self, _op: &InjectionOp) -> Result<(), InjectionError> {
            Err(InjectionError::SynthesisFailed("synthetic failure".into()))
        }
    }

    struct GateCheckInjector {
        echo: EchoGate,
    }

    #[async_trait]
    impl TextInjector for GateCheckInjector {
        fn name(&self) -> &'static str {
            "gate-check"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn inject(&self, _op: &InjectionOp) -> Result<(), InjectionError> {
            assert!(self.echo.is_open(), "gate must be open during injection");
            Ok(())
        }
    }

    fn spawn_processor(
        primary: Box<dyn TextInjector>,
        fallback: Option<Box<dyn TextInjector>>,
        echo: EchoGate,
    ) -> mpsc::Sender<InjectionRequest> {
        let (tx, rx) = channel(8);
        InjectionProcessor::new(rx, primary, fallback, echo, PipelineMetrics::default()).spawn();
        tx
    }

    #[tokio::test]
    async fn successful_injection_reports_primary_method() {
        let noop = Arc::new(NoopInjector::default());
        struct Shared(Arc<NoopInjector>);
        #[async_trait]
        impl TextInjector for Shared {
            fn name(&self) -> &'static str {
                "noop"
            }
            fn is_available(&self) -> bool {
                true
            }
            async fn inject(&self, op: &InjectionOp) -> Result<(), InjectionError> {
                self.0.inject(op).await
            }
        }

        let tx = spawn_processor(Box::new(Shared(noop.clone())), None, EchoGate::new());
        let outcome = submit(&tx, InjectionOp::new("Hello", 8)).await.unwrap();
        assert_eq!(outcome.method, "noop");
        assert!(!outcome.fell_back);

        let ops = noop.ops.lock().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].backspace_count, 8);
        assert_eq!(ops[0].text, "Hello");
    }

    #[tokio::test]
    async fn failure_falls_back_to_secondary() {
        let tx = spawn_processor(
            Box::new(FailingInjector),
            Some(Box::new(NoopInjector::default())),
            EchoGate::new(),
        );
        let outcome = submit(&tx, InjectionOp::new("Hello", 2)).await.unwrap();
        assert_eq!(outcome.method, "noop");
        assert!(outcome.fell_back);
    }

    #[tokio::test]
    async fn exhausted_failure_carries_the_text() {
        let tx = spawn_processor(
            Box::new(FailingInjector),
            Some(Box::new(FailingInjector)),
            EchoGate::new(),
        );
        match submit(&tx, InjectionOp::new("important words", 0)).await {
            Err(InjectionError::Exhausted { text, .. }) => {
                assert_eq!(text, "important words");
            }
            other => panic!("expected exhausted error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn echo_gate_is_open_during_injection_and_closed_after() {
        let echo = EchoGate::new();
        let tx = spawn_processor(
            Box::new(GateCheckInjector { echo: echo.clone() }),
            None,
            echo.clone(),
        );
        submit(&tx, InjectionOp::new("x", 0)).await.unwrap();
        // The burst tail expires shortly after the operation completes.
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert!(!echo.is_open());
    }
}
