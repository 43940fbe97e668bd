//! Runtime wiring: hook thread → input pipeline → orchestrator, with the
//! supervised AI worker, the serialized injector and the popup controller
//! hanging off the same mailbox.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use overtype_config::{ConfigSnapshot, EnvFile, KeyStore, Settings};
use overtype_foundation::{HealthHandle, OvertypeError, WorkerError};
use overtype_injection::{ClipboardPasteInjector, InjectionProcessor, TextInjector};
use overtype_input::{
    spawn_focus_watcher, EchoGate, EventQueue, FocusProbe, InputPipeline, KeyboardHook,
    NullFocusProbe, PipelineCommand, SensitiveClassifier,
};
use overtype_overlay::{
    CaptureRegistry, NoCaptureExclusion, NullPointerProbe, OverlayWindow, PointerProbe,
    PopupController,
};
use overtype_telemetry::PipelineMetrics;
use overtype_worker::{GenerationBackend, WorkerClient, WorkerConfig, WorkerNotice};

use crate::debug_log::DebugLog;
use crate::hotkey;
use crate::orchestrator::{Orchestrator, OrchestratorMsg, SharedBackend, WorkerLifecycle};
use crate::supervisor::{supervise, ChildEvent, RestartPolicy, Supervised};

/// Environment variable carrying the serialized config snapshot to the
/// worker child at each (re)start.
pub const SNAPSHOT_ENV: &str = "OVERTYPE_SNAPSHOT";

pub struct AppRuntimeOptions {
    pub settings: Settings,
    pub settings_path: Option<PathBuf>,
    /// Provider key-value config file, already loaded.
    pub env: EnvFile,
    pub key_store: Option<KeyStore>,
    pub worker_program: String,
    pub worker_args: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub privacy_patterns: Vec<String>,
    pub enable_hotkeys: bool,
    pub enable_debug_log: bool,
    /// Overlay rendering seams; `None` falls back to logging stubs.
    pub main_window: Option<Arc<dyn OverlayWindow>>,
    pub explanation_window: Option<Arc<dyn OverlayWindow>>,
    pub pointer_probe: Option<Arc<dyn PointerProbe>>,
    pub focus_probe: Option<Arc<dyn FocusProbe>>,
}

impl Default for AppRuntimeOptions {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            settings_path: None,
            env: EnvFile::default(),
            key_store: None,
            worker_program: "overtype-worker".to_string(),
            worker_args: Vec::new(),
            restart_policy: RestartPolicy::default(),
            privacy_patterns: Vec::new(),
            enable_hotkeys: true,
            enable_debug_log: false,
            main_window: None,
            explanation_window: None,
            pointer_probe: None,
            focus_probe: None,
        }
    }
}

/// Handle to the running daemon.
pub struct AppHandle {
    pub metrics: Arc<PipelineMetrics>,
    pub debug_log: DebugLog,
    pub queue: EventQueue,
    mailbox_tx: mpsc::Sender<OrchestratorMsg>,
    pipeline_tx: mpsc::Sender<PipelineCommand>,
    enabled_tx: watch::Sender<bool>,
    failed_rx: watch::Receiver<Option<&'static str>>,
    hook: Box<dyn KeyboardHook>,
    tasks: Vec<JoinHandle<()>>,
    pub health: HealthHandle,
}

impl AppHandle {
    pub async fn shutdown(mut self) {
        tracing::debug!("Shutting down Overtype runtime...");
        let _ = self.enabled_tx.send(false);
        let _ = self.mailbox_tx.send(OrchestratorMsg::Shutdown).await;
        let _ = self.pipeline_tx.send(PipelineCommand::Shutdown).await;
        self.hook.stop();
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.metrics.log_summary();
        tracing::debug!("Overtype runtime shutdown complete");
    }

    pub fn mailbox(&self) -> mpsc::Sender<OrchestratorMsg> {
        self.mailbox_tx.clone()
    }

    pub fn pipeline(&self) -> mpsc::Sender<PipelineCommand> {
        self.pipeline_tx.clone()
    }

    /// Resolves when the supervisor permanently gives up on a required
    /// child; the daemon then exits with code 3.
    pub async fn wait_child_failed(&self) -> &'static str {
        let mut failed_rx = self.failed_rx.clone();
        loop {
            if let Some(child) = *failed_rx.borrow() {
                return child;
            }
            if failed_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Rendering stub used until a real overlay window is attached; the
/// daemon side only needs the command contract.
struct LogOverlayWindow {
    name: &'static str,
}

impl OverlayWindow for LogOverlayWindow {
    fn show_at(&self, position: overtype_overlay::Point, focusable: bool) {
        tracing::debug!(window = self.name, ?position, focusable, "overlay show");
    }

    fn set_text(&self, text: &str) {
        tracing::trace!(window = self.name, len = text.len(), "overlay text");
    }

    fn hide(&self) {
        tracing::debug!(window = self.name, "overlay hide");
    }
}

/// The supervised AI worker child.
struct WorkerChild {
    program: String,
    args: Vec<String>,
    snapshot: Arc<dyn Fn() -> ConfigSnapshot + Send + Sync>,
    provider_keys: Vec<(String, String)>,
    backend_slot: SharedBackend,
    client: Option<Arc<WorkerClient>>,
    notice_rx: Option<mpsc::Receiver<WorkerNotice>>,
}

#[async_trait::async_trait]
impl Supervised for WorkerChild {
    fn name(&self) -> &'static str {
        "ai-worker"
    }

    async fn start(&mut self) -> Result<(), OvertypeError> {
        let snapshot = (self.snapshot)();
        let snapshot_json = serde_json::to_string(&snapshot)
            .map_err(|e| WorkerError::Unavailable(format!("snapshot encode: {e}")))?;

        let mut config = WorkerConfig::new(&self.program);
        config.args = self.args.clone();
        config.envs = self.provider_keys.clone();
        config
            .envs
            .push((SNAPSHOT_ENV.to_string(), snapshot_json));

        let (notice_tx, notice_rx) = mpsc::channel(16);
        let client = Arc::new(WorkerClient::spawn(config, notice_tx).await?);
        *self.backend_slot.write() =
            Some(Arc::clone(&client) as Arc<dyn GenerationBackend>);
        self.client = Some(client);
        self.notice_rx = Some(notice_rx);
        Ok(())
    }

    async fn wait(&mut self) -> String {
        let Some(notice_rx) = self.notice_rx.as_mut() else {
            return "worker never started".to_string();
        };
        let reason = loop {
            match notice_rx.recv().await {
                Some(WorkerNotice::Exited { status }) => {
                    break format!("exited with status {status:?}");
                }
                Some(WorkerNotice::ProtocolError { line }) => {
                    // Protocol violations kill the worker; the exit notice
                    // follows and resolves the wait.
                    tracing::error!(%line, "worker protocol violation, killing child");
                    if let Some(client) = &self.client {
                        client.kill();
                    }
                }
                Some(WorkerNotice::WorkerError { message }) => {
                    tracing::warn!("worker error: {message}");
                }
                None => break "worker channel closed".to_string(),
            }
        };
        *self.backend_slot.write() = None;
        self.client = None;
        self.notice_rx = None;
        reason
    }

    async fn stop(&mut self) {
        *self.backend_slot.write() = None;
        self.notice_rx = None;
        if let Some(client) = self.client.take() {
            match Arc::try_unwrap(client) {
                Ok(client) => {
                    client
                        .shutdown(std::time::Duration::from_millis(500))
                        .await
                }
                // A stale backend reference is still around; hard-kill so
                // no second worker instance can overlap with the next one.
                Err(shared) => shared.kill(),
            }
        }
    }
}

pub async fn start(opts: AppRuntimeOptions) -> Result<AppHandle, OvertypeError> {
    let metrics = Arc::new(PipelineMetrics::default());
    let echo = EchoGate::new();
    let queue = EventQueue::default();
    let mut tasks = Vec::new();

    tracing::info!("Starting Overtype runtime");

    // 1) Keyboard hook on its dedicated thread. Install failure is fatal.
    let mut hook = build_hook()?;
    hook.start(queue.clone())?;

    // Focus watcher (platform probe when provided).
    let focus_probe = opts
        .focus_probe
        .clone()
        .unwrap_or_else(|| Arc::new(NullFocusProbe));
    tasks.push(spawn_focus_watcher(
        focus_probe,
        queue.clone(),
        std::time::Duration::from_millis(200),
    ));

    // 2) Capture-exempt surfaces; the snapshot records the outcome.
    let capture_registry = CaptureRegistry::new();
    capture_registry.register("popup", &NoCaptureExclusion);
    capture_registry.register("explanation", &NoCaptureExclusion);
    let capture_visible = capture_registry.any_capture_visible();

    // 3) Channels.
    let (pipeline_tx, pipeline_rx) = mpsc::channel(64);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let (mailbox_tx, mailbox_rx) = mpsc::channel(256);
    let (popup_tx, popup_rx) = mpsc::channel(64);
    let (injection_tx, injection_rx) = mpsc::channel(8);

    // 4) Keystroke debug log (opt-in).
    let debug_log = DebugLog::new();
    let debug_tx = if opts.enable_debug_log {
        let (tx, rx) = mpsc::unbounded_channel();
        tasks.push(debug_log.spawn_collector(rx));
        Some(tx)
    } else {
        None
    };

    // 5) Input pipeline: the single task keeping buffer and triggers in
    // lockstep.
    let classifier = SensitiveClassifier::with_patterns(&opts.privacy_patterns)
        .map_err(|e| OvertypeError::Fatal(format!("privacy pattern: {e}")))?;
    let pipeline = InputPipeline::new(
        queue.clone(),
        pipeline_rx,
        event_tx,
        classifier,
        echo.clone(),
        opts.settings.live_mode,
        (*metrics).clone(),
        debug_tx,
    );
    tasks.push(pipeline.spawn());

    // Pipeline events feed the mailbox in order.
    {
        let mailbox_tx = mailbox_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if mailbox_tx
                    .send(OrchestratorMsg::Input(event))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    // 6) Provider keys and the worker snapshot.
    let provider_keys = resolve_provider_keys(&opts.env, opts.key_store.as_ref());
    let providers: Vec<String> = provider_keys.iter().map(|(k, _)| k.clone()).collect();
    let snapshot_settings = opts.settings.clone();
    let snapshot: Arc<dyn Fn() -> ConfigSnapshot + Send + Sync> = Arc::new(move || {
        ConfigSnapshot::new(snapshot_settings.clone(), providers.clone(), capture_visible)
    });

    // 7) Supervised worker.
    let backend_slot: SharedBackend = Arc::new(RwLock::new(None));
    let (enabled_tx, enabled_rx) = watch::channel(opts.settings.master_enabled);
    let worker_child = WorkerChild {
        program: opts.worker_program.clone(),
        args: opts.worker_args.clone(),
        snapshot,
        provider_keys,
        backend_slot: Arc::clone(&backend_slot),
        client: None,
        notice_rx: None,
    };
    let (child_events_tx, mut child_events_rx) = mpsc::channel(16);
    let (failed_tx, failed_rx) = watch::channel(None::<&'static str>);
    tasks.push(supervise(
        worker_child,
        opts.restart_policy.clone(),
        enabled_rx,
        child_events_tx,
    ));
    {
        let mailbox_tx = mailbox_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = child_events_rx.recv().await {
                let lifecycle = match event {
                    ChildEvent::Ready { .. } => WorkerLifecycle::Ready,
                    ChildEvent::Down { .. } => WorkerLifecycle::Down,
                    ChildEvent::Failed { name } => {
                        let _ = failed_tx.send(Some(name));
                        WorkerLifecycle::Failed
                    }
                };
                if mailbox_tx
                    .send(OrchestratorMsg::Worker(lifecycle))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    // 8) Serialized injection with clipboard fallback.
    let (primary, fallback) = build_injectors();
    tasks.push(
        InjectionProcessor::new(
            injection_rx,
            primary,
            fallback,
            echo.clone(),
            (*metrics).clone(),
        )
        .spawn(),
    );

    // 9) Popup controller.
    let main_window = opts
        .main_window
        .clone()
        .unwrap_or_else(|| Arc::new(LogOverlayWindow { name: "popup" }));
    let explanation_window = opts
        .explanation_window
        .clone()
        .unwrap_or_else(|| Arc::new(LogOverlayWindow {
            name: "explanation",
        }));
    let pointer_probe = opts
        .pointer_probe
        .clone()
        .unwrap_or_else(|| Arc::new(NullPointerProbe));
    tasks.push(
        PopupController::new(popup_rx, main_window, explanation_window, pointer_probe).spawn(),
    );

    // 10) Settings persistence for orchestrator-driven updates.
    let (settings_updates_tx, mut settings_updates_rx) = mpsc::unbounded_channel::<Settings>();
    if let Some(path) = opts.settings_path.clone() {
        let enabled_tx2 = enabled_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(settings) = settings_updates_rx.recv().await {
                let _ = enabled_tx2.send(settings.master_enabled);
                if let Err(err) = settings.save(&path) {
                    tracing::warn!("failed to persist settings: {err}");
                }
            }
        }));
    }

    // 11) The orchestrator.
    let backend_slot_for_health = Arc::clone(&backend_slot);
    let orchestrator = Orchestrator::new(
        mailbox_rx,
        mailbox_tx.clone(),
        pipeline_tx.clone(),
        injection_tx,
        popup_tx,
        backend_slot,
        echo,
        (*metrics).clone(),
        opts.settings.clone(),
        Some(settings_updates_tx),
    );
    tasks.push(orchestrator.spawn());

    // 12) Periodic liveness probes over the long-lived pieces.
    let health = crate::health::spawn_monitor(
        backend_slot_for_health,
        queue.clone(),
        (*metrics).clone(),
    );

    // 13) Global hotkeys. The listener thread exits (and unbinds) once
    // its consumers go away at shutdown.
    if opts.enable_hotkeys {
        let _hotkey_thread = hotkey::spawn_hotkey_listener(
            hotkey::resolve_bindings(&opts.env),
            pipeline_tx.clone(),
            mailbox_tx.clone(),
        )?;
    }

    Ok(AppHandle {
        metrics,
        debug_log,
        queue,
        mailbox_tx,
        pipeline_tx,
        enabled_tx,
        failed_rx,
        hook,
        tasks,
        health,
    })
}

#[cfg(feature = "hook-rdev")]
fn build_hook() -> Result<Box<dyn KeyboardHook>, OvertypeError> {
    Ok(Box::new(overtype_input::RdevHook::new()))
}

#[cfg(not(feature = "hook-rdev"))]
fn build_hook() -> Result<Box<dyn KeyboardHook>, OvertypeError> {
    Err(OvertypeError::Hook(
        overtype_foundation::HookError::BackendUnavailable(
            "built without a keyboard hook backend".into(),
        ),
    ))
}

#[cfg(feature = "enigo")]
fn build_injectors() -> (Box<dyn TextInjector>, Option<Box<dyn TextInjector>>) {
    (
        Box::new(overtype_injection::EnigoInjector::new()),
        Some(Box::new(ClipboardPasteInjector::new())),
    )
}

#[cfg(not(feature = "enigo"))]
fn build_injectors() -> (Box<dyn TextInjector>, Option<Box<dyn TextInjector>>) {
    (Box::new(ClipboardPasteInjector::new()), None)
}

fn resolve_provider_keys(env: &EnvFile, store: Option<&KeyStore>) -> Vec<(String, String)> {
    let mut keys = Vec::new();
    for agent in overtype_config::AGENT_REGISTRY.iter() {
        if let Some(value) = env.get(agent.env_key) {
            keys.push((agent.env_key.to_string(), value.to_string()));
            continue;
        }
        if let Some(store) = store {
            match store.get(agent.env_key) {
                Ok(Some(value)) if !value.is_empty() => {
                    keys.push((agent.env_key.to_string(), value));
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(key = agent.env_key, "key store read failed: {err}"),
            }
        }
    }
    if keys.is_empty() {
        tracing::warn!("no provider keys configured; AI triggers will be unavailable");
    }
    keys
}
