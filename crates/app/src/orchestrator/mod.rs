//! The orchestrator: one mailbox, one session at a time.
//!
//! Triggers, streaming chunks, hotkey commands, injection results and
//! supervisor notices all arrive through a single ordered channel, so the
//! session state machine never races. The orchestrator is also the only
//! timeout authority for generation requests.

mod session;

pub use session::{LastResult, Session, SessionState};

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use overtype_config::Settings;
use overtype_foundation::{InjectionError, WorkerError};
use overtype_input::{
    EchoGate, HotkeyCommand, PipelineCommand, PipelineEvent, Trigger, TriggerEvent,
};
use overtype_injection::{
    normalize_for_typing, InjectionOp, InjectionOutcome, InjectionRequest,
};
use overtype_overlay::PopupCommand;
use overtype_telemetry::PipelineMetrics;
use overtype_worker::{
    context_keys, GenerationBackend, GenerationChunk, GenerationMode, GenerationRequest,
};

/// A session with no chunk for this long fails; partial accumulation is
/// returned as a recoverable result.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Correlation id used for paste-last injections outside a live session.
const PASTE_ONLY_ID: u64 = 0;

#[derive(Debug)]
pub enum WorkerLifecycle {
    Ready,
    Down,
    /// The supervisor gave up; AI triggers stay unavailable.
    Failed,
}

#[derive(Debug)]
pub enum OrchestratorMsg {
    Input(PipelineEvent),
    Hotkey(HotkeyCommand),
    Chunk {
        id: u64,
        result: Result<GenerationChunk, WorkerError>,
    },
    StreamClosed {
        id: u64,
    },
    InjectionFinished {
        id: u64,
        result: Result<InjectionOutcome, InjectionError>,
    },
    Worker(WorkerLifecycle),
    SettingsChanged(Settings),
    Shutdown,
}

pub type SharedBackend = Arc<RwLock<Option<Arc<dyn GenerationBackend>>>>;

pub struct Orchestrator {
    mailbox: mpsc::Receiver<OrchestratorMsg>,
    mailbox_tx: mpsc::Sender<OrchestratorMsg>,
    pipeline_tx: mpsc::Sender<PipelineCommand>,
    injection_tx: mpsc::Sender<InjectionRequest>,
    popup_tx: mpsc::Sender<PopupCommand>,
    backend: SharedBackend,
    echo: EchoGate,
    metrics: PipelineMetrics,
    settings: Settings,
    settings_updates: Option<mpsc::UnboundedSender<Settings>>,

    session: Option<Session>,
    last_result: Option<LastResult>,
    paused: bool,
    pending_trigger: Option<TriggerEvent>,
    ai_available: bool,
    overlay_visible: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mailbox: mpsc::Receiver<OrchestratorMsg>,
        mailbox_tx: mpsc::Sender<OrchestratorMsg>,
        pipeline_tx: mpsc::Sender<PipelineCommand>,
        injection_tx: mpsc::Sender<InjectionRequest>,
        popup_tx: mpsc::Sender<PopupCommand>,
        backend: SharedBackend,
        echo: EchoGate,
        metrics: PipelineMetrics,
        settings: Settings,
        settings_updates: Option<mpsc::UnboundedSender<Settings>>,
    ) -> Self {
        Self {
            mailbox,
            mailbox_tx,
            pipeline_tx,
            injection_tx,
            popup_tx,
            backend,
            echo,
            metrics,
            settings,
            settings_updates,
            session: None,
            last_result: None,
            paused: false,
            pending_trigger: None,
            ai_available: false,
            overlay_visible: false,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::debug!("Orchestrator started");
        loop {
            let deadline = self
                .session
                .as_ref()
                .filter(|s| s.awaiting_chunks())
                .map(|s| s.last_chunk_at + GENERATION_TIMEOUT);
            let sleep_target = deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;
                msg = self.mailbox.recv() => {
                    match msg {
                        None | Some(OrchestratorMsg::Shutdown) => break,
                        Some(msg) => self.handle(msg).await,
                    }
                }
                _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                    self.on_generation_timeout().await;
                }
            }
        }
        tracing::debug!("Orchestrator stopped");
    }

    async fn handle(&mut self, msg: OrchestratorMsg) {
        match msg {
            OrchestratorMsg::Input(PipelineEvent::Trigger(event)) => self.on_trigger(event).await,
            OrchestratorMsg::Input(PipelineEvent::Escape) => self.on_escape().await,
            OrchestratorMsg::Input(PipelineEvent::FocusChanged(_)) => {
                self.on_focus_changed().await
            }
            OrchestratorMsg::Hotkey(cmd) => self.on_hotkey(cmd).await,
            OrchestratorMsg::Chunk { id, result } => self.on_chunk(id, result).await,
            OrchestratorMsg::StreamClosed { id } => self.on_stream_closed(id).await,
            OrchestratorMsg::InjectionFinished { id, result } => {
                self.on_injection_finished(id, result).await
            }
            OrchestratorMsg::Worker(lifecycle) => self.on_worker(lifecycle).await,
            OrchestratorMsg::SettingsChanged(settings) => self.on_settings(settings).await,
            OrchestratorMsg::Shutdown => unreachable!("handled in run"),
        }
    }

    // ---- triggers ---------------------------------------------------------

    async fn on_trigger(&mut self, event: TriggerEvent) {
        if self.paused {
            // Held one-deep, replaced by newer triggers.
            if self.pending_trigger.replace(event).is_some() {
                self.metrics
                    .triggers_dropped_paused
                    .fetch_add(1, Ordering::Relaxed);
            }
            self.pipeline(PipelineCommand::Thaw).await;
            return;
        }
        if self.session.is_some() {
            tracing::debug!("trigger dropped: session already in flight");
            self.pipeline(PipelineCommand::Thaw).await;
            return;
        }
        if !self.ai_available {
            tracing::warn!("trigger dropped: AI worker unavailable");
            self.show_error("AI worker unavailable").await;
            self.pipeline(PipelineCommand::Thaw).await;
            return;
        }

        let (mode, prompt, backspaces, extra): (_, _, _, Vec<(&str, String)>) = match event.trigger
        {
            Trigger::Backtick { prompt, raw_count } => {
                (GenerationMode::GrammarFix, prompt, raw_count, vec![])
            }
            Trigger::Live { prompt, raw_count } => {
                (GenerationMode::GrammarFix, prompt, raw_count, vec![])
            }
            Trigger::FreePrompt { prompt, raw_count } => {
                (GenerationMode::FreePrompt, prompt, raw_count, vec![])
            }
            Trigger::Extension {
                prompt,
                last_output,
                raw_count,
            } => (
                GenerationMode::Extend,
                prompt,
                raw_count,
                vec![(context_keys::LAST_OUTPUT, last_output)],
            ),
            Trigger::Clipboard { clipboard } => (GenerationMode::Clipboard, clipboard, 0, vec![]),
            Trigger::ClipboardWithInstruction {
                clipboard,
                instruction,
                raw_count,
            } => (
                GenerationMode::ClipboardWithInstruction,
                clipboard,
                raw_count,
                vec![(context_keys::INSTRUCTION, instruction)],
            ),
        };

        self.start_session(mode, prompt, backspaces, extra).await;
    }

    async fn start_session(
        &mut self,
        mode: GenerationMode,
        prompt: String,
        backspaces: usize,
        extra: Vec<(&str, String)>,
    ) {
        let Some(backend) = self.backend.read().clone() else {
            self.show_error("AI worker unavailable").await;
            self.pipeline(PipelineCommand::Thaw).await;
            return;
        };

        let id = backend.allocate_id();
        let mut request = GenerationRequest::new(id, mode, prompt.clone())
            .with_context(context_keys::TONE, self.settings.tone.clone())
            .with_context(context_keys::AGENT, self.settings.selected_agent.clone());
        for (key, value) in extra {
            request = request.with_context(key, value);
        }

        let stream = match backend.generate(&request).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!("dispatch failed: {err}");
                self.show_error("Generation failed to start").await;
                self.pipeline(PipelineCommand::Thaw).await;
                return;
            }
        };
        pump_stream(self.mailbox_tx.clone(), id, stream);

        let mut session = Session::new(id, mode, backspaces);
        session.original_prompt = prompt;
        if !self.settings.auto_inject {
            self.popup(PopupCommand::ShowStreamingAtCursor).await;
            self.overlay_visible = true;
            session.popup_shown = true;
        }
        self.metrics.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.metrics.session_in_flight.store(true, Ordering::Relaxed);
        self.session = Some(session);
    }

    // ---- streaming --------------------------------------------------------

    async fn on_chunk(&mut self, id: u64, result: Result<GenerationChunk, WorkerError>) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(id, "chunk for finished session discarded");
            return;
        };

        if Some(id) == session.companion_id {
            match result {
                Ok(chunk) => {
                    session.companion_text.push_str(&chunk.text);
                    if chunk.is_final {
                        let text = session.companion_text.clone();
                        self.popup(PopupCommand::ShowExplanation(text)).await;
                    }
                }
                Err(err) => {
                    tracing::warn!("explanation request failed: {err}");
                    if let Some(s) = self.session.as_mut() {
                        s.companion_id = None;
                    }
                }
            }
            return;
        }

        if id != session.id || !session.awaiting_chunks() {
            tracing::debug!(id, "chunk for inactive correlation id discarded");
            return;
        }

        match result {
            Ok(chunk) => {
                if session.state == SessionState::Dispatching {
                    session.transition(SessionState::Streaming);
                }
                session.accumulated_text.push_str(&chunk.text);
                session.last_chunk_at = Instant::now();
                if let Some(explanation) = chunk.explanation.clone() {
                    session.explanation = Some(explanation);
                }
                self.metrics.chunks_received.fetch_add(1, Ordering::Relaxed);

                let popup_shown = session.popup_shown;
                if popup_shown && !chunk.text.is_empty() {
                    self.popup(PopupCommand::AppendChunk(chunk.text)).await;
                }
                if chunk.is_final {
                    self.finish_generation().await;
                }
            }
            Err(err) => {
                tracing::warn!("generation failed: {err}");
                self.resolve_generation_failure("Generation failed").await;
            }
        }
    }

    async fn on_stream_closed(&mut self, id: u64) {
        let relevant = self
            .session
            .as_ref()
            .map(|s| s.id == id && s.awaiting_chunks())
            .unwrap_or(false);
        if relevant {
            // Worker went away without a final chunk.
            self.resolve_generation_failure("Worker stream ended").await;
        }
    }

    async fn on_generation_timeout(&mut self) {
        let timed_out = self
            .session
            .as_ref()
            .map(|s| s.awaiting_chunks() && s.last_chunk_at.elapsed() >= GENERATION_TIMEOUT)
            .unwrap_or(false);
        if !timed_out {
            return;
        }
        tracing::warn!("generation timed out");
        let backend = self.backend.read().clone();
        if let (Some(backend), Some(session)) = (backend, self.session.as_ref()) {
            backend.cancel(session.id).await;
        }
        self.metrics
            .sessions_timed_out
            .fetch_add(1, Ordering::Relaxed);
        self.resolve_generation_failure("Generation timed out").await;
    }

    /// Partial accumulation resolves as success; nothing at all resolves
    /// as a recoverable, popup-visible error.
    async fn resolve_generation_failure(&mut self, message: &str) {
        let has_partial = self
            .session
            .as_ref()
            .map(|s| !s.accumulated_text.is_empty())
            .unwrap_or(false);
        if has_partial {
            self.finish_generation().await;
            return;
        }
        if self.session.as_ref().map(|s| s.popup_shown).unwrap_or(false) {
            self.popup(PopupCommand::EndStream).await;
        }
        self.show_error(message).await;
        self.session = None;
        self.metrics.session_in_flight.store(false, Ordering::Relaxed);
        self.pipeline(PipelineCommand::Thaw).await;
    }

    async fn finish_generation(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let text = session.accumulated_text.clone();
        let explanation = session.explanation.clone();

        self.metrics
            .sessions_completed
            .fetch_add(1, Ordering::Relaxed);
        self.last_result = Some(LastResult {
            text: text.clone(),
            explanation: explanation.clone(),
        });
        self.settings.last_generated_text = text.clone();
        self.settings.last_generated_explanation = explanation.clone().unwrap_or_default();
        self.push_settings();

        // Arms the extension window in the recognizer.
        self.pipeline(PipelineCommand::NoteAiOutput { text: text.clone() })
            .await;

        // Coding mode: parallel explanation of clipboard-family results,
        // routed to the explanation surface only.
        let session = self.session.as_mut().expect("session checked above");
        if self.settings.coding_mode
            && session.mode.is_clipboard_family()
            && session.companion_id.is_none()
        {
            let original = session.original_prompt.clone();
            let code = text.clone();
            let backend = self.backend.read().clone();
            if let Some(backend) = backend {
                let companion_id = backend.allocate_id();
                let request = GenerationRequest::new(
                    companion_id,
                    GenerationMode::Explanation,
                    original,
                )
                .with_context(context_keys::CODE, code);
                match backend.generate(&request).await {
                    Ok(stream) => {
                        pump_stream(self.mailbox_tx.clone(), companion_id, stream);
                        if let Some(s) = self.session.as_mut() {
                            s.companion_id = Some(companion_id);
                        }
                    }
                    Err(err) => tracing::warn!("explanation dispatch failed: {err}"),
                }
            }
        }

        if self.settings.auto_inject {
            self.begin_injection().await;
        } else {
            let session = self.session.as_mut().expect("session checked above");
            if session.popup_shown {
                self.popup(PopupCommand::EndStream).await;
            } else {
                self.popup(PopupCommand::ShowComplete(text)).await;
                self.overlay_visible = true;
            }
            self.session
                .as_mut()
                .expect("session checked above")
                .transition(SessionState::Presenting);
        }
    }

    // ---- injection --------------------------------------------------------

    async fn begin_injection(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.transition(SessionState::Injecting);
        let id = session.id;
        // Normalization happens exactly once per session, here.
        let text = normalize_for_typing(&session.accumulated_text);
        let op = InjectionOp {
            text,
            backspace_count: session.pending_backspace_count,
            humanize: self.settings.humanize_typing,
            ultra_human: self.settings.ultra_human,
            tab_as_spaces: self.settings.tab_as_spaces,
        };

        if session.popup_shown {
            self.popup(PopupCommand::HideAll).await;
            self.overlay_visible = false;
        }

        let injection_tx = self.injection_tx.clone();
        let mailbox = self.mailbox_tx.clone();
        tokio::spawn(async move {
            let result = overtype_injection::processor::submit(&injection_tx, op).await;
            let _ = mailbox
                .send(OrchestratorMsg::InjectionFinished { id, result })
                .await;
        });
    }

    async fn on_injection_finished(
        &mut self,
        id: u64,
        result: Result<InjectionOutcome, InjectionError>,
    ) {
        let relevant = self
            .session
            .as_ref()
            .map(|s| s.id == id && s.state == SessionState::Injecting)
            .unwrap_or(false);
        if !relevant {
            tracing::debug!(id, "stale injection result");
            return;
        }
        self.session = None;
        self.metrics.session_in_flight.store(false, Ordering::Relaxed);

        match result {
            Ok(outcome) => {
                tracing::info!(method = outcome.method, latency_ms = outcome.latency_ms, "injection complete");
                // Injecting always ends in Reset: buffer and last_* cleared.
                self.pipeline(PipelineCommand::ResetBuffer).await;
                self.clear_last_result();
            }
            Err(InjectionError::Exhausted { text, cause }) => {
                tracing::error!("injection exhausted: {cause}");
                // Keep the result in memory so the user can retry.
                self.last_result = Some(LastResult {
                    text,
                    explanation: None,
                });
                self.show_error("Injection failed; result kept on Paste hotkey")
                    .await;
            }
            Err(err) => {
                tracing::error!("injection failed: {err}");
                self.show_error("Injection failed").await;
            }
        }
        self.pipeline(PipelineCommand::Thaw).await;
    }

    // ---- hotkeys & cancellation ------------------------------------------

    async fn on_hotkey(&mut self, cmd: HotkeyCommand) {
        self.metrics.triggers_hotkey.fetch_add(1, Ordering::Relaxed);
        match cmd {
            HotkeyCommand::PasteLast => self.on_paste_last().await,
            HotkeyCommand::Cancel => self.cancel(true).await,
            HotkeyCommand::PauseResume => {
                self.paused = !self.paused;
                tracing::info!(paused = self.paused, "pause toggled");
                if !self.paused {
                    if let Some(held) = self.pending_trigger.take() {
                        self.on_trigger(held).await;
                    }
                }
            }
            HotkeyCommand::ToggleOverlay => {
                if self.overlay_visible {
                    self.popup(PopupCommand::HideAll).await;
                    self.overlay_visible = false;
                } else if let Some(last) = &self.last_result {
                    let text = last.text.clone();
                    self.popup(PopupCommand::ShowComplete(text)).await;
                    self.overlay_visible = true;
                }
            }
            HotkeyCommand::Screenshot => {
                // The screenshot + vision inference happen in an external
                // helper; the core shows the instruction prompt surface.
                self.popup(PopupCommand::ShowVisionPrompt).await;
                self.overlay_visible = true;
            }
            HotkeyCommand::VoiceHoldStart | HotkeyCommand::VoiceHoldEnd => {
                tracing::debug!(?cmd, "voice capture handled by external helper");
            }
            HotkeyCommand::OpenSettings => {
                tracing::info!("settings surface requested");
            }
            HotkeyCommand::Generate | HotkeyCommand::Clipboard => {
                tracing::debug!(?cmd, "buffer-dependent hotkey routed around the pipeline");
            }
        }
    }

    async fn on_paste_last(&mut self) {
        let presenting = self
            .session
            .as_ref()
            .map(|s| s.state == SessionState::Presenting)
            .unwrap_or(false);
        if presenting {
            self.begin_injection().await;
            return;
        }
        if self.session.is_some() {
            return;
        }
        let Some(last) = self.last_result.clone() else {
            return;
        };
        if last.text.is_empty() {
            return;
        }
        // Paste outside a session: nothing to erase, same machinery.
        let mut session = Session::new(PASTE_ONLY_ID, GenerationMode::FreePrompt, 0);
        session.accumulated_text = last.text;
        session.state = SessionState::Presenting;
        self.session = Some(session);
        self.begin_injection().await;
    }

    async fn on_escape(&mut self) {
        if self.session.is_some() {
            self.cancel(true).await;
        } else if self.overlay_visible {
            // The popup self-hides on Escape.
            self.popup(PopupCommand::HideAll).await;
            self.overlay_visible = false;
        }
    }

    async fn on_focus_changed(&mut self) {
        let presenting = self
            .session
            .as_ref()
            .map(|s| s.state == SessionState::Presenting)
            .unwrap_or(false);
        if presenting {
            // Dismissal, not cancellation: the result stays on Paste-last.
            self.session = None;
            self.metrics.session_in_flight.store(false, Ordering::Relaxed);
            self.popup(PopupCommand::HideAll).await;
            self.overlay_visible = false;
            self.pipeline(PipelineCommand::Thaw).await;
        } else if self.overlay_visible && self.session.is_none() {
            self.popup(PopupCommand::HideAll).await;
            self.overlay_visible = false;
        }
    }

    async fn cancel(&mut self, clear_last: bool) {
        if let Some(session) = self.session.take() {
            if session.awaiting_chunks() {
                let backend = self.backend.read().clone();
                if let Some(backend) = backend {
                    backend.cancel(session.id).await;
                    if let Some(companion) = session.companion_id {
                        backend.cancel(companion).await;
                    }
                }
            }
            self.metrics
                .sessions_canceled
                .fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.session_in_flight.store(false, Ordering::Relaxed);
        self.popup(PopupCommand::HideAll).await;
        self.overlay_visible = false;
        self.echo.force_close();
        if clear_last {
            self.clear_last_result();
        }
        self.pipeline(PipelineCommand::Thaw).await;
    }

    // ---- lifecycle & settings --------------------------------------------

    async fn on_worker(&mut self, lifecycle: WorkerLifecycle) {
        match lifecycle {
            WorkerLifecycle::Ready => {
                self.ai_available = true;
            }
            WorkerLifecycle::Down => {
                self.ai_available = false;
                self.metrics.worker_restarts.fetch_add(1, Ordering::Relaxed);
                let in_flight = self
                    .session
                    .as_ref()
                    .map(Session::awaiting_chunks)
                    .unwrap_or(false);
                if in_flight {
                    self.resolve_generation_failure("AI worker restarted").await;
                }
            }
            WorkerLifecycle::Failed => {
                self.ai_available = false;
                tracing::error!("AI worker permanently failed; AI triggers unavailable");
            }
        }
    }

    async fn on_settings(&mut self, settings: Settings) {
        let live_changed = settings.live_mode != self.settings.live_mode;
        let master_changed = settings.master_enabled != self.settings.master_enabled;
        self.settings = settings;

        if live_changed {
            self.pipeline(PipelineCommand::SetLiveMode(self.settings.live_mode))
                .await;
        }
        if master_changed {
            self.pipeline(PipelineCommand::SetMasterEnabled(
                self.settings.master_enabled,
            ))
            .await;
            if !self.settings.master_enabled {
                self.cancel(true).await;
            }
        }
    }

    // ---- helpers ----------------------------------------------------------

    fn clear_last_result(&mut self) {
        self.last_result = None;
        if !self.settings.last_generated_text.is_empty()
            || !self.settings.last_generated_explanation.is_empty()
        {
            self.settings.last_generated_text.clear();
            self.settings.last_generated_explanation.clear();
            self.push_settings();
        }
    }

    fn push_settings(&self) {
        if let Some(tx) = &self.settings_updates {
            let _ = tx.send(self.settings.clone());
        }
    }

    async fn show_error(&mut self, message: &str) {
        self.popup(PopupCommand::ShowComplete(message.to_string()))
            .await;
        self.overlay_visible = true;
    }

    async fn pipeline(&self, cmd: PipelineCommand) {
        if self.pipeline_tx.send(cmd).await.is_err() {
            tracing::debug!("input pipeline gone");
        }
    }

    async fn popup(&self, cmd: PopupCommand) {
        if self.popup_tx.send(cmd).await.is_err() {
            tracing::debug!("popup controller gone");
        }
    }
}

/// Forward a per-request chunk stream into the mailbox, preserving order.
fn pump_stream(
    mailbox: mpsc::Sender<OrchestratorMsg>,
    id: u64,
    mut stream: mpsc::Receiver<Result<GenerationChunk, WorkerError>>,
) {
    tokio::spawn(async move {
        while let Some(result) = stream.recv().await {
            if mailbox
                .send(OrchestratorMsg::Chunk { id, result })
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = mailbox.send(OrchestratorMsg::StreamClosed { id }).await;
    });
}
