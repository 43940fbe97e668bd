//! The single input task.
//!
//! Drains the hook queue serially so the buffer and trigger recognition
//! stay in lockstep, owns the `TextBuffer` exclusively, and forwards
//! accepted triggers to the orchestrator mailbox. Commands from the
//! orchestrator (reset, thaw, hotkey routing) arrive on a separate channel
//! and are served ahead of key events.

use tokio::sync::{mpsc, oneshot};

use overtype_telemetry::PipelineMetrics;

use crate::buffer::TextBuffer;
use crate::echo::EchoGate;
use crate::hook::EventQueue;
use crate::keys::{ActiveContext, LogicalKey, ObserverEvent, RawKeyEvent};
use crate::privacy::SensitiveClassifier;
use crate::triggers::{Trigger, TriggerEvent, TriggerRecognizer};

/// Upper bound for one keystroke debug entry.
pub const DEBUG_ENTRY_MAX_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub enum PipelineCommand {
    ResetBuffer,
    SetLiveMode(bool),
    SetMasterEnabled(bool),
    /// Session resolved; recognition resumes.
    Thaw,
    /// Arms the extension window.
    NoteAiOutput { text: String },
    GenerateHotkey,
    ClipboardHotkey { clipboard: String },
    GetSnapshot(SnapshotSender),
    Shutdown,
}

pub type SnapshotSender = std::sync::Arc<parking_lot::Mutex<Option<oneshot::Sender<BufferSnapshot>>>>;

pub fn snapshot_request() -> (PipelineCommand, oneshot::Receiver<BufferSnapshot>) {
    let (tx, rx) = oneshot::channel();
    (
        PipelineCommand::GetSnapshot(std::sync::Arc::new(parking_lot::Mutex::new(Some(tx)))),
        rx,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferSnapshot {
    pub text: String,
    pub raw_count: usize,
    pub context: ActiveContext,
}

/// What the pipeline emits toward the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Trigger(TriggerEvent),
    /// Escape key-down observed; cancels an active session.
    Escape,
    /// Classified focus change; dismisses a presented result.
    FocusChanged(ActiveContext),
}

/// One keystroke debug record, consumed by the capped debug log.
#[derive(Debug, Clone)]
pub struct DebugRecord {
    pub buffer: String,
    pub raw_count: usize,
    pub window_title: String,
}

pub struct InputPipeline {
    queue: EventQueue,
    command_rx: mpsc::Receiver<PipelineCommand>,
    event_tx: mpsc::Sender<PipelineEvent>,
    buffer: TextBuffer,
    recognizer: TriggerRecognizer,
    classifier: SensitiveClassifier,
    echo: EchoGate,
    context: ActiveContext,
    master_enabled: bool,
    metrics: PipelineMetrics,
    debug_tx: Option<mpsc::UnboundedSender<DebugRecord>>,
}

impl InputPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: EventQueue,
        command_rx: mpsc::Receiver<PipelineCommand>,
        event_tx: mpsc::Sender<PipelineEvent>,
        classifier: SensitiveClassifier,
        echo: EchoGate,
        live_mode: bool,
        metrics: PipelineMetrics,
        debug_tx: Option<mpsc::UnboundedSender<DebugRecord>>,
    ) -> Self {
        Self {
            queue,
            command_rx,
            event_tx,
            buffer: TextBuffer::default(),
            recognizer: TriggerRecognizer::new(live_mode),
            classifier,
            echo,
            context: ActiveContext::unknown(),
            master_enabled: true,
            metrics,
            debug_tx,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::debug!("Input pipeline started");
        loop {
            let live_deadline = self
                .recognizer
                .live_deadline(!self.buffer.is_empty(), self.context.is_sensitive);
            let sleep_target = live_deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + std::time::Duration::from_secs(3600));

            tokio::select! {
                biased;
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PipelineCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                event = self.queue.recv() => {
                    self.handle_observer_event(event).await;
                }
                _ = tokio::time::sleep_until(sleep_target), if live_deadline.is_some() => {
                    self.fire_live().await;
                }
            }
        }
        tracing::debug!("Input pipeline stopped");
    }

    async fn handle_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::ResetBuffer => self.reset_buffer(),
            PipelineCommand::SetLiveMode(enabled) => self.recognizer.set_live_mode(enabled),
            PipelineCommand::SetMasterEnabled(enabled) => {
                self.master_enabled = enabled;
                if !enabled {
                    self.reset_buffer();
                }
            }
            PipelineCommand::Thaw => self.recognizer.thaw(),
            PipelineCommand::NoteAiOutput { text } => self.recognizer.note_completion(text),
            PipelineCommand::GenerateHotkey => {
                if !self.trigger_allowed() {
                    return;
                }
                if let Some(trigger) = self.recognizer.on_generate_hotkey(&self.buffer) {
                    self.emit_trigger(trigger).await;
                }
            }
            PipelineCommand::ClipboardHotkey { clipboard } => {
                if !self.trigger_allowed() {
                    return;
                }
                if let Some(trigger) = self.recognizer.on_clipboard_hotkey(&self.buffer, clipboard)
                {
                    self.emit_trigger(trigger).await;
                }
            }
            PipelineCommand::GetSnapshot(slot) => {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(BufferSnapshot {
                        text: self.buffer.as_str().to_string(),
                        raw_count: self.buffer.raw_count(),
                        context: self.context.clone(),
                    });
                }
            }
            PipelineCommand::Shutdown => unreachable!("handled in run"),
        }
    }

    async fn handle_observer_event(&mut self, event: ObserverEvent) {
        match event {
            ObserverEvent::Key(key) => self.handle_key(key).await,
            ObserverEvent::FocusChange {
                window_title,
                process_identity,
            } => {
                let is_sensitive = self.classifier.is_sensitive(&window_title, &process_identity);
                let leaving_sensitive = self.context.is_sensitive;
                self.context = ActiveContext {
                    window_title,
                    process_identity,
                    is_sensitive,
                };
                self.metrics
                    .focus_changes
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if leaving_sensitive {
                    tracing::debug!("Left sensitive context, buffer cleared");
                }
                // Focus moved: the buffer no longer mirrors the caret region.
                self.reset_buffer();
                let _ = self
                    .event_tx
                    .send(PipelineEvent::FocusChanged(self.context.clone()))
                    .await;
            }
        }
    }

    async fn handle_key(&mut self, key: RawKeyEvent) {
        self.metrics
            .keys_seen
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if key.is_system_injected || self.echo.is_open() {
            self.metrics
                .keys_suppressed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        }
        if !key.is_down || !self.master_enabled {
            return;
        }

        match key.key {
            LogicalKey::Printable(ch) => {
                self.buffer.append(ch);
                self.recognizer.on_printable(key.at);
                self.tap_debug();
            }
            LogicalKey::Tab => {
                self.buffer.append('\t');
                self.recognizer.on_printable(key.at);
                self.tap_debug();
            }
            LogicalKey::Backspace => {
                self.buffer.backspace();
                self.tap_debug();
            }
            LogicalKey::Enter => {
                if let Some(trigger) = self.recognizer.on_enter(&self.buffer) {
                    if self.trigger_allowed() {
                        self.emit_trigger(trigger).await;
                        return;
                    }
                }
                // Enter moved the caret without firing the sentinel.
                self.reset_buffer();
            }
            LogicalKey::Escape => {
                let _ = self.event_tx.send(PipelineEvent::Escape).await;
            }
            LogicalKey::CaretMove(_) => self.reset_buffer(),
            LogicalKey::Modifier(_) | LogicalKey::Other => {}
        }
    }

    async fn fire_live(&mut self) {
        if !self.trigger_allowed() {
            return;
        }
        if let Some(trigger) = self.recognizer.on_live_elapsed(&self.buffer) {
            self.emit_trigger(trigger).await;
        }
    }

    fn trigger_allowed(&mut self) -> bool {
        if !self.master_enabled {
            return false;
        }
        if self.context.is_sensitive {
            self.metrics
                .triggers_dropped_sensitive
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(window = %self.context.window_title, "Trigger dropped in sensitive context");
            return false;
        }
        true
    }

    async fn emit_trigger(&mut self, trigger: Trigger) {
        let counter = match &trigger {
            Trigger::Backtick { .. } => &self.metrics.triggers_backtick,
            Trigger::Live { .. } => &self.metrics.triggers_live,
            Trigger::Extension { .. } => &self.metrics.triggers_extension,
            _ => &self.metrics.triggers_hotkey,
        };
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.metrics.mark_trigger();

        // Acceptance atomically snapshots (this task owns the buffer) and
        // freezes further recognition until the orchestrator thaws.
        self.recognizer.freeze();
        let event = TriggerEvent {
            trigger,
            context: self.context.clone(),
        };
        if self.event_tx.send(PipelineEvent::Trigger(event)).await.is_err() {
            tracing::warn!("Orchestrator mailbox closed; trigger dropped");
            self.recognizer.thaw();
        }
    }

    fn reset_buffer(&mut self) {
        self.buffer.reset();
        self.metrics
            .buffer_resets
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn tap_debug(&mut self) {
        if self.context.is_sensitive {
            return;
        }
        if let Some(tx) = &self.debug_tx {
            let mut buffer = self.buffer.as_str().to_string();
            if buffer.chars().count() > DEBUG_ENTRY_MAX_CHARS {
                let cut = buffer
                    .char_indices()
                    .nth(buffer.chars().count() - DEBUG_ENTRY_MAX_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                buffer.drain(..cut);
            }
            let _ = tx.send(DebugRecord {
                buffer,
                raw_count: self.buffer.raw_count(),
                window_title: self.context.window_title.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CaretKey, ModifierKey};
    use std::time::Duration;

    struct Harness {
        queue: EventQueue,
        command_tx: mpsc::Sender<PipelineCommand>,
        event_rx: mpsc::Receiver<PipelineEvent>,
        echo: EchoGate,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn new(live_mode: bool) -> Self {
            let queue = EventQueue::default();
            let (command_tx, command_rx) = mpsc::channel(16);
            let (event_tx, event_rx) = mpsc::channel(16);
            let echo = EchoGate::new();
            let pipeline = InputPipeline::new(
                queue.clone(),
                command_rx,
                event_tx,
                SensitiveClassifier::default(),
                echo.clone(),
                live_mode,
                PipelineMetrics::default(),
                None,
            );
            let handle = pipeline.spawn();
            Self {
                queue,
                command_tx,
                event_rx,
                echo,
                handle,
            }
        }

        fn type_str(&self, text: &str) {
            for ch in text.chars() {
                self.queue
                    .push(ObserverEvent::Key(RawKeyEvent::down(LogicalKey::Printable(
                        ch,
                    ))));
            }
        }

        fn press(&self, key: LogicalKey) {
            self.queue.push(ObserverEvent::Key(RawKeyEvent::down(key)));
        }

        async fn snapshot(&self) -> BufferSnapshot {
            let (cmd, rx) = snapshot_request();
            self.command_tx.send(cmd).await.unwrap();
            rx.await.unwrap()
        }

        async fn recv_trigger(&mut self) -> TriggerEvent {
            match tokio::time::timeout(Duration::from_secs(2), self.event_rx.recv())
                .await
                .expect("timed out waiting for trigger")
                .expect("pipeline closed")
            {
                PipelineEvent::Trigger(event) => event,
                other => panic!("expected trigger, got {:?}", other),
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    #[tokio::test]
    async fn typing_accumulates_in_buffer() {
        let h = Harness::new(false);
        h.type_str("hello");
        let snap = h.snapshot().await;
        assert_eq!(snap.text, "hello");
        assert_eq!(snap.raw_count, 5);
    }

    #[tokio::test]
    async fn backtick_enter_fires_grammar_trigger() {
        let mut h = Harness::new(false);
        h.type_str("hellow`");
        h.press(LogicalKey::Enter);

        let event = h.recv_trigger().await;
        assert_eq!(
            event.trigger,
            Trigger::Backtick {
                prompt: "hellow".to_string(),
                raw_count: 8,
            }
        );
    }

    #[tokio::test]
    async fn plain_enter_resets_buffer() {
        let h = Harness::new(false);
        h.type_str("hello");
        h.press(LogicalKey::Enter);
        let snap = h.snapshot().await;
        assert_eq!(snap.text, "");
        assert_eq!(snap.raw_count, 0);
    }

    #[tokio::test]
    async fn caret_keys_reset_buffer() {
        let h = Harness::new(false);
        h.type_str("hello");
        h.press(LogicalKey::CaretMove(CaretKey::Home));
        let snap = h.snapshot().await;
        assert!(snap.text.is_empty());
    }

    #[tokio::test]
    async fn modifiers_do_not_touch_buffer() {
        let h = Harness::new(false);
        h.type_str("ab");
        h.press(LogicalKey::Modifier(ModifierKey::Shift));
        let snap = h.snapshot().await;
        assert_eq!(snap.text, "ab");
    }

    #[tokio::test]
    async fn echo_gate_suppresses_buffer_updates() {
        let h = Harness::new(false);
        h.type_str("ab");
        // Wait until the typed keys are drained before opening the gate.
        while h.snapshot().await.text != "ab" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let guard = h.echo.open();
        h.type_str("SYNTHETIC");
        let snap = h.snapshot().await;
        assert_eq!(snap.text, "ab");
        assert_eq!(snap.raw_count, 2);
        drop(guard);
    }

    #[tokio::test]
    async fn injected_flag_suppresses_even_without_gate() {
        let h = Harness::new(false);
        h.queue.push(ObserverEvent::Key(
            RawKeyEvent::down(LogicalKey::Printable('x')).injected(),
        ));
        let snap = h.snapshot().await;
        assert!(snap.text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn live_idle_fires_after_pause() {
        let mut h = Harness::new(true);
        h.type_str("this are wrong");
        // Let the events drain, then advance past the idle threshold.
        while h.snapshot().await.text != "this are wrong" {
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        tokio::time::advance(crate::triggers::LIVE_IDLE + Duration::from_millis(100)).await;

        let event = h.recv_trigger().await;
        assert_eq!(
            event.trigger,
            Trigger::Live {
                prompt: "this are wrong".to_string(),
                raw_count: 14,
            }
        );
    }

    #[tokio::test]
    async fn sensitive_window_shadows_triggers_and_resets_on_leave() {
        let mut h = Harness::new(false);
        h.queue.push(ObserverEvent::FocusChange {
            window_title: "Sign in - Bank".to_string(),
            process_identity: "browser".to_string(),
        });
        h.type_str("password123`");
        h.press(LogicalKey::Enter);

        h.queue.push(ObserverEvent::FocusChange {
            window_title: "Editor".to_string(),
            process_identity: "vim".to_string(),
        });
        let snap = h.snapshot().await;
        assert!(snap.text.is_empty());
        assert!(!snap.context.is_sensitive);

        // Buffer was tracked in shadow mode, but no trigger escaped; only
        // the two focus-change notifications are in the channel.
        while let Ok(event) = h.event_rx.try_recv() {
            assert!(
                matches!(event, PipelineEvent::FocusChanged(_)),
                "unexpected event {:?}",
                event
            );
        }
    }

    #[tokio::test]
    async fn master_disabled_blocks_all_triggers() {
        let mut h = Harness::new(false);
        h.command_tx
            .send(PipelineCommand::SetMasterEnabled(false))
            .await
            .unwrap();
        h.type_str("hellow`");
        h.press(LogicalKey::Enter);
        h.command_tx
            .send(PipelineCommand::GenerateHotkey)
            .await
            .unwrap();

        let snap = h.snapshot().await;
        assert!(snap.text.is_empty());
        assert!(h.event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trigger_freezes_until_thaw() {
        let mut h = Harness::new(false);
        h.type_str("first`");
        h.press(LogicalKey::Enter);
        let _ = h.recv_trigger().await;

        // Second sentinel during the frozen session is ignored; the Enter
        // falls through to a caret reset instead.
        h.type_str("second`");
        h.press(LogicalKey::Enter);
        assert!(h.event_rx.try_recv().is_err());
        let snap = h.snapshot().await;
        assert!(snap.text.is_empty());

        h.command_tx.send(PipelineCommand::Thaw).await.unwrap();
        h.type_str("third`");
        h.press(LogicalKey::Enter);
        let event = h.recv_trigger().await;
        assert!(matches!(event.trigger, Trigger::Backtick { .. }));
    }

    #[tokio::test]
    async fn clipboard_hotkey_routes_through_buffer(){
        let mut h = Harness::new(false);
        h.type_str("explain briefly");
        while h.snapshot().await.text != "explain briefly" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.command_tx
            .send(PipelineCommand::ClipboardHotkey {
                clipboard: "def add(a,b): return a+b".to_string(),
            })
            .await
            .unwrap();

        let event = h.recv_trigger().await;
        match event.trigger {
            Trigger::ClipboardWithInstruction {
                clipboard,
                instruction,
                raw_count,
            } => {
                assert_eq!(clipboard, "def add(a,b): return a+b");
                assert_eq!(instruction, "explain briefly");
                assert_eq!(raw_count, 15);
            }
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    #[tokio::test]
    async fn escape_is_forwarded() {
        let mut h = Harness::new(false);
        h.press(LogicalKey::Escape);
        match tokio::time::timeout(Duration::from_secs(1), h.event_rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            PipelineEvent::Escape => {}
            other => panic!("expected escape, got {:?}", other),
        }
    }
}
