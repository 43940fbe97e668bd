//! Trigger recognition over the rolling buffer.
//!
//! The recognizer is a synchronous core driven by the input pipeline task;
//! it never touches channels itself so every rule is unit-testable.

use crate::buffer::TextBuffer;
use crate::keys::ActiveContext;
use std::time::{Duration, Instant};

/// Re-trigger window after an AI completion.
pub const EXTENSION_WINDOW: Duration = Duration::from_secs(2);

/// Printable-key idle that fires a live grammar fix.
pub const LIVE_IDLE: Duration = Duration::from_millis(700);

/// Commands delivered by the OS global-hotkey registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyCommand {
    Generate,
    Clipboard,
    Screenshot,
    VoiceHoldStart,
    VoiceHoldEnd,
    ToggleOverlay,
    PasteLast,
    Cancel,
    PauseResume,
    OpenSettings,
}

/// A recognized trigger, carrying the buffer snapshot taken at acceptance.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// `<text>` + backtick + Enter; sentinels excluded from the prompt but
    /// counted for deletion.
    Backtick { prompt: String, raw_count: usize },
    /// Generate hotkey within the extension window of a completion.
    Extension {
        prompt: String,
        last_output: String,
        raw_count: usize,
    },
    /// Idle pause with live mode on.
    Live { prompt: String, raw_count: usize },
    /// Generate hotkey outside the extension window.
    FreePrompt { prompt: String, raw_count: usize },
    /// Clipboard hotkey with an empty buffer.
    Clipboard { clipboard: String },
    /// Clipboard hotkey with the buffer as instruction; the instruction
    /// characters are deleted on inject.
    ClipboardWithInstruction {
        clipboard: String,
        instruction: String,
        raw_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub trigger: Trigger,
    pub context: ActiveContext,
}

#[derive(Debug)]
pub struct TriggerRecognizer {
    live_mode: bool,
    frozen: bool,
    last_printable_at: Option<Instant>,
    last_completion: Option<Completion>,
}

#[derive(Debug, Clone)]
struct Completion {
    text: String,
    at: Instant,
    typed_since: bool,
}

impl Default for TriggerRecognizer {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TriggerRecognizer {
    pub fn new(live_mode: bool) -> Self {
        Self {
            live_mode,
            frozen: false,
            last_printable_at: None,
            last_completion: None,
        }
    }

    pub fn set_live_mode(&mut self, enabled: bool) {
        self.live_mode = enabled;
        if !enabled {
            self.last_printable_at = None;
        }
    }

    pub fn live_mode(&self) -> bool {
        self.live_mode
    }

    /// Trigger acceptance freezes recognition until the session resolves.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Arm the extension window after an AI completion.
    pub fn note_completion(&mut self, text: String) {
        self.last_completion = Some(Completion {
            text,
            at: Instant::now(),
            typed_since: false,
        });
    }

    pub fn on_printable(&mut self, at: Instant) {
        self.last_printable_at = Some(at);
        if let Some(completion) = &mut self.last_completion {
            completion.typed_since = true;
        }
    }

    /// Backtick sentinel check on Enter key-down. The backtick itself is
    /// already in the buffer; the Enter adds one more deletable keystroke.
    pub fn on_enter(&mut self, buffer: &TextBuffer) -> Option<Trigger> {
        if self.frozen {
            return None;
        }
        let text = buffer.as_str();
        let prompt = text.strip_suffix('`')?;
        if prompt.is_empty() {
            return None;
        }
        Some(Trigger::Backtick {
            prompt: prompt.to_string(),
            raw_count: buffer.raw_count() + 1,
        })
    }

    /// When the live timer should fire, given the current buffer state.
    pub fn live_deadline(&self, buffer_nonempty: bool, sensitive: bool) -> Option<Instant> {
        if !self.live_mode || self.frozen || sensitive || !buffer_nonempty {
            return None;
        }
        self.last_printable_at.map(|at| at + LIVE_IDLE)
    }

    /// Fire the live trigger once the deadline has elapsed. Consumes the
    /// idle edge so the same pause cannot fire twice.
    pub fn on_live_elapsed(&mut self, buffer: &TextBuffer) -> Option<Trigger> {
        let deadline = self.live_deadline(!buffer.is_empty(), false)?;
        if Instant::now() < deadline {
            return None;
        }
        self.last_printable_at = None;
        Some(Trigger::Live {
            prompt: buffer.as_str().to_string(),
            raw_count: buffer.raw_count(),
        })
    }

    /// Resolve the Generate hotkey: extension when re-triggered right after
    /// a completion with no intervening typing, free prompt otherwise.
    pub fn on_generate_hotkey(&mut self, buffer: &TextBuffer) -> Option<Trigger> {
        if self.frozen {
            return None;
        }
        if let Some(completion) = &self.last_completion {
            let armed = !completion.typed_since && completion.at.elapsed() <= EXTENSION_WINDOW;
            if armed {
                if buffer.is_empty() {
                    // Reset already consumed the context; nothing to extend.
                    return None;
                }
                return Some(Trigger::Extension {
                    prompt: buffer.as_str().to_string(),
                    last_output: completion.text.clone(),
                    raw_count: buffer.raw_count(),
                });
            }
        }
        if buffer.is_empty() {
            return None;
        }
        Some(Trigger::FreePrompt {
            prompt: buffer.as_str().to_string(),
            raw_count: buffer.raw_count(),
        })
    }

    /// Resolve the Clipboard hotkey against the current buffer.
    pub fn on_clipboard_hotkey(&mut self, buffer: &TextBuffer, clipboard: String) -> Option<Trigger> {
        if self.frozen {
            return None;
        }
        if buffer.is_empty() {
            Some(Trigger::Clipboard { clipboard })
        } else {
            Some(Trigger::ClipboardWithInstruction {
                clipboard,
                instruction: buffer.as_str().to_string(),
                raw_count: buffer.raw_count(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(text: &str) -> TextBuffer {
        let mut buf = TextBuffer::default();
        for ch in text.chars() {
            buf.append(ch);
        }
        buf
    }

    #[test]
    fn backtick_sentinel_strips_sentinels_and_counts_them() {
        let mut rec = TriggerRecognizer::default();
        let buf = buffer_with("hellow`");
        let trigger = rec.on_enter(&buf).unwrap();
        assert_eq!(
            trigger,
            Trigger::Backtick {
                prompt: "hellow".to_string(),
                raw_count: 8,
            }
        );
    }

    #[test]
    fn enter_without_backtick_is_not_a_trigger() {
        let mut rec = TriggerRecognizer::default();
        assert!(rec.on_enter(&buffer_with("hellow")).is_none());
    }

    #[test]
    fn lone_backtick_is_not_a_trigger() {
        let mut rec = TriggerRecognizer::default();
        assert!(rec.on_enter(&buffer_with("`")).is_none());
    }

    #[test]
    fn frozen_recognizer_fires_nothing() {
        let mut rec = TriggerRecognizer::default();
        rec.freeze();
        let buf = buffer_with("text`");
        assert!(rec.on_enter(&buf).is_none());
        assert!(rec.on_generate_hotkey(&buf).is_none());
        assert!(rec
            .on_clipboard_hotkey(&buf, "clip".to_string())
            .is_none());
        rec.thaw();
        assert!(rec.on_enter(&buf).is_some());
    }

    #[test]
    fn live_deadline_requires_mode_content_and_calm_context() {
        let mut rec = TriggerRecognizer::new(true);
        assert!(rec.live_deadline(true, false).is_none());

        rec.on_printable(Instant::now());
        assert!(rec.live_deadline(true, false).is_some());
        assert!(rec.live_deadline(false, false).is_none());
        assert!(rec.live_deadline(true, true).is_none());

        rec.set_live_mode(false);
        assert!(rec.live_deadline(true, false).is_none());
    }

    #[test]
    fn live_fires_once_per_pause() {
        let mut rec = TriggerRecognizer::new(true);
        rec.on_printable(Instant::now() - LIVE_IDLE - Duration::from_millis(50));
        let buf = buffer_with("this are wrong");

        let trigger = rec.on_live_elapsed(&buf).unwrap();
        assert_eq!(
            trigger,
            Trigger::Live {
                prompt: "this are wrong".to_string(),
                raw_count: 14,
            }
        );
        // Idle edge consumed; no re-fire until the next printable.
        assert!(rec.on_live_elapsed(&buf).is_none());
    }

    #[test]
    fn generate_hotkey_extends_within_window() {
        let mut rec = TriggerRecognizer::default();
        rec.note_completion("Hello".to_string());
        let buf = buffer_with("Hello");

        match rec.on_generate_hotkey(&buf).unwrap() {
            Trigger::Extension {
                prompt,
                last_output,
                raw_count,
            } => {
                assert_eq!(prompt, "Hello");
                assert_eq!(last_output, "Hello");
                assert_eq!(raw_count, 5);
            }
            other => panic!("expected extension, got {:?}", other),
        }
    }

    #[test]
    fn extension_with_empty_buffer_is_dropped() {
        let mut rec = TriggerRecognizer::default();
        rec.note_completion("Hello".to_string());
        assert!(rec.on_generate_hotkey(&TextBuffer::default()).is_none());
    }

    #[test]
    fn typing_disarms_the_extension_window() {
        let mut rec = TriggerRecognizer::default();
        rec.note_completion("Hello".to_string());
        rec.on_printable(Instant::now());
        let buf = buffer_with("more");

        match rec.on_generate_hotkey(&buf).unwrap() {
            Trigger::FreePrompt { prompt, raw_count } => {
                assert_eq!(prompt, "more");
                assert_eq!(raw_count, 4);
            }
            other => panic!("expected free prompt, got {:?}", other),
        }
    }

    #[test]
    fn clipboard_hotkey_uses_buffer_as_instruction() {
        let mut rec = TriggerRecognizer::default();
        let buf = buffer_with("explain briefly");
        match rec
            .on_clipboard_hotkey(&buf, "def add(a,b): return a+b".to_string())
            .unwrap()
        {
            Trigger::ClipboardWithInstruction {
                clipboard,
                instruction,
                raw_count,
            } => {
                assert_eq!(clipboard, "def add(a,b): return a+b");
                assert_eq!(instruction, "explain briefly");
                assert_eq!(raw_count, 15);
            }
            other => panic!("expected clipboard-with-instruction, got {:?}", other),
        }
    }

    #[test]
    fn clipboard_hotkey_with_empty_buffer_is_plain_clipboard() {
        let mut rec = TriggerRecognizer::default();
        match rec
            .on_clipboard_hotkey(&TextBuffer::default(), "code".to_string())
            .unwrap()
        {
            Trigger::Clipboard { clipboard } => assert_eq!(clipboard, "code"),
            other => panic!("expected clipboard, got {:?}", other),
        }
    }
}
