//! Normalized key event model produced by the observer hook.

use serde::Serialize;
use std::time::Instant;

/// Keys that move the caret. Once one of these fires the buffer no longer
/// reflects contiguous typed text and must reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaretKey {
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModifierKey {
    Shift,
    Control,
    Alt,
    Meta,
}

/// Logical key after layout and dead-key composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalKey {
    /// A character-producing key; carries the composed character.
    Printable(char),
    Backspace,
    Enter,
    Tab,
    Escape,
    CaretMove(CaretKey),
    Modifier(ModifierKey),
    /// Function keys, media keys, anything else we do not track.
    Other,
}

impl LogicalKey {
    pub fn is_printable(&self) -> bool {
        matches!(self, LogicalKey::Printable(_))
    }

    pub fn is_caret_moving(&self) -> bool {
        matches!(self, LogicalKey::CaretMove(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RawKeyEvent {
    pub key: LogicalKey,
    pub is_down: bool,
    pub is_modifier: bool,
    /// Set when the OS reports the event as synthetic. When the backend
    /// cannot tell, the echo gate decides downstream.
    pub is_system_injected: bool,
    pub at: Instant,
}

impl RawKeyEvent {
    pub fn down(key: LogicalKey) -> Self {
        Self {
            key,
            is_down: true,
            is_modifier: matches!(key, LogicalKey::Modifier(_)),
            is_system_injected: false,
            at: Instant::now(),
        }
    }

    pub fn up(key: LogicalKey) -> Self {
        Self {
            is_down: false,
            ..Self::down(key)
        }
    }

    pub fn injected(mut self) -> Self {
        self.is_system_injected = true;
        self
    }
}

/// Foreground window identity, re-classified on each focus change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveContext {
    pub window_title: String,
    pub process_identity: String,
    pub is_sensitive: bool,
}

impl ActiveContext {
    pub fn unknown() -> Self {
        Self {
            window_title: String::new(),
            process_identity: String::new(),
            is_sensitive: false,
        }
    }
}

/// Events flowing from the hook thread into the input pipeline. Focus
/// changes carry the raw identity; the pipeline classifies sensitivity.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Key(RawKeyEvent),
    FocusChange {
        window_title: String,
        process_identity: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_classification() {
        assert!(LogicalKey::Printable('a').is_printable());
        assert!(!LogicalKey::Enter.is_printable());
        assert!(LogicalKey::CaretMove(CaretKey::Home).is_caret_moving());
        assert!(!LogicalKey::Backspace.is_caret_moving());
    }

    #[test]
    fn constructors_set_modifier_flag() {
        let ev = RawKeyEvent::down(LogicalKey::Modifier(ModifierKey::Shift));
        assert!(ev.is_modifier);
        let ev = RawKeyEvent::up(LogicalKey::Printable('x'));
        assert!(!ev.is_down);
        assert!(!ev.is_modifier);
    }
}
