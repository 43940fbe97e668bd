//! Per-trigger session bookkeeping.

use std::time::Instant;

use overtype_worker::GenerationMode;

/// Session progression. `Idle` is represented by the absence of a session;
/// the states here cover an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request sent, no chunk yet.
    Dispatching,
    /// At least one chunk received.
    Streaming,
    /// Final result shown in the popup, awaiting paste or dismissal.
    Presenting,
    /// Delete-and-type in flight.
    Injecting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Dispatching => write!(f, "DISPATCHING"),
            SessionState::Streaming => write!(f, "STREAMING"),
            SessionState::Presenting => write!(f, "PRESENTING"),
            SessionState::Injecting => write!(f, "INJECTING"),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    /// Correlation id of the main generation request.
    pub id: u64,
    pub mode: GenerationMode,
    pub state: SessionState,
    /// Keystrokes to erase before typing the result.
    pub pending_backspace_count: usize,
    /// The prompt as dispatched; feeds the coding-mode explanation request.
    pub original_prompt: String,
    pub accumulated_text: String,
    pub explanation: Option<String>,
    pub popup_shown: bool,
    /// Parallel explanation request in coding mode.
    pub companion_id: Option<u64>,
    pub companion_text: String,
    pub last_chunk_at: Instant,
}

impl Session {
    pub fn new(id: u64, mode: GenerationMode, pending_backspace_count: usize) -> Self {
        Self {
            id,
            mode,
            state: SessionState::Dispatching,
            pending_backspace_count,
            original_prompt: String::new(),
            accumulated_text: String::new(),
            explanation: None,
            popup_shown: false,
            companion_id: None,
            companion_text: String::new(),
            last_chunk_at: Instant::now(),
        }
    }

    pub fn transition(&mut self, to: SessionState) {
        let valid = matches!(
            (self.state, to),
            (SessionState::Dispatching, SessionState::Streaming)
                | (SessionState::Dispatching, SessionState::Presenting)
                | (SessionState::Dispatching, SessionState::Injecting)
                | (SessionState::Streaming, SessionState::Presenting)
                | (SessionState::Streaming, SessionState::Injecting)
                | (SessionState::Presenting, SessionState::Injecting)
        );
        if !valid {
            tracing::warn!(from = %self.state, to = %to, "unexpected session transition");
        }
        tracing::debug!(session = self.id, from = %self.state, to = %to, "session transition");
        self.state = to;
    }

    /// The generation is still waiting on the worker.
    pub fn awaiting_chunks(&self) -> bool {
        matches!(
            self.state,
            SessionState::Dispatching | SessionState::Streaming
        )
    }
}

/// A completed result retained for Paste-last and retry-after-failure.
#[derive(Debug, Clone, PartialEq)]
pub struct LastResult {
    pub text: String,
    pub explanation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_dispatching() {
        let session = Session::new(1, GenerationMode::GrammarFix, 8);
        assert_eq!(session.state, SessionState::Dispatching);
        assert_eq!(session.pending_backspace_count, 8);
        assert!(session.awaiting_chunks());
    }

    #[test]
    fn presenting_no_longer_awaits_chunks() {
        let mut session = Session::new(1, GenerationMode::GrammarFix, 0);
        session.transition(SessionState::Streaming);
        session.transition(SessionState::Presenting);
        assert!(!session.awaiting_chunks());
    }
}
