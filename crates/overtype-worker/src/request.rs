//! Generation requests as the orchestrator builds them.

use crate::protocol::WorkerCommand;
use std::collections::BTreeMap;

/// Context-map keys the worker understands.
pub mod context_keys {
    pub const MODE: &str = "mode";
    pub const LAST_OUTPUT: &str = "last_output";
    pub const INSTRUCTION: &str = "instruction";
    pub const TONE: &str = "tone";
    pub const AGENT: &str = "agent";
    pub const CODE: &str = "code";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    GrammarFix,
    Extend,
    Clipboard,
    ClipboardWithInstruction,
    Explanation,
    FreePrompt,
    Vision,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::GrammarFix => "grammar_fix",
            GenerationMode::Extend => "extend",
            GenerationMode::Clipboard => "clipboard",
            GenerationMode::ClipboardWithInstruction => "clipboard_with_instruction",
            GenerationMode::Explanation => "explanation",
            GenerationMode::FreePrompt => "free_prompt",
            GenerationMode::Vision => "vision",
        }
    }

    /// Clipboard-family modes get the parallel explanation window in
    /// coding mode.
    pub fn is_clipboard_family(&self) -> bool {
        matches!(
            self,
            GenerationMode::Clipboard | GenerationMode::ClipboardWithInstruction
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub id: u64,
    pub mode: GenerationMode,
    pub prompt: String,
    pub context: BTreeMap<String, String>,
    pub streaming: bool,
}

impl GenerationRequest {
    pub fn new(id: u64, mode: GenerationMode, prompt: impl Into<String>) -> Self {
        Self {
            id,
            mode,
            prompt: prompt.into(),
            context: BTreeMap::new(),
            streaming: true,
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// The wire command; the mode rides in the context map.
    pub fn to_command(&self) -> WorkerCommand {
        let mut context = self.context.clone();
        context.insert(
            context_keys::MODE.to_string(),
            self.mode.as_str().to_string(),
        );
        WorkerCommand::Generate {
            id: self.id,
            prompt: self.prompt.clone(),
            context,
            streaming: self.streaming,
        }
    }
}
