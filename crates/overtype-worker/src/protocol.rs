//! Wire messages exchanged with the AI worker.
//!
//! One JSON object per line, UTF-8, over the worker's standard streams.
//! Field names are part of the wire contract with the existing worker
//! child; the tagged enums below pin them exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outbound command to the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum WorkerCommand {
    Ping,
    Generate {
        id: u64,
        prompt: String,
        context: BTreeMap<String, String>,
        streaming: bool,
    },
    Cancel {
        id: u64,
    },
    Shutdown,
}

/// Inbound event from the worker. Unknown events fail to parse and are
/// treated as a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WorkerEvent {
    /// First line on the worker's output stream.
    Started { success: bool, pid: u32 },
    Chunk {
        id: u64,
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    /// Non-streaming one-shot result.
    Complete { id: u64, text: String },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
    Pong,
}

/// One streaming delta routed back to the originating session.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationChunk {
    pub id: u64,
    pub text: String,
    pub is_final: bool,
    pub explanation: Option<String>,
}

impl GenerationChunk {
    pub fn from_event(event: WorkerEvent) -> Option<Self> {
        match event {
            WorkerEvent::Chunk {
                id,
                text,
                is_final,
                explanation,
            } => Some(Self {
                id,
                text,
                is_final,
                explanation,
            }),
            WorkerEvent::Complete { id, text } => Some(Self {
                id,
                text,
                is_final: true,
                explanation: None,
            }),
            _ => None,
        }
    }
}

pub fn encode_line(command: &WorkerCommand) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line(line: &str) -> Result<WorkerEvent, serde_json::Error> {
    serde_json::from_str(line.trim())
}
