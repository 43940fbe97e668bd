pub mod client;
pub mod protocol;
pub mod request;

pub use client::{GenerationBackend, WorkerClient, WorkerConfig, WorkerNotice};
pub use protocol::{decode_line, encode_line, GenerationChunk, WorkerCommand, WorkerEvent};
pub use request::{context_keys, GenerationMode, GenerationRequest};
