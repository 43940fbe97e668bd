pub mod buffer;
pub mod echo;
pub mod hook;
pub mod keys;
pub mod pipeline;
pub mod privacy;
pub mod triggers;

pub use buffer::{TextBuffer, DEFAULT_BUFFER_CAPACITY};
pub use echo::{EchoGate, EchoGuard};
pub use hook::{
    spawn_focus_watcher, EventQueue, FocusProbe, KeyboardHook, NullFocusProbe,
    DEFAULT_QUEUE_CAPACITY,
};
#[cfg(feature = "hook-rdev")]
pub use hook::RdevHook;
pub use keys::{ActiveContext, CaretKey, LogicalKey, ModifierKey, ObserverEvent, RawKeyEvent};
pub use pipeline::{
    snapshot_request, BufferSnapshot, DebugRecord, InputPipeline, PipelineCommand, PipelineEvent,
    DEBUG_ENTRY_MAX_CHARS,
};
pub use privacy::SensitiveClassifier;
pub use triggers::{
    HotkeyCommand, Trigger, TriggerEvent, TriggerRecognizer, EXTENSION_WINDOW, LIVE_IDLE,
};
