pub mod debug_log;
pub mod health;
pub mod hotkey;
pub mod orchestrator;
pub mod runtime;
pub mod supervisor;

pub use debug_log::{DebugLog, DEBUG_LOG_CAPACITY};
pub use orchestrator::{
    LastResult, Orchestrator, OrchestratorMsg, Session, SessionState, SharedBackend,
    WorkerLifecycle, GENERATION_TIMEOUT,
};
pub use runtime::{start, AppHandle, AppRuntimeOptions, SNAPSHOT_ENV};
pub use supervisor::{supervise, ChildEvent, RestartPolicy, Supervised};
