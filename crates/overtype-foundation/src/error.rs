use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OvertypeError {
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A liveness probe stayed degraded past its debounce threshold.
    #[error("component {component} is unhealthy: {reason}")]
    Unhealthy { component: String, reason: String },

    #[error("shutdown in progress")]
    ShuttingDown,

    #[error("Supervisor gave up on required child: {child}")]
    SupervisorGaveUp { child: String },

    #[error("cannot continue: {0}")]
    Fatal(String),

    #[error("transient, safe to retry: {0}")]
    Transient(String),
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Keyboard hook failed to install: {0}")]
    InstallFailed(String),

    #[error("Hook backend not available on this platform: {0}")]
    BackendUnavailable(String),

    #[error("Event queue overflow, dropped {count} events")]
    QueueOverflow { count: u64 },

    #[error("Hook thread exited unexpectedly")]
    ThreadExited,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    #[error("Worker protocol violation: {0}")]
    Protocol(String),

    #[error("Generation timed out after {elapsed:?} with no output")]
    GenerationTimeout { elapsed: Duration },

    #[error("Worker request {id} failed: {message}")]
    Request { id: u64, message: String },

    #[error("Worker exited with status {status:?}")]
    Exited { status: Option<i32> },

    #[error("IO error on worker channel: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("Keystroke synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Injection backend not available: {0}")]
    BackendUnavailable(String),

    #[error("Clipboard unavailable: {0}")]
    ClipboardUnavailable(String),

    // Carries the text so the caller can tell the user where to find it.
    #[error("All injection paths failed; text preserved in payload")]
    Exhausted { text: String, cause: String },

    #[error("Invalid escape sequence in injector payload: \\{0}")]
    InvalidEscape(char),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Missing required key: {0}")]
    MissingKey(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Restart,
    Ignore,
    Fatal,
}

impl OvertypeError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            OvertypeError::Hook(HookError::InstallFailed(_)) => RecoveryStrategy::Fatal,
            OvertypeError::Hook(HookError::QueueOverflow { .. }) => RecoveryStrategy::Ignore,
            OvertypeError::Hook(_) => RecoveryStrategy::Restart,
            OvertypeError::Worker(WorkerError::GenerationTimeout { .. }) => RecoveryStrategy::Ignore,
            OvertypeError::Worker(_) => RecoveryStrategy::Restart,
            OvertypeError::Injection(_) => RecoveryStrategy::Retry {
                max_attempts: 2,
                delay: Duration::from_millis(100),
            },
            OvertypeError::Config(_) => RecoveryStrategy::Fatal,
            OvertypeError::Unhealthy { .. } => RecoveryStrategy::Restart,
            OvertypeError::SupervisorGaveUp { .. } => RecoveryStrategy::Fatal,
            OvertypeError::Fatal(_) | OvertypeError::ShuttingDown => RecoveryStrategy::Fatal,
            _ => RecoveryStrategy::Restart,
        }
    }

    /// Process exit code for errors that terminate the daemon.
    pub fn exit_code(&self) -> i32 {
        match self {
            OvertypeError::Hook(HookError::InstallFailed(_)) => exit_codes::HOOK_INSTALL_FAILED,
            OvertypeError::Config(_) => exit_codes::CONFIG_INVALID,
            OvertypeError::SupervisorGaveUp { .. } => exit_codes::SUPERVISOR_GAVE_UP,
            _ => exit_codes::CLEAN,
        }
    }
}

pub mod exit_codes {
    pub const CLEAN: i32 = 0;
    pub const HOOK_INSTALL_FAILED: i32 = 1;
    pub const CONFIG_INVALID: i32 = 2;
    pub const SUPERVISOR_GAVE_UP: i32 = 3;
}
