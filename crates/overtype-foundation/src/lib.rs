pub mod error;
pub mod health;
pub mod shutdown;
pub mod state;

pub use error::{
    exit_codes, ConfigError, HookError, InjectionError, OvertypeError, RecoveryStrategy,
    WorkerError,
};
pub use health::{HealthHandle, HealthMonitor, HealthProbe, ProbeStatus, DEGRADED_AFTER};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use state::{AppState, StateManager};
