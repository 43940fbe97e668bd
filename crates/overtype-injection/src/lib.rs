pub mod clipboard;
#[cfg(feature = "enigo")]
pub mod enigo_injector;
pub mod escape;
pub mod normalize;
pub mod plan;
pub mod processor;

use async_trait::async_trait;
use overtype_foundation::InjectionError;

pub use clipboard::ClipboardPasteInjector;
#[cfg(feature = "enigo")]
pub use enigo_injector::EnigoInjector;
pub use escape::{escape, unescape};
pub use normalize::normalize_for_typing;
pub use plan::{InjectionPlan, KeyStep, PlanOptions, PlannedKey};
pub use processor::{InjectionOutcome, InjectionProcessor, InjectionRequest};

/// One delete-and-type operation as the orchestrator issues it. The text
/// is already indent-normalized; normalization runs exactly once per
/// session, upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionOp {
    pub text: String,
    pub backspace_count: usize,
    pub humanize: bool,
    pub ultra_human: bool,
    pub tab_as_spaces: bool,
}

impl InjectionOp {
    pub fn new(text: impl Into<String>, backspace_count: usize) -> Self {
        Self {
            text: text.into(),
            backspace_count,
            humanize: false,
            ultra_human: false,
            tab_as_spaces: false,
        }
    }

    pub fn plan(&self) -> InjectionPlan {
        InjectionPlan::build(
            &self.text,
            self.backspace_count,
            PlanOptions {
                humanize: self.humanize,
                ultra_human: self.ultra_human,
                tab_as_spaces: self.tab_as_spaces,
            },
        )
    }
}

/// A backend that can execute an injection operation.
#[async_trait]
pub trait TextInjector: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;
    async fn inject(&self, op: &InjectionOp) -> Result<(), InjectionError>;
}

/// Test double: records operations instead of synthesizing input.
#[derive(Default)]
pub struct NoopInjector {
    pub ops: std::sync::Mutex<Vec<InjectionOp>>,
}

#[async_trait]
impl TextInjector for NoopInjector {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn inject(&self, op: &InjectionOp) -> Result<(), InjectionError> {
        self.ops.lock().expect("noop injector lock").push(op.clone());
        Ok(())
    }
}
