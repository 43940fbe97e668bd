//! Keystroke synthesis through the enigo library.

use async_trait::async_trait;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use overtype_foundation::InjectionError;

use crate::plan::KeyStep;
use crate::{InjectionOp, TextInjector};

pub struct EnigoInjector {
    available: bool,
}

impl Default for EnigoInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl EnigoInjector {
    pub fn new() -> Self {
        // Probe once; construction fails without input permissions.
        let available = Enigo::new(&Settings::default()).is_ok();
        if !available {
            tracing::warn!("enigo backend unavailable (missing input permissions?)");
        }
        Self { available }
    }
}

#[async_trait]
impl TextInjector for EnigoInjector {
    fn name(&self) -> &'static str {
        "enigo"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn inject(&self, op: &InjectionOp) -> Result<(), InjectionError> {
        let plan = op.plan();
        // Keystroke synthesis and the inter-key sleeps run off the async
        // executor; one blocking task per operation keeps them serialized.
        tokio::task::spawn_blocking(move || {
            let mut enigo = Enigo::new(&Settings::default())
                .map_err(|e| InjectionError::BackendUnavailable(e.to_string()))?;

            for key in &plan.keys {
                if !key.delay_before.is_zero() {
                    std::thread::sleep(key.delay_before);
                }
                let result = match key.step {
                    KeyStep::Backspace => enigo.key(Key::Backspace, Direction::Click),
                    KeyStep::Enter => enigo.key(Key::Return, Direction::Click),
                    KeyStep::Tab => enigo.key(Key::Tab, Direction::Click),
                    // `text` performs the modifier composition for shifted
                    // symbols and non-ASCII characters.
                    KeyStep::Char(ch) => enigo.text(&ch.to_string()),
                };
                result.map_err(|e| InjectionError::SynthesisFailed(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| InjectionError::SynthesisFailed(format!("injection task failed: {e}")))?
    }
}
