//! Clipboard fallback: still deletes the prompt region, then pastes the
//! replacement with a synthesized paste chord.

use async_trait::async_trait;
use overtype_foundation::InjectionError;

use crate::{InjectionOp, TextInjector};

pub struct ClipboardPasteInjector {
    available: bool,
}

impl Default for ClipboardPasteInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardPasteInjector {
    pub fn new() -> Self {
        let available = arboard::Clipboard::new().is_ok();
        if !available {
            tracing::warn!("clipboard backend unavailable");
        }
        Self { available }
    }
}

#[async_trait]
impl TextInjector for ClipboardPasteInjector {
    fn name(&self) -> &'static str {
        "clipboard-paste"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn inject(&self, op: &InjectionOp) -> Result<(), InjectionError> {
        let text = op.text.clone();
        let backspace_count = op.backspace_count;

        tokio::task::spawn_blocking(move || {
            // Clipboard write first: if it fails we have typed nothing yet
            // and the caller still holds the text.
            let mut clipboard = arboard::Clipboard::new()
                .map_err(|e| InjectionError::ClipboardUnavailable(e.to_string()))?;
            clipboard
                .set_text(text)
                .map_err(|e| InjectionError::ClipboardUnavailable(e.to_string()))?;

            synthesize_delete_and_paste(backspace_count)
        })
        .await
        .map_err(|e| InjectionError::SynthesisFailed(format!("clipboard task failed: {e}")))?
    }
}

#[cfg(feature = "enigo")]
fn synthesize_delete_and_paste(backspace_count: usize) -> Result<(), InjectionError> {
    use enigo::{Direction, Enigo, Key, Keyboard, Settings};

    let mut enigo = Enigo::new(&Settings::default())
        .map_err(|e| InjectionError::BackendUnavailable(e.to_string()))?;

    for _ in 0..backspace_count {
        enigo
            .key(Key::Backspace, Direction::Click)
            .map_err(|e| InjectionError::SynthesisFailed(e.to_string()))?;
    }

    #[cfg(target_os = "macos")]
    let modifier = Key::Meta;
    #[cfg(not(target_os = "macos"))]
    let modifier = Key::Control;

    enigo
        .key(modifier, Direction::Press)
        .map_err(|e| InjectionError::SynthesisFailed(e.to_string()))?;
    let chord = enigo.key(Key::Unicode('v'), Direction::Click);
    // Release the modifier even when the chord itself failed.
    let release = enigo.key(modifier, Direction::Release);
    chord.map_err(|e| InjectionError::SynthesisFailed(e.to_string()))?;
    release.map_err(|e| InjectionError::SynthesisFailed(e.to_string()))?;
    Ok(())
}

#[cfg(not(feature = "enigo"))]
fn synthesize_delete_and_paste(_backspace_count: usize) -> Result<(), InjectionError> {
    Err(InjectionError::BackendUnavailable(
        "no keystroke backend for the paste chord".into(),
    ))
}
