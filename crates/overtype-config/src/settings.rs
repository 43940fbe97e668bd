//! User settings: persisted as TOML, read by many tasks through immutable
//! snapshots, written only by the settings handler.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use overtype_foundation::ConfigError;

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_tone() -> String {
    "neutral".to_string()
}

fn default_agent() -> String {
    "openai".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Master switch. When off no trigger reaches the orchestrator and
    /// supervised children are stopped.
    #[serde(default = "default_true")]
    pub master_enabled: bool,

    /// Skip the popup and type the result directly at the caret.
    #[serde(default = "default_false")]
    pub auto_inject: bool,

    /// Draw inter-keystroke delays from a human-like distribution.
    #[serde(default = "default_false")]
    pub humanize_typing: bool,

    /// Stronger humanization: occasional typo-then-backspace runs.
    #[serde(default = "default_false")]
    pub ultra_human: bool,

    /// Fire a grammar-fix generation after a typing pause.
    #[serde(default = "default_false")]
    pub live_mode: bool,

    /// Show a parallel explanation window for clipboard-family results.
    #[serde(default = "default_false")]
    pub coding_mode: bool,

    /// Emit Tab as a run of spaces instead of a Tab keystroke.
    #[serde(default = "default_false")]
    pub tab_as_spaces: bool,

    #[serde(default = "default_tone")]
    pub tone: String,

    #[serde(default = "default_agent")]
    pub selected_agent: String,

    /// Most recent AI result, persisted so Paste-last survives a restart.
    #[serde(default)]
    pub last_generated_text: String,

    #[serde(default)]
    pub last_generated_explanation: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            master_enabled: default_true(),
            auto_inject: default_false(),
            humanize_typing: default_false(),
            ultra_human: default_false(),
            live_mode: default_false(),
            coding_mode: default_false(),
            tab_as_spaces: default_false(),
            tone: default_tone(),
            selected_agent: default_agent(),
            last_generated_text: String::new(),
            last_generated_explanation: String::new(),
        }
    }
}

impl Settings {
    /// Load from the given path, falling back to defaults on a missing file.
    /// A malformed file is an error so a typo cannot silently reset settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: err,
                })
            }
        };

        toml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
    }

    /// Atomic save: write to a sibling temp file, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::Read {
                path: parent.display().to_string(),
                source: err,
            })?;
        }

        let raw = toml::to_string_pretty(self).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, raw).map_err(|err| ConfigError::Read {
            path: tmp.display().to_string(),
            source: err,
        })?;
        fs::rename(&tmp, path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            source: err,
        })?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("overtype")
            .join("settings.toml")
    }
}

/// Immutable view handed to the worker at each (re)start. Configuration
/// reloads during a live session do not affect that session; the next
/// snapshot picks them up.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub settings: Settings,
    /// Provider env-var names that resolved to a usable key.
    pub available_providers: Vec<String>,
    /// True when an owned window could not be excluded from screen capture.
    pub capture_visible: bool,
}

impl ConfigSnapshot {
    pub fn new(settings: Settings, available_providers: Vec<String>, capture_visible: bool) -> Self {
        Self {
            settings,
            available_providers,
            capture_visible,
        }
    }

    pub fn provider_available(&self, env_key: &str) -> bool {
        self.available_providers.iter().any(|k| k == env_key)
    }
}
