//! Global hotkey registry.
//!
//! Binds the user-overridable hotkeys at process start and forwards them
//! as commands: buffer-dependent ones (Generate, Clipboard) go through
//! the input pipeline so they snapshot atomically; the rest go straight
//! to the orchestrator mailbox. The manager lives on a dedicated thread
//! and unbinds everything when it drops at shutdown.

use std::collections::HashMap;

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::mpsc;

use overtype_config::EnvFile;
use overtype_foundation::OvertypeError;
use overtype_input::{HotkeyCommand, PipelineCommand};

use crate::orchestrator::OrchestratorMsg;

/// Default bindings; each can be overridden with an
/// `OVERTYPE_HOTKEY_<NAME>` entry in the provider config file.
const DEFAULTS: [(&str, HotkeyCommand, &str); 9] = [
    ("GENERATE", HotkeyCommand::Generate, "ctrl+shift+g"),
    ("CLIPBOARD", HotkeyCommand::Clipboard, "ctrl+shift+c"),
    ("SCREENSHOT", HotkeyCommand::Screenshot, "ctrl+shift+s"),
    ("VOICE", HotkeyCommand::VoiceHoldStart, "ctrl+shift+m"),
    ("TOGGLE", HotkeyCommand::ToggleOverlay, "ctrl+shift+o"),
    ("PASTE", HotkeyCommand::PasteLast, "ctrl+shift+v"),
    ("CANCEL", HotkeyCommand::Cancel, "ctrl+shift+x"),
    ("PAUSE", HotkeyCommand::PauseResume, "ctrl+shift+p"),
    ("SETTINGS", HotkeyCommand::OpenSettings, "ctrl+shift+comma"),
];

pub fn parse_hotkey(spec: &str) -> Option<HotKey> {
    let mut modifiers = Modifiers::empty();
    let mut code = None;
    for part in spec.split('+') {
        let part = part.trim().to_ascii_lowercase();
        match part.as_str() {
            "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
            "shift" => modifiers |= Modifiers::SHIFT,
            "alt" | "opt" | "option" => modifiers |= Modifiers::ALT,
            "super" | "meta" | "cmd" | "win" => modifiers |= Modifiers::SUPER,
            key => code = parse_code(key),
        }
    }
    let code = code?;
    let modifiers = if modifiers.is_empty() {
        None
    } else {
        Some(modifiers)
    };
    Some(HotKey::new(modifiers, code))
}

fn parse_code(key: &str) -> Option<Code> {
    let code = match key {
        "a" => Code::KeyA,
        "b" => Code::KeyB,
        "c" => Code::KeyC,
        "d" => Code::KeyD,
        "e" => Code::KeyE,
        "f" => Code::KeyF,
        "g" => Code::KeyG,
        "h" => Code::KeyH,
        "i" => Code::KeyI,
        "j" => Code::KeyJ,
        "k" => Code::KeyK,
        "l" => Code::KeyL,
        "m" => Code::KeyM,
        "n" => Code::KeyN,
        "o" => Code::KeyO,
        "p" => Code::KeyP,
        "q" => Code::KeyQ,
        "r" => Code::KeyR,
        "s" => Code::KeyS,
        "t" => Code::KeyT,
        "u" => Code::KeyU,
        "v" => Code::KeyV,
        "w" => Code::KeyW,
        "x" => Code::KeyX,
        "y" => Code::KeyY,
        "z" => Code::KeyZ,
        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,
        "f1" => Code::F1,
        "f2" => Code::F2,
        "f3" => Code::F3,
        "f4" => Code::F4,
        "f5" => Code::F5,
        "f6" => Code::F6,
        "f7" => Code::F7,
        "f8" => Code::F8,
        "f9" => Code::F9,
        "f10" => Code::F10,
        "f11" => Code::F11,
        "f12" => Code::F12,
        "space" => Code::Space,
        "enter" | "return" => Code::Enter,
        "comma" => Code::Comma,
        "period" | "dot" => Code::Period,
        _ => return None,
    };
    Some(code)
}

/// Resolve the binding table, applying config-file overrides.
pub fn resolve_bindings(env: &EnvFile) -> Vec<(HotkeyCommand, HotKey)> {
    DEFAULTS
        .iter()
        .map(|&(name, command, default_spec)| {
            let key = format!("OVERTYPE_HOTKEY_{name}");
            let spec = env.get(&key).unwrap_or(default_spec);
            let hotkey = parse_hotkey(spec).unwrap_or_else(|| {
                tracing::warn!(%key, spec, "unparseable hotkey override, using default");
                parse_hotkey(default_spec).expect("default hotkeys parse")
            });
            (command, hotkey)
        })
        .collect()
}

/// Register all bindings and pump events until both receivers close.
pub fn spawn_hotkey_listener(
    bindings: Vec<(HotkeyCommand, HotKey)>,
    pipeline_tx: mpsc::Sender<PipelineCommand>,
    mailbox_tx: mpsc::Sender<OrchestratorMsg>,
) -> Result<std::thread::JoinHandle<()>, OvertypeError> {
    let manager = GlobalHotKeyManager::new()
        .map_err(|e| OvertypeError::Fatal(format!("hotkey manager: {e}")))?;

    let mut by_id: HashMap<u32, HotkeyCommand> = HashMap::new();
    for (command, hotkey) in bindings {
        manager
            .register(hotkey)
            .map_err(|e| OvertypeError::Fatal(format!("hotkey register {command:?}: {e}")))?;
        by_id.insert(hotkey.id(), command);
    }
    tracing::info!(count = by_id.len(), "global hotkeys registered");

    let handle = std::thread::Builder::new()
        .name("overtype-hotkeys".to_string())
        .spawn(move || {
            // Keep the manager alive on this thread; dropping it at loop
            // exit unregisters every binding.
            let _manager = manager;
            let receiver = GlobalHotKeyEvent::receiver();
            while let Ok(event) = receiver.recv() {
                let Some(&command) = by_id.get(&event.id) else {
                    continue;
                };
                let command = match (command, event.state) {
                    (HotkeyCommand::VoiceHoldStart, HotKeyState::Pressed) => {
                        HotkeyCommand::VoiceHoldStart
                    }
                    (HotkeyCommand::VoiceHoldStart, HotKeyState::Released) => {
                        HotkeyCommand::VoiceHoldEnd
                    }
                    (command, HotKeyState::Pressed) => command,
                    (_, HotKeyState::Released) => continue,
                };

                let delivered = match command {
                    HotkeyCommand::Generate => pipeline_tx
                        .blocking_send(PipelineCommand::GenerateHotkey)
                        .is_ok(),
                    HotkeyCommand::Clipboard => match read_clipboard() {
                        Some(clipboard) => pipeline_tx
                            .blocking_send(PipelineCommand::ClipboardHotkey { clipboard })
                            .is_ok(),
                        None => {
                            tracing::warn!("clipboard hotkey with unreadable clipboard");
                            continue;
                        }
                    },
                    other => mailbox_tx
                        .blocking_send(OrchestratorMsg::Hotkey(other))
                        .is_ok(),
                };
                if !delivered {
                    tracing::debug!("hotkey consumers gone, unbinding");
                    break;
                }
            }
        })
        .map_err(|e| OvertypeError::Fatal(format!("hotkey thread: {e}")))?;

    Ok(handle)
}

fn read_clipboard() -> Option<String> {
    match arboard::Clipboard::new().and_then(|mut c| c.get_text()) {
        Ok(text) if !text.is_empty() => Some(text),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!("clipboard read failed: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifier_combos() {
        let hotkey = parse_hotkey("ctrl+shift+g").unwrap();
        assert_eq!(
            hotkey,
            HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::KeyG)
        );
    }

    #[test]
    fn parses_bare_function_keys() {
        assert_eq!(parse_hotkey("f6").unwrap(), HotKey::new(None, Code::F6));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_hotkey("ctrl+shift+unknownkey").is_none());
        assert!(parse_hotkey("ctrl+shift").is_none());
    }

    #[test]
    fn overrides_come_from_the_config_file() {
        let env = EnvFile::parse("OVERTYPE_HOTKEY_GENERATE=alt+f2\n");
        let bindings = resolve_bindings(&env);
        let (_, generate) = bindings
            .iter()
            .find(|(cmd, _)| *cmd == HotkeyCommand::Generate)
            .unwrap();
        assert_eq!(*generate, HotKey::new(Some(Modifiers::ALT), Code::F2));
    }

    #[test]
    fn bad_override_falls_back_to_default() {
        let env = EnvFile::parse("OVERTYPE_HOTKEY_CANCEL=not-a-key\n");
        let bindings = resolve_bindings(&env);
        let (_, cancel) = bindings
            .iter()
            .find(|(cmd, _)| *cmd == HotkeyCommand::Cancel)
            .unwrap();
        assert_eq!(
            *cancel,
            HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::KeyX)
        );
    }

    #[test]
    fn every_default_parses() {
        let env = EnvFile::default();
        assert_eq!(resolve_bindings(&env).len(), DEFAULTS.len());
    }
}
