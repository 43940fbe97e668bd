//! System-wide keyboard hook seam.
//!
//! The hook runs on its own dedicated thread owned by the OS listener and
//! must never block: events are pushed into a bounded queue that drops the
//! oldest entry on overflow and counts the drops.

use crate::keys::ObserverEvent;
use overtype_foundation::HookError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded hand-off between the sync hook thread and the async pipeline.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    events: Mutex<VecDeque<ObserverEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                events: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                dropped: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Never blocks; safe to call from the hook callback.
    pub fn push(&self, event: ObserverEvent) {
        {
            let mut events = self.inner.events.lock();
            if events.len() >= self.inner.capacity {
                events.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "Observer queue overflow, dropping oldest events");
                }
            }
            events.push_back(event);
        }
        self.inner.notify.notify_one();
    }

    pub async fn recv(&self) -> ObserverEvent {
        loop {
            if let Some(event) = self.inner.events.lock().pop_front() {
                return event;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<ObserverEvent> {
        self.inner.events.lock().pop_front()
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.events.lock().is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Installed system hook. `start` returns only after the readiness
/// handshake; install failure is fatal for the process.
pub trait KeyboardHook: Send {
    fn start(&mut self, queue: EventQueue) -> Result<(), HookError>;
    fn stop(&mut self);
}

/// Reads the foreground window identity. Platform backends implement this;
/// the null probe reports no focus information.
pub trait FocusProbe: Send + Sync {
    fn current(&self) -> Option<(String, String)>;
}

pub struct NullFocusProbe;

impl FocusProbe for NullFocusProbe {
    fn current(&self) -> Option<(String, String)> {
        None
    }
}

/// Polls the focus probe and pushes a change event whenever the foreground
/// window identity differs from the last observation. The initial focus is
/// emitted on the first poll.
pub fn spawn_focus_watcher(
    probe: Arc<dyn FocusProbe>,
    queue: EventQueue,
    poll_interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<(String, String)> = None;
        let mut first = true;
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let Some(current) = probe.current() else {
                continue;
            };
            if first || last.as_ref() != Some(&current) {
                first = false;
                queue.push(ObserverEvent::FocusChange {
                    window_title: current.0.clone(),
                    process_identity: current.1.clone(),
                });
                last = Some(current);
            }
        }
    })
}

#[cfg(feature = "hook-rdev")]
pub use self::rdev_hook::RdevHook;

#[cfg(feature = "hook-rdev")]
mod rdev_hook {
    use super::*;
    use crate::keys::{CaretKey, LogicalKey, ModifierKey, RawKeyEvent};
    use std::time::Duration;

    /// Global hook backed by `rdev::listen` on a dedicated thread.
    ///
    /// The rdev listener has no uninstall call; `stop` flips a flag that
    /// makes the callback discard events, which is sufficient for the
    /// daemon lifetime (the thread dies with the process).
    pub struct RdevHook {
        active: Arc<std::sync::atomic::AtomicBool>,
        started: bool,
    }

    impl Default for RdevHook {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RdevHook {
        pub fn new() -> Self {
            Self {
                active: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                started: false,
            }
        }
    }

    impl KeyboardHook for RdevHook {
        fn start(&mut self, queue: EventQueue) -> Result<(), HookError> {
            if self.started {
                return Ok(());
            }

            let active = Arc::clone(&self.active);
            active.store(true, Ordering::SeqCst);
            let (err_tx, err_rx) = std::sync::mpsc::channel::<String>();

            std::thread::Builder::new()
                .name("overtype-hook".to_string())
                .spawn(move || {
                    let result = rdev::listen(move |event| {
                        if !active.load(Ordering::SeqCst) {
                            return;
                        }
                        if let Some(raw) = map_event(&event) {
                            queue.push(ObserverEvent::Key(raw));
                        }
                    });
                    if let Err(err) = result {
                        let _ = err_tx.send(format!("{:?}", err));
                    }
                })
                .map_err(|e| HookError::InstallFailed(e.to_string()))?;

            // `rdev::listen` blocks for the process lifetime on success and
            // returns promptly on failure, so a short grace period doubles
            // as the readiness handshake.
            match err_rx.recv_timeout(Duration::from_millis(300)) {
                Ok(err) => Err(HookError::InstallFailed(err)),
                Err(_) => {
                    self.started = true;
                    tracing::info!("Keyboard hook installed");
                    Ok(())
                }
            }
        }

        fn stop(&mut self) {
            self.active.store(false, Ordering::SeqCst);
            self.started = false;
        }
    }

    fn map_event(event: &rdev::Event) -> Option<RawKeyEvent> {
        let (key, is_down) = match event.event_type {
            rdev::EventType::KeyPress(key) => (key, true),
            rdev::EventType::KeyRelease(key) => (key, false),
            _ => return None,
        };

        let logical = match key {
            rdev::Key::Backspace => LogicalKey::Backspace,
            rdev::Key::Return => LogicalKey::Enter,
            rdev::Key::Tab => LogicalKey::Tab,
            rdev::Key::Escape => LogicalKey::Escape,
            rdev::Key::LeftArrow => LogicalKey::CaretMove(CaretKey::Left),
            rdev::Key::RightArrow => LogicalKey::CaretMove(CaretKey::Right),
            rdev::Key::UpArrow => LogicalKey::CaretMove(CaretKey::Up),
            rdev::Key::DownArrow => LogicalKey::CaretMove(CaretKey::Down),
            rdev::Key::Home => LogicalKey::CaretMove(CaretKey::Home),
            rdev::Key::End => LogicalKey::CaretMove(CaretKey::End),
            rdev::Key::PageUp => LogicalKey::CaretMove(CaretKey::PageUp),
            rdev::Key::PageDown => LogicalKey::CaretMove(CaretKey::PageDown),
            rdev::Key::ShiftLeft | rdev::Key::ShiftRight => {
                LogicalKey::Modifier(ModifierKey::Shift)
            }
            rdev::Key::ControlLeft | rdev::Key::ControlRight => {
                LogicalKey::Modifier(ModifierKey::Control)
            }
            rdev::Key::Alt | rdev::Key::AltGr => LogicalKey::Modifier(ModifierKey::Alt),
            rdev::Key::MetaLeft | rdev::Key::MetaRight => LogicalKey::Modifier(ModifierKey::Meta),
            _ => match printable_from_name(event.name.as_deref()) {
                Some(ch) if is_down => LogicalKey::Printable(ch),
                Some(_) => LogicalKey::Other, // releases carry no name reliably
                None => LogicalKey::Other,
            },
        };

        Some(RawKeyEvent {
            key: logical,
            is_down,
            is_modifier: matches!(logical, LogicalKey::Modifier(_)),
            is_system_injected: false,
            at: std::time::Instant::now(),
        })
    }

    /// The layout-composed character for this press, when it produced one.
    fn printable_from_name(name: Option<&str>) -> Option<char> {
        let name = name?;
        let mut chars = name.chars();
        let ch = chars.next()?;
        if chars.next().is_some() || ch.is_control() {
            return None;
        }
        Some(ch)
    }
}
