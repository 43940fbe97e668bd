//! Popup controller.
//!
//! Owns the main popup and the explanation surface, positions them at the
//! pointer on each show, and coalesces streamed chunk appends to ~30 FPS
//! so a fast worker cannot flood the window with repaints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::geometry::{popup_position, Point, Size, WorkArea};

/// Repaint interval for streamed appends (~30 FPS).
const STREAM_FLUSH_INTERVAL: Duration = Duration::from_millis(33);

const DEFAULT_POPUP_SIZE: Size = Size {
    width: 420,
    height: 220,
};

/// Rendering seam. The real implementation wraps the OS window; it must
/// not take keyboard focus unless `focusable` is set (vision prompt).
pub trait OverlayWindow: Send + Sync {
    fn show_at(&self, position: Point, focusable: bool);
    fn set_text(&self, text: &str);
    fn hide(&self);
}

/// Pointer and work-area source for placement.
pub trait PointerProbe: Send + Sync {
    fn pointer(&self) -> Point;
    fn work_area(&self) -> WorkArea;
}

/// Fallback when no platform probe is wired: primary-monitor defaults.
pub struct NullPointerProbe;

impl PointerProbe for NullPointerProbe {
    fn pointer(&self) -> Point {
        Point { x: 0, y: 0 }
    }

    fn work_area(&self) -> WorkArea {
        WorkArea {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PopupCommand {
    /// Open the popup at the pointer and start a streaming session.
    ShowStreamingAtCursor,
    AppendChunk(String),
    EndStream,
    /// One-shot result display.
    ShowComplete(String),
    /// Parallel explanation surface (coding mode); never injectable.
    ShowExplanation(String),
    /// The one focusable variant; the user types an instruction into it.
    ShowVisionPrompt,
    HideAll,
}

pub struct PopupController {
    command_rx: mpsc::Receiver<PopupCommand>,
    main: Arc<dyn OverlayWindow>,
    explanation: Arc<dyn OverlayWindow>,
    pointer: Arc<dyn PointerProbe>,
    popup_size: Size,
    streamed: String,
    dirty: bool,
}

impl PopupController {
    pub fn new(
        command_rx: mpsc::Receiver<PopupCommand>,
        main: Arc<dyn OverlayWindow>,
        explanation: Arc<dyn OverlayWindow>,
        pointer: Arc<dyn PointerProbe>,
    ) -> Self {
        Self {
            command_rx,
            main,
            explanation,
            pointer,
            popup_size: DEFAULT_POPUP_SIZE,
            streamed: String::new(),
            dirty: false,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut flush = tokio::time::interval(STREAM_FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break,
                    }
                }
                _ = flush.tick(), if self.dirty => {
                    self.flush_stream();
                }
            }
        }
    }

    fn handle(&mut self, cmd: PopupCommand) {
        match cmd {
            PopupCommand::ShowStreamingAtCursor => {
                self.streamed.clear();
                self.dirty = false;
                self.main.set_text("");
                self.main.show_at(self.placement(), false);
            }
            PopupCommand::AppendChunk(text) => {
                self.streamed.push_str(&text);
                self.dirty = true;
            }
            PopupCommand::EndStream => {
                self.flush_stream();
            }
            PopupCommand::ShowComplete(text) => {
                self.streamed.clear();
                self.dirty = false;
                self.main.set_text(&text);
                self.main.show_at(self.placement(), false);
            }
            PopupCommand::ShowExplanation(text) => {
                self.explanation.set_text(&text);
                self.explanation.show_at(self.placement(), false);
            }
            PopupCommand::ShowVisionPrompt => {
                self.main.set_text("");
                self.main.show_at(self.placement(), true);
            }
            PopupCommand::HideAll => {
                self.streamed.clear();
                self.dirty = false;
                self.main.hide();
                self.explanation.hide();
            }
        }
    }

    fn flush_stream(&mut self) {
        if self.dirty {
            self.main.set_text(&self.streamed);
            self.dirty = false;
        }
    }

    fn placement(&self) -> Point {
        popup_position(
            self.pointer.pointer(),
            self.popup_size,
            self.pointer.work_area(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingWindow {
        texts: Mutex<Vec<String>>,
        shows: Mutex<Vec<(Point, bool)>>,
        hides: Mutex<usize>,
    }

    impl OverlayWindow for RecordingWindow {
        fn show_at(&self, position: Point, focusable: bool) {
            self.shows.lock().push((position, focusable));
        }
        fn set_text(&self, text: &str) {
            self.texts.lock().push(text.to_string());
        }
        fn hide(&self) {
            *self.hides.lock() += 1;
        }
    }

    struct Harness {
        tx: mpsc::Sender<PopupCommand>,
        main: Arc<RecordingWindow>,
        explanation: Arc<RecordingWindow>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(32);
        let main = Arc::new(RecordingWindow::default());
        let explanation = Arc::new(RecordingWindow::default());
        let controller = PopupController::new(
            rx,
            main.clone(),
            explanation.clone(),
            Arc::new(NullPointerProbe),
        );
        let handle = controller.spawn();
        Harness {
            tx,
            main,
            explanation,
            handle,
        }
    }

    #[tokio::test]
    async fn streaming_renders_chunks_in_order_as_prefixes() {
        let h = harness();
        h.tx.send(PopupCommand::ShowStreamingAtCursor).await.unwrap();
        h.tx.send(PopupCommand::AppendChunk("Hel".into())).await.unwrap();
        h.tx.send(PopupCommand::AppendChunk("lo".into())).await.unwrap();
        h.tx.send(PopupCommand::EndStream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        h.handle.abort();

        let texts = h.main.texts.lock();
        assert_eq!(texts.last().unwrap(), "Hello");
        // Every rendered state is a prefix of the final text: no
        // reordering, no duplication.
        for window in texts.iter() {
            assert!("Hello".starts_with(window.as_str()) || window.is_empty());
        }
    }

    #[tokio::test]
    async fn show_positions_below_pointer_without_focus() {
        let h = harness();
        h.tx.send(PopupCommand::ShowStreamingAtCursor).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.handle.abort();

        let shows = h.main.shows.lock();
        assert_eq!(shows.len(), 1);
        let (pos, focusable) = shows[0];
        assert_eq!(pos, Point { x: 0, y: 20 });
        assert!(!focusable);
    }

    #[tokio::test]
    async fn vision_prompt_takes_focus() {
        let h = harness();
        h.tx.send(PopupCommand::ShowVisionPrompt).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.handle.abort();

        let shows = h.main.shows.lock();
        assert!(shows[0].1, "vision prompt must be focusable");
    }

    #[tokio::test]
    async fn explanation_routes_to_its_own_surface() {
        let h = harness();
        h.tx.send(PopupCommand::ShowExplanation("adds numbers".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.handle.abort();

        assert_eq!(h.explanation.texts.lock().last().unwrap(), "adds numbers");
        assert!(h.main.texts.lock().is_empty());
    }

    #[tokio::test]
    async fn hide_clears_both_surfaces() {
        let h = harness();
        h.tx.send(PopupCommand::ShowStreamingAtCursor).await.unwrap();
        h.tx.send(PopupCommand::HideAll).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.handle.abort();

        assert_eq!(*h.main.hides.lock(), 1);
        assert_eq!(*h.explanation.hides.lock(), 1);
    }
}
