//! Capture-exempt surface registration.
//!
//! Each owned window asks the OS to exclude it from screen-capture APIs.
//! When the facility is unavailable the window is created anyway and the
//! config snapshot flags it as capture-visible.

use parking_lot::Mutex;

/// Platform seam for the OS exclude-from-capture facility.
pub trait CaptureExclusion: Send + Sync {
    /// Returns true when the surface is now excluded from capture.
    fn exclude(&self, surface: &str) -> bool;
}

/// No facility available; every surface stays capture-visible.
pub struct NoCaptureExclusion;

impl CaptureExclusion for NoCaptureExclusion {
    fn exclude(&self, _surface: &str) -> bool {
        false
    }
}

#[derive(Default)]
pub struct CaptureRegistry {
    surfaces: Mutex<Vec<(String, bool)>>,
}

impl CaptureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, surface: &str, exclusion: &dyn CaptureExclusion) -> bool {
        let excluded = exclusion.exclude(surface);
        if !excluded {
            tracing::warn!(surface, "surface could not be excluded from screen capture");
        }
        self.surfaces.lock().push((surface.to_string(), excluded));
        excluded
    }

    /// True when any owned surface would show up in a screen share; fed
    /// into the config snapshot.
    pub fn any_capture_visible(&self) -> bool {
        self.surfaces.lock().iter().any(|(_, excluded)| !excluded)
    }

    pub fn surfaces(&self) -> Vec<(String, bool)> {
        self.surfaces.lock().clone()
    }
}
