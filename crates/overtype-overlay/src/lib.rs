pub mod capture;
pub mod controller;
pub mod geometry;

pub use capture::{CaptureExclusion, CaptureRegistry, NoCaptureExclusion};
pub use controller::{
    NullPointerProbe, OverlayWindow, PointerProbe, PopupCommand, PopupController,
};
pub use geometry::{popup_position, Point, Size, WorkArea, POINTER_OFFSET_Y};
