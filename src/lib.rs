mod errors;
pub use errors::{Error, Result};

pub mod duration;
pub mod stage;
pub mod sangaboard;
pub mod usb_camera;
pub mod preview;

pub mod terminal;
pub mod jog;
pub mod timelapse;

pub mod data_saver;
pub mod signal;

pub use jog::{JogController, JogState};
pub use sangaboard::Sangaboard;
pub use stage::{Axis, Illumination, Position, Stage};
pub use timelapse::{Clock, SystemClock, TimelapseReport, TimelapseSettings};
pub use usb_camera::{Camera, FrameCapture};
