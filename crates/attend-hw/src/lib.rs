//! attend-hw: Hardware abstraction for kiosk camera capture.
//!
//! Provides V4L2-based colour camera access and conversion of raw
//! capture buffers into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo};
pub use frame::{Frame, FrameError};
