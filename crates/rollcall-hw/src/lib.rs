//! rollcall-hw: Camera capture for the attendance loop.
//!
//! Opens V4L2 devices, negotiates a pixel format and hands out RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
