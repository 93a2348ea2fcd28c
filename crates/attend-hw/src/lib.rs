//! attend-hw: camera capture for the live preview.
//!
//! Provides V4L2-based camera access and the frame conversions needed to
//! stream annotated JPEG frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
