//! kiosk-hw — Camera capture and stream health for the attendance kiosk.
//!
//! Provides V4L2-based camera access, frame decoding and JPEG encoding,
//! and the media device controller that owns the live stream.

pub mod camera;
pub mod controller;
pub mod frame;
pub mod health;
pub mod mock;

pub use camera::{CameraError, CameraSource, StreamHandle, StreamRequest, V4l2Camera};
pub use controller::{CaptureError, CapturedImage, DeviceSettings, FrameSample, MediaDeviceController};
pub use frame::Frame;
pub use health::{BlackFrameMonitor, HealthVerdict};
