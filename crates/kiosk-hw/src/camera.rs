//! Camera acquisition: stream handles and the V4L2 source.
//!
//! A [`StreamHandle`] is the only owner-visible piece of a live stream. The
//! producer side ([`FrameSink`]) publishes the most recent decoded frame into
//! a watch channel; consumers only ever see the latest frame.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no frame within {0:?} of starting the stream")]
    PlaybackTimeout(Duration),
    #[error("stream ended before the first frame")]
    StreamEnded,
    #[error("camera unavailable after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Constraints for a stream acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Ideal width; the driver may negotiate something else.
    pub width: u32,
    /// Ideal height.
    pub height: u32,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Anything that can hand out a live camera stream.
pub trait CameraSource: Send + Sync {
    /// Acquire exclusive access to the device and begin streaming.
    ///
    /// Returning `Ok` only means the device accepted the request; callers
    /// wait on [`StreamHandle::wait_playing`] for real frames.
    fn acquire(&self, request: &StreamRequest) -> Result<StreamHandle, CameraError>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}

type LatestFrame = Option<Arc<Frame>>;

/// Handle to an active media stream.
pub struct StreamHandle {
    frames: watch::Receiver<LatestFrame>,
    stopped: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    pub width: u32,
    pub height: u32,
}

/// Producer half of a stream.
pub struct FrameSink {
    tx: watch::Sender<LatestFrame>,
    stopped: Arc<AtomicBool>,
}

impl StreamHandle {
    /// Create a handle and the sink that feeds it.
    pub fn channel(width: u32, height: u32) -> (StreamHandle, FrameSink) {
        let (tx, rx) = watch::channel(None);
        let stopped = Arc::new(AtomicBool::new(false));
        (
            StreamHandle {
                frames: rx,
                stopped: stopped.clone(),
                worker: None,
                width,
                height,
            },
            FrameSink { tx, stopped },
        )
    }

    /// Attach the thread producing frames so it is released with the handle.
    pub fn attach_worker(&mut self, worker: std::thread::JoinHandle<()>) {
        self.worker = Some(worker);
    }

    /// The stream is live: not stopped and the producer is still running.
    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.frames.has_changed().is_ok()
    }

    /// Most recent decoded frame, if any has arrived.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    /// Active and at least one frame has been buffered.
    pub fn is_data_ready(&self) -> bool {
        self.is_active() && self.frames.borrow().is_some()
    }

    /// Resolve once the first frame is flowing.
    pub async fn wait_playing(&self, timeout: Duration) -> Result<(), CameraError> {
        let mut rx = self.frames.clone();
        let first = async move { rx.wait_for(|f| f.is_some()).await.map(|_| ()) };
        match tokio::time::timeout(timeout, first).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CameraError::StreamEnded),
            Err(_) => Err(CameraError::PlaybackTimeout(timeout)),
        }
    }

    /// Signal the producer to release the device without waiting for it. Idempotent.
    pub fn stop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(width = self.width, height = self.height, "stream stopped");
        }
        self.worker.take();
    }

    /// Stop the stream and wait until the producer thread has closed the device.
    ///
    /// The capture thread only sees the stop flag between dequeues, so this
    /// can take up to one dequeue timeout.
    pub async fn release(mut self) {
        let worker = self.worker.take();
        self.stop();
        let Some(worker) = worker else {
            return;
        };
        match tokio::task::spawn_blocking(move || worker.join()).await {
            Ok(Ok(())) => tracing::debug!("capture thread exited"),
            Ok(Err(_)) => tracing::warn!("capture thread panicked"),
            Err(e) => tracing::warn!(error = %e, "could not join capture thread"),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl FrameSink {
    /// Publish a frame. Returns false once nobody is listening or stop was requested.
    pub fn publish(&self, frame: Frame) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx.send(Some(Arc::new(frame))).is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel), converted to RGB.
    Yuyv,
    /// Packed 24-bit RGB, used as-is.
    Rgb3,
}

/// V4L2 camera source bound to a device path.
pub struct V4l2Camera {
    device_path: String,
}

impl V4l2Camera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    fn open_device(&self, request: &StreamRequest) -> Result<(Device, u32, u32, PixelFormat), CameraError> {
        let device_path = self.device_path.as_str();
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = request.width;
        fmt.height = request.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or RGB3)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok((device, negotiated.width, negotiated.height, pixel_format))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraSource for V4l2Camera {
    fn acquire(&self, request: &StreamRequest) -> Result<StreamHandle, CameraError> {
        let (device, width, height, pixel_format) = self.open_device(request)?;
        let (mut handle, sink) = StreamHandle::channel(width, height);
        let device_path = self.device_path.clone();

        let worker = std::thread::Builder::new()
            .name("kiosk-camera".into())
            .spawn(move || stream_frames(device, &device_path, width, height, pixel_format, sink))
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        handle.attach_worker(worker);
        Ok(handle)
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}

/// Capture loop run on the dedicated camera thread.
fn stream_frames(
    device: Device,
    device_path: &str,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    sink: FrameSink,
) {
    let mut stream = match MmapStream::with_buffers(&device, BufType::VideoCapture, 4) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(device = device_path, error = %e, "failed to create mmap stream");
            return;
        }
    };
    stream.set_timeout(Duration::from_millis(1000));
    tracing::info!(device = device_path, "capture thread started");

    while !sink.is_stopped() {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                tracing::warn!(device = device_path, error = %e, "failed to dequeue buffer");
                break;
            }
        };

        let rgb = match pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            PixelFormat::Rgb3 => {
                let expected = (width * height * 3) as usize;
                if buf.len() < expected {
                    Err(frame::FrameError::InvalidLength {
                        expected,
                        actual: buf.len(),
                    })
                } else {
                    Ok(buf[..expected].to_vec())
                }
            }
        };

        match rgb {
            Ok(data) => {
                if !sink.publish(Frame::from_rgb(data, width, height, meta.sequence)) {
                    break;
                }
            }
            Err(e) => tracing::debug!(seq = meta.sequence, error = %e, "dropping malformed buffer"),
        }
    }

    tracing::info!(device = device_path, "capture thread exiting");
}
