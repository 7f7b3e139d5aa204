//! Media device controller: owns the single live camera handle.
//!
//! Start and stop are serialized through an async mutex around the handle
//! slot; at most one stream exists at any time. A handle is only dropped from
//! the slot after its capture thread has exited, so the next acquisition never
//! races the previous one for the device.

use crate::camera::{CameraError, CameraSource, StreamHandle, StreamRequest};
use crate::frame::{self, FrameError};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Tunables for acquisition and capture.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub request: StreamRequest,
    /// Additional attempts after the first failed acquisition.
    pub max_retries: u32,
    /// Fixed back-off between attempts.
    pub retry_delay: Duration,
    /// How long to wait for the first frame after the device accepts the request.
    pub playing_timeout: Duration,
    pub jpeg_quality: u8,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            request: StreamRequest::default(),
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            playing_timeout: Duration::from_secs(5),
            jpeg_quality: 90,
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera not ready: {0}")]
    NotReady(&'static str),
    #[error("captured frame is black")]
    BlackFrame,
    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),
    #[error("encoder task failed: {0}")]
    Worker(String),
}

/// A JPEG-encoded still taken from the live stream.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl CapturedImage {
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Result of one health sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSample {
    /// No stream, or the slot is busy with a start/stop.
    Unavailable,
    /// Stream present; `true` when the frame was black or never arrived.
    Sampled { black: bool },
}

pub struct MediaDeviceController {
    source: Arc<dyn CameraSource>,
    settings: DeviceSettings,
    handle: Mutex<Option<StreamHandle>>,
    retry_count: AtomicU32,
    starts: AtomicU64,
}

impl MediaDeviceController {
    pub fn new(source: Arc<dyn CameraSource>, settings: DeviceSettings) -> Self {
        Self {
            source,
            settings,
            handle: Mutex::new(None),
            retry_count: AtomicU32::new(0),
            starts: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Current attempt index of an in-progress or last start.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Number of successful starts since creation.
    pub fn successful_starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    /// Acquire the camera, retrying with a fixed back-off.
    ///
    /// Any existing handle is released before each attempt. Resolves only
    /// once a frame is actually flowing.
    pub async fn start(&self) -> Result<(), CameraError> {
        let mut slot = self.handle.lock().await;
        let max = self.settings.max_retries;
        let mut last = String::new();

        for attempt in 0..=max {
            self.retry_count.store(attempt, Ordering::Relaxed);
            if let Some(previous) = slot.take() {
                previous.release().await;
            }

            match self.try_acquire().await {
                Ok(handle) => {
                    tracing::info!(
                        source = %self.source.describe(),
                        attempt,
                        width = handle.width,
                        height = handle.height,
                        "camera playing"
                    );
                    *slot = Some(handle);
                    self.starts.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(source = %self.source.describe(), attempt, error = %e, "camera start failed");
                    last = e.to_string();
                }
            }

            if attempt < max {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        self.retry_count.store(0, Ordering::Relaxed);
        tracing::error!(attempts = max + 1, "camera start retries exhausted");
        Err(CameraError::RetriesExhausted {
            attempts: max + 1,
            last,
        })
    }

    async fn try_acquire(&self) -> Result<StreamHandle, CameraError> {
        let handle = self.source.acquire(&self.settings.request)?;
        if let Err(e) = handle.wait_playing(self.settings.playing_timeout).await {
            handle.release().await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Release the current handle, if any, once its producer has let go of the device.
    pub async fn stop(&self) {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.take() {
            handle.release().await;
            tracing::info!(source = %self.source.describe(), "camera released");
        }
    }

    /// A live handle exists and has buffered at least one frame.
    pub async fn is_data_ready(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(StreamHandle::is_data_ready)
    }

    /// Encode the latest frame as JPEG.
    pub async fn capture_frame(&self) -> Result<CapturedImage, CaptureError> {
        let frame = {
            let slot = self.handle.lock().await;
            let handle = slot
                .as_ref()
                .filter(|h| h.is_active())
                .ok_or(CaptureError::NotReady("no active stream"))?;
            handle
                .latest_frame()
                .ok_or(CaptureError::NotReady("no frame buffered"))?
        };

        if frame.has_zero_dimensions() {
            return Err(CaptureError::NotReady("stream reports zero dimensions"));
        }
        if frame.is_black() {
            tracing::warn!(seq = frame.sequence, "rejecting black capture");
            return Err(CaptureError::BlackFrame);
        }

        let quality = self.settings.jpeg_quality;
        let encode_frame = frame.clone();
        let jpeg = tokio::task::spawn_blocking(move || frame::encode_jpeg(&encode_frame, quality))
            .await
            .map_err(|e| CaptureError::Worker(e.to_string()))??;

        tracing::debug!(seq = frame.sequence, bytes = jpeg.len(), "frame captured");
        Ok(CapturedImage {
            jpeg,
            width: frame.width,
            height: frame.height,
            sequence: frame.sequence,
        })
    }

    /// Sample the live stream for the health monitor without waiting on a start.
    pub fn sample(&self) -> FrameSample {
        let Ok(slot) = self.handle.try_lock() else {
            return FrameSample::Unavailable;
        };
        match slot.as_ref() {
            None => FrameSample::Unavailable,
            Some(handle) => {
                let black = handle.latest_frame().map_or(true, |f| f.is_black());
                FrameSample::Sampled { black }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Acquisition, ScriptedCamera};

    fn controller(camera: Arc<ScriptedCamera>) -> MediaDeviceController {
        MediaDeviceController::new(camera, DeviceSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_succeeds_after_two_failures() {
        let camera = Arc::new(ScriptedCamera::new(vec![
            Acquisition::Fail,
            Acquisition::Stall,
            Acquisition::Bright,
        ]));
        let ctl = controller(camera.clone());

        ctl.start().await.unwrap();
        assert_eq!(camera.acquisitions(), 3);
        assert_eq!(ctl.retry_count(), 2);
        assert!(ctl.is_data_ready().await);
        assert!(ctl.capture_frame().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_gives_up_after_three_failures() {
        let camera = Arc::new(ScriptedCamera::new(vec![
            Acquisition::Fail,
            Acquisition::Fail,
            Acquisition::Fail,
            Acquisition::Bright,
        ]));
        let ctl = controller(camera.clone());

        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, CameraError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(camera.acquisitions(), 3);
        assert_eq!(ctl.retry_count(), 0);
        assert!(!ctl.is_data_ready().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_releases_previous_handle() {
        let camera = Arc::new(ScriptedCamera::always(Acquisition::Bright));
        let ctl = controller(camera.clone());

        ctl.start().await.unwrap();
        ctl.start().await.unwrap();
        assert_eq!(camera.live_streams(), 1);
        assert_eq!(ctl.successful_starts(), 2);
    }

    #[tokio::test]
    async fn test_restart_waits_for_device_release() {
        let camera = Arc::new(ScriptedCamera::exclusive(Duration::from_millis(50)));
        let ctl = controller(camera.clone());

        ctl.start().await.unwrap();
        ctl.start().await.unwrap();
        assert_eq!(camera.acquisitions(), 2);
        assert_eq!(ctl.retry_count(), 0);
        assert!(ctl.is_data_ready().await);

        ctl.stop().await;
        assert!(!camera.device_open());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let camera = Arc::new(ScriptedCamera::always(Acquisition::Bright));
        let ctl = controller(camera.clone());
        ctl.start().await.unwrap();
        ctl.stop().await;
        ctl.stop().await;
        assert_eq!(camera.live_streams(), 0);
        assert_eq!(ctl.sample(), FrameSample::Unavailable);
    }

    #[tokio::test]
    async fn test_capture_without_stream_is_not_ready() {
        let ctl = controller(Arc::new(ScriptedCamera::always(Acquisition::Bright)));
        assert!(matches!(
            ctl.capture_frame().await,
            Err(CaptureError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_rejects_black_frame() {
        let ctl = controller(Arc::new(ScriptedCamera::always(Acquisition::Black)));
        ctl.start().await.unwrap();
        assert!(matches!(
            ctl.capture_frame().await,
            Err(CaptureError::BlackFrame)
        ));
        assert_eq!(ctl.sample(), FrameSample::Sampled { black: true });
    }

    #[tokio::test]
    async fn test_capture_encodes_jpeg() {
        let ctl = controller(Arc::new(ScriptedCamera::always(Acquisition::Bright)));
        ctl.start().await.unwrap();
        let image = ctl.capture_frame().await.unwrap();
        assert_eq!((image.width, image.height), (640, 480));
        assert_eq!(&image.jpeg[..2], &[0xFF, 0xD8]);
        assert!(image.len() > 5 * 1024);
        assert_eq!(ctl.sample(), FrameSample::Sampled { black: false });
    }
}
