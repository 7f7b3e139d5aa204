//! Scripted camera source for exercising the controller without hardware.

use crate::camera::{CameraError, CameraSource, FrameSink, StreamHandle, StreamRequest};
use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next acquisition does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The device refuses the request.
    Fail,
    /// The device accepts but never produces a frame.
    Stall,
    /// Streams a textured frame.
    Bright,
    /// Streams an all-black frame.
    Black,
}

/// Camera source that follows a fixed script, then repeats a fallback step.
pub struct ScriptedCamera {
    script: Mutex<VecDeque<Acquisition>>,
    fallback: Acquisition,
    attempts: AtomicU32,
    sinks: Mutex<Vec<FrameSink>>,
    /// Device-style exclusivity: a new acquisition fails while a previous
    /// producer thread still holds the device open.
    exclusive: Option<Duration>,
    open: Arc<AtomicBool>,
}

impl ScriptedCamera {
    /// Play `script` in order; once exhausted, keep streaming bright frames.
    pub fn new(script: Vec<Acquisition>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Acquisition::Bright,
            attempts: AtomicU32::new(0),
            sinks: Mutex::new(Vec::new()),
            exclusive: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Streams bright frames from a producer thread that keeps the device
    /// open for `linger` after it observes the stop flag. Acquiring while
    /// the device is still open fails with [`CameraError::DeviceBusy`].
    pub fn exclusive(linger: Duration) -> Self {
        Self {
            exclusive: Some(linger),
            ..Self::new(Vec::new())
        }
    }

    /// A producer thread still holds the device.
    pub fn device_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Every acquisition behaves the same way.
    pub fn always(step: Acquisition) -> Self {
        Self {
            fallback: step,
            ..Self::new(Vec::new())
        }
    }

    /// Total acquisition attempts seen.
    pub fn acquisitions(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Streams that have not been stopped by their handle.
    pub fn live_streams(&self) -> usize {
        self.lock_sinks().iter().filter(|s| !s.is_stopped()).count()
    }

    /// Push a frame into the most recent stream.
    pub fn push(&self, frame: Frame) -> bool {
        self.lock_sinks()
            .last()
            .is_some_and(|sink| sink.publish(frame))
    }

    /// Push a black frame into the most recent stream.
    pub fn push_black(&self) -> bool {
        self.push(black_frame(640, 480))
    }

    fn lock_sinks(&self) -> std::sync::MutexGuard<'_, Vec<FrameSink>> {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CameraSource for ScriptedCamera {
    fn acquire(&self, request: &StreamRequest) -> Result<StreamHandle, CameraError> {
        let seq = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(linger) = self.exclusive {
            return self.acquire_exclusive(request, seq, linger);
        }
        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.fallback);

        if step == Acquisition::Fail {
            return Err(CameraError::DeviceBusy);
        }

        let (handle, sink) = StreamHandle::channel(request.width, request.height);
        match step {
            Acquisition::Bright => {
                sink.publish(textured_frame(request.width, request.height, seq));
            }
            Acquisition::Black => {
                sink.publish(black_frame(request.width, request.height));
            }
            Acquisition::Stall | Acquisition::Fail => {}
        }
        self.lock_sinks().push(sink);
        Ok(handle)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

impl ScriptedCamera {
    fn acquire_exclusive(
        &self,
        request: &StreamRequest,
        seq: u32,
        linger: Duration,
    ) -> Result<StreamHandle, CameraError> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(CameraError::DeviceBusy);
        }
        let (mut handle, sink) = StreamHandle::channel(request.width, request.height);
        sink.publish(textured_frame(request.width, request.height, seq));
        let open = self.open.clone();
        let worker = std::thread::spawn(move || {
            while !sink.is_stopped() {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::thread::sleep(linger);
            open.store(false, Ordering::Release);
        });
        handle.attach_worker(worker);
        Ok(handle)
    }
}

/// Deterministic high-entropy frame; encodes to well over 5 KB as JPEG.
pub fn textured_frame(width: u32, height: u32, sequence: u32) -> Frame {
    let mut state = 0x9e37_79b9u32 ^ sequence;
    let data = (0..width * height * 3)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();
    Frame::from_rgb(data, width, height, sequence)
}

pub fn black_frame(width: u32, height: u32) -> Frame {
    Frame::from_rgb(vec![0u8; (width * height * 3) as usize], width, height, 0)
}
