//! Capture-and-verify pipeline and the visible status state machine.
//!
//! `Ready → Scanning → Processing → {Success | Error} → Scanning`. Outcome
//! states revert on a timer so the kiosk is always ready for the next
//! subject. The move into `Processing` happens under the same lock as the
//! re-entrancy check, so at most one check-in is in flight per camera.
//!
//! [`CheckinPipeline::reset`] starts a new epoch. A check-in that began in an
//! earlier epoch finishes quietly: it neither changes the status nor logs.

use crate::binding::ActiveSession;
use crate::collab::{Clock, FaceVerifier, VerifyError};
use crate::failure;
use crate::types::{AttendanceStatus, BestMatch, CheckinRecord, KioskStatus};
use kiosk_hw::{BlackFrameMonitor, CaptureError, FrameSample, HealthVerdict, MediaDeviceController};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Encoded captures below this size are treated as dark/empty.
    pub min_image_bytes: usize,
    pub success_display: Duration,
    pub error_display: Duration,
    pub verify_timeout: Duration,
    pub log_capacity: usize,
    /// Minutes after session start before a check-in counts as late.
    pub late_grace_minutes: i64,
    pub health_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_image_bytes: 5 * 1024,
            success_display: Duration::from_secs(3),
            error_display: Duration::from_secs(5),
            verify_timeout: Duration::from_secs(60),
            log_capacity: 10,
            late_grace_minutes: 10,
            health_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A check-in is already processing.
    Busy,
    /// An outcome is on screen.
    Displaying,
    NoSession,
    /// The kiosk was reset while this check-in was in flight.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckInOutcome {
    Ignored { reason: IgnoreReason },
    Matched { record: CheckinRecord, message: String },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: KioskStatus,
    pub message: Option<String>,
    pub revision: u64,
}

struct PipelineState {
    status: KioskStatus,
    message: Option<String>,
    log: VecDeque<CheckinRecord>,
    /// Bumped on every transition; revert timers only fire for their own.
    generation: u64,
    epoch: u64,
}

struct Inner {
    camera: Arc<MediaDeviceController>,
    verifier: Arc<dyn FaceVerifier>,
    clock: Arc<dyn Clock>,
    sessions: watch::Receiver<Option<ActiveSession>>,
    settings: PipelineSettings,
    state: Mutex<PipelineState>,
}

/// Clone-safe handle to the pipeline.
#[derive(Clone)]
pub struct CheckinPipeline {
    inner: Arc<Inner>,
}

impl CheckinPipeline {
    pub fn new(
        camera: Arc<MediaDeviceController>,
        verifier: Arc<dyn FaceVerifier>,
        clock: Arc<dyn Clock>,
        sessions: watch::Receiver<Option<ActiveSession>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                camera,
                verifier,
                clock,
                sessions,
                state: Mutex::new(PipelineState {
                    status: KioskStatus::Ready,
                    message: None,
                    log: VecDeque::with_capacity(settings.log_capacity),
                    generation: 0,
                    epoch: 0,
                }),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    pub fn status(&self) -> KioskStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let st = self.lock();
        StatusSnapshot {
            status: st.status,
            message: st.message.clone(),
            revision: st.generation,
        }
    }

    /// Most recent check-ins, newest first.
    pub fn recent_checkins(&self) -> Vec<CheckinRecord> {
        self.lock().log.iter().cloned().collect()
    }

    /// Bring the camera up and start scanning.
    pub async fn start_camera(&self) -> bool {
        let epoch = self.lock().epoch;
        match self.inner.camera.start().await {
            Ok(()) => {
                let mut st = self.lock();
                if st.epoch == epoch && st.status == KioskStatus::Ready {
                    self.apply(&mut st, KioskStatus::Scanning, None);
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "camera could not be started");
                self.fail(epoch, failure::CAMERA_INIT_FAILED.to_string());
                false
            }
        }
    }

    /// Release the camera and return to `Ready`, abandoning any in-flight check-in.
    pub async fn reset(&self) {
        // Bump before stopping so an in-flight check-in does not restart the camera.
        self.lock().epoch += 1;
        self.inner.camera.stop().await;
        let mut st = self.lock();
        st.epoch += 1;
        self.apply(&mut st, KioskStatus::Ready, None);
    }

    /// Capture, verify and report one subject.
    pub async fn check_in(&self) -> CheckInOutcome {
        let Some(session) = self.inner.sessions.borrow().clone() else {
            return CheckInOutcome::Ignored {
                reason: IgnoreReason::NoSession,
            };
        };

        let epoch = {
            let mut st = self.lock();
            match st.status {
                KioskStatus::Processing => {
                    return CheckInOutcome::Ignored {
                        reason: IgnoreReason::Busy,
                    }
                }
                KioskStatus::Success | KioskStatus::Error => {
                    return CheckInOutcome::Ignored {
                        reason: IgnoreReason::Displaying,
                    }
                }
                KioskStatus::Ready | KioskStatus::Scanning => {}
            }
            self.apply(&mut st, KioskStatus::Processing, None);
            st.epoch
        };

        let span = tracing::info_span!(
            "check_in",
            attempt = %uuid::Uuid::new_v4(),
            session = %session.session_id
        );
        self.run_check_in(session, epoch).instrument(span).await
    }

    async fn run_check_in(&self, session: ActiveSession, epoch: u64) -> CheckInOutcome {
        let camera = &self.inner.camera;
        let settings = &self.inner.settings;

        if !camera.is_data_ready().await {
            if self.lock().epoch != epoch {
                tracing::info!("kiosk reset before capture");
                return cancelled();
            }
            tracing::info!("camera not data-ready, restarting");
            if let Err(e) = camera.start().await {
                tracing::error!(error = %e, "camera restart failed");
                return self.fail(epoch, failure::CAMERA_INIT_FAILED.to_string());
            }
        }

        let image = match camera.capture_frame().await {
            Ok(image) => image,
            Err(CaptureError::NotReady(reason)) => {
                tracing::warn!(reason, "capture refused");
                return self.fail(epoch, failure::CAMERA_NOT_READY.to_string());
            }
            Err(CaptureError::BlackFrame) => return self.fail(epoch, failure::IMAGE_TOO_DARK.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "capture failed");
                return self.fail(epoch, failure::CAPTURE_FAILED.to_string());
            }
        };

        if image.len() < settings.min_image_bytes {
            tracing::info!(bytes = image.len(), min = settings.min_image_bytes, "capture too small");
            return self.fail(epoch, failure::IMAGE_TOO_DARK.to_string());
        }

        tracing::debug!(bytes = image.len(), "submitting capture");
        let verify = self.inner.verifier.verify(&image.jpeg, &session.session_id);
        let response = match tokio::time::timeout(settings.verify_timeout, verify).await {
            Ok(result) => result,
            Err(_) => Err(VerifyError::Timeout(settings.verify_timeout)),
        };

        match response {
            Ok(resp) if resp.match_found => match resp.best_match {
                Some(best) => self.succeed(best, resp.highest_similarity, &session, epoch),
                None => {
                    tracing::warn!("match reported without best_match");
                    self.fail(epoch, failure::SERVER_ERROR.to_string())
                }
            },
            Ok(resp) => {
                tracing::info!(similarity = ?resp.highest_similarity, "no match");
                self.fail(epoch, failure::FACE_NOT_RECOGNIZED.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "verification failed");
                self.fail(epoch, failure::verify_failure_message(&e))
            }
        }
    }

    fn succeed(
        &self,
        best: BestMatch,
        similarity: Option<f32>,
        session: &ActiveSession,
        epoch: u64,
    ) -> CheckInOutcome {
        let now = self.inner.clock.now();
        let minutes_after_start = (now - session.starts_at).num_minutes().max(0);
        let (status, late_minutes) = if minutes_after_start > self.inner.settings.late_grace_minutes {
            (AttendanceStatus::Late, minutes_after_start)
        } else {
            (AttendanceStatus::Present, 0)
        };

        let record = CheckinRecord {
            student_id: best.user_id,
            name: best.full_name,
            time: now,
            status,
            late_minutes,
        };
        let message = welcome_message(&record, similarity);

        // The operator may have switched sessions while the request was in flight.
        let still_bound = self
            .inner
            .sessions
            .borrow()
            .as_ref()
            .is_some_and(|s| s.session_id == session.session_id);

        let mut st = self.lock();
        if st.epoch != epoch {
            tracing::warn!(student = %record.student_id, "kiosk reset during verification; match dropped");
            return cancelled();
        }
        if still_bound {
            st.log.push_front(record.clone());
            st.log.truncate(self.inner.settings.log_capacity);
        } else {
            tracing::warn!(
                student = %record.student_id,
                "session changed during verification; not logging check-in"
            );
        }
        tracing::info!(student = %record.student_id, status = ?record.status, "check-in recorded");
        if self.apply(&mut st, KioskStatus::Success, Some(message.clone())) {
            let generation = st.generation;
            drop(st);
            self.schedule_revert(generation, self.inner.settings.success_display);
        }
        CheckInOutcome::Matched { record, message }
    }

    /// Show `message` as an error, unless the kiosk was reset since `epoch`.
    fn fail(&self, epoch: u64, message: String) -> CheckInOutcome {
        let mut st = self.lock();
        if st.epoch != epoch {
            tracing::info!(%message, "kiosk reset; failure not shown");
            return cancelled();
        }
        if self.apply(&mut st, KioskStatus::Error, Some(message.clone())) {
            let generation = st.generation;
            drop(st);
            self.schedule_revert(generation, self.inner.settings.error_display);
        }
        CheckInOutcome::Failed { message }
    }

    fn apply(&self, st: &mut PipelineState, next: KioskStatus, message: Option<String>) -> bool {
        if !st.status.can_transition_to(next) {
            tracing::warn!(from = ?st.status, to = ?next, "ignoring invalid status transition");
            return false;
        }
        tracing::debug!(from = ?st.status, to = ?next, "status transition");
        st.status = next;
        st.message = message;
        st.generation += 1;
        true
    }

    fn schedule_revert(&self, generation: u64, delay: Duration) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut st = pipeline.lock();
            if st.generation == generation && st.status.is_terminal() {
                pipeline.apply(&mut st, KioskStatus::Scanning, None);
            }
        });
    }

    /// Take one health sample. Only `Scanning` is monitored; three black
    /// samples in a row trigger a full camera restart.
    pub async fn health_tick(&self, monitor: &mut BlackFrameMonitor) -> Option<HealthVerdict> {
        if self.status() != KioskStatus::Scanning {
            return None;
        }
        let FrameSample::Sampled { black } = self.inner.camera.sample() else {
            return None;
        };

        let verdict = monitor.observe(black);
        if verdict == HealthVerdict::Restart {
            tracing::warn!("camera producing black frames, restarting");
            let epoch = self.lock().epoch;
            if let Err(e) = self.inner.camera.start().await {
                tracing::error!(error = %e, "camera restart after black frames failed");
                self.fail(epoch, failure::CAMERA_INIT_FAILED.to_string());
            }
        }
        Some(verdict)
    }

    /// Run [`health_tick`](Self::health_tick) on the configured interval.
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let mut monitor = BlackFrameMonitor::default();
            let mut ticker = tokio::time::interval(pipeline.settings().health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pipeline.health_tick(&mut monitor).await;
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PipelineState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn cancelled() -> CheckInOutcome {
    CheckInOutcome::Ignored {
        reason: IgnoreReason::Cancelled,
    }
}

fn welcome_message(record: &CheckinRecord, similarity: Option<f32>) -> String {
    let mut message = format!("Welcome, {}!", record.name);
    match record.status {
        AttendanceStatus::Late => {
            message.push_str(&format!(" Checked in {} minutes late.", record.late_minutes))
        }
        _ => message.push_str(" Check-in recorded."),
    }
    if let Some(sim) = similarity {
        message.push_str(&format!(" ({:.0}% match)", sim * 100.0));
    }
    message
}
