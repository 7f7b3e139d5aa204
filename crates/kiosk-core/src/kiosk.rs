//! The kiosk as one unit: binding drives the camera and the lockdown home.
//!
//! Binding changes are published under the binding lock; the camera is
//! brought in line afterwards under a separate gate, so status queries are
//! never stuck behind a slow camera start.

use crate::binding::{ActiveSession, BindingError, SessionBindingController};
use crate::cache::TeacherCache;
use crate::collab::{ClassDirectory, Clock, FaceVerifier};
use crate::lockdown::LockdownController;
use crate::pipeline::{CheckInOutcome, CheckinPipeline, PipelineSettings};
use crate::routes::KioskRoute;
use crate::types::{CheckinRecord, ClassSummary, KioskStatus, SessionMetadata, SessionSummary};
use kiosk_hw::MediaDeviceController;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Everything a front end needs to render the kiosk.
#[derive(Debug, Clone, Serialize)]
pub struct KioskSnapshot {
    pub status: KioskStatus,
    pub message: Option<String>,
    pub route: String,
    pub class_id: Option<String>,
    pub session_id: Option<String>,
    pub session: Option<SessionMetadata>,
    /// Last binding problem (listing failed, session ended, ...).
    pub notice: Option<String>,
    pub locked: bool,
}

pub struct Kiosk {
    binding: Mutex<SessionBindingController>,
    pipeline: CheckinPipeline,
    lockdown: Arc<LockdownController>,
    active: watch::Sender<Option<ActiveSession>>,
    camera_gate: Mutex<()>,
}

impl Kiosk {
    pub fn new(
        directory: Arc<dyn ClassDirectory>,
        verifier: Arc<dyn FaceVerifier>,
        clock: Arc<dyn Clock>,
        camera: Arc<MediaDeviceController>,
        lockdown: Arc<LockdownController>,
        settings: PipelineSettings,
    ) -> Self {
        let (active, sessions) = watch::channel(None);
        let pipeline = CheckinPipeline::new(camera, verifier, clock.clone(), sessions, settings);
        Self {
            binding: Mutex::new(SessionBindingController::new(directory, clock, TeacherCache::new())),
            pipeline,
            lockdown,
            active,
            camera_gate: Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &CheckinPipeline {
        &self.pipeline
    }

    pub fn lockdown(&self) -> &LockdownController {
        &self.lockdown
    }

    pub async fn bind_route(&self, path: &str) -> Result<KioskRoute, BindingError> {
        let (route, changed) = {
            let mut ctl = self.binding.lock().await;
            let route = ctl.bind_route(path).await?;
            (route, self.publish(&ctl))
        };
        self.settle(changed).await;
        Ok(route)
    }

    pub async fn list_classes(&self) -> Vec<ClassSummary> {
        self.binding.lock().await.list_classes().await
    }

    /// Sessions offered for the selected class.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.binding.lock().await.sessions().to_vec()
    }

    pub async fn select_class(&self, class_id: &str) -> Vec<SessionSummary> {
        let (sessions, changed) = {
            let mut ctl = self.binding.lock().await;
            let sessions = ctl.select_class(class_id).await;
            (sessions, self.publish(&ctl))
        };
        self.settle(changed).await;
        sessions
    }

    pub async fn select_session(&self, session_id: &str) -> Option<SessionMetadata> {
        let (meta, changed) = {
            let mut ctl = self.binding.lock().await;
            let meta = ctl.select_session(session_id).await;
            (meta, self.publish(&ctl))
        };
        self.settle(changed).await;
        meta
    }

    pub async fn back_to_classes(&self) {
        let changed = {
            let mut ctl = self.binding.lock().await;
            ctl.back_to_classes();
            self.publish(&ctl)
        };
        self.settle(changed).await;
    }

    /// Drop the binding if its session has ended.
    pub async fn revalidate(&self) -> bool {
        let (valid, changed) = {
            let mut ctl = self.binding.lock().await;
            let valid = ctl.revalidate();
            (valid, !valid && self.publish(&ctl))
        };
        self.settle(changed).await;
        valid
    }

    pub async fn check_in(&self) -> CheckInOutcome {
        self.pipeline.check_in().await
    }

    pub fn recent_checkins(&self) -> Vec<CheckinRecord> {
        self.pipeline.recent_checkins()
    }

    pub async fn snapshot(&self) -> KioskSnapshot {
        let ctl = self.binding.lock().await;
        let status = self.pipeline.snapshot();
        let binding = ctl.binding();
        KioskSnapshot {
            status: status.status,
            message: status.message,
            route: ctl.route().path(),
            class_id: binding.class_id().map(str::to_string),
            session_id: binding.session_id().map(str::to_string),
            session: binding.metadata().cloned(),
            notice: ctl.last_error().map(str::to_string),
            locked: self.lockdown.is_locked(),
        }
    }

    /// Periodically re-check the bound session's end time.
    pub fn spawn_revalidation(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let kiosk = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                kiosk.revalidate().await;
            }
        })
    }

    /// Publish the route and bound session. True when the session changed.
    fn publish(&self, ctl: &SessionBindingController) -> bool {
        self.lockdown.set_home(&ctl.route().path());

        let next = ctl.active_session();
        self.active.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    async fn settle(&self, changed: bool) {
        if changed {
            self.converge_camera().await;
        }
    }

    /// Start or release the camera to match the latest published session.
    ///
    /// Runs outside the binding lock. Concurrent calls queue on the gate and
    /// each acts on whatever is published when it gets its turn.
    async fn converge_camera(&self) {
        let _gate = self.camera_gate.lock().await;
        let wanted = self.active.borrow().is_some();
        if wanted {
            if self.pipeline.status() == KioskStatus::Ready {
                self.pipeline.start_camera().await;
            }
        } else {
            self.pipeline.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{FixedClock, VerifyError};
    use crate::fakes::{hm, session, today, FakeDirectory, FakeVerifier, RecordingHost};
    use crate::flags::MemoryFlagStore;
    use crate::lockdown::DenyAll;
    use crate::pipeline::IgnoreReason;
    use kiosk_hw::mock::{Acquisition, ScriptedCamera};
    use kiosk_hw::DeviceSettings;

    struct Rig {
        kiosk: Arc<Kiosk>,
        camera: Arc<ScriptedCamera>,
        clock: Arc<FixedClock>,
        verifier: Arc<FakeVerifier>,
    }

    fn rig() -> Rig {
        rig_with(ScriptedCamera::always(Acquisition::Bright))
    }

    fn rig_with(camera: ScriptedCamera) -> Rig {
        let directory = Arc::new(FakeDirectory::default());
        directory.add_class("5", "t1", "Room 204");
        directory.add_user("t1", "Ms. Rivera");
        directory.add_session(session("9", "5", today(), hm(8, 0), hm(10, 0)));

        let camera = Arc::new(camera);
        let controller = Arc::new(MediaDeviceController::new(camera.clone(), DeviceSettings::default()));
        let clock = Arc::new(FixedClock::new(today().and_time(hm(8, 2))));
        let verifier = Arc::new(FakeVerifier::default());
        let lockdown = Arc::new(LockdownController::new(
            Arc::new(RecordingHost::default()),
            Arc::new(MemoryFlagStore::new()),
            Arc::new(DenyAll),
        ));
        let kiosk = Arc::new(Kiosk::new(
            directory,
            verifier.clone(),
            clock.clone(),
            controller,
            lockdown,
            PipelineSettings::default(),
        ));
        Rig {
            kiosk,
            camera,
            clock,
            verifier,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_binding_starts_camera() {
        let rig = rig();
        rig.kiosk.bind_route("/kiosk/class/5/session/9").await.unwrap();

        let snap = rig.kiosk.snapshot().await;
        assert_eq!(snap.status, KioskStatus::Scanning);
        assert_eq!(snap.session_id.as_deref(), Some("9"));
        assert_eq!(snap.session.unwrap().teacher_name.as_deref(), Some("Ms. Rivera"));
        assert_eq!(rig.kiosk.lockdown().state().home, "/kiosk/class/5/session/9");
        assert_eq!(rig.camera.live_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_classes_releases_camera() {
        let rig = rig();
        rig.kiosk.bind_route("/kiosk/class/5/session/9").await.unwrap();
        rig.kiosk.back_to_classes().await;

        let snap = rig.kiosk.snapshot().await;
        assert_eq!(snap.status, KioskStatus::Ready);
        assert_eq!(snap.route, "/kiosk");
        assert_eq!(rig.camera.live_streams(), 0);
        assert_eq!(
            rig.kiosk.check_in().await,
            CheckInOutcome::Ignored {
                reason: IgnoreReason::NoSession
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_during_check_in_stays_ready() {
        let rig = rig();
        rig.kiosk.bind_route("/kiosk/class/5/session/9").await.unwrap();
        rig.verifier.set_delay(Duration::from_secs(2));
        rig.verifier.reply(Err(VerifyError::Network("connection reset".into())));

        let pending = tokio::spawn({
            let kiosk = rig.kiosk.clone();
            async move { kiosk.check_in().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.kiosk.back_to_classes().await;

        assert_eq!(
            pending.await.unwrap(),
            CheckInOutcome::Ignored {
                reason: IgnoreReason::Cancelled
            }
        );
        tokio::time::sleep(Duration::from_secs(6)).await;

        let snap = rig.kiosk.snapshot().await;
        assert_eq!(snap.status, KioskStatus::Ready);
        assert_eq!(snap.message, None);
        assert_eq!(snap.session_id, None);
        assert_eq!(rig.camera.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_not_blocked_by_camera_start() {
        let rig = rig_with(ScriptedCamera::new(vec![
            Acquisition::Fail,
            Acquisition::Fail,
            Acquisition::Bright,
        ]));
        let binding = tokio::spawn({
            let kiosk = rig.kiosk.clone();
            async move { kiosk.bind_route("/kiosk/class/5/session/9").await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snap = tokio::time::timeout(Duration::from_millis(10), rig.kiosk.snapshot())
            .await
            .expect("snapshot waited on the camera start");
        assert_eq!(snap.session_id.as_deref(), Some("9"));
        assert_eq!(snap.status, KioskStatus::Ready);

        binding.await.unwrap().unwrap();
        assert_eq!(rig.kiosk.snapshot().await.status, KioskStatus::Scanning);
        assert_eq!(rig.camera.acquisitions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_in_through_facade() {
        let rig = rig();
        rig.kiosk.bind_route("/kiosk/session/9").await.unwrap();
        rig.verifier.reply_match("7", "Jane Doe", 0.9);
        assert!(matches!(rig.kiosk.check_in().await, CheckInOutcome::Matched { .. }));
        assert_eq!(rig.kiosk.recent_checkins().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidation_unbinds_ended_session() {
        let rig = rig();
        rig.kiosk.bind_route("/kiosk/class/5/session/9").await.unwrap();
        assert!(rig.kiosk.revalidate().await);

        rig.clock.set(today().and_time(hm(10, 1)));
        assert!(!rig.kiosk.revalidate().await);

        let snap = rig.kiosk.snapshot().await;
        assert_eq!(snap.session_id, None);
        assert_eq!(snap.route, "/kiosk/class/5");
        assert_eq!(snap.status, KioskStatus::Ready);
        assert!(snap.notice.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidation_ticker() {
        let rig = rig();
        rig.kiosk.bind_route("/kiosk/class/5/session/9").await.unwrap();
        let ticker = rig.kiosk.spawn_revalidation(Duration::from_secs(30));

        rig.clock.set(today().and_time(hm(10, 5)));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rig.kiosk.snapshot().await.session_id, None);
        ticker.abort();
    }
}
