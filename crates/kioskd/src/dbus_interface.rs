use kiosk_core::lockdown::{KeyCombo, NavigationAttempt};
use kiosk_core::Kiosk;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.attendance.Kiosk1";
pub const OBJECT_PATH: &str = "/org/attendance/Kiosk1";

/// D-Bus interface for the attendance kiosk daemon.
///
/// Bus name: org.attendance.Kiosk1
/// Object path: /org/attendance/Kiosk1
pub struct KioskService {
    pub kiosk: Arc<Kiosk>,
    pub camera_device: String,
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("encode: {e}")))
}

#[interface(name = "org.attendance.Kiosk1")]
impl KioskService {
    /// Capture and verify the subject in front of the camera.
    async fn check_in(&self) -> zbus::fdo::Result<String> {
        let outcome = self.kiosk.check_in().await;
        to_json(&outcome)
    }

    /// Return daemon, binding, pipeline and lockdown status.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.kiosk.snapshot().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.camera_device,
            "kiosk": snapshot,
            "lockdown": self.kiosk.lockdown().state(),
        })
        .to_string())
    }

    /// Rolling check-in log, newest first.
    async fn recent_checkins(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.recent_checkins())
    }

    /// Bind to a kiosk route; returns the canonical route after resolution.
    async fn bind_route(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "bind_route requested");
        self.kiosk
            .bind_route(path)
            .await
            .map(|route| route.path())
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
    }

    async fn list_classes(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.list_classes().await)
    }

    async fn list_sessions(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.list_sessions().await)
    }

    /// Select a class; returns its selectable sessions.
    async fn select_class(&self, class_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(class_id, "select_class requested");
        to_json(&self.kiosk.select_class(class_id).await)
    }

    /// Select a session; returns its metadata, or `null` if it could not be bound.
    async fn select_session(&self, session_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(session_id, "select_session requested");
        to_json(&self.kiosk.select_session(session_id).await)
    }

    async fn back_to_classes(&self) -> zbus::fdo::Result<()> {
        self.kiosk.back_to_classes().await;
        Ok(())
    }

    async fn enable_lockdown(&self) -> zbus::fdo::Result<()> {
        self.kiosk
            .lockdown()
            .enable()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Leave kiosk mode. False means the credential was refused.
    async fn disable_lockdown(&self, credential: &str) -> zbus::fdo::Result<bool> {
        Ok(self.kiosk.lockdown().disable(credential))
    }

    /// Ask whether a navigation may proceed. `back` and `forward` denote
    /// history traversal; anything else is a path.
    async fn navigate(&self, target: &str) -> zbus::fdo::Result<String> {
        let attempt = match target {
            "back" | "forward" => NavigationAttempt::History,
            path => NavigationAttempt::Path(path.to_string()),
        };
        to_json(&self.kiosk.lockdown().on_navigation_attempt(&attempt))
    }

    /// Returns true when the chord must be swallowed.
    async fn key_combo(&self, combo: &str) -> zbus::fdo::Result<bool> {
        let combo: KeyCombo = combo
            .parse()
            .map_err(zbus::fdo::Error::InvalidArgs)?;
        Ok(self.kiosk.lockdown().on_key_combo(&combo))
    }

    /// Returns true when the context menu must be suppressed.
    async fn context_menu(&self) -> zbus::fdo::Result<bool> {
        Ok(self.kiosk.lockdown().on_context_menu())
    }

    /// Returns true when a close or reload must be blocked.
    async fn before_unload(&self) -> zbus::fdo::Result<bool> {
        Ok(self.kiosk.lockdown().on_before_unload())
    }

    #[zbus(signal)]
    pub async fn redirect(emitter: &SignalEmitter<'_>, path: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn warning(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn fullscreen(emitter: &SignalEmitter<'_>, on: bool) -> zbus::Result<()>;
}
