//! Session/class binding: which session the kiosk records attendance for.
//!
//! Selection always flows class first, then session. Path-embedded ids take
//! priority over operator selection; with neither the kiosk prompts for a
//! class. The current route is always derived from in-memory state, so the
//! two never drift apart.

use crate::cache::TeacherCache;
use crate::collab::{ClassDirectory, Clock};
use crate::routes::KioskRoute;
use crate::types::{ClassSummary, SessionBinding, SessionMetadata, SessionSummary};
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BindingError {
    #[error("not a kiosk route: {0}")]
    UnknownRoute(String),
}

/// Session the pipeline submits check-ins against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub session_id: String,
    pub starts_at: NaiveDateTime,
}

/// Sessions selectable from the kiosk: dated today, not yet ended, earliest first.
pub fn available_sessions(mut sessions: Vec<SessionSummary>, now: NaiveDateTime) -> Vec<SessionSummary> {
    let today = now.date();
    sessions.retain(|s| s.session_date == today && !s.has_ended(now));
    sessions.sort_by_key(|s| s.start_time);
    sessions
}

pub struct SessionBindingController {
    directory: Arc<dyn ClassDirectory>,
    clock: Arc<dyn Clock>,
    teachers: TeacherCache,
    binding: SessionBinding,
    classes: Vec<ClassSummary>,
    sessions: Vec<SessionSummary>,
    last_error: Option<String>,
}

impl SessionBindingController {
    pub fn new(directory: Arc<dyn ClassDirectory>, clock: Arc<dyn Clock>, teachers: TeacherCache) -> Self {
        Self {
            directory,
            clock,
            teachers,
            binding: SessionBinding::default(),
            classes: Vec::new(),
            sessions: Vec::new(),
            last_error: None,
        }
    }

    pub fn binding(&self) -> &SessionBinding {
        &self.binding
    }

    pub fn classes(&self) -> &[ClassSummary] {
        &self.classes
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    /// Last non-fatal error worth showing to the operator.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn teacher_cache(&self) -> &TeacherCache {
        &self.teachers
    }

    pub fn route(&self) -> KioskRoute {
        KioskRoute::from_selection(self.binding.class_id(), self.binding.session_id())
    }

    /// Bound session with resolved metadata, if any.
    pub fn active_session(&self) -> Option<ActiveSession> {
        let session_id = self.binding.session_id()?;
        let meta = self.binding.metadata()?;
        Some(ActiveSession {
            session_id: session_id.to_string(),
            starts_at: meta.session_date.and_time(meta.start_time),
        })
    }

    /// Fetch all classes. Failures degrade to an empty list.
    pub async fn list_classes(&mut self) -> Vec<ClassSummary> {
        match self.directory.list_classes().await {
            Ok(classes) => {
                self.last_error = None;
                self.classes = classes;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load classes");
                self.last_error = Some(format!("Unable to load classes: {e}"));
                self.classes.clear();
            }
        }
        self.classes.clone()
    }

    /// Fetch the sessions of a class that can still be checked into today.
    pub async fn list_sessions_for_class(&mut self, class_id: &str) -> Vec<SessionSummary> {
        match self.directory.class_sessions(class_id).await {
            Ok(sessions) => {
                let total = sessions.len();
                self.sessions = available_sessions(sessions, self.clock.now());
                tracing::debug!(class_id, total, available = self.sessions.len(), "sessions loaded");
            }
            Err(e) => {
                tracing::warn!(class_id, error = %e, "failed to load sessions");
                self.last_error = Some(format!("Unable to load sessions: {e}"));
                self.sessions.clear();
            }
        }
        self.sessions.clone()
    }

    /// Operator picked a class: session state resets, sessions reload.
    pub async fn select_class(&mut self, class_id: &str) -> Vec<SessionSummary> {
        tracing::info!(class_id, "class selected");
        self.binding.select_class(class_id);
        self.list_sessions_for_class(class_id).await
    }

    /// Operator picked a session. Returns the resolved metadata, or `None`
    /// when the session is unusable and the binding fell back to the class.
    pub async fn select_session(&mut self, session_id: &str) -> Option<SessionMetadata> {
        tracing::info!(session_id, "session selected");
        self.binding.select_session(session_id);
        self.resolve_session(session_id).await
    }

    /// Operator backed out to class selection.
    pub fn back_to_classes(&mut self) {
        self.binding.clear();
        self.sessions.clear();
    }

    /// Fetch, validate and denormalize the details of the bound session.
    pub async fn resolve_session(&mut self, session_id: &str) -> Option<SessionMetadata> {
        let session = match self.directory.session(session_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to load session");
                self.invalidate_session(format!("Unable to load session: {e}"));
                return None;
            }
        };

        if session.has_ended(self.clock.now()) {
            tracing::info!(session_id, ends_at = %session.ends_at(), "session already ended");
            self.invalidate_session("This session has already ended.".to_string());
            return None;
        }

        // A session-only route learns its class from the session record.
        if self.binding.class_id().is_none() {
            if let Some(class_id) = session.class_id.as_deref() {
                self.binding.select_class(class_id);
                self.binding.select_session(session_id);
            }
        }

        let class_id = self
            .binding
            .class_id()
            .map(str::to_string)
            .or_else(|| session.class_id.clone());
        let (location, teacher_name) = match class_id {
            Some(class_id) => self.class_details(&class_id).await,
            None => (None, None),
        };

        let metadata = SessionMetadata {
            session_date: session.session_date,
            start_time: session.start_time,
            end_time: session.end_time,
            location: session.location.clone().or(location),
            teacher_name,
        };
        self.binding.set_metadata(metadata.clone());
        self.last_error = None;
        tracing::info!(
            session_id,
            start = %metadata.start_time,
            end = %metadata.end_time,
            teacher = metadata.teacher_name.as_deref().unwrap_or("-"),
            "session resolved"
        );
        Some(metadata)
    }

    /// Location and teacher name via the owning class. Lookups that fail only
    /// leave the fields empty.
    async fn class_details(&mut self, class_id: &str) -> (Option<String>, Option<String>) {
        let class = match self.directory.class(class_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(class_id, error = %e, "class lookup failed");
                return (None, None);
            }
        };

        let Some(teacher_id) = class.teacher_id.as_deref() else {
            return (class.location, None);
        };

        if let Some(name) = self.teachers.get(teacher_id) {
            return (class.location, Some(name));
        }

        match self.directory.user(teacher_id).await {
            Ok(user) if user.full_name.trim().is_empty() => {
                tracing::debug!(teacher_id, "teacher has no name on record");
                (class.location, None)
            }
            Ok(user) => {
                self.teachers.insert(teacher_id, &user.full_name);
                (class.location, Some(user.full_name))
            }
            Err(e) => {
                tracing::warn!(teacher_id, error = %e, "teacher lookup failed");
                (class.location, None)
            }
        }
    }

    /// Apply a navigable path to the selection state.
    pub async fn bind_route(&mut self, path: &str) -> Result<KioskRoute, BindingError> {
        let route = KioskRoute::parse(path).ok_or_else(|| BindingError::UnknownRoute(path.to_string()))?;

        match &route {
            KioskRoute::Root => self.back_to_classes(),
            KioskRoute::Class { class_id } => {
                self.select_class(class_id).await;
            }
            KioskRoute::ClassSession {
                class_id,
                session_id,
            } => {
                if self.binding.class_id() != Some(class_id.as_str()) || self.sessions.is_empty() {
                    self.select_class(class_id).await;
                }
                self.select_session(session_id).await;
            }
            KioskRoute::Session { session_id } => {
                self.binding.clear();
                self.select_session(session_id).await;
            }
        }

        Ok(self.route())
    }

    /// Re-check the bound session's time window. Returns false when the
    /// binding was dropped back to class selection.
    pub fn revalidate(&mut self) -> bool {
        let Some(meta) = self.binding.metadata() else {
            return true;
        };
        if self.clock.now() <= meta.ends_at() {
            return true;
        }
        tracing::info!(session_id = ?self.binding.session_id(), "bound session ended");
        self.invalidate_session("This session has ended.".to_string());
        false
    }

    fn invalidate_session(&mut self, reason: String) {
        self.binding.clear_session();
        self.last_error = Some(reason);
    }
}
