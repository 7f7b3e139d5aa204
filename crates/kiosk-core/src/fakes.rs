//! In-memory collaborators for unit tests.

use crate::collab::{ApiError, ClassDirectory, FaceVerifier, VerifyError};
use crate::lockdown::{Guard, HostError, NavigationHost};
use crate::types::{BestMatch, ClassSummary, SessionSummary, UserSummary, VerifyResponse};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn session(id: &str, class_id: &str, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> SessionSummary {
    SessionSummary {
        id: id.to_string(),
        class_id: Some(class_id.to_string()),
        session_date: date,
        start_time: start,
        end_time: end,
        location: None,
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub classes: Mutex<Vec<ClassSummary>>,
    pub sessions: Mutex<Vec<SessionSummary>>,
    pub users: Mutex<HashMap<String, String>>,
    pub fail: Mutex<bool>,
    pub user_lookups: AtomicUsize,
}

impl FakeDirectory {
    pub fn add_class(&self, id: &str, teacher_id: &str, location: &str) {
        lock(&self.classes).push(ClassSummary {
            id: id.to_string(),
            name: format!("Class {id}"),
            teacher_id: Some(teacher_id.to_string()),
            location: Some(location.to_string()),
        });
    }

    pub fn add_session(&self, session: SessionSummary) {
        lock(&self.sessions).push(session);
    }

    pub fn add_user(&self, id: &str, name: &str) {
        lock(&self.users).insert(id.to_string(), name.to_string());
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    fn check(&self) -> Result<(), ApiError> {
        if *lock(&self.fail) {
            Err(ApiError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClassDirectory for FakeDirectory {
    async fn list_classes(&self) -> Result<Vec<ClassSummary>, ApiError> {
        self.check()?;
        Ok(lock(&self.classes).clone())
    }

    async fn class_sessions(&self, class_id: &str) -> Result<Vec<SessionSummary>, ApiError> {
        self.check()?;
        Ok(lock(&self.sessions)
            .iter()
            .filter(|s| s.class_id.as_deref() == Some(class_id))
            .cloned()
            .collect())
    }

    async fn session(&self, session_id: &str) -> Result<SessionSummary, ApiError> {
        self.check()?;
        lock(&self.sessions)
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))
    }

    async fn class(&self, class_id: &str) -> Result<ClassSummary, ApiError> {
        self.check()?;
        lock(&self.classes)
            .iter()
            .find(|c| c.id == class_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("class {class_id}")))
    }

    async fn user(&self, user_id: &str) -> Result<UserSummary, ApiError> {
        self.check()?;
        self.user_lookups.fetch_add(1, Ordering::Relaxed);
        lock(&self.users)
            .get(user_id)
            .map(|name| UserSummary {
                id: user_id.to_string(),
                full_name: name.clone(),
            })
            .ok_or_else(|| ApiError::NotFound(format!("user {user_id}")))
    }
}

/// Verifier answering from a queue; an empty queue means "no match".
#[derive(Default)]
pub struct FakeVerifier {
    replies: Mutex<VecDeque<Result<VerifyResponse, VerifyError>>>,
    pub delay: Mutex<Duration>,
    pub calls: AtomicUsize,
    pub last_session: Mutex<Option<String>>,
}

impl FakeVerifier {
    pub fn reply(&self, reply: Result<VerifyResponse, VerifyError>) {
        lock(&self.replies).push_back(reply);
    }

    pub fn reply_match(&self, user_id: &str, name: &str, similarity: f32) {
        self.reply(Ok(VerifyResponse {
            match_found: true,
            best_match: Some(BestMatch {
                user_id: user_id.to_string(),
                full_name: name.to_string(),
            }),
            highest_similarity: Some(similarity),
        }));
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FaceVerifier for FakeVerifier {
    async fn verify(&self, _jpeg: &[u8], session_id: &str) -> Result<VerifyResponse, VerifyError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_session) = Some(session_id.to_string());
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Ok(VerifyResponse::default()))
    }
}

/// Host that records every call and can refuse one guard.
#[derive(Default)]
pub struct RecordingHost {
    fail_on: Option<Guard>,
    guards: Mutex<Vec<Guard>>,
    fullscreen: Mutex<bool>,
    redirects: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn failing_on(guard: Guard) -> Self {
        Self {
            fail_on: Some(guard),
            ..Self::default()
        }
    }

    pub fn guards(&self) -> Vec<Guard> {
        lock(&self.guards).clone()
    }

    pub fn is_fullscreen(&self) -> bool {
        *lock(&self.fullscreen)
    }

    pub fn redirects(&self) -> Vec<String> {
        lock(&self.redirects).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }
}

impl NavigationHost for RecordingHost {
    fn register_guard(&self, guard: Guard) -> Result<(), HostError> {
        if self.fail_on == Some(guard) {
            return Err(HostError::Rejected(format!("{guard:?}")));
        }
        lock(&self.guards).push(guard);
        Ok(())
    }

    fn unregister_guard(&self, guard: Guard) {
        lock(&self.guards).retain(|g| *g != guard);
    }

    fn set_fullscreen(&self, on: bool) -> Result<(), HostError> {
        *lock(&self.fullscreen) = on;
        Ok(())
    }

    fn redirect(&self, path: &str) {
        lock(&self.redirects).push(path.to_string());
    }

    fn show_warning(&self, message: &str) {
        lock(&self.warnings).push(message.to_string());
    }
}
