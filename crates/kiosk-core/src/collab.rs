//! Seams to the outside world: REST data, face verification and wall-clock time.

use crate::types::{ClassSummary, SessionSummary, UserSummary, VerifyResponse};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Failure submitting an image for verification.
#[derive(Error, Debug, Clone)]
pub enum VerifyError {
    /// The service answered with an error body.
    #[error("{status}: {detail}")]
    Rejected { status: u16, detail: String },
    /// No response was received.
    #[error("{0}")]
    Network(String),
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed verification response: {0}")]
    Decode(String),
}

/// Read access to classes, sessions and users.
#[async_trait]
pub trait ClassDirectory: Send + Sync {
    async fn list_classes(&self) -> Result<Vec<ClassSummary>, ApiError>;
    async fn class_sessions(&self, class_id: &str) -> Result<Vec<SessionSummary>, ApiError>;
    async fn session(&self, session_id: &str) -> Result<SessionSummary, ApiError>;
    async fn class(&self, class_id: &str) -> Result<ClassSummary, ApiError>;
    async fn user(&self, user_id: &str) -> Result<UserSummary, ApiError>;
}

/// Remote face verification against enrolled identities.
#[async_trait]
pub trait FaceVerifier: Send + Sync {
    async fn verify(&self, jpeg: &[u8], session_id: &str) -> Result<VerifyResponse, VerifyError>;
}

/// Local wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Clock pinned to a settable instant.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
