use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Visible kiosk state, driven only by the check-in pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KioskStatus {
    Ready,
    Scanning,
    Processing,
    Success,
    Error,
}

impl KioskStatus {
    /// Whether the state machine permits `self -> next`.
    ///
    /// `Error` and `Ready` are reachable from anywhere; everything else
    /// follows the capture cycle.
    pub fn can_transition_to(self, next: KioskStatus) -> bool {
        use KioskStatus::*;
        matches!(
            (self, next),
            (_, Error)
                | (_, Ready)
                | (Ready, Scanning)
                | (Ready, Processing)
                | (Scanning, Processing)
                | (Processing, Success)
                | (Success, Scanning)
                | (Error, Scanning)
        )
    }

    /// Outcome states that revert to `Scanning` on a timer.
    pub fn is_terminal(self) -> bool {
        matches!(self, KioskStatus::Success | KioskStatus::Error)
    }
}

/// A class as listed by the REST collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub id: String,
    pub name: String,
    pub teacher_id: Option<String>,
    pub location: Option<String>,
}

/// A scheduled occurrence of a class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub class_id: Option<String>,
    pub session_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub location: Option<String>,
}

impl SessionSummary {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.session_date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.session_date.and_time(self.end_time)
    }

    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        now > self.ends_at()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub full_name: String,
}

/// Session details denormalized for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMetadata {
    pub session_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub location: Option<String>,
    pub teacher_name: Option<String>,
}

impl SessionMetadata {
    pub fn ends_at(&self) -> NaiveDateTime {
        self.session_date.and_time(self.end_time)
    }
}

/// Which class and session the kiosk is bound to.
///
/// Fields are private so the class-before-session ordering holds: changing
/// the class drops the session, and metadata never outlives its session id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionBinding {
    class_id: Option<String>,
    session_id: Option<String>,
    metadata: Option<SessionMetadata>,
}

impl SessionBinding {
    pub fn class_id(&self) -> Option<&str> {
        self.class_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    /// Select a class, resetting any session state.
    pub fn select_class(&mut self, class_id: &str) {
        self.class_id = Some(class_id.to_string());
        self.clear_session();
    }

    /// Select a session; previous metadata is dropped until re-resolved.
    pub fn select_session(&mut self, session_id: &str) {
        if self.session_id.as_deref() != Some(session_id) {
            self.metadata = None;
        }
        self.session_id = Some(session_id.to_string());
    }

    /// Attach metadata for the current session. Ignored when no session is set.
    pub fn set_metadata(&mut self, metadata: SessionMetadata) {
        if self.session_id.is_some() {
            self.metadata = Some(metadata);
        }
    }

    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.metadata = None;
    }

    pub fn clear(&mut self) {
        self.class_id = None;
        self.clear_session();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

/// One entry of the rolling check-in log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckinRecord {
    pub student_id: String,
    pub name: String,
    pub time: NaiveDateTime,
    pub status: AttendanceStatus,
    pub late_minutes: i64,
}

/// Success body of the verification collaborator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub match_found: bool,
    #[serde(default)]
    pub best_match: Option<BestMatch>,
    #[serde(default)]
    pub highest_similarity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BestMatch {
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default)]
    pub full_name: String,
}

/// Accept identifiers sent either as JSON numbers or strings.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_edges() {
        use KioskStatus::*;
        assert!(Ready.can_transition_to(Scanning));
        assert!(Scanning.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Success));
        assert!(Success.can_transition_to(Scanning));
        assert!(Error.can_transition_to(Scanning));
        assert!(Processing.can_transition_to(Error));
        assert!(Scanning.can_transition_to(Error));
        assert!(!Scanning.can_transition_to(Success));
        assert!(!Success.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Scanning));
    }

    #[test]
    fn test_binding_class_change_drops_session() {
        let mut binding = SessionBinding::default();
        binding.select_class("5");
        binding.select_session("9");
        binding.set_metadata(SessionMetadata {
            session_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            location: None,
            teacher_name: None,
        });
        assert!(binding.metadata().is_some());

        binding.select_class("6");
        assert_eq!(binding.class_id(), Some("6"));
        assert_eq!(binding.session_id(), None);
        assert!(binding.metadata().is_none());
    }

    #[test]
    fn test_metadata_requires_session() {
        let mut binding = SessionBinding::default();
        binding.set_metadata(SessionMetadata {
            session_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            location: None,
            teacher_name: None,
        });
        assert!(binding.metadata().is_none());
    }

    #[test]
    fn test_verify_response_numeric_user_id() {
        let body = r#"{"match_found":true,"best_match":{"user_id":7,"full_name":"Jane Doe"},"highest_similarity":0.92}"#;
        let resp: VerifyResponse = serde_json::from_str(body).unwrap();
        let best = resp.best_match.unwrap();
        assert_eq!(best.user_id, "7");
        assert_eq!(best.full_name, "Jane Doe");
    }

    #[test]
    fn test_verify_response_minimal_body() {
        let resp: VerifyResponse = serde_json::from_str(r#"{"match_found":false}"#).unwrap();
        assert!(!resp.match_found);
        assert!(resp.best_match.is_none());
    }
}
