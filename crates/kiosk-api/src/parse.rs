//! Lenient decoding of collaborator JSON.
//!
//! The backend is not strict about shapes: ids arrive as numbers or strings,
//! lists may be wrapped, optional fields go missing. Records without an id
//! (or, for sessions, without a usable schedule) are skipped; everything
//! else degrades to empty values.

use chrono::{NaiveDate, NaiveTime};
use kiosk_core::types::{ClassSummary, SessionSummary, UserSummary};
use serde_json::Value;

/// Keys a list body may be wrapped under.
pub const LIST_KEYS: &[&str] = &["data", "items", "classes", "sessions"];

/// Pull the record list out of a bare array or a wrapping object.
pub fn extract_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => LIST_KEYS
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// First non-empty field among `keys`, numbers rendered as strings.
pub fn text(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    // Accept full timestamps by taking the date prefix.
    let s = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

pub fn class(v: &Value) -> Option<ClassSummary> {
    Some(ClassSummary {
        id: text(v, &["id", "class_id"])?,
        name: text(v, &["name", "class_name", "title"]).unwrap_or_default(),
        teacher_id: text(v, &["teacher_id"]),
        location: text(v, &["location", "room"]),
    })
}

pub fn session(v: &Value) -> Option<SessionSummary> {
    let id = text(v, &["id", "session_id"])?;
    let schedule = text(v, &["session_date", "date"])
        .as_deref()
        .and_then(parse_date)
        .zip(text(v, &["start_time"]).as_deref().and_then(parse_time))
        .zip(text(v, &["end_time"]).as_deref().and_then(parse_time));
    let Some(((session_date, start_time), end_time)) = schedule else {
        tracing::warn!(session_id = %id, "skipping session without a usable schedule");
        return None;
    };
    Some(SessionSummary {
        id,
        class_id: text(v, &["class_id"]),
        session_date,
        start_time,
        end_time,
        location: text(v, &["location", "room"]),
    })
}

pub fn user(v: &Value) -> Option<UserSummary> {
    let id = text(v, &["id", "user_id"])?;
    let full_name = text(v, &["full_name", "name"]).unwrap_or_else(|| {
        [text(v, &["first_name"]), text(v, &["last_name"])]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    });
    Some(UserSummary { id, full_name })
}

/// Human-readable error detail from a failure body, falling back to the raw text.
pub fn error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail").or_else(|| map.get("message")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        _ => body.trim().to_string(),
    }
}
