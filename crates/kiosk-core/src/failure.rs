//! User-facing messages for every way a check-in can end badly.
//!
//! Only actionable guidance reaches the subject standing at the kiosk;
//! server internals collapse to a generic retry message.

use crate::collab::VerifyError;

pub const CAMERA_INIT_FAILED: &str = "Camera initialization failed. Please reload the page.";
pub const CAMERA_NOT_READY: &str = "Camera is not ready yet. Please wait a moment and try again.";
pub const CAPTURE_FAILED: &str = "Could not capture an image. Please try again.";
pub const IMAGE_TOO_DARK: &str =
    "The image is too dark or empty. Please face the camera in good lighting.";
pub const FACE_NOT_RECOGNIZED: &str =
    "Face not recognized. Please try again or contact your teacher.";
pub const SERVER_ERROR: &str = "Server error, please try again.";

/// Server-side validation outcomes the subject can act on.
const VALIDATION_PHRASES: &[&str] = &[
    "incomplete face",
    "face not fully visible",
    "no face detected",
    "no face found",
    "face not detected",
    "multiple faces",
    "more than one face",
    "spoof",
    "liveness",
    "fake face",
    "too dark",
    "blurry",
    "face too small",
];

/// Message shown for a failed verification call.
pub fn verify_failure_message(err: &VerifyError) -> String {
    match err {
        VerifyError::Rejected { status, detail } => {
            let cleaned = clean_detail(detail);
            if is_validation_message(&cleaned) {
                cleaned
            } else {
                tracing::warn!(status, detail = %detail, "verification rejected by server");
                SERVER_ERROR.to_string()
            }
        }
        VerifyError::Network(_) | VerifyError::Timeout(_) => err.to_string(),
        VerifyError::Decode(e) => {
            tracing::warn!(error = %e, "undecodable verification response");
            SERVER_ERROR.to_string()
        }
    }
}

pub fn is_validation_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    VALIDATION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Strip status-code prefixes and unwrap nested `detail` payloads.
///
/// `"400: {\"detail\": \"422: No face detected\"}"` becomes `"No face detected"`.
pub fn clean_detail(detail: &str) -> String {
    let mut current = detail.trim().to_string();
    // Nesting depth is bounded by the number of proxies in front of the service.
    for _ in 0..4 {
        let stripped = strip_status_prefix(&current).to_string();
        match nested_detail(&stripped) {
            Some(inner) => current = inner,
            None => return stripped,
        }
    }
    strip_status_prefix(&current).to_string()
}

fn strip_status_prefix(s: &str) -> &str {
    let s = s.trim();
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return s;
    }
    let rest = s[digits..].trim_start();
    match rest.strip_prefix(':').or_else(|| rest.strip_prefix('-')) {
        Some(after) => after.trim_start(),
        None => s,
    }
}

fn nested_detail(s: &str) -> Option<String> {
    if !s.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(s)
        .or_else(|_| serde_json::from_str(&s.replace('\'', "\"")))
        .ok()?;
    match value.get("detail")? {
        serde_json::Value::String(inner) => Some(inner.trim().to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rejected(status: u16, detail: &str) -> VerifyError {
        VerifyError::Rejected {
            status,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_validation_detail_shown_without_prefix() {
        let msg = verify_failure_message(&rejected(400, "400: No face detected in image"));
        assert_eq!(msg, "No face detected in image");
    }

    #[test]
    fn test_nested_detail_unwrapped() {
        let msg = verify_failure_message(&rejected(
            500,
            r#"500: {"detail": "422: Incomplete face, move closer"}"#,
        ));
        assert_eq!(msg, "Incomplete face, move closer");
    }

    #[test]
    fn test_python_repr_detail_unwrapped() {
        let msg = verify_failure_message(&rejected(400, "400: {'detail': 'Spoofing suspected'}"));
        assert_eq!(msg, "Spoofing suspected");
    }

    #[test]
    fn test_non_validation_error_is_generic() {
        let msg = verify_failure_message(&rejected(500, "database connection refused"));
        assert_eq!(msg, SERVER_ERROR);
    }

    #[test]
    fn test_network_error_uses_raw_text() {
        let msg = verify_failure_message(&VerifyError::Network("connection reset by peer".into()));
        assert_eq!(msg, "connection reset by peer");
    }

    #[test]
    fn test_timeout_is_network_level() {
        let msg = verify_failure_message(&VerifyError::Timeout(Duration::from_secs(60)));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_strip_status_prefix_leaves_plain_numbers() {
        assert_eq!(strip_status_prefix("3 faces visible"), "3 faces visible");
        assert_eq!(strip_status_prefix("404 - not here"), "not here");
    }
}
