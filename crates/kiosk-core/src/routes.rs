//! Kiosk route surface.
//!
//! `/kiosk`, `/kiosk/class/{class}`, `/kiosk/class/{class}/session/{session}`
//! and `/kiosk/session/{session}`.

use std::fmt;

pub const KIOSK_ROOT: &str = "/kiosk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskRoute {
    Root,
    Class { class_id: String },
    ClassSession { class_id: String, session_id: String },
    Session { session_id: String },
}

impl KioskRoute {
    /// Parse a navigable path. Query strings, fragments and a trailing slash are ignored.
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = strip_path(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            ["kiosk"] => Some(Self::Root),
            ["kiosk", "class", class_id] => Some(Self::Class {
                class_id: class_id.to_string(),
            }),
            ["kiosk", "class", class_id, "session", session_id] => Some(Self::ClassSession {
                class_id: class_id.to_string(),
                session_id: session_id.to_string(),
            }),
            ["kiosk", "session", session_id] => Some(Self::Session {
                session_id: session_id.to_string(),
            }),
            _ => None,
        }
    }

    /// Route for a given selection state.
    pub fn from_selection(class_id: Option<&str>, session_id: Option<&str>) -> Self {
        match (class_id, session_id) {
            (Some(c), Some(s)) => Self::ClassSession {
                class_id: c.to_string(),
                session_id: s.to_string(),
            },
            (Some(c), None) => Self::Class {
                class_id: c.to_string(),
            },
            (None, Some(s)) => Self::Session {
                session_id: s.to_string(),
            },
            (None, None) => Self::Root,
        }
    }

    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for KioskRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "{KIOSK_ROOT}"),
            Self::Class { class_id } => write!(f, "{KIOSK_ROOT}/class/{class_id}"),
            Self::ClassSession {
                class_id,
                session_id,
            } => write!(f, "{KIOSK_ROOT}/class/{class_id}/session/{session_id}"),
            Self::Session { session_id } => write!(f, "{KIOSK_ROOT}/session/{session_id}"),
        }
    }
}

/// True for `/kiosk` and anything below it.
pub fn is_kiosk_path(path: &str) -> bool {
    let path = strip_path(path);
    path == KIOSK_ROOT || path.starts_with("/kiosk/")
}

fn strip_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
