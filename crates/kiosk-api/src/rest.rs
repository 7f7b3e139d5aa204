//! Class directory over the backend REST API.

use crate::{endpoint, parse};
use async_trait::async_trait;
use kiosk_core::flags::{FlagStore, AUTH_TOKEN_KEY};
use kiosk_core::types::{ClassSummary, SessionSummary, UserSummary};
use kiosk_core::{ApiError, ClassDirectory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    flags: Arc<dyn FlagStore>,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration, flags: Arc<dyn FlagStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            flags,
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let url = endpoint(&self.base_url, path);
        let mut request = self.http.get(&url);
        if let Some(token) = self.flags.get(AUTH_TOKEN_KEY) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "directory request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: parse::error_detail(&body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_list<T>(&self, path: &str, decode: fn(&Value) -> Option<T>) -> Result<Vec<T>, ApiError> {
        let body = self.get_json(path).await?;
        let items = parse::extract_list(body);
        let total = items.len();
        let decoded: Vec<T> = items.iter().filter_map(decode).collect();
        if decoded.len() < total {
            tracing::debug!(path, total, kept = decoded.len(), "dropped undecodable records");
        }
        Ok(decoded)
    }

    async fn get_one<T>(&self, path: &str, decode: fn(&Value) -> Option<T>) -> Result<T, ApiError> {
        let body = self.get_json(path).await?;
        // Some endpoints wrap single records in `data`.
        let record = match body.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => &body,
        };
        decode(record).ok_or_else(|| ApiError::Decode(format!("{path}: missing id")))
    }
}

#[async_trait]
impl ClassDirectory for RestClient {
    async fn list_classes(&self) -> Result<Vec<ClassSummary>, ApiError> {
        self.get_list("/classes", parse::class).await
    }

    async fn class_sessions(&self, class_id: &str) -> Result<Vec<SessionSummary>, ApiError> {
        let mut sessions = self
            .get_list(&format!("/classes/{class_id}/sessions"), parse::session)
            .await?;
        for s in sessions.iter_mut().filter(|s| s.class_id.is_none()) {
            s.class_id = Some(class_id.to_string());
        }
        Ok(sessions)
    }

    async fn session(&self, session_id: &str) -> Result<SessionSummary, ApiError> {
        self.get_one(&format!("/classes/sessions/{session_id}"), parse::session)
            .await
    }

    async fn class(&self, class_id: &str) -> Result<ClassSummary, ApiError> {
        self.get_one(&format!("/classes/{class_id}"), parse::class).await
    }

    async fn user(&self, user_id: &str) -> Result<UserSummary, ApiError> {
        self.get_one(&format!("/users/{user_id}"), parse::user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::MemoryFlagStore;

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = RestClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            Arc::new(MemoryFlagStore::new()),
        )
        .unwrap();
        let err = client.list_classes().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
