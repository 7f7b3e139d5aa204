//! Face verification over multipart upload.

use crate::{endpoint, parse};
use async_trait::async_trait;
use kiosk_core::flags::{FlagStore, AUTH_TOKEN_KEY};
use kiosk_core::types::VerifyResponse;
use kiosk_core::{FaceVerifier, VerifyError};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;

pub const VERIFY_PATH: &str = "/verify-face-direct";

pub struct VerifyClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    flags: Arc<dyn FlagStore>,
}

impl VerifyClient {
    pub fn new(base_url: &str, timeout: Duration, flags: Arc<dyn FlagStore>) -> Result<Self, VerifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            timeout,
            flags,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> VerifyError {
        if e.is_timeout() {
            VerifyError::Timeout(self.timeout)
        } else {
            VerifyError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl FaceVerifier for VerifyClient {
    async fn verify(&self, jpeg: &[u8], session_id: &str) -> Result<VerifyResponse, VerifyError> {
        let part = Part::bytes(jpeg.to_vec())
            .file_name("capture.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| VerifyError::Network(e.to_string()))?;
        let form = Form::new().part("file", part);

        let mut request = self
            .http
            .post(endpoint(&self.base_url, VERIFY_PATH))
            .query(&[("session_id", session_id)])
            .multipart(form);
        if let Some(token) = self.flags.get(AUTH_TOKEN_KEY) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::Rejected {
                status: status.as_u16(),
                detail: parse::error_detail(&body),
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&body).map_err(|e| VerifyError::Decode(e.to_string()))
    }
}
