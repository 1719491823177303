use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::capture::{ScreenType, Viewport};

/// What the backend should render and screenshot.
#[derive(Debug, Clone)]
pub struct CaptureTarget<'a> {
    pub url: &'a str,
    pub viewport: &'a Viewport,
    pub screen_type: ScreenType,
    pub user_agent: &'a str,
}

/// Browser automation backend. Returns raw image bytes for one screenshot.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn screenshot(&self, target: &CaptureTarget<'_>) -> Result<Vec<u8>, BackendError>;
}

/// Client for a headless-browser screenshot service (`POST /screenshot`).
pub struct HttpCaptureBackend {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotRequest<'a> {
    url: &'a str,
    viewport: ViewportPayload,
    user_agent: &'a str,
    wait_for_selector: &'a str,
    settle_ms: u64,
    full_page: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewportPayload {
    width: u32,
    height: u32,
    device_scale_factor: u32,
}

#[derive(Deserialize)]
struct EncodedScreenshot {
    data: String,
}

impl HttpCaptureBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, BackendError> {
        let http = Client::builder()
            .user_agent(concat!("screen-verify/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BackendError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl CaptureBackend for HttpCaptureBackend {
    async fn screenshot(&self, target: &CaptureTarget<'_>) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/screenshot", self.base_url);

        let body = ScreenshotRequest {
            url: target.url,
            viewport: ViewportPayload {
                width: target.viewport.width,
                height: target.viewport.height,
                device_scale_factor: 1,
            },
            user_agent: target.user_agent,
            wait_for_selector: target.screen_type.ready_selector(),
            settle_ms: target.screen_type.settle_ms(),
            full_page: true,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(BackendError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let bytes = response.bytes().await.map_err(BackendError::Http)?;
        if is_json {
            let encoded: EncodedScreenshot =
                serde_json::from_slice(&bytes).map_err(BackendError::Parse)?;
            base64::engine::general_purpose::STANDARD
                .decode(encoded.data)
                .map_err(BackendError::Decode)
        } else {
            Ok(bytes.to_vec())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Screenshot service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse screenshot response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to decode base64 screenshot: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("{0}")]
    Other(String),
}
