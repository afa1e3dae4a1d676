//! HTTP transport to the sync service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::sync::protocol::{SyncRequest, SyncResponse};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid sync transport configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync request timed out")]
    Timeout,
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync response payload: {0}")]
    InvalidPayload(String),
}

/// One request/response exchange with the sync service
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError>;
}

/// JSON over HTTP POST
#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-cache")
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await.map_err(classify)?;
        serde_json::from_str(&body)
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(error)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

pub(crate) fn normalize_endpoint(raw: String) -> Result<String, TransportError> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
