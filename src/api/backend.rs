//! HTTP client for the chat backend proxy.
//!
//! Every per-session call identifies its target with the `X-Session-ID`
//! header. [`ChatBackend`] is the seam the controller talks to, so tests can
//! swap in an in-memory backend.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::{
    ChatRequest, ModelCatalog, SessionRecord, SessionSettingsRecord, SessionsResponse,
    SummaryRequest, SummaryResponse, UpdateModelPresetRequest, UpdateSessionSettingsRequest,
    UpdateSummarizationRequest, UpdateTitleRequest,
};
use crate::utils::url::construct_api_url;

pub const SESSION_HEADER: &str = "X-Session-ID";

pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

#[derive(Debug)]
pub enum BackendError {
    Request(reqwest::Error),
    Status { status: u16, body: String },
    Decode(serde_json::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Request(err) => write!(f, "request failed: {err}"),
            BackendError::Status { status, body } => write!(
                f,
                "API request failed with status {status}: {}",
                api_error_summary(body)
            ),
            BackendError::Decode(err) => write!(f, "unexpected response body: {err}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Request(err) => Some(err),
            BackendError::Status { .. } => None,
            BackendError::Decode(err) => Some(err),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Request(err)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err)
    }
}

fn extract_error_message(value: &Value) -> Option<&str> {
    value
        .pointer("/error/message")
        .or_else(|| value.get("detail"))
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
}

/// One-line description of an error body.
pub fn api_error_summary(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<no body>".to_string();
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .as_ref()
        .and_then(extract_error_message)
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string())
}

/// Renders an error body for display. JSON bodies are pretty-printed in a
/// fenced block, headed by their message when one can be found.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| trimmed.into());
            match extract_error_message(&value) {
                Some(message) => format!("API Error: {message}\n```json\n{pretty}\n```"),
                None => format!("API Error:\n```json\n{pretty}\n```"),
            }
        }
        _ if trimmed.starts_with('<') && trimmed.ends_with('>') => {
            format!("API Error:\n```xml\n{trimmed}\n```")
        }
        _ => format!("API Error:\n```\n{trimmed}\n```"),
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Posts to a streaming endpoint and returns the raw response body.
    async fn open_stream(
        &self,
        endpoint: &str,
        session_id: &str,
        request: &ChatRequest,
    ) -> Result<ByteStream, BackendError>;

    async fn summarize(
        &self,
        endpoint: &str,
        session_id: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<String, BackendError>;

    async fn list_models(&self) -> Result<ModelCatalog, BackendError>;

    async fn fetch_sessions(&self) -> Result<Vec<SessionRecord>, BackendError>;

    async fn add_session(&self) -> Result<SessionRecord, BackendError>;

    /// Deletes a session and returns the server's remaining sessions.
    async fn remove_session(&self, session_id: &str) -> Result<Vec<SessionRecord>, BackendError>;

    async fn update_model_preset(
        &self,
        session_id: &str,
        update: &UpdateModelPresetRequest,
    ) -> Result<(), BackendError>;

    async fn update_summarization_enable(
        &self,
        session_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError>;

    async fn update_session_settings(
        &self,
        session_id: &str,
        settings: &SessionSettingsRecord,
    ) -> Result<(), BackendError>;

    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), BackendError>;
}

#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, connect_timeout: Option<Duration>) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        session_id: Option<&str>,
        body: &B,
    ) -> reqwest::RequestBuilder {
        let url = construct_api_url(&self.base_url, endpoint);
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(session_id) = session_id {
            request = request.header(SESSION_HEADER, session_id);
        }
        request
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let text = self.send(request).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, BackendError> {
        let url = construct_api_url(&self.base_url, endpoint);
        self.send_json(self.client.get(url)).await
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn open_stream(
        &self,
        endpoint: &str,
        session_id: &str,
        request: &ChatRequest,
    ) -> Result<ByteStream, BackendError> {
        debug!(endpoint, session_id, model = %request.model, "opening stream");
        let response = self
            .send(self.post(endpoint, Some(session_id), request))
            .await?;
        Ok(response
            .bytes_stream()
            .map_err(BackendError::Request)
            .boxed())
    }

    async fn summarize(
        &self,
        endpoint: &str,
        session_id: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<String, BackendError> {
        debug!(endpoint, session_id, "requesting summary");
        let response: SummaryResponse = self
            .send_json(self.post(endpoint, Some(session_id), request))
            .await?;
        Ok(response.summary)
    }

    async fn list_models(&self) -> Result<ModelCatalog, BackendError> {
        self.get_json("list_models").await
    }

    async fn fetch_sessions(&self) -> Result<Vec<SessionRecord>, BackendError> {
        let response: SessionsResponse = self.get_json("sessions").await?;
        Ok(response.sessions)
    }

    async fn add_session(&self) -> Result<SessionRecord, BackendError> {
        self.send_json(self.post("add_session", None, &serde_json::json!({})))
            .await
    }

    async fn remove_session(&self, session_id: &str) -> Result<Vec<SessionRecord>, BackendError> {
        let response: SessionsResponse = self
            .send_json(self.post("remove_session", Some(session_id), &serde_json::json!({})))
            .await?;
        Ok(response.sessions)
    }

    async fn update_model_preset(
        &self,
        session_id: &str,
        update: &UpdateModelPresetRequest,
    ) -> Result<(), BackendError> {
        self.send(self.post("update_model_preset", Some(session_id), update))
            .await?;
        Ok(())
    }

    async fn update_summarization_enable(
        &self,
        session_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        let body = UpdateSummarizationRequest {
            enable_summarization: enabled,
        };
        self.send(self.post("update_summarization_enable", Some(session_id), &body))
            .await?;
        Ok(())
    }

    async fn update_session_settings(
        &self,
        session_id: &str,
        settings: &SessionSettingsRecord,
    ) -> Result<(), BackendError> {
        let body = UpdateSessionSettingsRequest {
            session_settings: settings,
        };
        self.send(self.post("update_session_settings", Some(session_id), &body))
            .await?;
        Ok(())
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), BackendError> {
        let body = UpdateTitleRequest { title };
        self.send(self.post("update_title", Some(session_id), &body))
            .await?;
        Ok(())
    }
}
