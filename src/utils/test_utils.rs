use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::api::backend::{BackendError, ByteStream, ChatBackend};
use crate::api::{
    ChatRequest, ModelCatalog, ModelEntry, SessionRecord, SessionSettingsRecord, SummaryRequest,
    UpdateModelPresetRequest,
};

pub fn delta_frame(content: &str) -> Vec<u8> {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": content}}]})
    )
    .into_bytes()
}

pub fn sse_body(parts: &[&str]) -> Vec<u8> {
    let mut body: Vec<u8> = parts.iter().flat_map(|part| delta_frame(part)).collect();
    body.extend_from_slice(b"data: [DONE]\n\n");
    body
}

pub fn session_record(id: &str, title: &str) -> SessionRecord {
    serde_json::from_value(serde_json::json!({ "sessionId": id, "title": title }))
        .expect("session record")
}

/// Scripted response for one `open_stream` call.
pub enum StreamScript {
    Chunks(Vec<Vec<u8>>),
    /// Chunks are fed by the test while the stream runs.
    Channel(mpsc::UnboundedReceiver<Result<Bytes, BackendError>>),
    Status(u16, String),
    /// `open_stream` does not return until `release` is notified.
    Held {
        release: Arc<Notify>,
        then: Box<StreamScript>,
    },
}

fn open_script(script: StreamScript) -> Result<ByteStream, BackendError> {
    match script {
        StreamScript::Chunks(chunks) => Ok(stream::iter(
            chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))),
        )
        .boxed()),
        StreamScript::Channel(rx) => Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()),
        StreamScript::Status(status, body) => Err(BackendError::Status { status, body }),
        StreamScript::Held { then, .. } => open_script(*then),
    }
}

/// In-memory [`ChatBackend`] that records every call.
#[derive(Default)]
pub struct FakeBackend {
    streams: Mutex<VecDeque<StreamScript>>,
    summary: Mutex<Option<Result<String, u16>>>,
    sessions: Mutex<Vec<SessionRecord>>,
    fail_updates: Mutex<bool>,
    next_id: Mutex<u32>,
    pub stream_requests: Mutex<Vec<(String, String, Value)>>,
    pub summary_requests: Mutex<Vec<(String, String)>>,
    pub update_calls: Mutex<Vec<(String, String, Value)>>,
}

impl FakeBackend {
    pub fn push_stream(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    pub fn set_summary(&self, result: Result<String, u16>) {
        *self.summary.lock().unwrap() = Some(result);
    }

    pub fn set_sessions(&self, sessions: Vec<SessionRecord>) {
        *self.sessions.lock().unwrap() = sessions;
    }

    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    /// `(endpoint, model)` of each summary request.
    pub fn summary_calls(&self) -> Vec<(String, String)> {
        self.summary_requests.lock().unwrap().clone()
    }

    pub fn update_calls(&self) -> Vec<(String, String, Value)> {
        self.update_calls.lock().unwrap().clone()
    }

    pub fn stream_requests(&self) -> Vec<(String, String, Value)> {
        self.stream_requests.lock().unwrap().clone()
    }

    fn record_update(&self, name: &str, session_id: &str, body: Value) -> Result<(), BackendError> {
        self.update_calls
            .lock()
            .unwrap()
            .push((name.to_string(), session_id.to_string(), body));
        if *self.fail_updates.lock().unwrap() {
            return Err(BackendError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn open_stream(
        &self,
        endpoint: &str,
        session_id: &str,
        request: &ChatRequest,
    ) -> Result<ByteStream, BackendError> {
        self.stream_requests.lock().unwrap().push((
            endpoint.to_string(),
            session_id.to_string(),
            serde_json::to_value(request).unwrap(),
        ));
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamScript::Chunks(vec![sse_body(&[])]));
        let release = match &script {
            StreamScript::Held { release, .. } => Some(Arc::clone(release)),
            _ => None,
        };
        if let Some(release) = release {
            release.notified().await;
        }
        open_script(script)
    }

    async fn summarize(
        &self,
        endpoint: &str,
        _session_id: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<String, BackendError> {
        self.summary_requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), request.model.clone()));
        match self.summary.lock().unwrap().clone() {
            Some(Ok(summary)) => Ok(summary),
            Some(Err(status)) => Err(BackendError::Status {
                status,
                body: String::new(),
            }),
            None => Ok(String::new()),
        }
    }

    async fn list_models(&self) -> Result<ModelCatalog, BackendError> {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "OpenAI".into(),
            vec![ModelEntry {
                code: "gpt-4o".into(),
                name: "GPT-4o".into(),
            }],
        );
        Ok(catalog)
    }

    async fn fetch_sessions(&self) -> Result<Vec<SessionRecord>, BackendError> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn add_session(&self) -> Result<SessionRecord, BackendError> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("new-{next}")
        };
        let record = session_record(&id, "New Chat");
        self.sessions.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn remove_session(&self, session_id: &str) -> Result<Vec<SessionRecord>, BackendError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|s| s.session_id != session_id);
        Ok(sessions.clone())
    }

    async fn update_model_preset(
        &self,
        session_id: &str,
        update: &UpdateModelPresetRequest,
    ) -> Result<(), BackendError> {
        self.record_update(
            "update_model_preset",
            session_id,
            serde_json::to_value(update).unwrap(),
        )
    }

    async fn update_summarization_enable(
        &self,
        session_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        self.record_update(
            "update_summarization_enable",
            session_id,
            serde_json::json!({ "enable_summarization": enabled }),
        )
    }

    async fn update_session_settings(
        &self,
        session_id: &str,
        settings: &SessionSettingsRecord,
    ) -> Result<(), BackendError> {
        self.record_update(
            "update_session_settings",
            session_id,
            serde_json::to_value(settings).unwrap(),
        )
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), BackendError> {
        self.record_update("update_title", session_id, serde_json::json!({ "title": title }))
    }
}
