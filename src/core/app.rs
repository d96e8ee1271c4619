//! Chat workflow: send, abort, and settings sync.
//!
//! [`ChatController`] owns the shared [`ConversationStore`] and drives one
//! [`StreamSession`] per send. Stream deltas go through a channel and are
//! applied to the store by the sending task, so nothing outside the store
//! mutates session data.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::backend::{BackendError, ChatBackend};
use crate::api::{ChatRequest, ConversationEntry, ModelCatalog, UpdateModelPresetRequest};
use crate::core::chat_stream::{StreamOutcome, StreamSession};
use crate::core::providers::resolve_stream_route;
use crate::core::session::{Attachment, Session, SettingsPatch, StreamState, Turn};
use crate::core::store::{ConversationStore, StoreError};
use crate::core::summary::{SummaryError, SummaryRequester};

/// Handle of a fire-and-forget backend sync.
pub type SyncHandle = JoinHandle<()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed(String),
    /// Aborted by the user; the turn keeps the partial text.
    Cancelled(String),
    /// The turn's response was replaced by `Error: <message>`.
    Failed(String),
    /// Nothing to send.
    Ignored,
}

#[derive(Debug)]
pub enum ChatError {
    Store(StoreError),
    Backend(BackendError),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Store(err) => write!(f, "{err}"),
            ChatError::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChatError::Store(err) => Some(err),
            ChatError::Backend(err) => Some(err),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::Store(err)
    }
}

impl From<BackendError> for ChatError {
    fn from(err: BackendError) -> Self {
        ChatError::Backend(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetSlot {
    First,
    Second,
}

impl PresetSlot {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(PresetSlot::First),
            2 => Some(PresetSlot::Second),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            PresetSlot::First => 1,
            PresetSlot::Second => 2,
        }
    }
}

#[derive(Clone)]
pub struct ChatController {
    store: Arc<Mutex<ConversationStore>>,
    backend: Arc<dyn ChatBackend>,
    summaries: SummaryRequester,
    // Lock order: `store` before `streams`.
    streams: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn ChatBackend>, store: ConversationStore) -> Self {
        let store = Arc::new(Mutex::new(store));
        Self {
            summaries: SummaryRequester::new(Arc::clone(&backend), Arc::clone(&store)),
            store,
            backend,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    /// Replaces local sessions with the backend's list. Returns the count.
    pub async fn load_sessions(&self) -> Result<usize, ChatError> {
        let records = self.backend.fetch_sessions().await?;
        let sessions: Vec<Session> = records.into_iter().map(Session::from).collect();
        let count = sessions.len();
        self.store.lock().await.replace_sessions(sessions);
        info!(count, "sessions loaded");
        Ok(count)
    }

    pub async fn list_models(&self) -> Result<ModelCatalog, ChatError> {
        Ok(self.backend.list_models().await?)
    }

    pub async fn new_session(&self) -> Result<String, ChatError> {
        let session = Session::from(self.backend.add_session().await?);
        let id = session.id.clone();
        self.store.lock().await.create_session(session);
        Ok(id)
    }

    /// Deletes a session on the backend and adopts the returned list.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), ChatError> {
        {
            let store = self.store.lock().await;
            let state = store
                .stream_state(session_id)
                .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
            if state != StreamState::Idle {
                return Err(StoreError::Busy {
                    session_id: session_id.to_string(),
                    state,
                }
                .into());
            }
        }
        let remaining = self.backend.remove_session(session_id).await?;
        self.store
            .lock()
            .await
            .replace_sessions(remaining.into_iter().map(Session::from).collect());
        Ok(())
    }

    /// Appends a turn and streams the response into it.
    ///
    /// Fails with [`StoreError::Busy`] when the session already has a stream
    /// in flight. Once the turn exists, every failure is reported in the turn
    /// itself and as [`SendOutcome::Failed`].
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome, ChatError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let cancel = CancellationToken::new();
        let (endpoint, request) = {
            let mut store = self.store.lock().await;
            store.begin_stream(session_id)?;
            let settings = store
                .session(session_id)
                .map(|session| session.settings.clone())
                .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
            store.append_turn(session_id, Turn::new(session_id, text, attachments, &settings))?;

            let route = match resolve_stream_route(&settings.model) {
                Ok(route) => route,
                Err(err) => {
                    drop(store);
                    let outcome = self.record_failure(session_id, err.to_string()).await;
                    self.finish(session_id).await;
                    return Ok(outcome);
                }
            };
            let history = store
                .session(session_id)
                .map(|session| ConversationEntry::from_turns(&session.messages))
                .unwrap_or_default();
            let request = ChatRequest::new(
                route.shape,
                history,
                settings.temperature,
                settings.max_tokens,
                route.model,
            );
            self.streams
                .lock()
                .await
                .insert(session_id.to_string(), cancel.clone());
            (route.endpoint, request)
        };

        let outcome = match self.stream_reply(session_id, &endpoint, &request, &cancel).await {
            Ok(StreamOutcome::Completed(text)) => SendOutcome::Completed(text),
            Ok(StreamOutcome::Cancelled(text)) => {
                info!(session_id, chars = text.len(), "streaming aborted by user");
                SendOutcome::Cancelled(text)
            }
            Err(message) => self.record_failure(session_id, message).await,
        };
        self.finish(session_id).await;

        if matches!(outcome, SendOutcome::Completed(_)) && self.summarization_enabled(session_id).await
        {
            if let Err(err) = self.summaries.request(session_id).await {
                warn!(session_id, error = %err, "summary update failed");
            }
        }
        Ok(outcome)
    }

    async fn stream_reply(
        &self,
        session_id: &str,
        endpoint: &str,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, String> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.backend.open_stream(endpoint, session_id, request) => Some(opened),
        };
        let body = match opened {
            Some(opened) => opened.map_err(|err| err.to_string())?,
            None => {
                debug!(session_id, "aborted before the response arrived");
                return Ok(StreamOutcome::Cancelled(String::new()));
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<(String, bool)>();
        let sink = move |text: &str, streaming: bool| {
            let _ = tx.send((text.to_string(), streaming));
        };
        let apply = async {
            while let Some((text, streaming)) = rx.recv().await {
                if let Err(err) = self
                    .store
                    .lock()
                    .await
                    .apply_delta(session_id, &text, streaming)
                {
                    warn!(session_id, error = %err, "dropping stream update");
                }
            }
        };

        let (result, ()) = tokio::join!(StreamSession::new(cancel, sink).run(body), apply);
        result.map_err(|err| err.to_string())
    }

    async fn record_failure(&self, session_id: &str, message: String) -> SendOutcome {
        warn!(session_id, error = %message, "chat request failed");
        let text = format!("Error: {message}");
        if let Err(err) = self.store.lock().await.apply_delta(session_id, &text, false) {
            warn!(session_id, error = %err, "could not record failure");
        }
        SendOutcome::Failed(message)
    }

    async fn finish(&self, session_id: &str) {
        let mut store = self.store.lock().await;
        if let Err(err) = store.finish_stream(session_id) {
            warn!(session_id, error = %err, "could not finish stream");
        }
        self.streams.lock().await.remove(session_id);
    }

    async fn summarization_enabled(&self, session_id: &str) -> bool {
        self.store
            .lock()
            .await
            .session(session_id)
            .is_some_and(|session| session.settings.enable_summarization)
    }

    /// Requests cancellation of the session's stream. Returns false when no
    /// stream was running.
    pub async fn abort(&self, session_id: &str) -> bool {
        let mut store = self.store.lock().await;
        let requested = store.request_cancel(session_id).unwrap_or(false);
        if requested {
            if let Some(token) = self.streams.lock().await.get(session_id) {
                token.cancel();
            }
        }
        requested
    }

    pub async fn summarize(&self, session_id: &str) -> Result<String, SummaryError> {
        self.summaries.request(session_id).await
    }

    /// Sets the summarization flag and syncs it. The local change is rolled
    /// back when the backend rejects it.
    pub async fn set_summarization(&self, session_id: &str, enabled: bool) -> Result<(), ChatError> {
        let patch = SettingsPatch {
            enable_summarization: Some(enabled),
            ..Default::default()
        };
        let previous = self.store.lock().await.update_settings(session_id, &patch)?;

        if let Err(err) = self
            .backend
            .update_summarization_enable(session_id, enabled)
            .await
        {
            warn!(session_id, error = %err, "error updating summarization setting");
            let rollback = SettingsPatch {
                enable_summarization: Some(previous.enable_summarization),
                ..Default::default()
            };
            self.store.lock().await.update_settings(session_id, &rollback)?;
            return Err(err.into());
        }
        Ok(())
    }

    /// Applies a settings edit locally and syncs it in the background.
    /// A failed sync is logged and the local edit is kept.
    pub async fn update_settings(
        &self,
        session_id: &str,
        patch: &SettingsPatch,
    ) -> Result<SyncHandle, ChatError> {
        let record = {
            let mut store = self.store.lock().await;
            store.update_settings(session_id, patch)?;
            store
                .session(session_id)
                .map(|session| session.settings.to_record())
                .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?
        };
        let backend = Arc::clone(&self.backend);
        let id = session_id.to_string();
        Ok(spawn_sync("session settings", session_id, async move {
            backend.update_session_settings(&id, &record).await
        }))
    }

    pub async fn update_presets(
        &self,
        session_id: &str,
        preset1: &str,
        preset2: &str,
    ) -> Result<SyncHandle, ChatError> {
        let patch = SettingsPatch {
            model_preset1: Some(preset1.to_string()),
            model_preset2: Some(preset2.to_string()),
            ..Default::default()
        };
        self.store.lock().await.update_settings(session_id, &patch)?;
        Ok(self.sync_presets(session_id, patch, None))
    }

    /// Switches the session model to one of its presets.
    pub async fn select_preset(
        &self,
        session_id: &str,
        slot: PresetSlot,
    ) -> Result<SyncHandle, ChatError> {
        let settings = {
            let mut store = self.store.lock().await;
            let settings = store
                .session(session_id)
                .map(|session| session.settings.clone())
                .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
            let model = match slot {
                PresetSlot::First => settings.model_preset1.clone(),
                PresetSlot::Second => settings.model_preset2.clone(),
            };
            store.update_settings(
                session_id,
                &SettingsPatch {
                    model: Some(model),
                    ..Default::default()
                },
            )?;
            settings
        };
        let patch = SettingsPatch {
            model_preset1: Some(settings.model_preset1),
            model_preset2: Some(settings.model_preset2),
            ..Default::default()
        };
        Ok(self.sync_presets(session_id, patch, Some(slot)))
    }

    fn sync_presets(
        &self,
        session_id: &str,
        patch: SettingsPatch,
        slot: Option<PresetSlot>,
    ) -> SyncHandle {
        let body = UpdateModelPresetRequest {
            model_preset1: patch.model_preset1.unwrap_or_default(),
            model_preset2: patch.model_preset2.unwrap_or_default(),
            selected_preset_idx: slot.map(PresetSlot::index),
        };
        let backend = Arc::clone(&self.backend);
        let id = session_id.to_string();
        spawn_sync("model preset", session_id, async move {
            backend.update_model_preset(&id, &body).await
        })
    }

    pub async fn set_title(&self, session_id: &str, title: &str) -> Result<SyncHandle, ChatError> {
        self.store.lock().await.set_title(session_id, title)?;
        let backend = Arc::clone(&self.backend);
        let id = session_id.to_string();
        let title = title.to_string();
        Ok(spawn_sync("title", session_id, async move {
            backend.update_title(&id, &title).await
        }))
    }
}

fn spawn_sync<F>(what: &'static str, session_id: &str, call: F) -> SyncHandle
where
    F: Future<Output = Result<(), BackendError>> + Send + 'static,
{
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        match call.await {
            Ok(()) => debug!(session_id = %session_id, what, "synced"),
            Err(err) => warn!(session_id = %session_id, what, error = %err, "sync failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::StoreEvent;
    use crate::utils::test_utils::{
        delta_frame, session_record, sse_body, FakeBackend, StreamScript,
    };
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn controller_with(backend: Arc<FakeBackend>, ids: &[&str]) -> ChatController {
        let mut store = ConversationStore::new();
        for id in ids {
            store.create_session(Session::new(*id, format!("Chat {id}")));
        }
        ChatController::new(backend, store)
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<StoreEvent>,
        pred: impl Fn(&StoreEvent) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if pred(&event) {
                    return;
                }
            }
            panic!("event channel closed");
        })
        .await
        .expect("timed out waiting for store event");
    }

    #[tokio::test]
    async fn send_streams_into_the_new_turn() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(StreamScript::Chunks(vec![sse_body(&["Hel", "lo"])]));
        let controller = controller_with(backend.clone(), &["s1"]);

        let outcome = controller
            .send_message("s1", "hi", Vec::new())
            .await
            .expect("send");
        assert_eq!(outcome, SendOutcome::Completed("Hello".into()));

        let store = controller.store();
        let store = store.lock().await;
        let session = store.session("s1").unwrap();
        assert_eq!(session.stream_state, StreamState::Idle);
        let turn = session.last_turn().unwrap();
        assert_eq!(turn.user_text, "hi");
        assert_eq!(turn.ai_response, "Hello");
        assert!(!turn.streaming);

        let requests = backend.stream_requests();
        assert_eq!(requests.len(), 1);
        let (endpoint, session_id, body) = &requests[0];
        assert_eq!(endpoint, "openai_stream");
        assert_eq!(session_id, "s1");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["conversation"][0]["content"], "hi");
        assert!(body.get("messages").is_none());
    }

    #[tokio::test]
    async fn history_and_normalized_model_follow_the_route() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(StreamScript::Chunks(vec![sse_body(&["first"])]));
        backend.push_stream(StreamScript::Chunks(vec![sse_body(&["second"])]));
        let controller = controller_with(backend.clone(), &["s1"]);

        controller.send_message("s1", "one", Vec::new()).await.unwrap();
        controller
            .update_settings(
                "s1",
                &SettingsPatch {
                    model: Some("claude-3.7-sonnet".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .await
            .unwrap();
        controller.send_message("s1", "two", Vec::new()).await.unwrap();

        let requests = backend.stream_requests();
        let (endpoint, _, body) = &requests[1];
        assert_eq!(endpoint, "anthropic_stream");
        assert_eq!(body["model"], "claude-3-7-sonnet-latest");
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        // The earlier turn keeps the model it was sent with.
        assert_eq!(body["messages"][1]["model"], "gpt-4o-mini");
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let backend = Arc::new(FakeBackend::default());
        let controller = controller_with(backend.clone(), &["s1"]);
        let outcome = controller.send_message("s1", "   ", Vec::new()).await.unwrap();
        assert_eq!(outcome, SendOutcome::Ignored);
        assert!(backend.stream_requests().is_empty());
    }

    #[tokio::test]
    async fn unsupported_model_fails_without_network_call() {
        let backend = Arc::new(FakeBackend::default());
        let controller = controller_with(backend.clone(), &["s1"]);
        controller
            .store()
            .lock()
            .await
            .update_settings(
                "s1",
                &SettingsPatch {
                    model: Some("foo-bar".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = controller.send_message("s1", "hi", Vec::new()).await.unwrap();
        assert_eq!(outcome, SendOutcome::Failed("Unsupported model: foo-bar".into()));
        assert!(backend.stream_requests().is_empty());

        let store = controller.store();
        let store = store.lock().await;
        let session = store.session("s1").unwrap();
        assert_eq!(
            session.last_turn().unwrap().ai_response,
            "Error: Unsupported model: foo-bar"
        );
        assert_eq!(session.stream_state, StreamState::Idle);
    }

    #[tokio::test]
    async fn backend_errors_are_written_into_the_turn() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(StreamScript::Status(500, r#"{"detail":"boom"}"#.into()));
        let controller = controller_with(backend, &["s1"]);

        let outcome = controller.send_message("s1", "hi", Vec::new()).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed(_)));

        let store = controller.store();
        let store = store.lock().await;
        assert_eq!(
            store.session("s1").unwrap().last_turn().unwrap().ai_response,
            "Error: API request failed with status 500: boom"
        );
        assert_eq!(store.stream_state("s1"), Some(StreamState::Idle));
    }

    #[tokio::test]
    async fn second_send_is_rejected_and_abort_keeps_partial_text() {
        let backend = Arc::new(FakeBackend::default());
        let (tx, rx) = mpsc::unbounded_channel();
        backend.push_stream(StreamScript::Channel(rx));
        let controller = controller_with(backend.clone(), &["s1", "s2"]);
        let mut events = controller.store().lock().await.subscribe();

        let sender = controller.clone();
        let handle =
            tokio::spawn(async move { sender.send_message("s1", "hi", Vec::new()).await });

        tx.send(Ok(Bytes::from(delta_frame("A")))).unwrap();
        wait_for(&mut events, |event| {
            matches!(event, StoreEvent::ResponseUpdated { session_id, streaming: true, .. } if session_id == "s1")
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(event, StoreEvent::ResponseUpdated { session_id, streaming: true, .. } if session_id == "s1")
        })
        .await;

        let err = controller
            .send_message("s1", "again", Vec::new())
            .await
            .expect_err("busy");
        assert!(matches!(
            err,
            ChatError::Store(StoreError::Busy {
                state: StreamState::Streaming,
                ..
            })
        ));

        // Switching sessions does not redirect the stream.
        controller.store().lock().await.select_session("s2").unwrap();

        assert!(controller.abort("s1").await);
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled("A".into()));
        drop(tx);

        let store = controller.store();
        let store = store.lock().await;
        let session = store.session("s1").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.last_turn().unwrap().ai_response, "A");
        assert!(!session.last_turn().unwrap().streaming);
        assert_eq!(session.stream_state, StreamState::Idle);
        assert!(store.session("s2").unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn abort_while_request_is_opening_is_silent() {
        let backend = Arc::new(FakeBackend::default());
        let release = Arc::new(Notify::new());
        backend.push_stream(StreamScript::Held {
            release: release.clone(),
            then: Box::new(StreamScript::Status(500, "late".into())),
        });
        let controller = controller_with(backend.clone(), &["s1"]);
        let mut events = controller.store().lock().await.subscribe();

        let sender = controller.clone();
        let handle =
            tokio::spawn(async move { sender.send_message("s1", "hi", Vec::new()).await });
        wait_for(&mut events, |event| {
            matches!(event, StoreEvent::TurnAppended { session_id, .. } if session_id == "s1")
        })
        .await;

        assert!(controller.abort("s1").await);
        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("send should end without waiting for the response")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled(String::new()));
        release.notify_one();

        let store = controller.store();
        let store = store.lock().await;
        let session = store.session("s1").unwrap();
        let turn = session.last_turn().unwrap();
        assert_eq!(turn.ai_response, "");
        assert!(!turn.streaming);
        assert_eq!(session.stream_state, StreamState::Idle);
    }

    #[tokio::test]
    async fn abort_without_stream_is_a_no_op() {
        let controller = controller_with(Arc::new(FakeBackend::default()), &["s1"]);
        assert!(!controller.abort("s1").await);
        assert!(!controller.abort("missing").await);
    }

    #[tokio::test]
    async fn completed_send_runs_summary_when_enabled() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_stream(StreamScript::Chunks(vec![sse_body(&["ok"])]));
        backend.set_summary(Ok("# Chat Summary\n- ok".into()));
        let controller = controller_with(backend.clone(), &["s1"]);
        controller.set_summarization("s1", true).await.unwrap();

        controller.send_message("s1", "hi", Vec::new()).await.unwrap();

        assert_eq!(
            backend.summary_calls(),
            vec![("openai_summary".to_string(), "gpt-4o-mini".to_string())]
        );
        let store = controller.store();
        let store = store.lock().await;
        assert_eq!(store.session("s1").unwrap().summary, "# Chat Summary\n- ok");
        assert!(!store.is_summarizing("s1"));
    }

    #[tokio::test]
    async fn summarization_toggle_rolls_back_on_failure() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_updates(true);
        let controller = controller_with(backend.clone(), &["s1"]);

        let err = controller.set_summarization("s1", true).await.expect_err("fails");
        assert!(matches!(err, ChatError::Backend(_)));
        let store = controller.store();
        assert!(
            !store
                .lock()
                .await
                .session("s1")
                .unwrap()
                .settings
                .enable_summarization
        );
    }

    #[tokio::test]
    async fn other_settings_are_kept_when_sync_fails() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_updates(true);
        let controller = controller_with(backend.clone(), &["s1"]);

        controller
            .update_settings(
                "s1",
                &SettingsPatch {
                    temperature: Some(0.2),
                    persona: Some("friendly".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .await
            .unwrap();

        let calls = backend.update_calls();
        assert_eq!(calls[0].0, "update_session_settings");
        assert_eq!(calls[0].2["temperature"], 0.2);
        let store = controller.store();
        let settings = store.lock().await.session("s1").unwrap().settings.clone();
        assert_eq!(settings.temperature, 0.2);
        assert_eq!(settings.persona, "friendly");
    }

    #[tokio::test]
    async fn selecting_a_preset_switches_model_and_reports_index() {
        let backend = Arc::new(FakeBackend::default());
        let controller = controller_with(backend.clone(), &["s1"]);
        controller
            .update_presets("s1", "gpt-4o", "gemini-2.0-flash")
            .await
            .unwrap()
            .await
            .unwrap();

        controller
            .select_preset("s1", PresetSlot::Second)
            .await
            .unwrap()
            .await
            .unwrap();

        let store = controller.store();
        assert_eq!(
            store.lock().await.session("s1").unwrap().settings.model,
            "gemini-2.0-flash"
        );
        let calls = backend.update_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].2.get("selected_preset_idx").is_none());
        assert_eq!(calls[1].2["selected_preset_idx"], 2);
        assert_eq!(calls[1].2["model_preset2"], "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn session_lifecycle_round_trips_through_backend() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(vec![session_record("a", "First"), session_record("b", "Second")]);
        let controller = controller_with(backend.clone(), &[]);

        assert_eq!(controller.load_sessions().await.unwrap(), 2);
        let created = controller.new_session().await.unwrap();
        {
            let store = controller.store();
            let store = store.lock().await;
            assert_eq!(store.sessions().len(), 3);
            assert_eq!(store.current_session_id(), Some(created.as_str()));
        }

        controller.remove_session(&created).await.unwrap();
        controller.set_title("a", "Renamed").await.unwrap().await.unwrap();

        let store = controller.store();
        let store = store.lock().await;
        let ids: Vec<&str> = store.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.current_session_id(), Some("b"));
        assert_eq!(store.session("a").unwrap().title, "Renamed");
    }
}
