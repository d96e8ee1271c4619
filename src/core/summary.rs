use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::backend::{BackendError, ChatBackend};
use crate::api::SummaryRequest;
use crate::core::providers::{resolve_summary_route, RouteError};
use crate::core::store::{ConversationStore, StoreError};

#[derive(Debug)]
pub enum SummaryError {
    Route(RouteError),
    Backend(BackendError),
    Store(StoreError),
}

impl fmt::Display for SummaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryError::Route(err) => write!(f, "{err}"),
            SummaryError::Backend(err) => write!(f, "summary request failed: {err}"),
            SummaryError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SummaryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SummaryError::Route(err) => Some(err),
            SummaryError::Backend(err) => Some(err),
            SummaryError::Store(err) => Some(err),
        }
    }
}

impl From<RouteError> for SummaryError {
    fn from(err: RouteError) -> Self {
        SummaryError::Route(err)
    }
}

impl From<BackendError> for SummaryError {
    fn from(err: BackendError) -> Self {
        SummaryError::Backend(err)
    }
}

impl From<StoreError> for SummaryError {
    fn from(err: StoreError) -> Self {
        SummaryError::Store(err)
    }
}

/// Clears the session's loading flag when dropped, including when the
/// request future itself is dropped.
struct LoadingGuard {
    store: Arc<Mutex<ConversationStore>>,
    session_id: String,
}

impl LoadingGuard {
    async fn engage(store: Arc<Mutex<ConversationStore>>, session_id: &str) -> Self {
        store.lock().await.set_summary_loading(session_id, true);
        Self {
            store,
            session_id: session_id.to_string(),
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if let Ok(mut store) = self.store.try_lock() {
            store.set_summary_loading(&self.session_id, false);
            return;
        }
        // Lock is contended; finish the cleanup on the runtime.
        let store = Arc::clone(&self.store);
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    store.lock().await.set_summary_loading(&session_id, false);
                });
            }
            Err(_) => warn!(session_id = %session_id, "no runtime to clear summary loading flag"),
        }
    }
}

/// Asks the backend to summarize a session and stores the result.
#[derive(Clone)]
pub struct SummaryRequester {
    backend: Arc<dyn ChatBackend>,
    store: Arc<Mutex<ConversationStore>>,
}

impl SummaryRequester {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<Mutex<ConversationStore>>) -> Self {
        Self { backend, store }
    }

    pub async fn request(&self, session_id: &str) -> Result<String, SummaryError> {
        let (turns, settings) = {
            let store = self.store.lock().await;
            let session = store
                .session(session_id)
                .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
            (session.messages.clone(), session.settings.clone())
        };
        let route = resolve_summary_route(settings.summary_model())?;

        let _loading = LoadingGuard::engage(Arc::clone(&self.store), session_id).await;
        debug!(session_id, endpoint = %route.endpoint, turns = turns.len(), "summarizing");

        let request = SummaryRequest {
            conversation: &turns,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            model: route.model,
        };
        let summary = self
            .backend
            .summarize(&route.endpoint, session_id, &request)
            .await?;

        self.store.lock().await.set_summary(session_id, &summary)?;
        Ok(summary)
    }
}
