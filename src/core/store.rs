//! In-memory record of chat sessions.
//!
//! Every mutation is announced to subscribers as a [`StoreEvent`]; rendering
//! code listens on those channels instead of being called from here.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::session::{Session, Settings, SettingsPatch, StreamState, Turn};

pub const DEFAULT_STREAMING_MARKER: &str = "▌";

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    SessionsReplaced,
    SessionCreated { session_id: String },
    SessionSelected { session_id: String },
    TurnAppended { session_id: String, index: usize },
    ResponseUpdated { session_id: String, index: usize, streaming: bool },
    SettingsChanged { session_id: String },
    TitleChanged { session_id: String },
    SummaryChanged { session_id: String },
    SummaryLoading { session_id: String, loading: bool },
    StreamStateChanged { session_id: String, state: StreamState },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownSession(String),
    NoTurns(String),
    Busy { session_id: String, state: StreamState },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownSession(id) => write!(f, "Unknown session: {id}"),
            StoreError::NoTurns(id) => write!(f, "Session {id} has no turns"),
            StoreError::Busy { session_id, state } => {
                write!(f, "Session {session_id} is busy ({state})")
            }
        }
    }
}

impl Error for StoreError {}

pub struct ConversationStore {
    sessions: Vec<Session>,
    current: Option<String>,
    summarizing: HashSet<String>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
    marker: String,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_marker(DEFAULT_STREAMING_MARKER)
    }

    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            sessions: Vec::new(),
            current: None,
            summarizing: HashSet::new(),
            subscribers: Vec::new(),
            marker: marker.into(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: StoreEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session, StoreError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current.as_deref().and_then(|id| self.session(id))
    }

    pub fn streaming_marker(&self) -> &str {
        &self.marker
    }

    /// The last turn's response as it should be displayed.
    pub fn display_response(&self, session_id: &str) -> Option<String> {
        self.session(session_id)
            .and_then(Session::last_turn)
            .map(|turn| turn.display_response(&self.marker))
    }

    /// Replaces the whole session list with an authoritative snapshot.
    ///
    /// Sessions with a stream in flight keep their local copy, since the
    /// snapshot cannot contain the pending turn. The selection falls back to
    /// the last session when the selected one is gone.
    pub fn replace_sessions(&mut self, snapshot: Vec<Session>) {
        let mut in_flight: Vec<Session> = self
            .sessions
            .drain(..)
            .filter(|s| s.stream_state != StreamState::Idle)
            .collect();

        self.sessions = snapshot
            .into_iter()
            .map(|incoming| {
                match in_flight.iter().position(|local| local.id == incoming.id) {
                    Some(pos) => in_flight.swap_remove(pos),
                    None => incoming,
                }
            })
            .collect();

        let selection_valid = self
            .current
            .as_deref()
            .is_some_and(|id| self.sessions.iter().any(|s| s.id == id));
        if !selection_valid {
            self.current = self.sessions.last().map(|s| s.id.clone());
        }
        self.summarizing
            .retain(|id| self.sessions.iter().any(|s| &s.id == id));

        debug!(sessions = self.sessions.len(), "session list replaced");
        self.notify(StoreEvent::SessionsReplaced);
    }

    /// Adds a session and selects it.
    pub fn create_session(&mut self, session: Session) {
        let session_id = session.id.clone();
        self.sessions.push(session);
        self.current = Some(session_id.clone());
        self.notify(StoreEvent::SessionCreated { session_id });
    }

    /// Changes the selected session. A stream in flight keeps targeting the
    /// session it was started for.
    pub fn select_session(&mut self, session_id: &str) -> Result<(), StoreError> {
        self.session_mut(session_id)?;
        self.current = Some(session_id.to_string());
        self.notify(StoreEvent::SessionSelected {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    pub fn append_turn(&mut self, session_id: &str, turn: Turn) -> Result<usize, StoreError> {
        let session = self.session_mut(session_id)?;
        session.messages.push(turn);
        let index = session.messages.len() - 1;
        self.notify(StoreEvent::TurnAppended {
            session_id: session_id.to_string(),
            index,
        });
        Ok(index)
    }

    /// Sets the last turn's response. Never touches any other turn.
    pub fn apply_delta(
        &mut self,
        session_id: &str,
        text: &str,
        still_streaming: bool,
    ) -> Result<(), StoreError> {
        let session = self.session_mut(session_id)?;
        let index = session
            .messages
            .len()
            .checked_sub(1)
            .ok_or_else(|| StoreError::NoTurns(session_id.to_string()))?;
        let turn = &mut session.messages[index];
        turn.ai_response.clear();
        turn.ai_response.push_str(text);
        turn.streaming = still_streaming;

        self.notify(StoreEvent::ResponseUpdated {
            session_id: session_id.to_string(),
            index,
            streaming: still_streaming,
        });
        Ok(())
    }

    /// Applies `patch` and returns the settings as they were before.
    pub fn update_settings(
        &mut self,
        session_id: &str,
        patch: &SettingsPatch,
    ) -> Result<Settings, StoreError> {
        let session = self.session_mut(session_id)?;
        let previous = session.settings.clone();
        session.settings.apply(patch);
        self.notify(StoreEvent::SettingsChanged {
            session_id: session_id.to_string(),
        });
        Ok(previous)
    }

    pub fn set_title(&mut self, session_id: &str, title: &str) -> Result<(), StoreError> {
        self.session_mut(session_id)?.title = title.to_string();
        self.notify(StoreEvent::TitleChanged {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    pub fn set_summary(&mut self, session_id: &str, text: &str) -> Result<(), StoreError> {
        self.session_mut(session_id)?.summary = text.to_string();
        self.notify(StoreEvent::SummaryChanged {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    pub fn set_summary_loading(&mut self, session_id: &str, loading: bool) {
        let changed = if loading {
            self.summarizing.insert(session_id.to_string())
        } else {
            self.summarizing.remove(session_id)
        };
        if changed {
            self.notify(StoreEvent::SummaryLoading {
                session_id: session_id.to_string(),
                loading,
            });
        }
    }

    pub fn is_summarizing(&self, session_id: &str) -> bool {
        self.summarizing.contains(session_id)
    }

    pub fn stream_state(&self, session_id: &str) -> Option<StreamState> {
        self.session(session_id).map(|s| s.stream_state)
    }

    /// Moves an idle session to `Streaming`; any other state is rejected.
    pub fn begin_stream(&mut self, session_id: &str) -> Result<(), StoreError> {
        let session = self.session_mut(session_id)?;
        if session.stream_state != StreamState::Idle {
            return Err(StoreError::Busy {
                session_id: session_id.to_string(),
                state: session.stream_state,
            });
        }
        session.stream_state = StreamState::Streaming;
        self.notify(StoreEvent::StreamStateChanged {
            session_id: session_id.to_string(),
            state: StreamState::Streaming,
        });
        Ok(())
    }

    /// Marks a streaming session as cancelling. Returns false when there was
    /// nothing to cancel.
    pub fn request_cancel(&mut self, session_id: &str) -> Result<bool, StoreError> {
        let session = self.session_mut(session_id)?;
        if session.stream_state != StreamState::Streaming {
            return Ok(false);
        }
        session.stream_state = StreamState::Cancelling;
        self.notify(StoreEvent::StreamStateChanged {
            session_id: session_id.to_string(),
            state: StreamState::Cancelling,
        });
        Ok(true)
    }

    /// Returns the session to `Idle`, dropping any streaming marker left on
    /// the last turn.
    pub fn finish_stream(&mut self, session_id: &str) -> Result<(), StoreError> {
        let session = self.session_mut(session_id)?;
        let cleared_marker = match session.messages.last_mut() {
            Some(turn) if turn.streaming => {
                turn.streaming = false;
                Some(session.messages.len() - 1)
            }
            _ => None,
        };
        session.stream_state = StreamState::Idle;

        if let Some(index) = cleared_marker {
            self.notify(StoreEvent::ResponseUpdated {
                session_id: session_id.to_string(),
                index,
                streaming: false,
            });
        }
        self.notify(StoreEvent::StreamStateChanged {
            session_id: session_id.to_string(),
            state: StreamState::Idle,
        });
        Ok(())
    }
}
