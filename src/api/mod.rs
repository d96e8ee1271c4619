use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::providers::PayloadShape;
use crate::core::session::{Attachment, Turn};

pub mod backend;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// One role-tagged entry of the history sent to a streaming endpoint.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ConversationEntry {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ConversationEntry {
    /// Flattens a turn list into the alternating user/assistant history.
    /// Assistant entries are only emitted for turns that already have a reply.
    pub fn from_turns(turns: &[Turn]) -> Vec<ConversationEntry> {
        let mut entries = Vec::with_capacity(turns.len() * 2);
        for turn in turns {
            entries.push(ConversationEntry {
                role: ROLE_USER.to_string(),
                content: turn.user_text.clone(),
                attachments: Some(turn.attachments.clone()),
                session_id: turn.session_id.clone(),
                model: None,
                temperature: None,
                max_tokens: None,
                timestamp: None,
            });
            if !turn.ai_response.is_empty() {
                entries.push(ConversationEntry {
                    role: ROLE_ASSISTANT.to_string(),
                    content: turn.ai_response.clone(),
                    attachments: None,
                    session_id: turn.session_id.clone(),
                    model: Some(turn.model.clone()),
                    temperature: Some(turn.temperature),
                    max_tokens: Some(turn.max_tokens),
                    timestamp: Some(turn.timestamp.to_rfc3339()),
                });
            }
        }
        entries
    }
}

/// Body of a `POST /{provider}_stream` call. Exactly one of `conversation`
/// or `messages` is populated, depending on the provider's payload shape.
#[derive(Serialize, Clone, Debug)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Vec<ConversationEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ConversationEntry>>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub model: String,
}

impl ChatRequest {
    pub fn new(
        shape: PayloadShape,
        history: Vec<ConversationEntry>,
        temperature: f64,
        max_tokens: u32,
        model: String,
    ) -> Self {
        let (conversation, messages) = match shape {
            PayloadShape::Conversation => (Some(history), None),
            PayloadShape::Messages => (None, Some(history)),
        };
        Self {
            conversation,
            messages,
            temperature,
            max_tokens,
            model,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

/// Body of a `POST /{provider}_summary` call.
#[derive(Serialize, Debug)]
pub struct SummaryRequest<'a> {
    pub conversation: &'a [Turn],
    pub temperature: f64,
    pub max_tokens: u32,
    pub model: String,
}

#[derive(Deserialize, Debug)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ModelEntry {
    pub code: String,
    pub name: String,
}

/// Provider display name to its ordered model list, as served by `GET /list_models`.
pub type ModelCatalog = BTreeMap<String, Vec<ModelEntry>>;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default)]
    pub user_text: String,
    #[serde(default)]
    pub ai_response: String,
    /// Usually a JSON-encoded string; decoded in a second pass.
    #[serde(default)]
    pub attachments: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_preset1: Option<String>,
    #[serde(default)]
    pub model_preset2: Option<String>,
    #[serde(default)]
    pub enable_summarization: Option<bool>,
    #[serde(default)]
    pub summarizing_model: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionRecord>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UpdateModelPresetRequest {
    pub model_preset1: String,
    pub model_preset2: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_preset_idx: Option<u8>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UpdateSummarizationRequest {
    pub enable_summarization: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettingsRecord {
    pub model_preset1: String,
    pub model_preset2: String,
    pub model: String,
    pub summarizing_model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub persona: String,
}

#[derive(Serialize, Debug)]
pub struct UpdateSessionSettingsRequest<'a> {
    pub session_settings: &'a SessionSettingsRecord,
}

#[derive(Serialize, Debug)]
pub struct UpdateTitleRequest<'a> {
    pub title: &'a str,
}
