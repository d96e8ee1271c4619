//! Session, turn, and settings data model.
//!
//! These types are plain data. All mutation during streaming goes through
//! [`crate::core::store::ConversationStore`].

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::api::{MessageRecord, SessionRecord, SessionSettingsRecord};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PERSONA: &str = "professional";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A file captured at send time. The content is never re-read from disk.
///
/// Attachments loaded from the backend carry the server-side `file_path`
/// and no content; the backend needs that key back on every resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Base64-encoded file bytes.
    #[serde(default)]
    pub content: String,
}

impl Attachment {
    pub fn from_bytes(name: impl Into<String>, path: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(&name).to_string();
        Self {
            name,
            path: path.into(),
            file_path: None,
            size: bytes.len() as u64,
            mime_type,
            content: BASE64.encode(bytes),
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, path.display().to_string(), &bytes))
    }

    pub fn decode_content(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.content.as_bytes())
    }
}

fn guess_mime_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

/// One user/assistant exchange.
///
/// `model`, `temperature`, `max_tokens` and `persona` are a snapshot of the
/// session settings at send time; later settings edits leave them untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub user_text: String,
    pub ai_response: String,
    pub attachments: Vec<Attachment>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub persona: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Set while a stream is writing into this turn.
    #[serde(skip)]
    pub streaming: bool,
}

impl Turn {
    pub fn new(
        session_id: impl Into<String>,
        user_text: impl Into<String>,
        attachments: Vec<Attachment>,
        settings: &Settings,
    ) -> Self {
        Self {
            user_text: user_text.into(),
            ai_response: String::new(),
            attachments,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            persona: settings.persona.clone(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            streaming: false,
        }
    }

    /// The response as it should be shown, with the in-progress marker
    /// appended while streaming.
    pub fn display_response(&self, marker: &str) -> String {
        if self.streaming {
            format!("{}{}", self.ai_response, marker)
        } else {
            self.ai_response.clone()
        }
    }

    fn from_record(session_id: &str, record: MessageRecord, settings: &Settings) -> Self {
        let attachments = decode_attachments(record.attachments);
        let timestamp = record
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            user_text: record.user_text,
            ai_response: record.ai_response,
            attachments,
            model: record.model.unwrap_or_else(|| settings.model.clone()),
            temperature: record.temperature.unwrap_or(settings.temperature),
            max_tokens: record.max_tokens.unwrap_or(settings.max_tokens),
            persona: record.persona.unwrap_or_else(|| settings.persona.clone()),
            timestamp,
            session_id: session_id.to_string(),
            streaming: false,
        }
    }
}

/// Backend timestamps are naive ISO strings; RFC 3339 is accepted as well.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Stored attachments arrive as a JSON-encoded string and need a second
/// decode pass. Anything unreadable becomes an empty list.
fn decode_attachments(raw: Option<Value>) -> Vec<Attachment> {
    let value = match raw {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to parse attachments JSON");
                return Vec::new();
            }
        },
        Some(value) => value,
    };

    serde_json::from_value(value).unwrap_or_else(|err| {
        warn!(error = %err, "unexpected attachments shape");
        Vec::new()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub temperature: f64,
    pub max_tokens: u32,
    pub persona: String,
    pub model: String,
    pub model_preset1: String,
    pub model_preset2: String,
    pub enable_summarization: bool,
    /// Synced with the backend, which fills in its own default.
    pub summarizing_model: Option<String>,
    /// True once a summarizing model was chosen locally. Until then
    /// summaries use the chat model.
    pub summarizing_model_pinned: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            persona: DEFAULT_PERSONA.to_string(),
            model: DEFAULT_MODEL.to_string(),
            model_preset1: DEFAULT_MODEL.to_string(),
            model_preset2: DEFAULT_MODEL.to_string(),
            enable_summarization: false,
            summarizing_model: None,
            summarizing_model_pinned: false,
        }
    }
}

impl Settings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(temperature) = patch.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = patch.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(persona) = &patch.persona {
            self.persona = persona.clone();
        }
        if let Some(model) = &patch.model {
            self.model = model.clone();
        }
        if let Some(preset) = &patch.model_preset1 {
            self.model_preset1 = preset.clone();
        }
        if let Some(preset) = &patch.model_preset2 {
            self.model_preset2 = preset.clone();
        }
        if let Some(enabled) = patch.enable_summarization {
            self.enable_summarization = enabled;
        }
        if let Some(model) = &patch.summarizing_model {
            self.summarizing_model = Some(model.clone());
            self.summarizing_model_pinned = true;
        }
    }

    /// Model used for summaries: a locally chosen summarizing model, else
    /// the chat model.
    pub fn summary_model(&self) -> &str {
        self.summarizing_model
            .as_deref()
            .filter(|model| self.summarizing_model_pinned && !model.trim().is_empty())
            .unwrap_or(&self.model)
    }

    pub fn to_record(&self) -> SessionSettingsRecord {
        SessionSettingsRecord {
            model_preset1: self.model_preset1.clone(),
            model_preset2: self.model_preset2.clone(),
            model: self.model.clone(),
            summarizing_model: self.summarizing_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            persona: self.persona.clone(),
        }
    }
}

/// A partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub persona: Option<String>,
    pub model: Option<String>,
    pub model_preset1: Option<String>,
    pub model_preset2: Option<String>,
    pub enable_summarization: Option<bool>,
    pub summarizing_model: Option<String>,
}

/// Per-session streaming lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    Cancelling,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamState::Idle => "idle",
            StreamState::Streaming => "streaming",
            StreamState::Cancelling => "cancelling",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub messages: Vec<Turn>,
    pub summary: String,
    pub settings: Settings,
    pub stream_state: StreamState,
}

impl Session {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
            summary: String::new(),
            settings: Settings::default(),
            stream_state: StreamState::Idle,
        }
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.messages.last()
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        let defaults = Settings::default();
        let settings = Settings {
            temperature: record.temperature.unwrap_or(defaults.temperature),
            max_tokens: record.max_tokens.unwrap_or(defaults.max_tokens),
            persona: record.persona.unwrap_or(defaults.persona),
            model: record.model.unwrap_or(defaults.model),
            model_preset1: record.model_preset1.unwrap_or(defaults.model_preset1),
            model_preset2: record.model_preset2.unwrap_or(defaults.model_preset2),
            enable_summarization: record.enable_summarization.unwrap_or(false),
            summarizing_model: record.summarizing_model,
            summarizing_model_pinned: false,
        };
        let id = record.session_id;
        let messages = record
            .messages
            .into_iter()
            .map(|message| Turn::from_record(&id, message, &settings))
            .collect();
        let title = record
            .title
            .or(record.name)
            .unwrap_or_else(|| "Untitled".to_string());

        Self {
            id,
            title,
            messages,
            summary: record.summary.unwrap_or_default(),
            settings,
            stream_state: StreamState::Idle,
        }
    }
}
