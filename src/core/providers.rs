//! Model-to-provider routing.
//!
//! Model identifiers are dispatched by prefix against an ordered table. The
//! first matching row wins, so a more specific prefix must be listed before
//! any prefix it extends.

use std::error::Error;
use std::fmt;

const ANTHROPIC_MODEL_SUFFIX: &str = "-latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    HuggingFace,
    Mistral,
    Upstage,
}

impl Provider {
    /// Tag used to build backend endpoint names.
    pub fn tag(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::HuggingFace => "huggingface",
            Provider::Mistral => "mistral",
            Provider::Upstage => "upstage",
        }
    }

    pub fn stream_endpoint(self) -> String {
        format!("{}_stream", self.tag())
    }

    pub fn summary_endpoint(self) -> String {
        format!("{}_summary", self.tag())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Key under which the role-tagged history is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Conversation,
    Messages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelNormalization {
    Passthrough,
    /// Lower-case, whitespace runs become a single hyphen.
    Hyphenated,
    /// Hyphenated, dots become hyphens, and the `-latest` suffix is ensured.
    HyphenatedLatest,
}

impl ModelNormalization {
    pub fn apply(self, model: &str) -> String {
        match self {
            ModelNormalization::Passthrough => model.to_string(),
            ModelNormalization::Hyphenated => hyphenate(model),
            ModelNormalization::HyphenatedLatest => {
                let mut normalized = hyphenate(model).replace('.', "-");
                // Appending unconditionally would turn "-latest" into "-latest-latest".
                if !normalized.ends_with(ANTHROPIC_MODEL_SUFFIX) {
                    normalized.push_str(ANTHROPIC_MODEL_SUFFIX);
                }
                normalized
            }
        }
    }
}

fn hyphenate(model: &str) -> String {
    let lower = model.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut in_whitespace = false;
    for ch in lower.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('-');
            }
            in_whitespace = true;
        } else {
            out.push(ch);
            in_whitespace = false;
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderRoute {
    pub prefix: &'static str,
    pub provider: Provider,
    pub shape: PayloadShape,
    pub normalization: ModelNormalization,
}

pub const STREAM_ROUTES: &[ProviderRoute] = &[
    ProviderRoute {
        prefix: "gpt-4o",
        provider: Provider::OpenAi,
        shape: PayloadShape::Conversation,
        normalization: ModelNormalization::Passthrough,
    },
    ProviderRoute {
        prefix: "claude",
        provider: Provider::Anthropic,
        shape: PayloadShape::Messages,
        // Adds "-latest" only when the id does not already end with it.
        normalization: ModelNormalization::HyphenatedLatest,
    },
    ProviderRoute {
        prefix: "gemini",
        provider: Provider::Gemini,
        shape: PayloadShape::Messages,
        normalization: ModelNormalization::Hyphenated,
    },
    ProviderRoute {
        prefix: "huggingface",
        provider: Provider::HuggingFace,
        shape: PayloadShape::Messages,
        normalization: ModelNormalization::Passthrough,
    },
    ProviderRoute {
        prefix: "mistral",
        provider: Provider::Mistral,
        shape: PayloadShape::Conversation,
        normalization: ModelNormalization::Passthrough,
    },
    ProviderRoute {
        prefix: "upstage",
        provider: Provider::Upstage,
        shape: PayloadShape::Conversation,
        normalization: ModelNormalization::Passthrough,
    },
];

/// Providers with a summary endpoint. Upstage has none.
pub const SUMMARY_ROUTES: &[(&str, Provider)] = &[
    ("gpt-4o", Provider::OpenAi),
    ("claude", Provider::Anthropic),
    ("gemini", Provider::Gemini),
    ("huggingface", Provider::HuggingFace),
    ("mistral", Provider::Mistral),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub provider: Provider,
    pub endpoint: String,
    pub shape: PayloadShape,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    UnsupportedModel(String),
    UnsupportedSummaryModel(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::UnsupportedModel(model) => write!(f, "Unsupported model: {model}"),
            RouteError::UnsupportedSummaryModel(model) => {
                write!(f, "Unsupported model for summary: {model}")
            }
        }
    }
}

impl Error for RouteError {}

/// Resolves the streaming endpoint, payload shape, and normalized model name.
pub fn resolve_stream_route(model: &str) -> Result<ResolvedRoute, RouteError> {
    let route = STREAM_ROUTES
        .iter()
        .find(|route| model.starts_with(route.prefix))
        .ok_or_else(|| RouteError::UnsupportedModel(model.to_string()))?;

    Ok(ResolvedRoute {
        provider: route.provider,
        endpoint: route.provider.stream_endpoint(),
        shape: route.shape,
        model: route.normalization.apply(model),
    })
}

/// Resolves the summary endpoint. Summaries always send the model id as-is
/// under the `conversation` key.
pub fn resolve_summary_route(model: &str) -> Result<ResolvedRoute, RouteError> {
    let provider = SUMMARY_ROUTES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, provider)| *provider)
        .ok_or_else(|| RouteError::UnsupportedSummaryModel(model.to_string()))?;

    Ok(ResolvedRoute {
        provider,
        endpoint: provider.summary_endpoint(),
        shape: PayloadShape::Conversation,
        model: model.to_string(),
    })
}
