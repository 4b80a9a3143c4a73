//! NIV Lab LLM boundary
//!
//! Text generation behind a single trait, [`TextGenerator`], so the tutor
//! features never depend on a concrete vendor client.
//!
//! This crate provides:
//! - request/message types shared by every feature ([`GenerationRequest`], [`Message`])
//! - [`GeminiClient`], a `reqwest` client for the Gemini REST API with
//!   schema-constrained JSON output and SSE streaming
//! - [`ScriptedGenerator`], an in-process generator replaying canned replies
//!
//! Streaming replies are exposed as a [`TextStream`]: an ordered sequence of
//! text fragments that the consumer either drains or cancels by dropping.

mod gemini;
mod scripted;

pub use gemini::{GeminiClient, GeminiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use scripted::{Script, ScriptedGenerator};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Categories of LLM API errors for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl LlmErrorKind {
    /// Classifies an HTTP status code returned by the API.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the GEMINI_API_KEY environment variable",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the LLM service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the LLM provider's status page",
        }
    }
}

/// Errors returned by a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// The API answered with a non-success status.
    #[error("LLM API error ({kind}, HTTP {status}): {message}")]
    Api {
        /// Classified error kind.
        kind: LlmErrorKind,
        /// HTTP status code.
        status: u16,
        /// Message from the API error body, or the raw body.
        message: String,
    },

    /// The request never got an answer.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),

    /// The streamed response broke off.
    #[error("stream interrupted: {0}")]
    Stream(String),

    /// The model returned no text at all.
    #[error("LLM returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Creates an `Api` error, classifying the status code.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            kind: LlmErrorKind::from_status(status),
            status,
            message: message.into(),
        }
    }

    /// The error kind used to pick a suggestion.
    #[must_use]
    pub const fn kind(&self) -> LlmErrorKind {
        match self {
            Self::Api { kind, .. } => *kind,
            Self::Network(_) | Self::Stream(_) => LlmErrorKind::Network,
            Self::MalformedResponse(_) | Self::EmptyResponse => LlmErrorKind::Other,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            LlmErrorKind::RateLimit | LlmErrorKind::Server | LlmErrorKind::Network
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The learner.
    User,
    /// The model.
    Model,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote it.
    pub role: Role,
    /// Markdown text.
    pub content: String,
}

impl Message {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A model turn.
    #[must_use]
    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Everything a generator needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Persona and output rules.
    pub system_instruction: String,
    /// Conversation so far, oldest first. Ends with a user turn.
    pub contents: Vec<Message>,
    /// JSON schema the reply must follow, if structured output is wanted.
    pub response_schema: Option<serde_json::Value>,
}

impl GenerationRequest {
    /// A single-prompt request.
    #[must_use]
    pub fn prompt(system_instruction: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            contents: vec![Message::user(text)],
            response_schema: None,
        }
    }

    /// A multi-turn request.
    #[must_use]
    pub fn conversation(system_instruction: impl Into<String>, contents: Vec<Message>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            contents,
            response_schema: None,
        }
    }

    /// Requests JSON output matching the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Text of the most recent user turn.
    #[must_use]
    pub fn last_user_text(&self) -> Option<&str> {
        self.contents
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

// ============================================================================
// Generator trait
// ============================================================================

/// Ordered stream of text fragments. Dropping it cancels the request.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates a complete reply.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    /// Generates a reply as a stream of fragments, in arrival order.
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, LlmError>;

    /// Model identifier, for logs and health reports.
    fn model(&self) -> &str;
}
