//! Error types for the NIV Lab tutor.
//!
//! Each variant carries an actionable suggestion so that CLI and HTTP
//! surfaces can show the learner (or operator) what to do next.

use std::path::PathBuf;

use niv_llm::LlmError;
use niv_waveform::SettingsError;

/// A specialized `Result` type for tutor operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur in tutor features.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your niv.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Input Errors
    // ========================================================================
    /// Ventilator settings outside the simulator's ranges.
    #[error("Invalid ventilator settings: {0}\n\nSuggestion: Stay within the simulator's ranges (PEEP 0-20, PS 0-25, rate 8-30, rise 100-600 ms by 50)")]
    InvalidSettings(#[from] SettingsError),

    /// Chat message was blank.
    #[error("Message is empty\n\nSuggestion: Type a question before sending")]
    EmptyMessage,

    /// Quiz answer id not among the case's options.
    #[error("Unknown answer option '{0}'\n\nSuggestion: Pick one of the listed option ids (A, B, C, D)")]
    UnknownOption(String),

    /// Quiz submitted before an option was chosen.
    #[error("No answer selected\n\nSuggestion: Select an option before submitting")]
    NoSelection,

    /// A chat reply is still streaming.
    #[error("A reply is already being written\n\nSuggestion: Wait for the current answer to finish")]
    ChatBusy,

    // ========================================================================
    // LLM Errors
    // ========================================================================
    /// No API key configured; LLM features run in degraded mode.
    #[error("The expert service is not available: no API key configured\n\nSuggestion: Set GEMINI_API_KEY (or API_KEY) in the environment")]
    ServiceUnavailable,

    /// The model answered, but not with a usable result.
    #[error("Generation failed: {0}\n\nSuggestion: Retry; the model occasionally returns malformed output")]
    GenerationFailed(String),

    /// The LLM call itself failed.
    #[error("{0}\n\nSuggestion: {suggestion}", suggestion = .0.kind().suggestion())]
    Llm(#[from] LlmError),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `GenerationFailed` error.
    #[must_use]
    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed(message.into())
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if the same request may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::GenerationFailed(_) | Self::ChatBusy => true,
            Self::Llm(err) => err.is_transient(),
            _ => false,
        }
    }
}
