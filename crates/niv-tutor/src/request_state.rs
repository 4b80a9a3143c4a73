//! Lifecycle of an asynchronous request shown to the learner.
//!
//! A request is exactly one of idle, loading, succeeded or failed, so a
//! panel can never show a spinner and an error at the same time.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// State of one asynchronous request.
///
/// Transitions:
/// - any state -> `Loading` via [`begin`](Self::begin)
/// - `Loading` -> `Success` via [`succeed`](Self::succeed)
/// - `Loading` -> `Error` via [`fail`](Self::fail)
/// - any state -> `Idle` via [`reset`](Self::reset)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RequestState<T> {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// Waiting for the answer.
    Loading,
    /// Answer received.
    Success(T),
    /// Request failed; holds the message to display.
    Error(String),
}

impl<T> RequestState<T> {
    /// Starts (or restarts) a request, dropping any previous outcome.
    pub fn begin(&mut self) {
        *self = Self::Loading;
    }

    /// Records the answer of the pending request.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidStateTransition` unless loading.
    pub fn succeed(&mut self, value: T) -> Result<()> {
        if !self.is_loading() {
            return Err(TutorError::invalid_transition(self.name(), "success"));
        }
        *self = Self::Success(value);
        Ok(())
    }

    /// Records the failure of the pending request.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidStateTransition` unless loading.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        if !self.is_loading() {
            return Err(TutorError::invalid_transition(self.name(), "error"));
        }
        *self = Self::Error(message.into());
        Ok(())
    }

    /// Returns to idle.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }

    /// Returns `true` while waiting for an answer.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns `true` once an answer or an error has been recorded.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Error(_))
    }

    /// The successful value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The error message, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Lowercase state name, for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success(_) => "success",
            Self::Error(_) => "error",
        }
    }
}

impl<T> std::fmt::Display for RequestState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
