//! NIV Lab Tutor
//!
//! Learning features built around the waveform sandbox: clinical case
//! quizzes, debounced expert advice, streaming chat, and the HTTP and
//! WebSocket API that serves them.

pub mod advice;
pub mod api;
pub mod case;
pub mod chat;
pub mod config;
pub mod debounce;
pub mod error;
pub mod request_state;
pub mod websocket;

pub use advice::{AdvicePanel, AdviceService};
pub use api::{
    create_router, AdviceResponse, AppState, CaseQuery, ErrorResponse, HealthResponse,
    WaveformQuery,
};
pub use case::{
    pick_theme, CaseOption, CaseQuiz, CaseService, ClinicalCase, Feedback, OptionVerdict, THEMES,
};
pub use chat::{ChatMessage, ChatSession};
pub use config::{Config, ServerConfig};
pub use debounce::Debouncer;
pub use error::{Result, TutorError};
pub use request_state::RequestState;
pub use websocket::ChatEvent;
