//! HTTP API for NIV Lab.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Service status and LLM availability
//! - `POST /api/waveform` - Derive curves from settings (JSON)
//! - `GET /api/waveform.svg` - Derive curves and render them as SVG
//! - `POST /api/advice` - Expert advice on settings
//! - `POST /api/case` - Generate a clinical case (`?theme=N` optional)
//! - `GET /ws/chat` - Streaming chat over WebSocket (see [`crate::websocket`])
//!
//! # Example
//!
//! ```no_run
//! use niv_tutor::{create_router, AppState, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState::from_config(Config::default())?;
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use niv_llm::{GeminiClient, TextGenerator};
use niv_waveform::{map_waveform, svg::SvgChart, Profile, Settings, Waveform};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::advice::{AdviceService, ADVICE_ERROR_MESSAGE};
use crate::case::{pick_theme, CaseService, ClinicalCase, CASE_ERROR_MESSAGE, THEMES};
use crate::error::{Result, TutorError};
use crate::{websocket, Config};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: String,
    /// Whether an API key is configured.
    pub llm_available: bool,
    /// Model in use, when available.
    pub model: Option<String>,
}

/// Response body for `POST /api/advice`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceResponse {
    /// Markdown advice.
    pub advice: String,
}

/// Query string for `POST /api/case`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseQuery {
    /// Zero-based theme index; random when absent.
    pub theme: Option<usize>,
}

/// Query string for `GET /api/waveform.svg`. Missing fields keep defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformQuery {
    /// Patient profile.
    pub profile: Option<Profile>,
    /// PEEP, cmH2O.
    pub peep: Option<u32>,
    /// Pressure support, cmH2O.
    pub pressure_support: Option<u32>,
    /// Respiratory rate, breaths/min.
    pub respiratory_rate: Option<u32>,
    /// Rise time, milliseconds.
    pub rise_time_ms: Option<u32>,
}

impl WaveformQuery {
    /// Applies the given fields over the default settings.
    #[must_use]
    pub fn into_settings(self) -> Settings {
        let defaults = Settings::default();
        Settings {
            profile: self.profile.unwrap_or(defaults.profile),
            peep: self.peep.unwrap_or(defaults.peep),
            pressure_support: self.pressure_support.unwrap_or(defaults.pressure_support),
            respiratory_rate: self.respiratory_rate.unwrap_or(defaults.respiratory_rate),
            rise_time_ms: self.rise_time_ms.unwrap_or(defaults.rise_time_ms),
        }
    }
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Text generator; `None` runs LLM features in degraded mode.
    pub generator: Option<Arc<dyn TextGenerator>>,
}

impl AppState {
    /// Creates a state with an explicit generator.
    #[must_use]
    pub fn new(config: Config, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { config, generator }
    }

    /// Creates a state, building a Gemini client when an API key is set.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Llm` if the HTTP client cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let generator: Option<Arc<dyn TextGenerator>> = match config.gemini_config() {
            Some(gemini) => {
                info!(model = %gemini.model, "Gemini client configured");
                Some(Arc::new(GeminiClient::new(gemini)?))
            }
            None => {
                warn!("No API key found; expert features run in degraded mode");
                None
            }
        };
        Ok(Self::new(config, generator))
    }

    /// Clinical case service over this state's generator.
    #[must_use]
    pub fn cases(&self) -> CaseService {
        CaseService::new(self.generator.clone())
    }

    /// Advice service over this state's generator.
    #[must_use]
    pub fn advice(&self) -> AdviceService {
        AdviceService::new(self.generator.clone())
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("model", &self.generator.as_ref().map(|g| g.model()))
            .finish()
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Maps a tutor error, showing `user_message` for LLM failures.
    fn from_tutor(err: &TutorError, user_message: &str) -> Self {
        let (status, message) = match err {
            TutorError::InvalidSettings(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            TutorError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            TutorError::GenerationFailed(_) | TutorError::Llm(_) => {
                (StatusCode::BAD_GATEWAY, user_message.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        Self { status, message }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        Self::from_tutor(&err, &err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// Routes live under `/api`, the chat socket at `/ws/chat`; CORS is open
/// and every request is traced.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        .route("/waveform", post(handle_waveform))
        .route("/waveform.svg", get(handle_waveform_svg))
        .route("/advice", post(handle_advice))
        .route("/case", post(handle_case));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws/chat", get(websocket::chat_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        llm_available: state.generator.is_some(),
        model: state.generator.as_ref().map(|g| g.model().to_string()),
    })
}

/// Handler for `POST /api/waveform`.
async fn handle_waveform(
    Json(settings): Json<Settings>,
) -> std::result::Result<Json<Waveform>, ApiError> {
    settings.validate().map_err(TutorError::from)?;
    Ok(Json(map_waveform(&settings)))
}

/// Handler for `GET /api/waveform.svg`.
async fn handle_waveform_svg(
    Query(query): Query<WaveformQuery>,
) -> std::result::Result<Response, ApiError> {
    let settings = query.into_settings();
    settings.validate().map_err(TutorError::from)?;
    let waveform = map_waveform(&settings);
    let svg = SvgChart::new(&waveform)
        .with_title(format!(
            "Profil {} - PEP {} / AI {} / FR {} / pente {} ms",
            settings.profile,
            settings.peep,
            settings.pressure_support,
            settings.respiratory_rate,
            settings.rise_time_ms
        ))
        .render();
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

/// Handler for `POST /api/advice`.
async fn handle_advice(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> std::result::Result<Json<AdviceResponse>, ApiError> {
    settings.validate().map_err(TutorError::from)?;
    let advice = state
        .advice()
        .advise(&settings)
        .await
        .map_err(|e| ApiError::from_tutor(&e, ADVICE_ERROR_MESSAGE))?;
    Ok(Json(AdviceResponse { advice }))
}

/// Handler for `POST /api/case`.
async fn handle_case(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CaseQuery>,
) -> std::result::Result<Json<ClinicalCase>, ApiError> {
    let theme = pick_theme(query.theme).ok_or_else(|| {
        ApiError::bad_request(format!(
            "theme must be between 0 and {}",
            THEMES.len() - 1
        ))
    })?;
    let case = state
        .cases()
        .generate_for(theme)
        .await
        .map_err(|e| ApiError::from_tutor(&e, CASE_ERROR_MESSAGE))?;
    Ok(Json(case))
}
