//! Gemini REST client.
//!
//! This module provides [`GeminiClient`], a [`TextGenerator`] backed by the
//! Gemini `generateContent` and `streamGenerateContent` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sse_stream::SseStream;
use tracing::{debug, info, instrument, warn};

use crate::{GenerationRequest, LlmError, Message, Role, TextGenerator, TextStream};

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default Gemini API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Connection settings for [`GeminiClient`].
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Model name, e.g. `gemini-2.5-flash`.
    pub model: String,
    /// API root, without trailing slash.
    pub base_url: String,
    /// Whole-request timeout for non-streaming calls.
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Creates a config for the default model and endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// The key never reaches logs.
impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// [`TextGenerator`] talking to the Gemini REST API.
///
/// # Example
///
/// ```no_run
/// use niv_llm::{GeminiClient, GeminiConfig, GenerationRequest, TextGenerator};
///
/// # async fn example() -> Result<(), niv_llm::LlmError> {
/// let client = GeminiClient::new(GeminiConfig::new("my-key"))?;
/// let request = GenerationRequest::prompt("Tu es un expert en VNI.", "Qu'est-ce que la PEP ?");
/// let answer = client.generate(&request).await?;
/// println!("{answer}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Network`] if the TLS backend cannot be initialised.
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        // Streams stay open for as long as the model talks, so only the
        // connect phase is bounded here; `generate` applies the full timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{method}",
            self.config.base_url, self.config.model
        )
    }

    async fn post(
        &self,
        url: &str,
        request: &GenerationRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&GenerateContentRequest::from(request));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);
        warn!(status = status.as_u16(), %message, "Gemini API returned an error");
        Err(LlmError::api(status.as_u16(), message))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.model, turns = request.contents.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let url = self.endpoint("generateContent");
        let response = self.post(&url, request, Some(self.config.timeout)).await?;
        let body = response.text().await?;
        let text = extract_text(&body)?;
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        info!(chars = text.len(), "Generation complete");
        Ok(text)
    }

    #[instrument(skip_all, fields(model = %self.config.model, turns = request.contents.len()))]
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, LlmError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request, None).await?;
        debug!("Stream opened");

        let fragments = SseStream::from_byte_stream(response.bytes_stream()).filter_map(
            |event| async move {
                match event {
                    Ok(sse) => {
                        let data = sse.data?;
                        match extract_text(&data) {
                            Ok(text) if text.is_empty() => None,
                            other => Some(other),
                        }
                    }
                    Err(e) => Some(Err(LlmError::Stream(e.to_string()))),
                }
            },
        );
        Ok(Box::pin(fragments))
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: WireContent<'a>,
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    parts: [WirePart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_schema: &'a serde_json::Value,
}

impl<'a> From<&'a GenerationRequest> for GenerateContentRequest<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        Self {
            system_instruction: WireContent {
                role: None,
                parts: [WirePart {
                    text: &request.system_instruction,
                }],
            },
            contents: request.contents.iter().map(WireContent::from).collect(),
            generation_config: request
                .response_schema
                .as_ref()
                .map(|schema| GenerationConfig {
                    response_mime_type: "application/json",
                    response_schema: schema,
                }),
        }
    }
}

impl<'a> From<&'a Message> for WireContent<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: Some(message.role),
            parts: [WirePart {
                text: &message.content,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Concatenates the text parts of the first candidate.
fn extract_text(body: &str) -> Result<String, LlmError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
    Ok(response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use axum::extract::Path;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::TryStreamExt;
    use tokio::net::TcpListener;

    fn candidate(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        })
    }

    async fn fake_gemini(
        Path(call): Path<String>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" }
                })),
            )
                .into_response();
        }

        let prompt = body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        if call.ends_with(":streamGenerateContent") {
            let events: String = ["Bon", "jour", ""]
                .iter()
                .map(|t| format!("data: {}\r\n\r\n", candidate(t)))
                .collect();
            return ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response();
        }

        match prompt.as_str() {
            "empty" => Json(serde_json::json!({ "candidates": [] })).into_response(),
            "busy" => (StatusCode::TOO_MANY_REQUESTS, "quota exceeded").into_response(),
            "schema" => Json(candidate(
                &body["generationConfig"]["responseMimeType"].to_string(),
            ))
            .into_response(),
            _ => Json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "PEP " }, { "text": "= pression" }] } }]
            }))
            .into_response(),
        }
    }

    async fn spawn_fake() -> String {
        let app = Router::new().route("/v1beta/models/:call", post(fake_gemini));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str, key: &str) -> GeminiClient {
        GeminiClient::new(
            GeminiConfig::new(key)
                .with_model("test-model")
                .with_base_url(base_url),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_text_concatenates_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "ab");
    }

    #[test]
    fn test_extract_text_without_candidates() {
        assert_eq!(extract_text(r#"{"candidates":[]}"#).unwrap(), "");
        assert_eq!(extract_text("{}").unwrap(), "");
    }

    #[test]
    fn test_extract_text_rejects_garbage() {
        assert!(matches!(
            extract_text("not json"),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_request_wire_format() {
        let request = GenerationRequest::conversation(
            "persona",
            vec![Message::model("salut"), Message::user("question")],
        )
        .with_schema(serde_json::json!({"type": "OBJECT"}));
        let wire = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();

        assert_eq!(
            wire,
            serde_json::json!({
                "systemInstruction": { "parts": [{ "text": "persona" }] },
                "contents": [
                    { "role": "model", "parts": [{ "text": "salut" }] },
                    { "role": "user", "parts": [{ "text": "question" }] }
                ],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": { "type": "OBJECT" }
                }
            })
        );
    }

    #[test]
    fn test_request_without_schema_omits_generation_config() {
        let request = GenerationRequest::prompt("s", "p");
        let wire = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();
        assert!(wire.get("generationConfig").is_none());
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let debug = format!("{:?}", GeminiConfig::new("super-secret"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = GeminiConfig::new("k").with_base_url("http://localhost:1234/");
        assert_eq!(config.base_url, "http://localhost:1234");
    }

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let base = spawn_fake().await;
        let answer = client(&base, "test-key")
            .generate(&GenerationRequest::prompt("s", "hello"))
            .await
            .unwrap();
        assert_eq!(answer, "PEP = pression");
    }

    #[tokio::test]
    async fn test_generate_sends_schema() {
        let base = spawn_fake().await;
        let request =
            GenerationRequest::prompt("s", "schema").with_schema(serde_json::json!({"type": "OBJECT"}));
        let answer = client(&base, "test-key").generate(&request).await.unwrap();
        assert_eq!(answer, "\"application/json\"");
    }

    #[tokio::test]
    async fn test_generate_empty_response() {
        let base = spawn_fake().await;
        let result = client(&base, "test-key")
            .generate(&GenerationRequest::prompt("s", "empty"))
            .await;
        assert_eq!(result, Err(LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_generate_bad_key_is_authentication_error() {
        let base = spawn_fake().await;
        let err = client(&base, "wrong")
            .generate(&GenerationRequest::prompt("s", "hello"))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::api(403, "API key not valid"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_generate_rate_limited_keeps_raw_body() {
        let base = spawn_fake().await;
        let err = client(&base, "test-key")
            .generate(&GenerationRequest::prompt("s", "busy"))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::api(429, "quota exceeded"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_in_order() {
        let base = spawn_fake().await;
        let stream = client(&base, "test-key")
            .stream(&GenerationRequest::prompt("s", "hello"))
            .await
            .unwrap();
        let fragments: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(fragments, vec!["Bon".to_string(), "jour".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let err = client("http://127.0.0.1:1", "test-key")
            .generate(&GenerationRequest::prompt("s", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
    }
}
