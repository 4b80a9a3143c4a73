//! Integration tests for the HTTP API.
//!
//! Each test starts a real server on a free port, backed either by a
//! scripted generator or by no generator at all (degraded mode).

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use niv_llm::{LlmError, ScriptedGenerator};
use niv_tutor::{create_router, AppState, ClinicalCase, Config, THEMES};
use serde_json::{json, Value};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the test server and returns its base URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}

fn scripted_state(generator: &ScriptedGenerator) -> AppState {
    AppState::new(Config::default(), Some(Arc::new(generator.clone())))
}

fn degraded_state() -> AppState {
    AppState::new(Config::default(), None)
}

fn case_json() -> String {
    json!({
        "category": "Interface et Fuites",
        "case": "Patient BPCO sous VNI, fuites importantes au masque facial.",
        "question": "Quelle est la première mesure ?",
        "options": [
            {"id": "A", "text": "Augmenter l'AI"},
            {"id": "B", "text": "Réajuster le masque"},
            {"id": "C", "text": "Arrêter la VNI"}
        ],
        "correctAnswerId": "B",
        "explanation": "Les fuites se corrigent d'abord à l'interface."
    })
    .to_string()
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_reports_llm_availability() {
    let generator = ScriptedGenerator::new();
    let (url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let body: Value = reqwest::get(format!("{url}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["llmAvailable"], true);
    assert_eq!(body["model"], "scripted");

    let (url, _handle) = spawn_test_server(degraded_state()).await;
    let body: Value = reqwest::get(format!("{url}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["llmAvailable"], false);
    assert!(body["model"].is_null());
}

// ============================================================================
// Waveform
// ============================================================================

#[tokio::test]
async fn test_waveform_detects_air_trapping() {
    let (url, _handle) = spawn_test_server(degraded_state()).await;
    let client = reqwest::Client::new();

    let trapped: Value = client
        .post(format!("{url}/api/waveform"))
        .json(&json!({
            "profile": "obstructive",
            "peep": 5,
            "pressureSupport": 10,
            "respiratoryRate": 30,
            "riseTimeMs": 200
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trapped["airTrapping"], true);
    assert!(trapped["pressure"].as_str().unwrap().starts_with("M 0 "));
    assert!(trapped["flow"].as_str().unwrap().starts_with("M 0 200"));

    let normal: Value = client
        .post(format!("{url}/api/waveform"))
        .json(&json!({
            "peep": 5,
            "pressureSupport": 10,
            "respiratoryRate": 12,
            "riseTimeMs": 200
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(normal["airTrapping"], false);
    assert_eq!(normal["metrics"]["cycleMs"], 5000.0);
}

#[tokio::test]
async fn test_waveform_rejects_out_of_range_settings() {
    let (url, _handle) = spawn_test_server(degraded_state()).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/waveform"))
        .json(&json!({
            "peep": 5,
            "pressureSupport": 40,
            "respiratoryRate": 12,
            "riseTimeMs": 200
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("pressure"));
}

#[tokio::test]
async fn test_waveform_svg_uses_query_settings() {
    let (url, _handle) = spawn_test_server(degraded_state()).await;

    let response = reqwest::get(format!(
        "{url}/api/waveform.svg?profile=restrictive&peep=8"
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/svg+xml"
    );
    let svg = response.text().await.unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("PEP 8"));
}

// ============================================================================
// Advice
// ============================================================================

#[tokio::test]
async fn test_advice_sends_settings_prompt() {
    let generator = ScriptedGenerator::new().then_reply("  ### Analyse\nRéglages adaptés.  ");
    let (url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{url}/api/advice"))
        .json(&json!({
            "profile": "obstructive",
            "peep": 6,
            "pressureSupport": 14,
            "respiratoryRate": 22,
            "riseTimeMs": 150
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["advice"], "### Analyse\nRéglages adaptés.");

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    let prompt = requests[0].last_user_text().unwrap();
    assert!(prompt.contains("PEP=6 cmH₂O"));
    assert!(prompt.contains("Pente=150ms"));
}

#[tokio::test]
async fn test_advice_degraded_mode_returns_notice() {
    let (url, _handle) = spawn_test_server(degraded_state()).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/advice"))
        .json(&json!({
            "peep": 5,
            "pressureSupport": 10,
            "respiratoryRate": 12,
            "riseTimeMs": 200
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["advice"].as_str().unwrap().contains("pas disponible"));
}

#[tokio::test]
async fn test_advice_failure_maps_to_bad_gateway() {
    let generator = ScriptedGenerator::new().then_fail(LlmError::api(500, "internal"));
    let (url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/advice"))
        .json(&json!({
            "peep": 5,
            "pressureSupport": 10,
            "respiratoryRate": 12,
            "riseTimeMs": 200
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Impossible"));
}

// ============================================================================
// Clinical case
// ============================================================================

#[tokio::test]
async fn test_case_generation_for_theme() {
    let generator = ScriptedGenerator::new().then_reply(case_json());
    let (url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let case: ClinicalCase = reqwest::Client::new()
        .post(format!("{url}/api/case?theme=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(case.options.len(), 3);
    assert_eq!(case.correct_answer_id, "B");

    let requests = generator.requests();
    assert!(requests[0].response_schema.is_some());
    assert!(requests[0].last_user_text().unwrap().contains(THEMES[2]));
}

#[tokio::test]
async fn test_case_malformed_reply_maps_to_bad_gateway() {
    let generator = ScriptedGenerator::new().then_reply("Voici un cas : {incomplet");
    let (url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/case"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_case_rejects_unknown_theme() {
    let generator = ScriptedGenerator::new().then_reply(case_json());
    let (url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/case?theme={}", THEMES.len()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(generator.remaining(), 1);
}

#[tokio::test]
async fn test_case_degraded_mode_is_unavailable() {
    let (url, _handle) = spawn_test_server(degraded_state()).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/case"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}
