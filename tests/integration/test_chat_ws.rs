//! Integration tests for the chat WebSocket.
//!
//! These tests validate the `/ws/chat` endpoint: greeting on connect,
//! streamed replies, failures, busy rejection, and per-connection history.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use niv_llm::{LlmError, Role, Script, ScriptedGenerator};
use niv_tutor::chat::{CHAT_ERROR_MESSAGE, GREETING};
use niv_tutor::{create_router, AppState, ChatEvent, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns the chat WebSocket URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/ws/chat");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (ws_url, handle)
}

async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next event, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> ChatEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Collects events up to and including the next `done` or reply `error`.
async fn receive_reply(client: &mut WsClient) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    loop {
        let event = receive_event(client).await;
        let last = matches!(event, ChatEvent::Done(_) | ChatEvent::Error(_));
        events.push(event);
        if last {
            return events;
        }
    }
}

async fn ask(client: &mut WsClient, question: &str) {
    client
        .send(Message::Text(question.to_string()))
        .await
        .expect("Failed to send question");
}

fn chunk_texts(events: &[ChatEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Chunk(p) => Some(p.text.clone()),
            _ => None,
        })
        .collect()
}

fn scripted_state(generator: &ScriptedGenerator) -> AppState {
    AppState::new(Config::default(), Some(Arc::new(generator.clone())))
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_client_receives_greeting_on_connect() {
    let generator = ScriptedGenerator::new();
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut client = connect_client(&ws_url).await;
    match receive_event(&mut client).await {
        ChatEvent::Connected(payload) => {
            assert_eq!(payload.greeting, GREETING);
            assert!(payload.llm_available);
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_degraded_mode_streams_unavailable_notice() {
    let (ws_url, _handle) = spawn_test_server(AppState::new(Config::default(), None)).await;

    let mut client = connect_client(&ws_url).await;
    let ChatEvent::Connected(payload) = receive_event(&mut client).await else {
        panic!("Expected Connected event");
    };
    assert!(!payload.llm_available);

    ask(&mut client, "Qu'est-ce que la PEP ?").await;
    let events = receive_reply(&mut client).await;
    match events.last() {
        Some(ChatEvent::Done(done)) => assert!(done.message.contains("pas disponible")),
        other => panic!("Expected Done event, got: {other:?}"),
    }
}

// ============================================================================
// Replies
// ============================================================================

#[tokio::test]
async fn test_reply_streams_chunks_in_order() {
    let generator = ScriptedGenerator::new().then_chunks(["### PEP", "\n- ", "**rôle**"]);
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    ask(&mut client, "  À quoi sert la PEP ?  ").await;
    let events = receive_reply(&mut client).await;

    assert_eq!(chunk_texts(&events), ["### PEP", "\n- ", "**rôle**"]);
    match events.last() {
        Some(ChatEvent::Done(done)) => assert_eq!(done.message, "### PEP\n- **rôle**"),
        other => panic!("Expected Done event, got: {other:?}"),
    }

    let requests = generator.requests();
    assert_eq!(requests[0].last_user_text(), Some("À quoi sert la PEP ?"));
}

#[tokio::test]
async fn test_history_carries_previous_turns() {
    let generator = ScriptedGenerator::new()
        .then_reply("Réponse un")
        .then_reply("Réponse deux");
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    ask(&mut client, "Question un").await;
    receive_reply(&mut client).await;
    ask(&mut client, "Question deux").await;
    receive_reply(&mut client).await;

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].contents.len(), 1);

    let roles: Vec<Role> = requests[1].contents.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Model, Role::User]);
    assert_eq!(requests[1].contents[1].content, "Réponse un");
}

#[tokio::test]
async fn test_failed_reply_sends_error_event() {
    let generator = ScriptedGenerator::new().then(Script::ChunksThenError(
        vec!["Début".to_string()],
        LlmError::Stream("connection reset".to_string()),
    ));
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    ask(&mut client, "Question").await;
    let events = receive_reply(&mut client).await;

    assert_eq!(chunk_texts(&events), ["Début"]);
    match events.last() {
        Some(ChatEvent::Error(err)) => assert_eq!(err.message, CHAT_ERROR_MESSAGE),
        other => panic!("Expected Error event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_blank_question_is_rejected() {
    let generator = ScriptedGenerator::new();
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    ask(&mut client, "   ").await;
    match receive_event(&mut client).await {
        ChatEvent::Error(err) => assert!(err.message.contains("vide")),
        other => panic!("Expected Error event, got: {other:?}"),
    }
    assert!(generator.requests().is_empty());
}

#[tokio::test]
async fn test_second_question_while_streaming_is_rejected() {
    let generator = ScriptedGenerator::new()
        .with_chunk_delay(Duration::from_millis(100))
        .then_chunks(["a", "b", "c"]);
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    ask(&mut client, "Première").await;
    ask(&mut client, "Seconde").await;

    let mut busy = 0;
    loop {
        match receive_event(&mut client).await {
            ChatEvent::Error(err) => {
                assert!(err.message.contains("déjà"));
                busy += 1;
            }
            ChatEvent::Done(done) => {
                assert_eq!(done.message, "abc");
                break;
            }
            _ => {}
        }
    }
    assert_eq!(busy, 1);
    assert_eq!(generator.requests().len(), 1);
}

// ============================================================================
// Connections
// ============================================================================

#[tokio::test]
async fn test_connections_have_separate_sessions() {
    let generator = ScriptedGenerator::new()
        .then_reply("Pour le premier")
        .then_reply("Pour le second");
    let (ws_url, _handle) = spawn_test_server(scripted_state(&generator)).await;

    let mut first = connect_client(&ws_url).await;
    receive_event(&mut first).await;
    ask(&mut first, "Bonjour").await;
    receive_reply(&mut first).await;
    first.close(None).await.expect("Failed to close");

    let mut second = connect_client(&ws_url).await;
    receive_event(&mut second).await;
    ask(&mut second, "Salut").await;
    let events = receive_reply(&mut second).await;
    assert!(matches!(events.last(), Some(ChatEvent::Done(d)) if d.message == "Pour le second"));

    let requests = generator.requests();
    assert_eq!(requests[1].contents.len(), 1);
}
