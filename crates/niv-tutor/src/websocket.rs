//! WebSocket chat endpoint.
//!
//! Each connection owns one [`ChatSession`]. Every text frame from the client
//! is a question; the reply streams back as events.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, carries the greeting
//! - `chunk` - One fragment of the reply, in order
//! - `done` - Reply complete, carries the full text
//! - `error` - Reply failed or the question was rejected
//!
//! All events are JSON objects with `event` and `payload` fields.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::chat::{ChatSession, CHAT_ERROR_MESSAGE, GREETING};
use crate::error::TutorError;
use crate::AppState;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Opening message of the assistant.
    pub greeting: String,
    /// Whether replies come from the model or the degraded-mode notice.
    pub llm_available: bool,
}

/// Payload for the `chunk` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Reply fragment.
    pub text: String,
}

/// Payload for the `done` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonePayload {
    /// The complete reply.
    pub message: String,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events sent to chat clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// One reply fragment.
    Chunk(ChunkPayload),
    /// Reply complete.
    Done(DonePayload),
    /// Reply failed or question rejected.
    Error(ErrorPayload),
}

impl ChatEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub fn connected(llm_available: bool) -> Self {
        Self::Connected(ConnectedPayload {
            greeting: GREETING.to_string(),
            llm_available,
        })
    }

    /// Creates a `Chunk` event.
    #[must_use]
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk(ChunkPayload { text: text.into() })
    }

    /// Creates a `Done` event.
    #[must_use]
    pub fn done(message: impl Into<String>) -> Self {
        Self::Done(DonePayload {
            message: message.into(),
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Maps the outcome of [`ChatSession::send`] to a final event.
    #[must_use]
    pub fn from_outcome(outcome: Result<String, TutorError>) -> Self {
        match outcome {
            Ok(reply) => Self::done(reply),
            Err(TutorError::EmptyMessage) => Self::error("Le message est vide."),
            Err(TutorError::ChatBusy) => {
                Self::error("Une réponse est déjà en cours de rédaction.")
            }
            Err(_) => Self::error(CHAT_ERROR_MESSAGE),
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Chunk(_) => "chunk",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade handler for `/ws/chat`.
pub async fn chat_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New chat connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles a single chat connection.
///
/// - Sends `connected` with the greeting immediately
/// - Streams a reply for each text frame
/// - Sends heartbeat pings every 30 seconds
/// - Closes after 3 missed pongs
///
/// Replies run as tasks tied to the connection and are aborted when it
/// closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let session = ChatSession::new(state.generator.clone());

    let connected = ChatEvent::connected(session.is_available());
    if !send_event(&mut sender, &connected).await {
        debug!("Client disconnected before receiving connected event");
        return;
    }
    info!("Chat client connected");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ChatEvent>();
    let mut replies = JoinSet::new();

    let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    heartbeat_interval.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(question))) => {
                        let session = session.clone();
                        let events = event_tx.clone();
                        replies.spawn(async move {
                            let outcome = session
                                .send(&question, |chunk| {
                                    let _ = events.send(ChatEvent::chunk(chunk));
                                })
                                .await;
                            let _ = events.send(ChatEvent::from_outcome(outcome));
                        });
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary message from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                if !send_event(&mut sender, &event).await {
                    debug!("Failed to send event, client disconnected");
                    break;
                }
            }

            Some(_) = replies.join_next() => {}

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    replies.abort_all();
    info!(
        messages = session.messages().len(),
        "Chat client disconnected"
    );
}

/// Serializes and sends one event. Returns `false` if the client is gone.
async fn send_event<S>(sender: &mut S, event: &ChatEvent) -> bool
where
    S: futures::Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(event = event.event_name(), "Failed to serialize event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json)).await.is_ok()
}

// ============================================================================
// Tests
// ============================================================================
