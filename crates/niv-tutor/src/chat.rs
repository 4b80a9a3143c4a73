//! Streaming expert chat.
//!
//! A [`ChatSession`] keeps the transcript of one conversation. Replies are
//! streamed fragment by fragment into the last model message, which only
//! ever grows; a failed reply keeps whatever text had already arrived.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use niv_llm::{GenerationRequest, LlmError, Message, Role, TextGenerator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TutorError};

const SYSTEM_INSTRUCTION: &str = "Tu es un assistant expert en Ventilation Non Invasive (VNI), basé sur un guide clinique complet. Ton rôle est de fournir des réponses claires, précises et pédagogiques aux questions des professionnels de santé. Base tes réponses *uniquement* sur les connaissances standards et les meilleures pratiques en pneumologie concernant la VNI, comme si tu citais un guide de référence. N'invente pas d'informations et n'utilise pas de connaissances externes non validées dans ce domaine. Tes réponses doivent être exclusivement en Français. Structure impérativement tes réponses en utilisant le format Markdown simple pour une lisibilité optimale. Utilise des titres en gras de niveau 3 (### Titre) pour les rubriques principales et des listes à puces (-) pour les points clés et les énumérations. La mise en gras est importante pour souligner les termes essentiels.";

/// First model message of every session.
pub const GREETING: &str =
    "Bonjour ! Je suis votre assistant expert en VNI, j'ai le plaisir de répondre à vos questions :";

/// Streamed instead of a reply when no API key is configured.
pub const UNAVAILABLE_MESSAGE: &str = "Désolé, le service de chat expert n'est pas disponible actuellement. La clé API Gemini n'est pas configurée. Veuillez consulter les sections du guide pour obtenir des informations sur la VNI.";

/// Shown when a reply fails.
pub const CHAT_ERROR_MESSAGE: &str =
    "Désolé, une erreur est survenue. Impossible de répondre à votre question pour le moment.";

/// One entry of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Markdown text.
    pub content: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Set on error notices, which are never sent back to the model.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_error: false,
        }
    }

    fn error() -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Model, CHAT_ERROR_MESSAGE)
        }
    }
}

#[derive(Debug)]
struct Transcript {
    messages: Vec<ChatMessage>,
    busy: bool,
}

/// Clears the busy flag when a reply ends, including by cancellation.
struct BusyGuard(Arc<Mutex<Transcript>>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        lock(&self.0).busy = false;
    }
}

fn lock(transcript: &Mutex<Transcript>) -> MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One chat conversation.
///
/// Clones share the same transcript, so a session can be observed while a
/// reply is streaming.
#[derive(Clone)]
pub struct ChatSession {
    generator: Option<Arc<dyn TextGenerator>>,
    transcript: Arc<Mutex<Transcript>>,
}

impl ChatSession {
    /// Starts a session with the greeting as its only message.
    #[must_use]
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            generator,
            transcript: Arc::new(Mutex::new(Transcript {
                messages: vec![ChatMessage::new(Role::Model, GREETING)],
                busy: false,
            })),
        }
    }

    /// Returns `true` when a generator is configured.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    /// Snapshot of the transcript.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.transcript).messages.clone()
    }

    /// Returns `true` while a reply is streaming.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        lock(&self.transcript).busy
    }

    /// Sends a question and streams the reply.
    ///
    /// Each fragment is appended to the transcript and passed to `on_chunk`
    /// in arrival order. Returns the complete reply. Dropping the returned
    /// future stops the stream and keeps the text received so far.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::EmptyMessage` for blank input,
    /// `TutorError::ChatBusy` while another reply is streaming, and
    /// `TutorError::Llm` if the reply fails. In the last case the transcript
    /// already shows [`CHAT_ERROR_MESSAGE`].
    #[instrument(skip(self, on_chunk), fields(chars = text.len()))]
    pub async fn send<F>(&self, text: &str, mut on_chunk: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(TutorError::EmptyMessage);
        }

        let (reply_index, history) = {
            let mut transcript = lock(&self.transcript);
            if transcript.busy {
                return Err(TutorError::ChatBusy);
            }
            transcript.busy = true;
            transcript.messages.push(ChatMessage::new(Role::User, text));
            let history = history_of(&transcript.messages);
            transcript.messages.push(ChatMessage::new(Role::Model, ""));
            (transcript.messages.len() - 1, history)
        };
        let _guard = BusyGuard(Arc::clone(&self.transcript));

        let Some(generator) = &self.generator else {
            debug!("No generator configured, answering with degraded-mode message");
            self.append(reply_index, UNAVAILABLE_MESSAGE);
            on_chunk(UNAVAILABLE_MESSAGE);
            return Ok(UNAVAILABLE_MESSAGE.to_string());
        };

        let request = GenerationRequest::conversation(SYSTEM_INSTRUCTION, history);
        let mut stream = match generator.stream(&request).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(reply_index, e)),
        };

        let mut chunks = 0usize;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    chunks += 1;
                    self.append(reply_index, &chunk);
                    on_chunk(&chunk);
                }
                Err(e) => return Err(self.fail(reply_index, e)),
            }
        }

        let reply = lock(&self.transcript).messages[reply_index].content.clone();
        info!(chunks, chars = reply.len(), "Chat reply complete");
        Ok(reply)
    }

    fn append(&self, index: usize, chunk: &str) {
        lock(&self.transcript).messages[index]
            .content
            .push_str(chunk);
    }

    /// Records a failed reply in the transcript.
    fn fail(&self, index: usize, error: LlmError) -> TutorError {
        warn!(error = %error, "Chat reply failed");
        let mut transcript = lock(&self.transcript);
        let reply = &mut transcript.messages[index];
        if reply.content.is_empty() {
            *reply = ChatMessage::error();
        } else {
            transcript.messages.push(ChatMessage::error());
        }
        TutorError::Llm(error)
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("available", &self.is_available())
            .field("messages", &lock(&self.transcript).messages.len())
            .finish()
    }
}

/// Conversation sent to the model: everything after the greeting except
/// error notices and empty replies.
fn history_of(messages: &[ChatMessage]) -> Vec<Message> {
    messages
        .iter()
        .skip(1)
        .filter(|m| !m.is_error && !m.content.is_empty())
        .map(|m| Message {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}
