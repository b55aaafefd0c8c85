//! [`ConversationClient`] – conversational AI over chat completions.
//!
//! [`OpenAiChatClient`] posts the whole transcript, preceded by a fixed
//! system instruction naming the reply language, to an OpenAI-compatible
//! `/v1/chat/completions` endpoint and returns the first choice.  One request
//! per call; no streaming, retry or cancellation.
//!
//! # Example
//!
//! ```rust,no_run
//! use rafa_runtime::chat::{ConversationClient, OpenAiChatClient};
//! use rafa_types::ChatTurn;
//!
//! # async fn demo() -> Result<(), rafa_runtime::chat::ChatError> {
//! let client = OpenAiChatClient::new("sk-...");
//! let reply = client.reply(&[ChatTurn::user("¿Qué hora es?")], "Español").await?;
//! # Ok(()) }
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rafa_types::{ChatRole, ChatTurn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_LANGUAGE: &str = "Español";

/// Shown (and spoken) instead of a reply when the request fails.
pub const GENERIC_ERROR_REPLY: &str = "Error al obtener respuesta";

/// System instruction sent ahead of every transcript.
pub fn system_prompt(language: &str) -> String {
    format!(
        "Eres un robot asistente cuya función es responder preguntas. Debes responder siempre \
         de forma muy educada y contenta. Tu siempre responderas en el siguiente idioma {language}"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ChatError {
    /// The HTTP request failed or returned an error status.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body did not have the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("No API token configured")]
    MissingToken,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// System instruction followed by the transcript, in order.
pub fn build_messages(transcript: &[ChatTurn], language: &str) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage {
        role: Role::System,
        content: system_prompt(language),
    })
    .chain(transcript.iter().map(|turn| ChatMessage {
        role: match turn.role {
            ChatRole::User => Role::User,
            ChatRole::Assistant => Role::Assistant,
        },
        content: turn.content.clone(),
    }))
    .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// ConversationClient
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ConversationClient: Send + Sync {
    /// One reply to `transcript`, written in `language`.
    async fn reply(&self, transcript: &[ChatTurn], language: &str) -> Result<String, ChatError>;

    /// Replace the API token used by later requests.
    fn set_api_key(&self, key: &str);
}

pub struct OpenAiChatClient {
    endpoint: String,
    model: String,
    api_key: RwLock<String>,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, DEFAULT_MODEL, api_key)
    }

    /// Point at another OpenAI-compatible server (e.g. a local model).
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: RwLock::new(api_key.into()),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn key(&self) -> RwLockReadGuard<'_, String> {
        self.api_key.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_mut(&self) -> RwLockWriteGuard<'_, String> {
        self.api_key.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConversationClient for OpenAiChatClient {
    /// # Errors
    ///
    /// [`ChatError::MissingToken`] when no token is set, [`ChatError::Http`]
    /// if the request fails, [`ChatError::BadResponse`] if no choice came back.
    async fn reply(&self, transcript: &[ChatTurn], language: &str) -> Result<String, ChatError> {
        let token = self.key().clone();
        if token.trim().is_empty() {
            return Err(ChatError::MissingToken);
        }

        let messages = build_messages(transcript, language);
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
        };
        debug!(model = %self.model, turns = transcript.len(), "requesting chat completion");

        let response: ChatResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ChatError::BadResponse("empty choices array".into()))
    }

    fn set_api_key(&self, key: &str) {
        *self.key_mut() = key.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_language() {
        let prompt = system_prompt("English");
        assert!(prompt.starts_with("Eres un robot asistente"));
        assert!(prompt.ends_with("idioma English"));
    }

    #[test]
    fn messages_start_with_system_then_transcript_in_order() {
        let transcript = vec![ChatTurn::user("hola"), ChatTurn::assistant("¡Hola!")];
        let messages = build_messages(&transcript, DEFAULT_LANGUAGE);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Español"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "¡Hola!");
    }

    #[test]
    fn request_body_has_model_and_lowercase_roles() {
        let messages = build_messages(&[ChatTurn::user("hi")], "Español");
        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: &messages,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn response_first_choice_is_the_reply() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"¡Claro!"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "¡Claro!");
    }

    #[tokio::test]
    async fn missing_token_fails_without_network() {
        let client = OpenAiChatClient::new("");
        let err = client
            .reply(&[ChatTurn::user("hola")], DEFAULT_LANGUAGE)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MissingToken));
    }

    #[tokio::test]
    async fn token_can_be_replaced_at_runtime() {
        let client = OpenAiChatClient::new("");
        client.set_api_key("   ");
        assert!(matches!(
            client.reply(&[], DEFAULT_LANGUAGE).await,
            Err(ChatError::MissingToken)
        ));
        client.set_api_key("sk-test");
        assert_eq!(*client.key(), "sk-test");
    }
}
