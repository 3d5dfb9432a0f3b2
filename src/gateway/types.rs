//! Wire shapes for the query gateway
//!
//! Only the request/response records that are not already core domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Delivery, GenerationSettings, Message, MessageId, MessageRole, SessionId};

/// Author of a stored message as reported by the gateway
///
/// The gateway only distinguishes "user" from everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    User,
    Other(String),
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("user") {
            Sender::User
        } else {
            Sender::Other(value)
        }
    }
}

impl From<Sender> for String {
    fn from(value: Sender) -> Self {
        match value {
            Sender::User => "user".to_string(),
            Sender::Other(s) => s,
        }
    }
}

/// A message as stored by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<RemoteMessage> for Message {
    fn from(remote: RemoteMessage) -> Self {
        let role = match remote.sender {
            Sender::User => MessageRole::User,
            Sender::Other(_) => MessageRole::Assistant,
        };
        Message {
            id: MessageId::Server(remote.id),
            role,
            content: remote.content,
            timestamp: remote.timestamp,
            delivery: Delivery::Confirmed,
            tokens_used: None,
        }
    }
}

/// Body of `POST /chats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Body of `POST /query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub chat_id: SessionId,
    pub model: String,
    pub text: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(default)]
    pub use_internet: bool,
}

impl QueryRequest {
    pub fn new(
        chat_id: SessionId,
        model: impl Into<String>,
        text: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            chat_id,
            model: model.into(),
            text: text.into(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            use_internet: false,
        }
    }

    pub fn with_internet(mut self, enabled: bool) -> Self {
        self.use_internet = enabled;
        self
    }
}

/// Successful answer to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReply {
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<u32>,
}

/// Catalog page cursor plus the credential used for gated catalogs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPageRequest {
    pub offset: usize,
    pub limit: usize,
    pub credential: Option<String>,
}

/// Body of `POST /models/install`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRequest {
    pub name: String,
}

/// Body of `POST /credential`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub value: String,
}

/// Inference backend status (`GET /model_status`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub status: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub context_size: Option<u32>,
}

impl ModelStatus {
    pub fn is_loaded(&self) -> bool {
        self.model_name.is_some()
    }
}
