use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Matches the backend `MessageView`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    /// Rendered by the server: markdown for bot turns, escaped text for user turns.
    pub html: String,
    pub timestamp: String,
}

/// WebSocket request sent by the widget.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsRequest {
    Submit { text: String },
    Regenerate,
    Cancel,
}

/// WebSocket event received from the server.
/// Matches the backend `WsEvent` enum (internally tagged).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WsEvent {
    #[serde(rename = "conversation")]
    Conversation { messages: Vec<Message>, pending: bool },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response from `/api/health`.
#[derive(Clone, Debug, Deserialize)]
pub struct Health {
    pub model: String,
}
