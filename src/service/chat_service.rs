use std::sync::Arc;

use tracing::info;

use crate::agent::CompletionClient;
use crate::conversation::{ControllerSettings, ConversationController, ConversationSnapshot};
use crate::models::{MessageView, WsEvent};
use crate::render::Renderer;

/// Process-wide dependencies, cloned into every request handler.
/// The completion client and renderer are built once at startup; each
/// widget session gets its own controller from [`open_session`](Self::open_session).
#[derive(Clone)]
pub struct ChatService {
    client: Arc<dyn CompletionClient>,
    renderer: Arc<dyn Renderer>,
    settings: ControllerSettings,
    model: String,
}

impl ChatService {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        renderer: Arc<dyn Renderer>,
        settings: ControllerSettings,
        model: impl Into<String>,
    ) -> Self {
        Self { client, renderer, settings, model: model.into() }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn open_session(&self) -> ConversationController {
        info!(model = %self.model, "opening chat session");
        ConversationController::new(self.client.clone(), self.settings)
    }

    /// Renders every message of a snapshot into the event pushed to the widget.
    pub fn conversation_event(&self, snapshot: &ConversationSnapshot) -> WsEvent {
        let messages = snapshot
            .messages
            .iter()
            .map(|m| MessageView {
                id: m.id.to_string(),
                sender: m.sender,
                text: m.text.clone(),
                html: self.renderer.render(m),
                timestamp: m.timestamp,
            })
            .collect();

        WsEvent::Conversation { messages, pending: snapshot.pending }
    }
}
