use leptos::prelude::*;
use leptos::task::spawn_local;

use crate::api;
use crate::models::{Message, Sender, WsEvent, WsRequest};
use crate::ws;

/// Shared widget state, provided via Leptos context.
/// The conversation itself lives on the server; these signals mirror the
/// latest snapshot it pushed.
#[derive(Clone, Copy)]
pub struct AppState {
    // --- Read signals (for components to subscribe to) ---
    pub messages: ReadSignal<Vec<Message>>,
    pub pending: ReadSignal<bool>,
    pub connected: ReadSignal<bool>,
    pub model: ReadSignal<Option<String>>,
    pub error: ReadSignal<Option<String>>,

    // --- Write signals (for mutating state) ---
    pub set_messages: WriteSignal<Vec<Message>>,
    pub set_pending: WriteSignal<bool>,
    pub set_connected: WriteSignal<bool>,
    pub set_model: WriteSignal<Option<String>>,
    pub set_error: WriteSignal<Option<String>>,
}

impl AppState {
    /// Create a new `AppState` and provide it in the current Leptos context.
    pub fn provide() -> Self {
        let (messages, set_messages) = signal(Vec::<Message>::new());
        let (pending, set_pending) = signal(false);
        let (connected, set_connected) = signal(false);
        let (model, set_model) = signal(None::<String>);
        let (error, set_error) = signal(None::<String>);

        let state = Self {
            messages,
            pending,
            connected,
            model,
            error,
            set_messages,
            set_pending,
            set_connected,
            set_model,
            set_error,
        };

        provide_context(state);
        state
    }

    /// Load the model name for the header.
    pub fn load_health(&self) {
        let set_model = self.set_model;
        spawn_local(async move {
            match api::fetch_health().await {
                Ok(health) => set_model.set(Some(health.model)),
                Err(e) => log::warn!("Failed to fetch health: {e}"),
            }
        });
    }

    /// Open the session socket. Each connection starts a fresh conversation.
    pub fn connect(&self) {
        let set_messages = self.set_messages;
        let set_pending = self.set_pending;
        let set_connected = self.set_connected;
        let set_error = self.set_error;

        let on_open = move || {
            set_connected.set(true);
            set_error.set(None);
        };

        let on_event = move |event: WsEvent| match event {
            WsEvent::Conversation { messages, pending } => {
                set_messages.set(messages);
                set_pending.set(pending);
            }
            WsEvent::Error { message } => {
                log::warn!("Server rejected request: {message}");
                set_error.set(Some(message));
            }
        };

        let on_close = move |reason: String| {
            set_connected.set(false);
            set_pending.set(false);
            set_error.set(Some(if reason.is_empty() {
                "Connection closed".to_string()
            } else {
                format!("Connection closed: {reason}")
            }));
        };

        if let Err(e) = ws::connect(on_open, on_event, on_close) {
            log::error!("{e}");
            self.set_error.set(Some(e));
        }
    }

    /// Whether a regenerate would do anything: some user turn exists and
    /// nothing is in flight.
    pub fn can_regenerate(&self) -> bool {
        !self.pending.get()
            && self.messages.with(|msgs| msgs.iter().any(|m| m.sender == Sender::User))
    }

    /// Returns whether the message went out; the composer keeps its text otherwise.
    pub fn submit(&self, text: String) -> bool {
        if text.trim().is_empty() || self.pending.get_untracked() {
            return false;
        }
        self.send(WsRequest::Submit { text })
    }

    pub fn regenerate(&self) {
        if self.pending.get_untracked() {
            return;
        }
        self.send(WsRequest::Regenerate);
    }

    pub fn cancel(&self) {
        self.send(WsRequest::Cancel);
    }

    fn send(&self, request: WsRequest) -> bool {
        match ws::send(&request) {
            Ok(()) => {
                self.set_error.set(None);
                true
            }
            Err(e) => {
                log::error!("Failed to send {request:?}: {e}");
                self.set_error.set(Some(e));
                false
            }
        }
    }
}
