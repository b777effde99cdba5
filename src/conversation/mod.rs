//! Conversation log and the controller that drives it.
//!
//! [`Conversation`] is the ordered message log of one chat session.
//! [`ConversationController`] mediates between that log and a
//! [`CompletionClient`](crate::agent::CompletionClient).

mod controller;

pub use controller::{ControllerSettings, ConversationController};

use std::str::FromStr;

use serde::Serialize;

use crate::models::{Message, MessageId, Sender};

/// What `regenerate` does with a failed round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegenerateFailurePolicy {
    /// Log the failure and leave the conversation untouched.
    #[default]
    Silent,
    /// Append an error turn like `submit` does, keeping the previous reply.
    Visible,
}

impl FromStr for RegenerateFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "visible" => Ok(Self::Visible),
            other => Err(format!("expected 'silent' or 'visible', got '{other}'")),
        }
    }
}

/// State published to observers after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub pending: bool,
}

/// Ordered, append-only message log. The only removal is
/// [`remove_last_from`](Self::remove_last_from), used by regenerate.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, sender: Sender, text: impl Into<String>) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.messages.push(Message::new(id, sender, text.into()));
        id
    }

    /// Most recent message from `sender`, scanning backward.
    pub fn last_from(&self, sender: Sender) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.sender == sender)
    }

    /// Removes the most recent message from `sender`, if there is one.
    pub fn remove_last_from(&mut self, sender: Sender) -> Option<Message> {
        let index = self.messages.iter().rposition(|m| m.sender == sender)?;
        Some(self.messages.remove(index))
    }
}
