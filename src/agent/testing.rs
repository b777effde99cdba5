//! Scripted [`CompletionClient`] for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::CompletionClient;
use crate::errors::AppError;

pub enum Reply {
    Text(String),
    Fail(String),
    Hang,
}

/// Plays back queued replies in order. With a gate, every call parks after
/// announcing itself on `entered` until the test calls [`release`](Self::release).
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    gated: bool,
    pub entered: Notify,
    gate: Notify,
}

impl ScriptedClient {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self { replies: Mutex::new(replies.into_iter().collect()), ..Default::default() }
    }

    pub fn gated(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self { gated: true, ..Self::new(replies) }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

pub fn fail(s: &str) -> Reply {
    Reply::Fail(s.to_string())
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.entered.notify_one();
        if self.gated {
            self.gate.notified().await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Text(t)) => Ok(t),
            Some(Reply::Fail(message)) => Err(AppError::InferenceError { message }),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(AppError::Unexpected("script exhausted".to_string())),
        }
    }
}
