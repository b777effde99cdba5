use async_trait::async_trait;
use rig::completion::Prompt;
use rig::prelude::CompletionClient as _;
use rig::providers::gemini;
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::errors::AppError;

#[cfg(test)]
pub mod testing;

const DEFAULT_HOST: &str = "generativelanguage.googleapis.com";

/// The service boundary that turns a prompt into generated text.
///
/// Each call is stateless from the service's point of view: implementations
/// send the prompt as a single user turn and never replay conversation history.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AppError>;
}

/// [`CompletionClient`] backed by the rig Gemini provider.
/// The HTTP client is built once at startup and shared by every session.
#[derive(Clone)]
pub struct GeminiAgentService {
    client: gemini::Client,
    host: String,
    model: String,
}

impl GeminiAgentService {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let mut builder = gemini::Client::builder().api_key(config.gemini_api_key.as_str());
        if let Some(base_url) = &config.gemini_base_url {
            builder = builder.base_url(base_url);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build Gemini client: {e}")))?;

        Ok(Self {
            client,
            host: config.gemini_base_url.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            model: config.gemini_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn classify(&self, message: String) -> AppError {
        classify_failure(message, &self.host, &self.model)
    }
}

#[async_trait]
impl CompletionClient for GeminiAgentService {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let agent = self.client.agent(&self.model).build();

        debug!(model = %self.model, prompt_len = prompt.len(), "sending completion request");
        let text = agent.prompt(prompt).await.map_err(|e| {
            error!("Gemini completion failed: {e}");
            self.classify(e.to_string())
        })?;

        if text.trim().is_empty() {
            return Err(AppError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Phrases reqwest and the OS use when the request never reached the service.
const UNREACHABLE: &[&str] = &[
    "connection refused",
    "error trying to connect",
    "failed to connect",
    "dns error",
    "failed to lookup address",
    "no route to host",
    "network is unreachable",
];

/// Maps a provider error message onto the [`AppError`] taxonomy.
fn classify_failure(message: String, host: &str, model: &str) -> AppError {
    let lower = message.to_lowercase();
    if UNREACHABLE.iter().any(|phrase| lower.contains(phrase)) {
        AppError::ServiceUnavailable { host: host.to_string() }
    } else if lower.contains("model") && lower.contains("not found") {
        AppError::ModelNotFound { model_name: model.to_string() }
    } else {
        AppError::InferenceError { message }
    }
}
