use std::time::Duration;

use crate::conversation::RegenerateFailurePolicy;
use crate::errors::AppError;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PORT: u16 = 3000;

/// Settings resolved once at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// Overrides the provider endpoint (proxies, test doubles).
    pub gemini_base_url: Option<String>,
    pub request_timeout: Duration,
    pub regenerate_failure_policy: RegenerateFailurePolicy,
    pub port: u16,
}

impl AppConfig {
    /// Reads the process environment. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        // Blank values count as unset.
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = get("GEMINI_API_KEY")
            .ok_or_else(|| AppError::MissingConfig { key: "GEMINI_API_KEY".to_string() })?;

        let gemini_model = get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let gemini_base_url = get("GEMINI_BASE_URL");

        let request_timeout = match get("REQUEST_TIMEOUT_SECS") {
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => {
                    return Err(AppError::invalid_config(
                        "REQUEST_TIMEOUT_SECS",
                        raw,
                        "must be greater than zero",
                    ))
                }
                Ok(secs) => Duration::from_secs(secs),
                Err(e) => return Err(AppError::invalid_config("REQUEST_TIMEOUT_SECS", raw, e.to_string())),
            },
        };

        let regenerate_failure_policy = match get("REGENERATE_FAILURE_POLICY") {
            None => RegenerateFailurePolicy::default(),
            Some(raw) => raw
                .parse()
                .map_err(|e: String| AppError::invalid_config("REGENERATE_FAILURE_POLICY", raw, e))?,
        };

        let port = match get("PORT") {
            None => DEFAULT_PORT,
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| AppError::invalid_config("PORT", raw.clone(), e.to_string()))?,
        };

        Ok(Self {
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            request_timeout,
            regenerate_failure_policy,
            port,
        })
    }
}
