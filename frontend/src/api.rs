use gloo_net::http::Request;

use crate::models::Health;

/// Base URL of the backend server.
const API_BASE: &str = "http://localhost:3000";

/// Fetches the backend health record (carries the configured model name).
pub async fn fetch_health() -> Result<Health, String> {
    let resp = Request::get(&format!("{API_BASE}/api/health"))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;

    if !resp.ok() {
        return Err(format!("Server error: {}", resp.status()));
    }

    resp.json::<Health>()
        .await
        .map_err(|e| format!("Parse error: {e}"))
}

/// Returns the WebSocket URL for the chat session endpoint.
pub fn ws_url() -> String {
    API_BASE.replacen("http", "ws", 1) + "/ws/chat"
}
