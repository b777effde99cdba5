use axum::extract::State;
use axum::Json;

use crate::models::HealthResponse;
use crate::service::chat_service::ChatService;

/// GET `/api/health`: liveness plus the configured model, shown in the widget header
pub async fn health_handler(State(svc): State<ChatService>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", model: svc.model().to_string() })
}
