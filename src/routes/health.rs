use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::{dto::health::HealthResponse, services::monitor_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy or degraded", body = HealthResponse),
        (status = 503, description = "Service is critical", body = HealthResponse)
    )
)]
/// Return the current health classification; 503 while critical.
pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    let status = monitor_service::health_status(&state);
    let body = monitor_service::health_response(&state);

    let code = if status.is_critical() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (code, Json(body))
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/health", get(healthcheck))
}
