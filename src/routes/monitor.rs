use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    routing::get,
};

use crate::{
    dto::{
        health::HealthResponse,
        monitor::{DashboardResponse, SystemStatsDto, SystemStatusResponse},
    },
    error::AppError,
    services::{monitor_service, race_service},
    state::SharedState,
};

/// Monitoring routes; metrics, stats, and dashboard require the admin API
/// key in production.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(monitor_health))
        .route("/metrics", get(monitor_metrics))
        .route("/stats", get(monitor_stats))
        .route("/dashboard", get(monitor_dashboard))
}

/// Enforce the `x-api-key` header in production environments.
fn require_api_key(state: &SharedState, headers: &HeaderMap) -> Result<(), AppError> {
    if !state.config().env.is_production() {
        return Ok(());
    }

    let Some(expected) = state.config().admin_api_key.as_deref() else {
        return Err(AppError::Unauthorized("admin API key not configured".into()));
    };

    match headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        Some(provided) if provided == expected => Ok(()),
        _ => Err(AppError::Unauthorized("invalid or missing API key".into())),
    }
}

#[utoipa::path(
    get,
    path = "/api/monitor/health",
    tag = "monitor",
    responses((status = 200, description = "Health classification", body = HealthResponse))
)]
/// Unauthenticated health classification.
pub async fn monitor_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(monitor_service::health_response(&state))
}

#[utoipa::path(
    get,
    path = "/api/monitor/metrics",
    tag = "monitor",
    responses(
        (status = 200, description = "Counters and host sample", body = SystemStatsDto),
        (status = 401, description = "Missing or invalid API key")
    )
)]
/// Fan-out counters and the most recent host sample.
pub async fn monitor_metrics(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<SystemStatsDto>, AppError> {
    require_api_key(&state, &headers)?;
    Ok(Json(monitor_service::system_stats(&state)))
}

#[utoipa::path(
    get,
    path = "/api/monitor/stats",
    tag = "monitor",
    responses(
        (status = 200, description = "Mitigation state and counters", body = SystemStatusResponse),
        (status = 401, description = "Missing or invalid API key")
    )
)]
/// Mitigation flags alongside the aggregate counters.
pub async fn monitor_stats(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<SystemStatusResponse>, AppError> {
    require_api_key(&state, &headers)?;
    Ok(Json(SystemStatusResponse {
        status: monitor_service::system_status(&state),
        stats: monitor_service::system_stats(&state),
    }))
}

#[utoipa::path(
    get,
    path = "/api/monitor/dashboard",
    tag = "monitor",
    responses(
        (status = 200, description = "Combined monitoring view", body = DashboardResponse),
        (status = 401, description = "Missing or invalid API key")
    )
)]
/// Everything the admin dashboard renders in one response.
pub async fn monitor_dashboard(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>, AppError> {
    require_api_key(&state, &headers)?;
    Ok(Json(DashboardResponse {
        health: monitor_service::health_response(&state),
        status: monitor_service::system_status(&state),
        stats: monitor_service::system_stats(&state),
        games: race_service::list_games(&state).await,
    }))
}
