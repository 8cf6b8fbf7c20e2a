use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Typed errors surfaced by the race engine and its satellite services.
///
/// The fan-out layer maps these onto `error{message, code}` events for the
/// originating connection; the HTTP layer maps them through [`AppError`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("game `{0}` not found")]
    GameNotFound(Uuid),
    #[error("game `{0}` is full")]
    GameFull(Uuid),
    #[error("player `{0}` not found")]
    PlayerNotFound(String),
    #[error("player `{0}` already joined")]
    PlayerAlreadyExists(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not accepting new players: {0}")]
    ServiceUnavailable(String),
    #[error("game creation queued")]
    Queued,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("replay for game `{0}` not found")]
    ReplayNotFound(Uuid),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable wire code delivered to WebSocket clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::GameNotFound(_) => "GAME_NOT_FOUND",
            ServiceError::GameFull(_) => "GAME_FULL",
            ServiceError::PlayerNotFound(_) => "PLAYER_NOT_FOUND",
            ServiceError::PlayerAlreadyExists(_) => "PLAYER_ALREADY_EXISTS",
            ServiceError::InvalidState(_) => "INVALID_STATE",
            ServiceError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ServiceError::Queued => "QUEUED",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::ReplayNotFound(_) => "REPLAY_NOT_FOUND",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

/// HTTP-facing error with a status code per the service taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("accepted: {0}")]
    Queued(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error")]
    Internal,
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::GameNotFound(_)
            | ServiceError::PlayerNotFound(_)
            | ServiceError::ReplayNotFound(_) => AppError::NotFound(err.to_string()),
            ServiceError::GameFull(_)
            | ServiceError::PlayerAlreadyExists(_)
            | ServiceError::InvalidState(_) => AppError::Conflict(err.to_string()),
            ServiceError::ServiceUnavailable(_) => AppError::ServiceUnavailable(err.to_string()),
            ServiceError::Queued => AppError::Queued(err.to_string()),
            ServiceError::Unauthorized(_) => AppError::Unauthorized(err.to_string()),
            // Never leak internals through an HTTP body.
            ServiceError::Internal(_) => AppError::Internal,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Queued(_) => StatusCode::ACCEPTED,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Queued(_) => "QUEUED",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal => "INTERNAL",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let payload = Json(ErrorBody {
            message: self.to_string(),
            code: self.code(),
        });

        (status, payload).into_response()
    }
}
