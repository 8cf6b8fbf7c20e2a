use serde::Serialize;
use utoipa::ToSchema;

/// Overall health classification derived from the controller latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, HealthStatus::Critical)
    }
}

/// Response returned by `GET /health`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok", "warning", or "critical").
    pub status: &'static str,
    /// Deployment environment the server runs in.
    pub env: &'static str,
    /// Milliseconds since the Unix epoch at response time.
    pub timestamp: u64,
}

impl HealthResponse {
    pub fn new(status: HealthStatus, env: &'static str, timestamp: u64) -> Self {
        Self {
            status: status.as_str(),
            env,
            timestamp,
        }
    }
}
