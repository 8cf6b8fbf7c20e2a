//! Read-only projections for the health and monitoring surfaces.

use std::sync::atomic::Ordering;

use crate::{
    dto::{
        health::{HealthResponse, HealthStatus},
        monitor::{SystemStatsDto, SystemStatusDto},
    },
    state::{SharedState, game::now_ms},
};

/// Classify overall health from the controller latches: memory pressure is
/// critical, any other active alert is a warning.
pub fn health_status(state: &SharedState) -> HealthStatus {
    let snapshot = state.controls().snapshot();
    if snapshot.memory_alert {
        HealthStatus::Critical
    } else if snapshot.load_alert || snapshot.game_count_alert {
        HealthStatus::Warning
    } else {
        HealthStatus::Ok
    }
}

pub fn health_response(state: &SharedState) -> HealthResponse {
    HealthResponse::new(health_status(state), state.config().env.as_str(), now_ms())
}

/// Current mitigation flags and tunables.
pub fn system_status(state: &SharedState) -> SystemStatusDto {
    let snapshot = state.controls().snapshot();
    SystemStatusDto::from_snapshot(&snapshot, state.controls().version())
}

/// Aggregate counters for monitoring.
pub fn system_stats(state: &SharedState) -> SystemStatsDto {
    let sample = state.last_sample();
    let counters = state.counters();

    SystemStatsDto {
        active_games: state.active_games(),
        connected_clients: state.connections().len(),
        queued_creations: state
            .creation_queue()
            .lock()
            .map(|queue| queue.len())
            .unwrap_or(0),
        deferred_operations: state.deferred().len(),
        broadcasts_sent: counters.broadcasts_sent.load(Ordering::Relaxed),
        frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
        progress_suppressed: counters.progress_suppressed.load(Ordering::Relaxed),
        uptime_seconds: state.uptime_seconds(),
        memory_fraction: sample.as_ref().map(|s| s.memory_fraction),
        load_per_cpu: sample.as_ref().map(|s| s.load_per_cpu),
    }
}
