use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dto::{game::GameListItem, health::HealthResponse},
    state::controls::{ControlSnapshot, UpdateFrequency},
};

/// Current mitigation flags and tunables, as exposed to clients and admins.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusDto {
    pub accepting_new_players: bool,
    pub throttling_enabled: bool,
    pub update_frequency: &'static str,
    pub replay_snapshot_interval_ms: u64,
    pub replay_retention_ms: u64,
    pub game_creation_queue_enabled: bool,
    pub creation_backoff_enabled: bool,
    pub defer_resource_intensive_ops: bool,
    pub reduce_max_players: bool,
    pub memory_alert: bool,
    pub load_alert: bool,
    pub game_count_alert: bool,
    /// Bumped on every controller update; lets observers detect transitions.
    pub version: u64,
}

impl SystemStatusDto {
    pub fn from_snapshot(snapshot: &ControlSnapshot, version: u64) -> Self {
        Self {
            accepting_new_players: snapshot.accepting_new_players,
            throttling_enabled: snapshot.throttling_enabled,
            update_frequency: snapshot.update_frequency.as_str(),
            replay_snapshot_interval_ms: snapshot.replay_snapshot_interval_ms,
            replay_retention_ms: snapshot.replay_retention_ms,
            game_creation_queue_enabled: snapshot.game_creation_queue_enabled,
            creation_backoff_enabled: snapshot.creation_backoff_enabled,
            defer_resource_intensive_ops: snapshot.defer_resource_intensive_ops,
            reduce_max_players: snapshot.reduce_max_players,
            memory_alert: snapshot.memory_alert,
            load_alert: snapshot.load_alert,
            game_count_alert: snapshot.game_count_alert,
            version,
        }
    }
}

/// Aggregate counters for the monitoring surface.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatsDto {
    pub active_games: usize,
    pub connected_clients: usize,
    pub queued_creations: usize,
    pub deferred_operations: usize,
    pub broadcasts_sent: u64,
    pub frames_dropped: u64,
    pub progress_suppressed: u64,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_per_cpu: Option<f64>,
}

/// Partial update accepted by `set_system_config`; omitted fields are left
/// untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfigPatch {
    pub accepting_new_players: Option<bool>,
    pub throttling_enabled: Option<bool>,
    /// "normal" or "low".
    pub update_frequency: Option<String>,
    pub replay_snapshot_interval_ms: Option<u64>,
    pub replay_retention_ms: Option<u64>,
    pub game_creation_queue_enabled: Option<bool>,
    pub creation_backoff_enabled: Option<bool>,
    pub defer_resource_intensive_ops: Option<bool>,
    pub reduce_max_players: Option<bool>,
}

impl SystemConfigPatch {
    /// Apply every present field onto a control snapshot.
    pub fn apply(&self, snapshot: &mut ControlSnapshot) {
        if let Some(value) = self.accepting_new_players {
            snapshot.accepting_new_players = value;
        }
        if let Some(value) = self.throttling_enabled {
            snapshot.throttling_enabled = value;
        }
        if let Some(freq) = self.update_frequency.as_deref() {
            match freq {
                "low" => snapshot.update_frequency = UpdateFrequency::Low,
                "normal" => snapshot.update_frequency = UpdateFrequency::Normal,
                _ => {}
            }
        }
        if let Some(value) = self.replay_snapshot_interval_ms {
            snapshot.replay_snapshot_interval_ms = value;
        }
        if let Some(value) = self.replay_retention_ms {
            snapshot.replay_retention_ms = value;
        }
        if let Some(value) = self.game_creation_queue_enabled {
            snapshot.game_creation_queue_enabled = value;
        }
        if let Some(value) = self.creation_backoff_enabled {
            snapshot.creation_backoff_enabled = value;
        }
        if let Some(value) = self.defer_resource_intensive_ops {
            snapshot.defer_resource_intensive_ops = value;
        }
        if let Some(value) = self.reduce_max_players {
            snapshot.reduce_max_players = value;
        }
    }
}

/// Combined status payload for the system-status surfaces.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusResponse {
    pub status: SystemStatusDto,
    pub stats: SystemStatsDto,
}

/// Combined payload for `GET /api/monitor/dashboard`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub health: HealthResponse,
    pub status: SystemStatusDto,
    pub stats: SystemStatsDto,
    pub games: Vec<GameListItem>,
}
