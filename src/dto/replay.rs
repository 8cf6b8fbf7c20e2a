use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::replay_service::{FinalStats, PlayerReplay, ProgressSnapshot, RaceReplay};

/// One recorded progress point.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDto {
    pub timestamp: u64,
    pub position: f64,
    pub current_index: usize,
    pub wpm: f64,
    pub accuracy: f64,
}

impl From<&ProgressSnapshot> for SnapshotDto {
    fn from(snapshot: &ProgressSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            position: snapshot.position,
            current_index: snapshot.current_index,
            wpm: snapshot.wpm,
            accuracy: snapshot.accuracy,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalStatsDto {
    pub wpm: f64,
    pub accuracy: f64,
    pub finish_time: Option<u64>,
    pub rank: usize,
}

impl From<&FinalStats> for FinalStatsDto {
    fn from(stats: &FinalStats) -> Self {
        Self {
            wpm: stats.wpm,
            accuracy: stats.accuracy,
            finish_time: stats.finish_time,
            rank: stats.rank,
        }
    }
}

/// Replay track for one racer.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReplayDto {
    pub player_id: String,
    pub name: String,
    pub snapshots: Vec<SnapshotDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<FinalStatsDto>,
}

/// Full replay payload for `replay_data` and the REST replay routes.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplayDto {
    pub game_id: Uuid,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    pub players: Vec<PlayerReplayDto>,
}

impl From<&RaceReplay> for ReplayDto {
    fn from(replay: &RaceReplay) -> Self {
        Self {
            game_id: replay.game_id,
            text: replay.text.clone(),
            start_time: replay.start_time,
            end_time: replay.end_time,
            players: replay
                .players
                .iter()
                .map(|(player_id, track)| PlayerReplayDto {
                    player_id: player_id.clone(),
                    name: track.name.clone(),
                    snapshots: track.snapshots.iter().map(SnapshotDto::from).collect(),
                    final_stats: track.final_stats.as_ref().map(FinalStatsDto::from),
                })
                .collect(),
        }
    }
}

/// Listing entry for `GET /api/game/replays`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplayListItem {
    pub game_id: Uuid,
    pub player_count: usize,
    pub snapshot_count: usize,
    pub finalized: bool,
}
