use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{
    game::{GameListItem, GameStateDto, PlayerDto, SummaryDto},
    monitor::{SystemConfigPatch, SystemStatsDto, SystemStatusDto},
    replay::ReplayDto,
};

/// Events accepted from WebSocket clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateGame {
        player_name: String,
        max_players: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    JoinGame {
        player_name: String,
        game_id: Option<Uuid>,
        is_spectator: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReady { game_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UpdateProgress {
        game_id: Uuid,
        current_index: usize,
        wpm: f64,
        accuracy: f64,
    },
    #[serde(rename_all = "camelCase")]
    PlayerFinished {
        game_id: Uuid,
        wpm: f64,
        accuracy: f64,
        finish_time: u64,
    },
    #[serde(rename_all = "camelCase")]
    LeaveGame { game_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetReplay { game_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetGameState { game_id: Uuid },
    GetAllGames,
    GetSystemStatus,
    SetSystemConfig {
        #[serde(flatten)]
        patch: SystemConfigPatch,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Discriminator inside `game_state_update` payloads.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameUpdateKind {
    GameState,
    ProgressUpdate,
    SystemStatus,
}

/// Events pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    GameStateUpdate {
        update_type: GameUpdateKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_state: Option<GameStateDto>,
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PlayerDto>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<SystemStatusDto>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<SystemStatsDto>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerJoined { game_id: Uuid, player: PlayerDto },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { game_id: Uuid, player_id: String },
    #[serde(rename_all = "camelCase")]
    GameCountdown { game_id: Uuid, countdown: u32 },
    #[serde(rename_all = "camelCase")]
    GameStarted { game_id: Uuid, start_time: u64 },
    #[serde(rename_all = "camelCase")]
    GameFinished {
        game_state: GameStateDto,
        summary: SummaryDto,
    },
    #[serde(rename_all = "camelCase")]
    GameTerminated { game_id: Uuid, reason: String },
    #[serde(rename_all = "camelCase")]
    ReplayData { game_id: Uuid, replay: ReplayDto },
    AllGames { games: Vec<GameListItem> },
    Error {
        message: String,
        code: &'static str,
    },
}

impl ServerMessage {
    /// Full session snapshot.
    pub fn game_state(dto: GameStateDto) -> Self {
        ServerMessage::GameStateUpdate {
            update_type: GameUpdateKind::GameState,
            game_id: Some(dto.id),
            game_state: Some(dto),
            player: None,
            status: None,
            stats: None,
        }
    }

    /// Single-player progress delta; the only droppable broadcast.
    pub fn progress_update(game_id: Uuid, player: PlayerDto) -> Self {
        ServerMessage::GameStateUpdate {
            update_type: GameUpdateKind::ProgressUpdate,
            game_id: Some(game_id),
            game_state: None,
            player: Some(player),
            status: None,
            stats: None,
        }
    }

    pub fn system_status(status: SystemStatusDto, stats: SystemStatsDto) -> Self {
        ServerMessage::GameStateUpdate {
            update_type: GameUpdateKind::SystemStatus,
            game_id: None,
            game_state: None,
            player: None,
            status: Some(status),
            stats: Some(stats),
        }
    }

    /// Race-transition events (and direct error replies) are never dropped
    /// from a connection's outbound queue.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ServerMessage::GameCountdown { .. }
                | ServerMessage::GameStarted { .. }
                | ServerMessage::GameFinished { .. }
                | ServerMessage::GameTerminated { .. }
                | ServerMessage::Error { .. }
        )
    }

    /// Whether this is a throttle-eligible progress broadcast.
    pub fn is_progress_update(&self) -> bool {
        matches!(
            self,
            ServerMessage::GameStateUpdate {
                update_type: GameUpdateKind::ProgressUpdate,
                ..
            }
        )
    }
}
