use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::state::{
    game::{Player, RaceSession, RaceSummary, RankedPlayer, SummaryStats},
    state_machine::RacePhase,
};

/// Wire view of a participant.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDto {
    pub id: String,
    pub name: String,
    pub color: String,
    pub position: f64,
    pub current_index: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub is_ready: bool,
    pub finish_time: Option<u64>,
    pub is_connected: bool,
    pub is_spectator: bool,
}

impl From<&Player> for PlayerDto {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            color: player.color.clone(),
            position: player.position,
            current_index: player.current_index,
            wpm: player.wpm,
            accuracy: player.accuracy,
            is_ready: player.is_ready,
            finish_time: player.finish_time,
            is_connected: player.is_connected,
            is_spectator: player.is_spectator,
        }
    }
}

/// Full snapshot of a session as seen by clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameStateDto {
    pub id: Uuid,
    pub state: &'static str,
    pub players: Vec<PlayerDto>,
    pub text: String,
    pub max_players: usize,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_remaining: Option<u32>,
}

impl From<&RaceSession> for GameStateDto {
    fn from(session: &RaceSession) -> Self {
        Self {
            id: session.id,
            state: session.phase().as_str(),
            players: session.players.values().map(PlayerDto::from).collect(),
            text: session.text.clone(),
            max_players: session.max_players,
            created_at: session.created_at,
            start_time: session.start_time,
            end_time: session.end_time,
            countdown_remaining: (session.phase() == RacePhase::Countdown)
                .then_some(session.countdown_remaining),
        }
    }
}

/// Compact listing entry for `get_all_games` and the REST games index.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameListItem {
    pub id: Uuid,
    pub player_count: usize,
    pub state: &'static str,
}

/// One row of the final ranking.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankingDto {
    pub id: String,
    pub name: String,
    pub rank: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatsDto {
    pub avg_wpm: f64,
    pub avg_accuracy: f64,
    pub finish_rate: f64,
}

/// Final summary attached to `game_finished`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDto {
    pub total_time: u64,
    pub rankings: Vec<RankingDto>,
    pub stats: SummaryStatsDto,
    pub replay_available: bool,
}

impl From<&RaceSummary> for SummaryDto {
    fn from(summary: &RaceSummary) -> Self {
        Self {
            total_time: summary.total_time,
            rankings: summary.rankings.iter().map(RankingDto::from).collect(),
            stats: SummaryStatsDto::from(&summary.stats),
            replay_available: summary.replay_available,
        }
    }
}

impl From<&RankedPlayer> for RankingDto {
    fn from(ranked: &RankedPlayer) -> Self {
        Self {
            id: ranked.id.clone(),
            name: ranked.name.clone(),
            rank: ranked.rank,
            wpm: ranked.wpm,
            accuracy: ranked.accuracy,
            finished: ranked.finished,
        }
    }
}

impl From<&SummaryStats> for SummaryStatsDto {
    fn from(stats: &SummaryStats) -> Self {
        Self {
            avg_wpm: stats.avg_wpm,
            avg_accuracy: stats.avg_accuracy,
            finish_rate: stats.finish_rate,
        }
    }
}

/// REST body for `POST /api/game/create`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    #[validate(length(min = 1, max = 64))]
    pub player_name: String,
    #[validate(range(min = 2, max = 10))]
    pub max_players: Option<u32>,
}

/// REST body for `POST /api/game/join`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRequest {
    #[validate(length(min = 1, max = 64))]
    pub player_name: String,
    pub game_id: Option<Uuid>,
    pub is_spectator: Option<bool>,
}

/// Response for both create and join REST operations.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameJoinedResponse {
    pub game_id: Uuid,
    pub player: PlayerDto,
    pub is_spectator: bool,
    pub game_state: GameStateDto,
}
