//! OpenAPI document aggregating the REST surface.

use utoipa::OpenApi;

use crate::{
    dto::{
        game::{
            CreateGameRequest, GameJoinedResponse, GameListItem, GameStateDto, JoinGameRequest,
            PlayerDto, RankingDto, SummaryDto, SummaryStatsDto,
        },
        health::HealthResponse,
        monitor::{
            DashboardResponse, SystemConfigPatch, SystemStatsDto, SystemStatusDto,
            SystemStatusResponse,
        },
        replay::{FinalStatsDto, PlayerReplayDto, ReplayDto, ReplayListItem, SnapshotDto},
    },
    routes,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "typerush-back",
        description = "Authoritative backend for real-time multiplayer typing races"
    ),
    paths(
        routes::health::healthcheck,
        routes::game::list_games,
        routes::game::get_game,
        routes::game::create_game,
        routes::game::join_game,
        routes::game::system_status,
        routes::game::list_replays,
        routes::game::get_replay,
        routes::monitor::monitor_health,
        routes::monitor::monitor_metrics,
        routes::monitor::monitor_stats,
        routes::monitor::monitor_dashboard,
    ),
    components(schemas(
        CreateGameRequest,
        JoinGameRequest,
        GameJoinedResponse,
        GameListItem,
        GameStateDto,
        PlayerDto,
        RankingDto,
        SummaryDto,
        SummaryStatsDto,
        HealthResponse,
        SystemStatusDto,
        SystemStatsDto,
        SystemStatusResponse,
        SystemConfigPatch,
        DashboardResponse,
        ReplayDto,
        ReplayListItem,
        PlayerReplayDto,
        SnapshotDto,
        FinalStatsDto,
    ))
)]
pub struct ApiDoc;
