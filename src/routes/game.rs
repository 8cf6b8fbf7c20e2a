use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        game::{CreateGameRequest, GameJoinedResponse, GameListItem, GameStateDto, JoinGameRequest},
        monitor::SystemStatusResponse,
        replay::{ReplayDto, ReplayListItem},
    },
    error::{AppError, ServiceError},
    services::{monitor_service, race_service},
    state::SharedState,
};

/// Routes for game administration over plain HTTP.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", get(list_games))
        .route("/games/{id}", get(get_game))
        .route("/create", post(create_game))
        .route("/join", post(join_game))
        .route("/system/status", get(system_status))
        .route("/replays", get(list_replays))
        .route("/replays/{id}", get(get_replay))
}

#[utoipa::path(
    get,
    path = "/api/game/games",
    tag = "game",
    responses((status = 200, description = "Active games", body = [GameListItem]))
)]
/// List every active session with its player count and phase.
pub async fn list_games(State(state): State<SharedState>) -> Json<Vec<GameListItem>> {
    Json(race_service::list_games(&state).await)
}

#[utoipa::path(
    get,
    path = "/api/game/games/{id}",
    tag = "game",
    params(("id" = Uuid, Path, description = "Identifier of the game")),
    responses(
        (status = 200, description = "Game state", body = GameStateDto),
        (status = 404, description = "Game not found")
    )
)]
/// Full state snapshot of one session.
pub async fn get_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameStateDto>, AppError> {
    let dto = race_service::get_state(&state, id).await?;
    Ok(Json(dto))
}

#[utoipa::path(
    post,
    path = "/api/game/create",
    tag = "game",
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Game created", body = GameJoinedResponse),
        (status = 202, description = "Creation queued"),
        (status = 503, description = "Not accepting new players")
    )
)]
/// Create a session on behalf of an HTTP client. Subject to the same
/// intake mitigations as the WebSocket path.
pub async fn create_game(
    State(state): State<SharedState>,
    Json(payload): Json<CreateGameRequest>,
) -> Result<Json<GameJoinedResponse>, AppError> {
    payload
        .validate()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let player_id = Uuid::new_v4().to_string();
    let outcome = race_service::create_game(
        &state,
        &player_id,
        &payload.player_name,
        payload.max_players.map(|n| n as usize),
    )
    .await?;

    Ok(Json(GameJoinedResponse {
        game_id: outcome.game_id,
        player: outcome.player,
        is_spectator: outcome.is_spectator,
        game_state: outcome.game_state,
    }))
}

#[utoipa::path(
    post,
    path = "/api/game/join",
    tag = "game",
    request_body = JoinGameRequest,
    responses(
        (status = 200, description = "Joined", body = GameJoinedResponse),
        (status = 404, description = "Game not found"),
        (status = 409, description = "Game full")
    )
)]
/// Join a session (or any open one) on behalf of an HTTP client.
pub async fn join_game(
    State(state): State<SharedState>,
    Json(payload): Json<JoinGameRequest>,
) -> Result<Json<GameJoinedResponse>, AppError> {
    payload
        .validate()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let player_id = Uuid::new_v4().to_string();
    let outcome = race_service::join_game(
        &state,
        &player_id,
        &payload.player_name,
        payload.game_id,
        payload.is_spectator.unwrap_or(false),
    )
    .await?;

    Ok(Json(GameJoinedResponse {
        game_id: outcome.game_id,
        player: outcome.player,
        is_spectator: outcome.is_spectator,
        game_state: outcome.game_state,
    }))
}

#[utoipa::path(
    get,
    path = "/api/game/system/status",
    tag = "game",
    responses((status = 200, description = "Mitigation flags and counters", body = SystemStatusResponse))
)]
/// Current mitigation flags plus aggregate counters.
pub async fn system_status(State(state): State<SharedState>) -> Json<SystemStatusResponse> {
    Json(SystemStatusResponse {
        status: monitor_service::system_status(&state),
        stats: monitor_service::system_stats(&state),
    })
}

#[utoipa::path(
    get,
    path = "/api/game/replays",
    tag = "game",
    responses((status = 200, description = "Stored replays", body = [ReplayListItem]))
)]
/// List the replays still retained in memory.
pub async fn list_replays(State(state): State<SharedState>) -> Json<Vec<ReplayListItem>> {
    Json(state.replays().list())
}

#[utoipa::path(
    get,
    path = "/api/game/replays/{id}",
    tag = "game",
    params(("id" = Uuid, Path, description = "Identifier of the game")),
    responses(
        (status = 200, description = "Replay", body = ReplayDto),
        (status = 404, description = "Replay not found")
    )
)]
/// Fetch one replay by game id.
pub async fn get_replay(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayDto>, AppError> {
    match state.replays().get(id) {
        Some(replay) => Ok(Json(ReplayDto::from(&replay))),
        None => Err(ServiceError::ReplayNotFound(id).into()),
    }
}
