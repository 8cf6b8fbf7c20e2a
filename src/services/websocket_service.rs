//! WebSocket connection lifecycle and inbound event dispatch.
//!
//! Each connection gets a generated id that doubles as the player id, a
//! bounded outbound queue drained by a dedicated writer task, and a reader
//! loop that dispatches tagged events to the race engine. Engine errors on
//! client-initiated events go back to the originating connection only.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        replay::ReplayDto,
        ws::{ClientMessage, ServerMessage},
    },
    error::ServiceError,
    services::{fanout, monitor_service, race_service},
    state::{SharedState, game::PlayerId},
};

/// Handle the full lifecycle of one client connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection_id: PlayerId = Uuid::new_v4().to_string();
    let queue = fanout::register_connection(&state, &connection_id);

    let (mut sender, mut receiver) = socket.split();

    // Dedicated writer task keeps outbound events flowing even while we
    // await inbound frames; it ends once the queue is closed and drained.
    let writer_queue = queue.clone();
    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(event) = writer_queue.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize outbound event");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    info!(connection_id = %connection_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(event) => dispatch(&state, &connection_id, event).await,
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "failed to parse client event");
                    fanout::send_to(
                        &state,
                        &connection_id,
                        ServerMessage::Error {
                            message: "malformed event payload".into(),
                            code: "BAD_REQUEST",
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "client closed connection");
                break;
            }
            // Pings are answered at the protocol layer; binary frames are
            // not part of the event surface.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    handle_disconnect(&state, &connection_id).await;
    fanout::unregister_connection(&state, &connection_id);
    let _ = writer_task.await;
    info!(connection_id = %connection_id, "client disconnected");
}

/// Route a disconnect through `player_left` for every session the player
/// was part of, then tell the affected rooms.
async fn handle_disconnect(state: &SharedState, connection_id: &PlayerId) {
    for game_id in state.sessions_for_player(connection_id) {
        if let Err(err) = race_service::player_left(state, game_id, connection_id).await {
            warn!(
                connection_id = %connection_id,
                game_id = %game_id,
                error = %err,
                "disconnect cleanup failed"
            );
            continue;
        }
        fanout::broadcast(
            state,
            game_id,
            ServerMessage::PlayerLeft {
                game_id,
                player_id: connection_id.clone(),
            },
        );
    }
}

/// Exhaustive dispatch of one inbound event.
async fn dispatch(state: &SharedState, connection_id: &PlayerId, event: ClientMessage) {
    match event {
        ClientMessage::CreateGame {
            player_name,
            max_players,
        } => match race_service::create_game(state, connection_id, &player_name, max_players).await
        {
            Ok(outcome) => {
                fanout::send_to(
                    state,
                    connection_id,
                    ServerMessage::game_state(outcome.game_state),
                );
            }
            Err(err) => fanout::send_error(state, connection_id, &err),
        },

        ClientMessage::JoinGame {
            player_name,
            game_id,
            is_spectator,
        } => match race_service::join_game(
            state,
            connection_id,
            &player_name,
            game_id,
            is_spectator.unwrap_or(false),
        )
        .await
        {
            Ok(outcome) => {
                fanout::send_to(
                    state,
                    connection_id,
                    ServerMessage::game_state(outcome.game_state),
                );
            }
            Err(err) => fanout::send_error(state, connection_id, &err),
        },

        ClientMessage::PlayerReady { game_id } => {
            if let Err(err) = race_service::player_ready(state, game_id, connection_id).await {
                fanout::send_error(state, connection_id, &err);
            }
        }

        ClientMessage::UpdateProgress {
            game_id,
            current_index,
            wpm,
            accuracy,
        } => {
            match race_service::update_progress(
                state,
                game_id,
                connection_id,
                current_index,
                wpm,
                accuracy,
            )
            .await
            {
                Ok(Some(player)) => fanout::broadcast_progress(state, game_id, player),
                Ok(None) => {}
                // Swallowed with a warning to avoid error-spam loops.
                Err(err) => {
                    warn!(
                        connection_id = %connection_id,
                        game_id = %game_id,
                        error = %err,
                        "progress update rejected"
                    );
                }
            }
        }

        ClientMessage::PlayerFinished {
            game_id,
            wpm,
            accuracy,
            finish_time,
        } => {
            match race_service::player_finished(
                state,
                game_id,
                connection_id,
                wpm,
                accuracy,
                finish_time,
            )
            .await
            {
                Ok(_) => {
                    // `game_finished` is broadcast by the engine when the last
                    // racer comes in; the room still gets the refreshed state.
                    if let Ok(dto) = race_service::get_state(state, game_id).await {
                        fanout::broadcast(state, game_id, ServerMessage::game_state(dto));
                    }
                }
                Err(err) => fanout::send_error(state, connection_id, &err),
            }
        }

        ClientMessage::LeaveGame { game_id } => {
            match race_service::player_left(state, game_id, connection_id).await {
                Ok(()) => {
                    fanout::broadcast(
                        state,
                        game_id,
                        ServerMessage::PlayerLeft {
                            game_id,
                            player_id: connection_id.clone(),
                        },
                    );
                }
                Err(err) => fanout::send_error(state, connection_id, &err),
            }
        }

        ClientMessage::GetReplay { game_id } => match state.replays().get(game_id) {
            Some(replay) => {
                fanout::send_to(
                    state,
                    connection_id,
                    ServerMessage::ReplayData {
                        game_id,
                        replay: ReplayDto::from(&replay),
                    },
                );
            }
            None => fanout::send_error(state, connection_id, &ServiceError::ReplayNotFound(game_id)),
        },

        ClientMessage::GetGameState { game_id } => {
            match race_service::get_state(state, game_id).await {
                Ok(dto) => fanout::send_to(state, connection_id, ServerMessage::game_state(dto)),
                Err(err) => fanout::send_error(state, connection_id, &err),
            }
        }

        ClientMessage::GetAllGames => {
            let games = race_service::list_games(state).await;
            fanout::send_to(state, connection_id, ServerMessage::AllGames { games });
        }

        ClientMessage::GetSystemStatus => {
            send_system_status(state, connection_id);
        }

        ClientMessage::SetSystemConfig { patch } => {
            state.controls().update(|snapshot| patch.apply(snapshot));
            info!(connection_id = %connection_id, "system config updated");
            // Tunables changed for everyone, so every connection hears it,
            // not just the sender.
            broadcast_system_status(state);
        }

        ClientMessage::Unknown => {
            fanout::send_to(
                state,
                connection_id,
                ServerMessage::Error {
                    message: "unknown event type".into(),
                    code: "BAD_REQUEST",
                },
            );
        }
    }
}

fn system_status_frame(state: &SharedState) -> ServerMessage {
    ServerMessage::system_status(
        monitor_service::system_status(state),
        monitor_service::system_stats(state),
    )
}

fn send_system_status(state: &SharedState, connection_id: &PlayerId) {
    fanout::send_to(state, connection_id, system_status_frame(state));
}

fn broadcast_system_status(state: &SharedState) {
    fanout::broadcast_all(state, system_status_frame(state));
}
