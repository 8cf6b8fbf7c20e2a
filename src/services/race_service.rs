//! The race engine: single authoritative owner of session and player state.
//!
//! Every operation locks the target session for its full duration, so
//! mutations are serialized per game. Countdown, deadline, and cleanup
//! timers are owned by the session and acquire the same lock as any other
//! mutator; their failures are logged and swallowed.

use std::{cmp::Ordering, sync::Arc, time::Duration};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        game::{GameListItem, GameStateDto, PlayerDto, SummaryDto},
        ws::ServerMessage,
    },
    error::ServiceError,
    services::{
        fanout,
        replay_service::{self, FinalStats, ProgressSnapshot},
        self_healing::QueuedCreate,
    },
    state::{
        SharedState,
        game::{
            GameId, MAX_NAME_LEN, PLAYER_PALETTE, Player, PlayerId, RaceSession, RaceSummary,
            RankedPlayer, SummaryStats, now_ms,
        },
        state_machine::{RaceEvent, RacePhase},
    },
};

/// Waiting sessions this old with at most one connected player are fair
/// game for idle termination.
const IDLE_WAITING_AGE_MS: u64 = 5 * 60 * 1_000;

/// Result of a successful create or join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub game_id: GameId,
    pub player: PlayerDto,
    pub is_spectator: bool,
    pub game_state: GameStateDto,
}

/// Create a new session with the caller as its first racer.
///
/// Fails with `ServiceUnavailable` while the memory mitigation has stopped
/// intake, and with `Queued` when the creation queue is active (the queue
/// drain task finishes the job later).
pub async fn create_game(
    state: &SharedState,
    player_id: &PlayerId,
    player_name: &str,
    max_players: Option<usize>,
) -> Result<JoinOutcome, ServiceError> {
    let controls = state.controls().snapshot();
    if !controls.accepting_new_players {
        return Err(ServiceError::ServiceUnavailable(
            "server is shedding load".into(),
        ));
    }

    if controls.game_creation_queue_enabled {
        if let Ok(mut queue) = state.creation_queue().lock() {
            queue.push_back(QueuedCreate {
                player_id: player_id.clone(),
                player_name: player_name.to_string(),
                max_players,
                submitted_at: now_ms(),
            });
        }
        return Err(ServiceError::Queued);
    }

    create_session_now(state, player_id, player_name, max_players).await
}

/// Allocate and register a session immediately, bypassing the queue. Used
/// directly by the queue drain task.
pub async fn create_session_now(
    state: &SharedState,
    player_id: &PlayerId,
    player_name: &str,
    max_players: Option<usize>,
) -> Result<JoinOutcome, ServiceError> {
    let controls = state.controls().snapshot();
    let capacity = effective_max_players(
        state.config().max_players_per_game,
        controls.reduce_max_players,
        max_players,
    );

    let game_id = Uuid::new_v4();
    let name = sanitize_name(player_name);
    let creator = Player::racer(player_id.clone(), name, PLAYER_PALETTE[0].to_string());
    let player_dto = PlayerDto::from(&creator);
    let text = state.corpus().pick(capacity);
    let session = RaceSession::new(game_id, text, capacity, creator);
    let game_state = GameStateDto::from(&session);

    state
        .sessions()
        .insert(game_id, Arc::new(Mutex::new(session)));
    state.track_player_session(player_id, game_id);
    fanout::join_room(state, game_id, player_id);
    fanout::broadcast(
        state,
        game_id,
        ServerMessage::PlayerJoined {
            game_id,
            player: player_dto.clone(),
        },
    );

    info!(game_id = %game_id, player_id = %player_id, max_players = capacity, "game created");

    Ok(JoinOutcome {
        game_id,
        player: player_dto,
        is_spectator: false,
        game_state,
    })
}

/// Join a session. Without a game id, any waiting session with room is
/// used; when none exists the call falls through to [`create_game`].
/// `spectate` forces a spectator join even while the session is waiting.
pub async fn join_game(
    state: &SharedState,
    player_id: &PlayerId,
    player_name: &str,
    game_id: Option<GameId>,
    spectate: bool,
) -> Result<JoinOutcome, ServiceError> {
    let game_id = match game_id {
        Some(id) => id,
        None => match find_open_session(state).await {
            Some(id) => id,
            None => return create_game(state, player_id, player_name, None).await,
        },
    };

    join_existing(state, player_id, player_name, game_id, spectate).await
}

/// First waiting session that still has room, if any.
async fn find_open_session(state: &SharedState) -> Option<GameId> {
    let candidates: Vec<_> = state
        .sessions()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    for shared in candidates {
        let session = shared.lock().await;
        if session.phase() == RacePhase::Waiting && session.players.len() < session.max_players {
            return Some(session.id);
        }
    }
    None
}

async fn join_existing(
    state: &SharedState,
    player_id: &PlayerId,
    player_name: &str,
    game_id: GameId,
    spectate: bool,
) -> Result<JoinOutcome, ServiceError> {
    let shared = state.session(game_id)?;
    let mut session = shared.lock().await;

    // A returning member is reconnected rather than duplicated.
    if let Some(existing) = session.players.get_mut(player_id) {
        if existing.is_connected {
            return Err(ServiceError::PlayerAlreadyExists(player_id.clone()));
        }
        existing.is_connected = true;
        let player = PlayerDto::from(&*existing);
        let is_spectator = existing.is_spectator;
        let game_state = GameStateDto::from(&*session);
        drop(session);

        state.track_player_session(player_id, game_id);
        fanout::join_room(state, game_id, player_id);
        // Opponents see the returning player immediately, not on the next
        // state snapshot.
        fanout::broadcast(
            state,
            game_id,
            ServerMessage::PlayerJoined {
                game_id,
                player: player.clone(),
            },
        );
        info!(game_id = %game_id, player_id = %player_id, "player reconnected");

        return Ok(JoinOutcome {
            game_id,
            player,
            is_spectator,
            game_state,
        });
    }

    let name = sanitize_name(player_name);
    let player = if spectate || session.phase() != RacePhase::Waiting {
        Player::spectator(player_id.clone(), name)
    } else if session.players.len() >= session.max_players {
        return Err(ServiceError::GameFull(game_id));
    } else {
        let color = PLAYER_PALETTE[session.players.len() % PLAYER_PALETTE.len()].to_string();
        Player::racer(player_id.clone(), name, color)
    };

    let is_spectator = player.is_spectator;
    let player_dto = PlayerDto::from(&player);
    session.players.insert(player_id.clone(), player);
    let game_state = GameStateDto::from(&*session);
    drop(session);

    state.track_player_session(player_id, game_id);
    fanout::join_room(state, game_id, player_id);
    fanout::broadcast(
        state,
        game_id,
        ServerMessage::PlayerJoined {
            game_id,
            player: player_dto.clone(),
        },
    );

    info!(game_id = %game_id, player_id = %player_id, is_spectator, "player joined");

    Ok(JoinOutcome {
        game_id,
        player: player_dto,
        is_spectator,
        game_state,
    })
}

/// Mark a player ready (idempotent) and start the countdown when every
/// connected racer is ready and the minimum headcount is met. Returns
/// whether the countdown was started by this call.
pub async fn player_ready(
    state: &SharedState,
    game_id: GameId,
    player_id: &PlayerId,
) -> Result<bool, ServiceError> {
    let shared = state.session(game_id)?;
    let mut session = shared.lock().await;

    let Some(player) = session.players.get_mut(player_id) else {
        return Err(ServiceError::PlayerNotFound(player_id.clone()));
    };
    player.is_ready = true;

    let started = session.phase() == RacePhase::Waiting
        && can_start_game(&session, state.config().min_players_to_start);
    if started {
        start_countdown_locked(state, &mut session)?;
    }

    let game_state = GameStateDto::from(&*session);
    drop(session);
    fanout::broadcast(state, game_id, ServerMessage::game_state(game_state));

    Ok(started)
}

/// True when every connected non-spectator is ready and at least
/// `min_players` of them are present.
pub fn can_start_game(session: &RaceSession, min_players: usize) -> bool {
    let mut count = 0;
    for racer in session.connected_racers() {
        if !racer.is_ready {
            return false;
        }
        count += 1;
    }
    count >= min_players
}

/// Waiting → Countdown: initialize the replay and arm the 1 Hz ticker.
fn start_countdown_locked(
    state: &SharedState,
    session: &mut RaceSession,
) -> Result<(), ServiceError> {
    session
        .apply(RaceEvent::StartCountdown)
        .map_err(|err| ServiceError::InvalidState(err.to_string()))?;
    session.countdown_remaining = state.config().countdown_seconds;

    let racers: Vec<(PlayerId, String)> = session
        .players
        .iter()
        .filter(|(_, p)| !p.is_spectator)
        .map(|(id, p)| (id.clone(), p.name.clone()))
        .collect();
    state.replays().init(session.id, session.text.clone(), &racers);

    let game_id = session.id;
    let ticker_state = state.clone();
    session.timers.countdown = Some(tokio::spawn(countdown_ticker(ticker_state, game_id)));

    info!(game_id = %game_id, seconds = session.countdown_remaining, "countdown started");
    Ok(())
}

/// Emits `game_countdown` once per second and hands over to the race start
/// when the counter reaches zero. Stops silently if the session left the
/// countdown phase (everyone bailed out).
async fn countdown_ticker(state: SharedState, game_id: GameId) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;

        let Ok(shared) = state.session(game_id) else {
            return;
        };
        let mut session = shared.lock().await;
        if session.phase() != RacePhase::Countdown {
            return;
        }

        if session.countdown_remaining == 0 {
            if let Err(err) = start_race_locked(&state, &mut session) {
                warn!(game_id = %game_id, error = %err, "failed to start race from countdown");
            }
            return;
        }

        let countdown = session.countdown_remaining;
        session.countdown_remaining -= 1;
        drop(session);
        fanout::broadcast(
            &state,
            game_id,
            ServerMessage::GameCountdown { game_id, countdown },
        );
    }
}

/// Countdown → Racing: stamp the start time, reset racer progress, and arm
/// the max-race-time deadline.
fn start_race_locked(state: &SharedState, session: &mut RaceSession) -> Result<(), ServiceError> {
    session
        .apply(RaceEvent::StartRace)
        .map_err(|err| ServiceError::InvalidState(err.to_string()))?;

    let start_time = now_ms();
    session.start_time = Some(start_time);
    for player in session.players.values_mut().filter(|p| !p.is_spectator) {
        player.reset_progress();
    }
    state.replays().set_start_time(session.id, start_time);

    // The ticker is the caller here; dropping the handle just detaches it.
    session.timers.countdown.take();

    let game_id = session.id;
    let deadline_state = state.clone();
    let deadline = state.config().max_race_time;
    session.timers.deadline = Some(tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        let Ok(shared) = deadline_state.session(game_id) else {
            return;
        };
        let mut session = shared.lock().await;
        if session.phase() != RacePhase::Racing {
            return;
        }
        warn!(game_id = %game_id, "race deadline reached; forcing finish");
        if let Err(err) = end_race_locked(&deadline_state, &mut session) {
            warn!(game_id = %game_id, error = %err, "failed to force-finish race");
        }
    }));

    fanout::broadcast(
        state,
        game_id,
        ServerMessage::GameStarted {
            game_id,
            start_time,
        },
    );
    info!(game_id = %game_id, "race started");
    Ok(())
}

/// Ingest a progress report. Outside the racing phase and for spectators
/// the update is dropped silently so a chatty client cannot trigger an
/// error storm. Returns the updated player for fan-out when applicable.
pub async fn update_progress(
    state: &SharedState,
    game_id: GameId,
    player_id: &PlayerId,
    current_index: usize,
    wpm: f64,
    accuracy: f64,
) -> Result<Option<PlayerDto>, ServiceError> {
    let shared = state.session(game_id)?;
    let mut session = shared.lock().await;

    if session.phase() != RacePhase::Racing {
        warn!(
            game_id = %game_id,
            player_id = %player_id,
            phase = session.phase().as_str(),
            "progress update outside racing phase dropped"
        );
        return Ok(None);
    }

    let text_len = session.text_char_len();
    let position = session.position_for(current_index);
    let now = now_ms();

    let (player_dto, snapshot, finished_now) = {
        let Some(player) = session.players.get_mut(player_id) else {
            return Err(ServiceError::PlayerNotFound(player_id.clone()));
        };
        if player.is_spectator || player.has_finished() {
            return Ok(None);
        }

        player.current_index = current_index.min(text_len);
        player.position = position;
        player.wpm = wpm;
        player.accuracy = accuracy;

        let finished_now = position >= 100.0;
        if finished_now {
            player.position = 100.0;
            player.finish_time = Some(now);
        }

        let snapshot = ProgressSnapshot {
            timestamp: now,
            position: player.position,
            current_index: player.current_index,
            wpm,
            accuracy,
        };
        (PlayerDto::from(&*player), snapshot, finished_now)
    };

    let interval = state.controls().snapshot().replay_snapshot_interval_ms;
    state.replays().record(game_id, player_id, snapshot, interval);

    if finished_now {
        let rank = session.players.values().filter(|p| p.has_finished()).count();
        state.replays().finalize_player(
            game_id,
            player_id,
            FinalStats {
                wpm,
                accuracy,
                finish_time: Some(now),
                rank,
            },
        );
    }

    Ok(Some(player_dto))
}

/// Authoritative finish for one racer. Returns `true` when this call
/// completed the race (every connected racer done), in which case the race
/// has been ended and `game_finished` broadcast.
pub async fn player_finished(
    state: &SharedState,
    game_id: GameId,
    player_id: &PlayerId,
    wpm: f64,
    accuracy: f64,
    finish_time: u64,
) -> Result<bool, ServiceError> {
    let shared = state.session(game_id)?;
    let mut session = shared.lock().await;

    if session.phase() != RacePhase::Racing {
        return Err(ServiceError::InvalidState(format!(
            "game `{game_id}` is not racing"
        )));
    }

    let text_len = session.text_char_len();
    {
        let Some(player) = session.players.get_mut(player_id) else {
            return Err(ServiceError::PlayerNotFound(player_id.clone()));
        };
        if player.is_spectator || player.has_finished() {
            return Ok(false);
        }

        player.position = 100.0;
        player.current_index = text_len;
        player.wpm = wpm;
        player.accuracy = accuracy;
        player.finish_time = Some(finish_time);
    }

    let rank = session.players.values().filter(|p| p.has_finished()).count();
    state.replays().finalize_player(
        game_id,
        player_id,
        FinalStats {
            wpm,
            accuracy,
            finish_time: Some(finish_time),
            rank,
        },
    );

    let all_done = session.connected_racers().all(|p| p.has_finished());
    if all_done {
        end_race_locked(state, &mut session)?;
    }

    Ok(all_done)
}

/// Racing → Finished: stamp the end time, finalize stragglers, compute the
/// ranked summary, broadcast `game_finished`, and arm cleanup.
fn end_race_locked(state: &SharedState, session: &mut RaceSession) -> Result<(), ServiceError> {
    session
        .apply(RaceEvent::EndRace)
        .map_err(|err| ServiceError::InvalidState(err.to_string()))?;

    let end_time = now_ms();
    session.end_time = Some(end_time);
    session.timers.cancel_deadline();
    state.replays().set_end_time(session.id, end_time);

    let summary = compute_summary(session, end_time);

    // Connected racers who never reported a finish keep their last observed
    // stats in the replay, with no finish time.
    for ranking in &summary.rankings {
        if !ranking.finished {
            let connected = session
                .players
                .get(&ranking.id)
                .is_some_and(|p| p.is_connected);
            if connected {
                state.replays().finalize_player(
                    session.id,
                    &ranking.id,
                    FinalStats {
                        wpm: ranking.wpm,
                        accuracy: ranking.accuracy,
                        finish_time: None,
                        rank: ranking.rank,
                    },
                );
            }
        }
    }

    session.summary = Some(summary.clone());
    let game_state = GameStateDto::from(&*session);
    fanout::broadcast(
        state,
        session.id,
        ServerMessage::GameFinished {
            game_state,
            summary: SummaryDto::from(&summary),
        },
    );

    schedule_cleanup_locked(state, session);
    info!(game_id = %session.id, total_time_ms = summary.total_time, "race finished");
    Ok(())
}

/// Arm the post-race cleanup timer on a session.
fn schedule_cleanup_locked(state: &SharedState, session: &mut RaceSession) {
    let game_id = session.id;
    let cleanup_state = state.clone();
    let delay = state.config().cleanup_delay;
    session.timers.cleanup = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        cleanup_session(&cleanup_state, game_id).await;
    }));
}

/// Remove a session and its room, then arm replay retention. Safe to call
/// from the session's own cleanup timer.
pub async fn cleanup_session(state: &SharedState, game_id: GameId) {
    let Some((_, shared)) = state.sessions().remove(&game_id) else {
        return;
    };

    {
        let mut session = shared.lock().await;
        session.timers.cancel_countdown();
        session.timers.cancel_deadline();
        // Not aborted: we may be running inside it.
        session.timers.cleanup.take();
        for player_id in session.players.keys() {
            state.untrack_player_session(player_id, game_id);
        }
    }

    fanout::drop_room(state, game_id);
    replay_service::schedule_retention(state.clone(), game_id);
    info!(game_id = %game_id, "session cleaned up");
}

/// Handle a player leaving (or its connection dropping). Waiting sessions
/// shed the player entirely; later phases keep the player for the rankings
/// and only mark it disconnected.
pub async fn player_left(
    state: &SharedState,
    game_id: GameId,
    player_id: &PlayerId,
) -> Result<(), ServiceError> {
    let shared = state.session(game_id)?;
    let mut session = shared.lock().await;

    match session.phase() {
        RacePhase::Waiting => {
            if session.players.shift_remove(player_id).is_none() {
                return Err(ServiceError::PlayerNotFound(player_id.clone()));
            }
            state.untrack_player_session(player_id, game_id);
            fanout::leave_room(state, game_id, player_id);

            if session.players.is_empty() {
                session.timers.cancel_all();
                drop(session);
                state.sessions().remove(&game_id);
                fanout::drop_room(state, game_id);
                info!(game_id = %game_id, "empty waiting session deleted");
            }
        }
        phase => {
            let Some(player) = session.players.get_mut(player_id) else {
                return Err(ServiceError::PlayerNotFound(player_id.clone()));
            };
            player.is_connected = false;
            state.untrack_player_session(player_id, game_id);
            fanout::leave_room(state, game_id, player_id);

            if session.connected_racers().next().is_none() {
                match phase {
                    RacePhase::Racing => {
                        if let Err(err) = end_race_locked(state, &mut session) {
                            warn!(game_id = %game_id, error = %err, "failed to end abandoned race");
                        }
                    }
                    RacePhase::Countdown => {
                        session.timers.cancel_countdown();
                        schedule_cleanup_locked(state, &mut session);
                        info!(game_id = %game_id, "countdown abandoned; cleanup scheduled");
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

/// Compact listing for the games index.
pub async fn list_games(state: &SharedState) -> Vec<GameListItem> {
    let sessions: Vec<_> = state
        .sessions()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    let mut items = Vec::with_capacity(sessions.len());
    for shared in sessions {
        let session = shared.lock().await;
        items.push(GameListItem {
            id: session.id,
            player_count: session.players.len(),
            state: session.phase().as_str(),
        });
    }
    items
}

/// Full state snapshot of one session.
pub async fn get_state(state: &SharedState, game_id: GameId) -> Result<GameStateDto, ServiceError> {
    let shared = state.session(game_id)?;
    let session = shared.lock().await;
    Ok(GameStateDto::from(&*session))
}

/// Memory mitigation: delete finished sessions, plus waiting sessions with
/// at most one connected player that have idled past the age threshold.
pub async fn terminate_idle_games(state: &SharedState) -> usize {
    let now = now_ms();
    let candidates: Vec<_> = state
        .sessions()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    let mut terminated = 0;
    for shared in candidates {
        let (game_id, doomed) = {
            let session = shared.lock().await;
            let doomed = match session.phase() {
                RacePhase::Finished => true,
                RacePhase::Waiting => {
                    session.connected_racers().count() <= 1
                        && session.game_age_ms(now) >= IDLE_WAITING_AGE_MS
                }
                _ => false,
            };
            (session.id, doomed)
        };

        if doomed {
            fanout::broadcast(
                state,
                game_id,
                ServerMessage::GameTerminated {
                    game_id,
                    reason: "terminated while idle".into(),
                },
            );
            cleanup_session(state, game_id).await;
            terminated += 1;
        }
    }

    if terminated > 0 {
        info!(terminated, "idle sessions terminated");
    }
    terminated
}

/// Session capacity for a new game, honouring the game-count mitigation.
fn effective_max_players(default_cap: usize, reduce: bool, requested: Option<usize>) -> usize {
    let mut capacity = requested.unwrap_or(default_cap).clamp(2, 10);
    if reduce {
        capacity = (capacity - 1).max(2);
    }
    capacity
}

/// Trim and clamp a display name; blank input gets a generated fallback.
pub fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        let mut rng = rand::rng();
        return format!("Player-{:04}", rng.random_range(0..10_000u32));
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

/// Order racers for ranking: higher position first; ties broken by earlier
/// finish time, with any finish beating none; otherwise input order (the
/// sort is stable).
pub fn rank_racers<'a, I>(players: I) -> Vec<&'a Player>
where
    I: IntoIterator<Item = &'a Player>,
{
    let mut racers: Vec<&Player> = players.into_iter().collect();
    racers.sort_by(|a, b| {
        b.position
            .partial_cmp(&a.position)
            .unwrap_or(Ordering::Equal)
            .then_with(|| match (a.finish_time, b.finish_time) {
                (Some(a_time), Some(b_time)) => a_time.cmp(&b_time),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });
    racers
}

/// Ranked summary over every non-spectator; averages cover finished
/// players only.
fn compute_summary(session: &RaceSession, end_time: u64) -> RaceSummary {
    let ranked = rank_racers(session.players.values().filter(|p| !p.is_spectator));

    let rankings: Vec<RankedPlayer> = ranked
        .iter()
        .enumerate()
        .map(|(index, player)| RankedPlayer {
            id: player.id.clone(),
            name: player.name.clone(),
            rank: index + 1,
            wpm: player.wpm,
            accuracy: player.accuracy,
            finished: player.position >= 100.0,
        })
        .collect();

    let finished: Vec<&RankedPlayer> = rankings.iter().filter(|r| r.finished).collect();
    let stats = if finished.is_empty() {
        SummaryStats {
            avg_wpm: 0.0,
            avg_accuracy: 0.0,
            finish_rate: 0.0,
        }
    } else {
        let count = finished.len() as f64;
        SummaryStats {
            avg_wpm: finished.iter().map(|r| r.wpm).sum::<f64>() / count,
            avg_accuracy: finished.iter().map(|r| r.accuracy).sum::<f64>() / count,
            finish_rate: count / rankings.len().max(1) as f64,
        }
    };

    RaceSummary {
        total_time: end_time.saturating_sub(session.start_time.unwrap_or(end_time)),
        rankings,
        stats,
        replay_available: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn racer(id: &str, position: f64, finish_time: Option<u64>) -> Player {
        let mut player = Player::racer(id.into(), id.into(), PLAYER_PALETTE[0].into());
        player.position = position;
        player.finish_time = finish_time;
        player
    }

    #[test]
    fn sanitize_trims_and_clamps() {
        assert_eq!(sanitize_name("  Ada  "), "Ada");
        assert_eq!(
            sanitize_name("abcdefghijklmnopqrstuvwxyz"),
            "abcdefghijklmno"
        );
    }

    #[test]
    fn sanitize_replaces_blank_names() {
        for raw in ["", "   ", "\t\n"] {
            let name = sanitize_name(raw);
            assert!(name.starts_with("Player-"), "got {name}");
            assert_eq!(name.len(), "Player-".len() + 4);
        }
    }

    #[test]
    fn ranking_orders_by_position_then_finish_time() {
        let players = vec![
            racer("slow", 40.0, None),
            racer("second", 100.0, Some(2_000)),
            racer("first", 100.0, Some(1_000)),
            racer("mid", 75.0, None),
        ];

        let ranked = rank_racers(players.iter());
        let ids: Vec<&str> = ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "mid", "slow"]);
    }

    #[test]
    fn finish_beats_no_finish_at_equal_position() {
        let players = vec![racer("unfinished", 100.0, None), racer("done", 100.0, Some(5))];
        let ranked = rank_racers(players.iter());
        assert_eq!(ranked[0].id, "done");
    }

    #[test]
    fn ranking_is_stable_for_full_ties() {
        let players = vec![
            racer("a", 50.0, None),
            racer("b", 50.0, None),
            racer("c", 50.0, None),
        ];
        let ranked = rank_racers(players.iter());
        let ids: Vec<&str> = ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn ranking_is_total_under_shuffled_input() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let mut players: Vec<Player> = (0..8)
                .map(|n| {
                    let finished = rng.random_bool(0.5);
                    racer(
                        &format!("p{n}"),
                        if finished {
                            100.0
                        } else {
                            rng.random_range(0.0..100.0)
                        },
                        finished.then(|| rng.random_range(0..10_000)),
                    )
                })
                .collect();
            players.shuffle(&mut rng);

            let ranked = rank_racers(players.iter());
            assert_eq!(ranked.len(), players.len());
            for pair in ranked.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                assert!(
                    a.position >= b.position,
                    "positions out of order: {} before {}",
                    a.position,
                    b.position
                );
                if a.position == b.position
                    && let (Some(at), Some(bt)) = (a.finish_time, b.finish_time)
                {
                    assert!(at <= bt);
                }
            }
        }
    }

    #[test]
    fn effective_capacity_applies_reduction_with_floor() {
        assert_eq!(effective_max_players(4, false, None), 4);
        assert_eq!(effective_max_players(4, true, None), 3);
        assert_eq!(effective_max_players(4, true, Some(2)), 2);
        assert_eq!(effective_max_players(4, false, Some(100)), 10);
        assert_eq!(effective_max_players(4, false, Some(0)), 2);
    }

    #[test]
    fn summary_averages_cover_finished_players_only() {
        let mut session = RaceSession::new(
            Uuid::new_v4(),
            "abcdefghij".to_string(),
            4,
            racer("done", 100.0, Some(1_000)),
        );
        session.start_time = Some(500);
        let done = session.players.get_mut("done").unwrap();
        done.wpm = 80.0;
        done.accuracy = 90.0;
        let mut straggler = racer("straggler", 40.0, None);
        straggler.wpm = 30.0;
        straggler.accuracy = 50.0;
        session.players.insert("straggler".into(), straggler);

        let summary = compute_summary(&session, 2_500);
        assert_eq!(summary.total_time, 2_000);
        assert_eq!(summary.rankings.len(), 2);
        assert_eq!(summary.rankings[0].rank, 1);
        assert!(summary.rankings[0].finished);
        assert!(!summary.rankings[1].finished);
        assert_eq!(summary.stats.avg_wpm, 80.0);
        assert_eq!(summary.stats.avg_accuracy, 90.0);
        assert_eq!(summary.stats.finish_rate, 0.5);
    }

    #[test]
    fn summary_with_no_finishers_is_zeroed() {
        let mut session = RaceSession::new(
            Uuid::new_v4(),
            "abcdefghij".to_string(),
            4,
            racer("a", 10.0, None),
        );
        session.start_time = Some(0);
        let summary = compute_summary(&session, 1_000);
        assert_eq!(summary.stats.avg_wpm, 0.0);
        assert_eq!(summary.stats.finish_rate, 0.0);
        assert!(!summary.rankings[0].finished);
    }
}
