//! End-to-end scenarios driven through the service layer on a fresh state
//! graph, with paused time so countdowns and deadlines run instantly.

use std::time::Duration;

use typerush_back::{
    config::AppConfig,
    corpus::TextCorpus,
    dto::ws::ServerMessage,
    error::ServiceError,
    services::{
        fanout::{self, OutboundQueue},
        race_service, self_healing,
    },
    state::{AppState, SharedState, game::now_ms},
};

fn fresh_state() -> SharedState {
    AppState::new(AppConfig::for_tests(), TextCorpus::default())
}

fn drain(queue: &OutboundQueue) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Some(frame) = queue.try_recv() {
        frames.push(frame);
    }
    frames
}

fn countdowns(frames: &[ServerMessage]) -> Vec<u32> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ServerMessage::GameCountdown { countdown, .. } => Some(*countdown),
            _ => None,
        })
        .collect()
}

/// Create a two-player session and drive it into the racing phase.
async fn start_two_racer_game(
    state: &SharedState,
    p1: &String,
    p2: &String,
) -> uuid::Uuid {
    let outcome = race_service::create_game(state, p1, "Ada", Some(2))
        .await
        .unwrap();
    let game_id = outcome.game_id;
    race_service::join_game(state, p2, "Bob", Some(game_id), false)
        .await
        .unwrap();

    race_service::player_ready(state, game_id, p1).await.unwrap();
    let started = race_service::player_ready(state, game_id, p2).await.unwrap();
    assert!(started, "countdown should start once both racers are ready");

    // Three countdown ticks plus the race start.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let dto = race_service::get_state(state, game_id).await.unwrap();
    assert_eq!(dto.state, "racing");
    game_id
}

#[tokio::test(start_paused = true)]
async fn s1_two_racer_happy_path() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());
    let q1 = fanout::register_connection(&state, &p1);
    let q2 = fanout::register_connection(&state, &p2);

    let game_id = start_two_racer_game(&state, &p1, &p2).await;

    // Both connections saw 3, 2, 1 and then the start, in that order.
    for queue in [&q1, &q2] {
        let frames = drain(queue);
        assert_eq!(countdowns(&frames), vec![3, 2, 1]);
        let started_at = frames
            .iter()
            .position(|f| matches!(f, ServerMessage::GameStarted { .. }))
            .expect("game_started delivered");
        let last_countdown = frames
            .iter()
            .rposition(|f| matches!(f, ServerMessage::GameCountdown { .. }))
            .unwrap();
        assert!(started_at > last_countdown);
    }

    let text_len = race_service::get_state(&state, game_id)
        .await
        .unwrap()
        .text
        .len();

    race_service::update_progress(&state, game_id, &p1, text_len / 2, 82.0, 99.0)
        .await
        .unwrap();
    race_service::update_progress(&state, game_id, &p2, text_len / 3, 55.0, 96.0)
        .await
        .unwrap();

    let done = race_service::player_finished(&state, game_id, &p1, 82.0, 99.0, 1_000)
        .await
        .unwrap();
    assert!(!done, "race continues while Bob is typing");

    // Double-emitting the finish changes nothing and reports false.
    let repeat = race_service::player_finished(&state, game_id, &p1, 999.0, 1.0, 5)
        .await
        .unwrap();
    assert!(!repeat);

    let done = race_service::player_finished(&state, game_id, &p2, 55.0, 96.0, 2_000)
        .await
        .unwrap();
    assert!(done, "last finisher ends the race");

    let frames = drain(&q2);
    let finished: Vec<_> = frames
        .iter()
        .filter_map(|frame| match frame {
            ServerMessage::GameFinished { summary, .. } => Some(summary),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1, "game_finished is emitted exactly once");

    let summary = finished[0];
    assert_eq!(summary.rankings.len(), 2);
    assert_eq!(summary.rankings[0].id, p1, "earliest finish time ranks first");
    assert_eq!(summary.rankings[0].rank, 1);
    assert!(summary.rankings.iter().all(|r| r.finished));
    assert!(summary.replay_available);

    // The first finisher's stats were not clobbered by the repeat report.
    assert_eq!(summary.rankings[0].wpm, 82.0);

    // Replays survive the race and reflect the recorded progress.
    let replay = state.replays().get(game_id).unwrap();
    assert_eq!(replay.players.len(), 2);
    assert!(replay.start_time.is_some());
    assert!(replay.end_time.is_some());
    assert_eq!(replay.players[&p1].final_stats.as_ref().unwrap().rank, 1);
}

#[tokio::test(start_paused = true)]
async fn s2_spectator_joins_running_race() {
    let state = fresh_state();
    let (p1, p2, p3) = ("p1".to_string(), "p2".to_string(), "p3".to_string());
    let q1 = fanout::register_connection(&state, &p1);
    fanout::register_connection(&state, &p2);
    fanout::register_connection(&state, &p3);

    let game_id = start_two_racer_game(&state, &p1, &p2).await;
    drain(&q1);

    let outcome = race_service::join_game(&state, &p3, "Carol", Some(game_id), false)
        .await
        .unwrap();
    assert!(outcome.is_spectator);
    assert_eq!(outcome.player.name, "Carol (Spectator)");
    assert_eq!(outcome.player.color, "#AAAAAA");
    assert!(outcome.player.is_ready);

    // Spectator progress is silently ignored: no engine write, no replay
    // track, nothing to broadcast.
    let result = race_service::update_progress(&state, game_id, &p3, 10, 80.0, 99.0)
        .await
        .unwrap();
    assert!(result.is_none());

    let replay = state.replays().get(game_id).unwrap();
    assert!(!replay.players.contains_key(&p3));

    let dto = race_service::get_state(&state, game_id).await.unwrap();
    let carol = dto.players.iter().find(|p| p.id == p3).unwrap();
    assert_eq!(carol.position, 0.0);
    assert_eq!(carol.current_index, 0);
}

#[tokio::test(start_paused = true)]
async fn s3_disconnect_mid_race_preserves_player() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());
    fanout::register_connection(&state, &p1);
    fanout::register_connection(&state, &p2);

    let game_id = start_two_racer_game(&state, &p1, &p2).await;
    let text_len = race_service::get_state(&state, game_id)
        .await
        .unwrap()
        .text
        .len();

    race_service::update_progress(&state, game_id, &p2, text_len * 2 / 5, 40.0, 90.0)
        .await
        .unwrap();
    race_service::player_left(&state, game_id, &p2).await.unwrap();

    let dto = race_service::get_state(&state, game_id).await.unwrap();
    assert_eq!(dto.state, "racing", "session keeps racing after a disconnect");
    let bob = dto.players.iter().find(|p| p.id == p2).unwrap();
    assert!(!bob.is_connected);

    // With Bob gone, Ada finishing resolves "everyone connected finished".
    let done = race_service::player_finished(&state, game_id, &p1, 70.0, 98.0, 1_500)
        .await
        .unwrap();
    assert!(done);

    let dto = race_service::get_state(&state, game_id).await.unwrap();
    assert_eq!(dto.state, "finished");
    let bob = dto.players.iter().find(|p| p.id == p2).unwrap();
    assert!(!bob.is_connected, "disconnected racer is retained, not removed");
}

#[tokio::test(start_paused = true)]
async fn s4_countdown_abandoned_by_everyone() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());
    let q1 = fanout::register_connection(&state, &p1);
    fanout::register_connection(&state, &p2);

    let outcome = race_service::create_game(&state, &p1, "Ada", Some(2))
        .await
        .unwrap();
    let game_id = outcome.game_id;
    race_service::join_game(&state, &p2, "Bob", Some(game_id), false)
        .await
        .unwrap();
    race_service::player_ready(&state, game_id, &p1).await.unwrap();
    race_service::player_ready(&state, game_id, &p2).await.unwrap();

    let dto = race_service::get_state(&state, game_id).await.unwrap();
    assert_eq!(dto.state, "countdown");
    assert!(state.replays().get(game_id).is_some(), "replay exists from countdown entry");

    race_service::player_left(&state, game_id, &p1).await.unwrap();
    race_service::player_left(&state, game_id, &p2).await.unwrap();

    // Cleanup delay elapses; the session is gone and the race never started.
    tokio::time::sleep(AppConfig::for_tests().cleanup_delay + Duration::from_secs(5)).await;
    assert!(matches!(
        race_service::get_state(&state, game_id).await,
        Err(ServiceError::GameNotFound(_))
    ));

    let frames = drain(&q1);
    assert!(
        !frames.iter().any(|f| matches!(f, ServerMessage::GameStarted { .. })),
        "no game_started is ever emitted"
    );

    // The replay is evicted by retention after session destruction.
    assert!(state.replays().get(game_id).is_some());
    tokio::time::sleep(Duration::from_millis(3_600_000 + 1_000)).await;
    assert!(state.replays().get(game_id).is_none());
}

#[tokio::test(start_paused = true)]
async fn s5_memory_mitigation_blocks_creates_until_recovery() {
    let state = fresh_state();
    let p1 = "p1".to_string();
    fanout::register_connection(&state, &p1);

    let sample = |memory: f64| self_healing::HostSample {
        memory_fraction: memory,
        load_per_cpu: 0.1,
        active_games: state.active_games(),
        sampled_at: now_ms(),
    };

    self_healing::evaluate(&state, &sample(0.92)).await;

    let err = race_service::create_game(&state, &p1, "Ada", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ServiceUnavailable(_)));

    self_healing::evaluate(&state, &sample(0.65)).await;
    assert!(race_service::create_game(&state, &p1, "Ada", None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn s6_throttled_progress_updates_engine_but_drops_broadcasts() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());
    fanout::register_connection(&state, &p1);
    let q2 = fanout::register_connection(&state, &p2);

    let game_id = start_two_racer_game(&state, &p1, &p2).await;
    drain(&q2);

    state.controls().update(|c| {
        c.throttling_enabled = true;
        c.update_frequency = typerush_back::state::controls::UpdateFrequency::Low;
    });

    let text_len = race_service::get_state(&state, game_id)
        .await
        .unwrap()
        .text
        .len();

    let mut last_index = 0;
    for n in 1..=100usize {
        last_index = (n * text_len / 200).min(text_len - 1);
        let player = race_service::update_progress(&state, game_id, &p1, last_index, 60.0, 97.0)
            .await
            .unwrap()
            .expect("racer update is applied");
        fanout::broadcast_progress(&state, game_id, player);
    }

    let progress_frames = drain(&q2)
        .iter()
        .filter(|f| f.is_progress_update())
        .count();
    assert_eq!(progress_frames, 20, "80% of progress broadcasts are dropped");

    // The engine saw every update even though the fan-out was throttled.
    let dto = race_service::get_state(&state, game_id).await.unwrap();
    let ada = dto.players.iter().find(|p| p.id == p1).unwrap();
    assert_eq!(ada.current_index, last_index);
}

#[tokio::test(start_paused = true)]
async fn third_join_at_capacity_two_is_rejected() {
    let state = fresh_state();
    let (p1, p2, p3) = ("p1".to_string(), "p2".to_string(), "p3".to_string());

    let outcome = race_service::create_game(&state, &p1, "Ada", Some(2))
        .await
        .unwrap();
    race_service::join_game(&state, &p2, "Bob", Some(outcome.game_id), false)
        .await
        .unwrap();

    let err = race_service::join_game(&state, &p3, "Carol", Some(outcome.game_id), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GameFull(_)));
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_the_same_player() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());
    fanout::register_connection(&state, &p1);
    fanout::register_connection(&state, &p2);

    let game_id = start_two_racer_game(&state, &p1, &p2).await;

    // Joining while connected is a conflict.
    let err = race_service::join_game(&state, &p2, "Bob", Some(game_id), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PlayerAlreadyExists(_)));

    race_service::player_left(&state, game_id, &p2).await.unwrap();
    let outcome = race_service::join_game(&state, &p2, "Bob", Some(game_id), false)
        .await
        .unwrap();
    assert!(!outcome.is_spectator, "reconnection is not a spectator join");
    assert!(outcome.player.is_connected);

    let dto = race_service::get_state(&state, game_id).await.unwrap();
    assert_eq!(dto.players.len(), 2, "no duplicate player is created");
}

#[tokio::test(start_paused = true)]
async fn race_deadline_forces_the_finish() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());
    fanout::register_connection(&state, &p1);
    fanout::register_connection(&state, &p2);

    let game_id = start_two_racer_game(&state, &p1, &p2).await;

    // Nobody types at all; the deadline still ends the race.
    tokio::time::sleep(AppConfig::for_tests().max_race_time + Duration::from_secs(5)).await;

    let dto = race_service::get_state(&state, game_id).await.unwrap();
    assert_eq!(dto.state, "finished");
    assert!(dto.end_time.is_some());
    assert!(dto.start_time.is_some());
    assert!(dto.end_time.unwrap() >= dto.start_time.unwrap());
}

#[tokio::test(start_paused = true)]
async fn join_without_game_id_finds_or_creates() {
    let state = fresh_state();
    let (p1, p2) = ("p1".to_string(), "p2".to_string());

    // No open session: an implicit create.
    let outcome = race_service::join_game(&state, &p1, "Ada", None, false).await.unwrap();
    assert_eq!(state.active_games(), 1);

    // An open session exists: join it instead of creating another.
    let second = race_service::join_game(&state, &p2, "Bob", None, false).await.unwrap();
    assert_eq!(second.game_id, outcome.game_id);
    assert_eq!(state.active_games(), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_creation_is_drained_later() {
    let state = fresh_state();
    let p1 = "p1".to_string();
    let q1 = fanout::register_connection(&state, &p1);

    state.controls().update(|c| c.game_creation_queue_enabled = true);

    let err = race_service::create_game(&state, &p1, "Ada", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Queued));
    assert_eq!(state.active_games(), 0);

    let created = self_healing::drain_creation_queue(&state).await;
    assert_eq!(created, 1);
    assert_eq!(state.active_games(), 1);

    // The creator is told about its new game once the queue drains.
    let frames = drain(&q1);
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerMessage::GameStateUpdate { game_state: Some(_), .. }
    )));
}
