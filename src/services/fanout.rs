//! Event fan-out: connection registry, per-session rooms, and the bounded
//! per-connection write path.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{
    dto::{game::PlayerDto, ws::ServerMessage},
    state::{
        SharedState,
        game::{GameId, PlayerId},
    },
};

/// Frames buffered per connection before the drop policy kicks in.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Under low-frequency throttling, one progress broadcast in this many is
/// admitted (an 80% drop rate).
pub const THROTTLE_ADMIT_ONE_IN: u64 = 5;

/// Aggregate fan-out counters exposed through the monitoring surface.
#[derive(Debug, Default)]
pub struct FanoutCounters {
    pub broadcasts_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub progress_suppressed: AtomicU64,
}

/// Outcome of enqueueing a frame onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued without evicting anything.
    Queued,
    /// Frame queued; the oldest non-critical frame was evicted to make room.
    EvictedOldest,
    /// Frame dropped: the queue is full of critical frames and the incoming
    /// frame is itself droppable.
    Dropped,
    /// The connection is gone.
    Closed,
}

/// Bounded FIFO of outbound frames with reserved capacity for critical
/// events. The broadcaster enqueues without blocking; a dedicated writer
/// task drains in emission order.
pub struct OutboundQueue {
    frames: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a frame, applying the overflow policy: evict the oldest
    /// non-critical frame first; critical frames are never evicted and may
    /// exceed the nominal capacity.
    pub fn push(&self, message: ServerMessage) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }

        let mut frames = match self.frames.lock() {
            Ok(guard) => guard,
            Err(_) => return PushOutcome::Closed,
        };

        let mut outcome = PushOutcome::Queued;
        if frames.len() >= self.capacity {
            match frames.iter().position(|frame| !frame.is_critical()) {
                Some(index) => {
                    frames.remove(index);
                    outcome = PushOutcome::EvictedOldest;
                }
                None if !message.is_critical() => {
                    return PushOutcome::Dropped;
                }
                None => {}
            }
        }

        frames.push_back(message);
        drop(frames);
        self.notify.notify_one();
        outcome
    }

    /// Await the next frame; returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut frames = self.frames.lock().ok()?;
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop, for diagnostics and tests.
    pub fn try_recv(&self) -> Option<ServerMessage> {
        self.frames.lock().ok()?.pop_front()
    }

    /// Mark the queue closed and wake the writer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle used to push events to a connected client.
#[derive(Clone)]
pub struct ClientConnection {
    pub id: PlayerId,
    pub queue: Arc<OutboundQueue>,
}

/// Membership of a session's broadcast room plus the sequence counter used
/// for deterministic throttle sampling.
#[derive(Debug, Default)]
pub struct Room {
    pub members: HashSet<PlayerId>,
    progress_seq: u64,
}

/// Register a connection and hand back its outbound queue.
pub fn register_connection(state: &SharedState, connection_id: &PlayerId) -> Arc<OutboundQueue> {
    let queue = Arc::new(OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY));
    state.connections().insert(
        connection_id.clone(),
        ClientConnection {
            id: connection_id.clone(),
            queue: queue.clone(),
        },
    );
    queue
}

/// Remove a connection and close its queue.
pub fn unregister_connection(state: &SharedState, connection_id: &PlayerId) {
    if let Some((_, connection)) = state.connections().remove(connection_id) {
        connection.queue.close();
    }
}

/// Add a connection to a session's room.
pub fn join_room(state: &SharedState, game_id: GameId, player_id: &PlayerId) {
    state
        .rooms()
        .entry(game_id)
        .or_default()
        .members
        .insert(player_id.clone());
}

/// Remove a connection from a session's room.
pub fn leave_room(state: &SharedState, game_id: GameId, player_id: &PlayerId) {
    if let Some(mut room) = state.rooms().get_mut(&game_id) {
        room.members.remove(player_id);
    }
}

/// Drop a session's room entirely (session destruction).
pub fn drop_room(state: &SharedState, game_id: GameId) {
    state.rooms().remove(&game_id);
}

/// Push an event to a single connection, if it is still registered.
pub fn send_to(state: &SharedState, player_id: &PlayerId, message: ServerMessage) {
    let Some(connection) = state.connections().get(player_id) else {
        debug!(player_id = %player_id, "skipping send to unregistered connection");
        return;
    };

    match connection.queue.push(message) {
        PushOutcome::Queued => {
            state.counters().broadcasts_sent.fetch_add(1, Ordering::Relaxed);
        }
        PushOutcome::EvictedOldest => {
            state.counters().broadcasts_sent.fetch_add(1, Ordering::Relaxed);
            state.counters().frames_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(player_id = %player_id, "outbound queue full; evicted oldest frame");
        }
        PushOutcome::Dropped => {
            state.counters().frames_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(player_id = %player_id, "outbound queue full of critical frames; frame dropped");
        }
        PushOutcome::Closed => {}
    }
}

/// Deliver an event to every connection in a session's room.
pub fn broadcast(state: &SharedState, game_id: GameId, message: ServerMessage) {
    let members: Vec<PlayerId> = match state.rooms().get(&game_id) {
        Some(room) => room.members.iter().cloned().collect(),
        None => return,
    };

    for member in members {
        send_to(state, &member, message.clone());
    }
}

/// Deliver an event to every registered connection, regardless of room
/// membership. Used for server-wide notices such as system-status changes.
pub fn broadcast_all(state: &SharedState, message: ServerMessage) {
    let connections: Vec<PlayerId> = state
        .connections()
        .iter()
        .map(|entry| entry.key().clone())
        .collect();

    for connection_id in connections {
        send_to(state, &connection_id, message.clone());
    }
}

/// Broadcast a progress update, subject to adaptive throttling: while the
/// controller has low-frequency throttling active, only one update in
/// [`THROTTLE_ADMIT_ONE_IN`] is fanned out. Engine state is never affected.
pub fn broadcast_progress(state: &SharedState, game_id: GameId, player: PlayerDto) {
    let snapshot = state.controls().snapshot();
    if snapshot.throttle_progress() {
        let admit = {
            let Some(mut room) = state.rooms().get_mut(&game_id) else {
                return;
            };
            room.progress_seq = room.progress_seq.wrapping_add(1);
            room.progress_seq % THROTTLE_ADMIT_ONE_IN == 0
        };
        if !admit {
            state
                .counters()
                .progress_suppressed
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    broadcast(state, game_id, ServerMessage::progress_update(game_id, player));
}

/// Convenience wrapper mapping a service error onto the originating
/// connection only; errors are never broadcast.
pub fn send_error(state: &SharedState, player_id: &PlayerId, err: &crate::error::ServiceError) {
    send_to(
        state,
        player_id,
        ServerMessage::Error {
            message: err.to_string(),
            code: err.code(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, corpus::TextCorpus, state::AppState};
    use uuid::Uuid;

    fn critical(n: u32) -> ServerMessage {
        ServerMessage::GameCountdown {
            game_id: Uuid::nil(),
            countdown: n,
        }
    }

    fn droppable(n: usize) -> ServerMessage {
        ServerMessage::PlayerLeft {
            game_id: Uuid::nil(),
            player_id: format!("p{n}"),
        }
    }

    #[test]
    fn queue_preserves_fifo_order() {
        let queue = OutboundQueue::new(8);
        for n in 0..3 {
            queue.push(droppable(n));
        }

        let mut frames = queue.frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        match frames.pop_front().unwrap() {
            ServerMessage::PlayerLeft { player_id, .. } => assert_eq!(player_id, "p0"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn overflow_evicts_oldest_non_critical() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push(droppable(0)), PushOutcome::Queued);
        assert_eq!(queue.push(droppable(1)), PushOutcome::Queued);
        assert_eq!(queue.push(droppable(2)), PushOutcome::EvictedOldest);

        let frames = queue.frames.lock().unwrap();
        let ids: Vec<String> = frames
            .iter()
            .map(|frame| match frame {
                ServerMessage::PlayerLeft { player_id, .. } => player_id.clone(),
                other => panic!("unexpected frame: {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[test]
    fn critical_frames_are_never_evicted() {
        let queue = OutboundQueue::new(2);
        queue.push(critical(3));
        queue.push(critical(2));
        // Queue is saturated with critical frames: a droppable frame is
        // rejected, another critical frame still gets through.
        assert_eq!(queue.push(droppable(0)), PushOutcome::Dropped);
        assert_eq!(queue.push(critical(1)), PushOutcome::Queued);
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn recv_returns_none_after_close() {
        let queue = OutboundQueue::new(4);
        queue.push(droppable(0));
        queue.close();

        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn throttle_admits_one_in_five() {
        let state = AppState::new(AppConfig::for_tests(), TextCorpus::default());
        let game_id = Uuid::new_v4();
        let queue = register_connection(&state, &"p1".to_string());
        join_room(&state, game_id, &"p1".to_string());

        state.controls().update(|c| {
            c.throttling_enabled = true;
            c.update_frequency = crate::state::controls::UpdateFrequency::Low;
        });

        let player = PlayerDto {
            id: "p1".into(),
            name: "Ada".into(),
            color: "#E6194B".into(),
            position: 10.0,
            current_index: 5,
            wpm: 60.0,
            accuracy: 98.0,
            is_ready: true,
            finish_time: None,
            is_connected: true,
            is_spectator: false,
        };

        for _ in 0..100 {
            broadcast_progress(&state, game_id, player.clone());
        }

        assert_eq!(queue.len(), 20);
        assert_eq!(
            state.counters().progress_suppressed.load(Ordering::Relaxed),
            80
        );
    }

    #[tokio::test]
    async fn broadcast_all_reaches_connections_outside_rooms() {
        let state = AppState::new(AppConfig::for_tests(), TextCorpus::default());
        let game_id = Uuid::new_v4();
        let in_room = register_connection(&state, &"p1".to_string());
        let lobby_only = register_connection(&state, &"p2".to_string());
        join_room(&state, game_id, &"p1".to_string());

        broadcast_all(&state, droppable(0));

        assert_eq!(in_room.len(), 1);
        assert_eq!(lobby_only.len(), 1);
    }

    #[tokio::test]
    async fn unthrottled_progress_is_fully_delivered() {
        let state = AppState::new(AppConfig::for_tests(), TextCorpus::default());
        let game_id = Uuid::new_v4();
        let queue = register_connection(&state, &"p1".to_string());
        join_room(&state, game_id, &"p1".to_string());

        let player = PlayerDto {
            id: "p1".into(),
            name: "Ada".into(),
            color: "#E6194B".into(),
            position: 10.0,
            current_index: 5,
            wpm: 60.0,
            accuracy: 98.0,
            is_ready: true,
            finish_time: None,
            is_connected: true,
            is_spectator: false,
        };

        for _ in 0..10 {
            broadcast_progress(&state, game_id, player.clone());
        }
        assert_eq!(queue.len(), 10);
    }
}
