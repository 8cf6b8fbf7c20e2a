//! Self-healing controller: periodic host sampling, hysteresis-latched
//! mitigations, the game-creation queue, and the deferred-operation queue.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    future::Future,
    pin::Pin,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use sysinfo::System;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::{
    dto::ws::ServerMessage,
    error::ServiceError,
    services::{fanout, race_service},
    state::{
        SharedState,
        controls::{
            DEFAULT_REPLAY_RETENTION_MS, DEFAULT_SNAPSHOT_INTERVAL_MS,
            GAME_ALERT_REPLAY_RETENTION_MS, LOAD_ALERT_SNAPSHOT_INTERVAL_MS, UpdateFrequency,
        },
        game::{PlayerId, now_ms},
    },
};

/// Cadence of the health sampling loop.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

const MEMORY_TRIP: f64 = 0.90;
const MEMORY_RECOVER: f64 = 0.70;
const LOAD_TRIP: f64 = 0.80;
const LOAD_RECOVER: f64 = 0.60;
const GAME_COUNT_TRIP: usize = 100;
const GAME_COUNT_RECOVER: usize = 80;

/// Cadence of the creation-queue drain, and its slower backoff variant.
const QUEUE_DRAIN_INTERVAL: Duration = Duration::from_secs(2);
const QUEUE_DRAIN_BACKOFF: Duration = Duration::from_secs(5);
/// Queued creations older than this are discarded at drain time.
const QUEUE_ENTRY_TTL_MS: u64 = 30_000;

/// Pause between consecutive deferred operations.
const DEFERRED_GAP: Duration = Duration::from_millis(100);
/// Poll cadence while deferral is active.
const DEFERRED_IDLE_WAIT: Duration = Duration::from_millis(500);

/// One host sample as consumed by [`evaluate`] and the monitoring surface.
#[derive(Debug, Clone)]
pub struct HostSample {
    pub memory_fraction: f64,
    pub load_per_cpu: f64,
    pub active_games: usize,
    pub sampled_at: u64,
}

/// A game creation parked while the creation queue is active.
#[derive(Debug, Clone)]
pub struct QueuedCreate {
    pub player_id: PlayerId,
    pub player_name: String,
    pub max_players: Option<usize>,
    pub submitted_at: u64,
}

/// Seam for host metric sampling so tests can inject synthetic values.
pub trait SystemMetrics: Send {
    fn memory_fraction(&mut self) -> f64;
    fn load_per_cpu(&mut self) -> f64;
}

/// Production metrics source backed by `sysinfo`.
pub struct HostMetrics {
    system: System,
    cores: usize,
}

impl Default for HostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl SystemMetrics for HostMetrics {
    fn memory_fraction(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64
    }

    fn load_per_cpu(&mut self) -> f64 {
        System::load_average().one / self.cores as f64
    }
}

/// Spawn the sampling loop plus the queue workers.
pub fn spawn(state: SharedState) {
    tokio::spawn(run(state.clone(), HostMetrics::new()));
    spawn_queue_workers(state);
}

/// Spawn just the creation-queue drain and deferred-op workers; used when
/// the sampling loop itself is not wanted (non-production environments).
pub fn spawn_queue_workers(state: SharedState) {
    tokio::spawn(run_creation_queue(state.clone()));
    tokio::spawn(run_deferred_ops(state));
}

/// Sampling loop: every 10 s take a host sample, evaluate mitigations, and
/// occasionally log a snapshot.
pub async fn run(state: SharedState, mut metrics: impl SystemMetrics) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    let mut tick: u64 = 0;
    loop {
        ticker.tick().await;
        tick += 1;

        let sample = HostSample {
            memory_fraction: metrics.memory_fraction(),
            load_per_cpu: metrics.load_per_cpu(),
            active_games: state.active_games(),
            sampled_at: now_ms(),
        };

        if tick % 6 == 0 {
            info!(
                memory_fraction = sample.memory_fraction,
                load_per_cpu = sample.load_per_cpu,
                active_games = sample.active_games,
                "health snapshot"
            );
        }

        evaluate(&state, &sample).await;
        state.record_sample(sample);
    }
}

/// Apply the hysteresis table to one sample: each signal latches on its
/// trip threshold and unlatches on its recovery threshold, flipping the
/// associated mitigations.
pub async fn evaluate(state: &SharedState, sample: &HostSample) {
    let snapshot = state.controls().snapshot();

    // Memory: stop intake and clear caches on trip; while still over the
    // threshold on subsequent samples, start terminating idle sessions.
    if !snapshot.memory_alert && sample.memory_fraction > MEMORY_TRIP {
        warn!(memory_fraction = sample.memory_fraction, "memory alert tripped");
        state.controls().update(|c| {
            c.memory_alert = true;
            c.accepting_new_players = false;
        });
        let discarded = state.replays().compact();
        info!(discarded, "caches cleared under memory pressure");
    } else if snapshot.memory_alert && sample.memory_fraction > MEMORY_TRIP {
        let terminated = race_service::terminate_idle_games(state).await;
        warn!(
            memory_fraction = sample.memory_fraction,
            terminated, "memory still over threshold after cache clear"
        );
    } else if snapshot.memory_alert && sample.memory_fraction < MEMORY_RECOVER {
        info!(memory_fraction = sample.memory_fraction, "memory alert recovered");
        state.controls().update(|c| {
            c.memory_alert = false;
            c.accepting_new_players = true;
        });
    }

    // CPU: throttle fan-out and defer heavy work.
    if !snapshot.load_alert && sample.load_per_cpu > LOAD_TRIP {
        warn!(load_per_cpu = sample.load_per_cpu, "load alert tripped");
        state.controls().update(|c| {
            c.load_alert = true;
            c.throttling_enabled = true;
            c.update_frequency = UpdateFrequency::Low;
            c.defer_resource_intensive_ops = true;
            c.replay_snapshot_interval_ms = LOAD_ALERT_SNAPSHOT_INTERVAL_MS;
        });
    } else if snapshot.load_alert && sample.load_per_cpu < LOAD_RECOVER {
        info!(load_per_cpu = sample.load_per_cpu, "load alert recovered");
        state.controls().update(|c| {
            c.load_alert = false;
            c.throttling_enabled = false;
            c.update_frequency = UpdateFrequency::Normal;
            c.defer_resource_intensive_ops = false;
            c.replay_snapshot_interval_ms = DEFAULT_SNAPSHOT_INTERVAL_MS;
        });
    }

    // Game count: queue creations, shrink new sessions, shorten retention.
    if !snapshot.game_count_alert && sample.active_games > GAME_COUNT_TRIP {
        warn!(active_games = sample.active_games, "game count alert tripped");
        state.controls().update(|c| {
            c.game_count_alert = true;
            c.game_creation_queue_enabled = true;
            c.creation_backoff_enabled = true;
            c.reduce_max_players = true;
            c.replay_retention_ms = GAME_ALERT_REPLAY_RETENTION_MS;
        });
    } else if snapshot.game_count_alert && sample.active_games < GAME_COUNT_RECOVER {
        info!(active_games = sample.active_games, "game count alert recovered");
        state.controls().update(|c| {
            c.game_count_alert = false;
            c.game_creation_queue_enabled = false;
            c.creation_backoff_enabled = false;
            c.reduce_max_players = false;
            c.replay_retention_ms = DEFAULT_REPLAY_RETENTION_MS;
        });
    }
}

/// Drain loop for the game-creation queue: every 2 s (5 s under backoff)
/// flush parked creations, discarding entries older than 30 s.
pub async fn run_creation_queue(state: SharedState) {
    loop {
        let backoff = state.controls().snapshot().creation_backoff_enabled;
        let cadence = if backoff {
            QUEUE_DRAIN_BACKOFF
        } else {
            QUEUE_DRAIN_INTERVAL
        };
        tokio::time::sleep(cadence).await;
        drain_creation_queue(&state).await;
    }
}

/// Flush the creation queue once; returns how many sessions were created.
pub async fn drain_creation_queue(state: &SharedState) -> usize {
    let pending: Vec<QueuedCreate> = match state.creation_queue().lock() {
        Ok(mut queue) => queue.drain(..).collect(),
        Err(_) => return 0,
    };
    if pending.is_empty() {
        return 0;
    }

    let now = now_ms();
    let mut created = 0;
    for entry in pending {
        if now.saturating_sub(entry.submitted_at) > QUEUE_ENTRY_TTL_MS {
            warn!(player_id = %entry.player_id, "discarding stale queued creation");
            continue;
        }

        match race_service::create_session_now(
            state,
            &entry.player_id,
            &entry.player_name,
            entry.max_players,
        )
        .await
        {
            Ok(outcome) => {
                created += 1;
                fanout::send_to(
                    state,
                    &entry.player_id,
                    ServerMessage::game_state(outcome.game_state),
                );
            }
            Err(err) => {
                warn!(player_id = %entry.player_id, error = %err, "queued creation failed");
            }
        }
    }
    created
}

/// A boxed operation parked until deferral lifts.
pub type DeferredTask = Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'static>>;

struct DeferredEntry {
    priority: u8,
    seq: u64,
    task: DeferredTask,
}

impl PartialEq for DeferredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for DeferredEntry {}

impl PartialOrd for DeferredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeferredEntry {
    // Max-heap: highest priority first, FIFO within a priority.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of resource-intensive operations, served only while
/// `defer_resource_intensive_ops` is off.
pub struct DeferredOps {
    heap: Mutex<BinaryHeap<DeferredEntry>>,
    seq: AtomicU64,
    notify: Notify,
}

impl Default for DeferredOps {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredOps {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Park an operation with a priority in 1–10 (clamped).
    pub fn push(&self, priority: u8, task: DeferredTask) {
        let priority = priority.clamp(1, 10);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut heap) = self.heap.lock() {
            heap.push(DeferredEntry {
                priority,
                seq,
                task,
            });
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<DeferredEntry> {
        self.heap.lock().ok()?.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().map(|heap| heap.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Convenience wrapper for parking an operation on the shared state.
pub fn queue_resource_intensive<F>(state: &SharedState, priority: u8, future: F)
where
    F: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    state.deferred().push(priority, Box::pin(future));
}

/// Worker serving the deferred-operation queue in descending priority with
/// a 100 ms gap between tasks. A failing task is logged and never blocks
/// the queue.
pub async fn run_deferred_ops(state: SharedState) {
    loop {
        if state.controls().snapshot().defer_resource_intensive_ops {
            tokio::time::sleep(DEFERRED_IDLE_WAIT).await;
            continue;
        }

        match state.deferred().pop() {
            Some(entry) => {
                if let Err(err) = entry.task.await {
                    error!(priority = entry.priority, error = %err, "deferred operation failed");
                }
                tokio::time::sleep(DEFERRED_GAP).await;
            }
            None => state.deferred().notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, corpus::TextCorpus, state::AppState};

    fn sample(memory: f64, load: f64, games: usize) -> HostSample {
        HostSample {
            memory_fraction: memory,
            load_per_cpu: load,
            active_games: games,
            sampled_at: now_ms(),
        }
    }

    fn fresh_state() -> crate::state::SharedState {
        AppState::new(AppConfig::for_tests(), TextCorpus::default())
    }

    #[tokio::test]
    async fn memory_trip_stops_intake_and_recovers() {
        let state = fresh_state();

        evaluate(&state, &sample(0.92, 0.1, 0)).await;
        let snap = state.controls().snapshot();
        assert!(snap.memory_alert);
        assert!(!snap.accepting_new_players);

        // Between the thresholds the latch holds.
        evaluate(&state, &sample(0.80, 0.1, 0)).await;
        assert!(state.controls().snapshot().memory_alert);

        evaluate(&state, &sample(0.60, 0.1, 0)).await;
        let snap = state.controls().snapshot();
        assert!(!snap.memory_alert);
        assert!(snap.accepting_new_players);
    }

    #[tokio::test]
    async fn load_trip_enables_throttling_and_recovers_defaults() {
        let state = fresh_state();

        evaluate(&state, &sample(0.1, 0.85, 0)).await;
        let snap = state.controls().snapshot();
        assert!(snap.load_alert);
        assert!(snap.throttle_progress());
        assert!(snap.defer_resource_intensive_ops);
        assert_eq!(
            snap.replay_snapshot_interval_ms,
            LOAD_ALERT_SNAPSHOT_INTERVAL_MS
        );

        evaluate(&state, &sample(0.1, 0.50, 0)).await;
        let snap = state.controls().snapshot();
        assert!(!snap.load_alert);
        assert!(!snap.throttle_progress());
        assert!(!snap.defer_resource_intensive_ops);
        assert_eq!(snap.replay_snapshot_interval_ms, DEFAULT_SNAPSHOT_INTERVAL_MS);
    }

    #[tokio::test]
    async fn game_count_trip_queues_creations_and_recovers() {
        let state = fresh_state();

        evaluate(&state, &sample(0.1, 0.1, 101)).await;
        let snap = state.controls().snapshot();
        assert!(snap.game_count_alert);
        assert!(snap.game_creation_queue_enabled);
        assert!(snap.creation_backoff_enabled);
        assert!(snap.reduce_max_players);
        assert_eq!(snap.replay_retention_ms, GAME_ALERT_REPLAY_RETENTION_MS);

        // 90 games is inside the hysteresis band.
        evaluate(&state, &sample(0.1, 0.1, 90)).await;
        assert!(state.controls().snapshot().game_count_alert);

        evaluate(&state, &sample(0.1, 0.1, 79)).await;
        let snap = state.controls().snapshot();
        assert!(!snap.game_count_alert);
        assert!(!snap.game_creation_queue_enabled);
        assert_eq!(snap.replay_retention_ms, DEFAULT_REPLAY_RETENTION_MS);
    }

    #[tokio::test]
    async fn recovery_restores_every_default() {
        let state = fresh_state();

        evaluate(&state, &sample(0.95, 0.95, 150)).await;
        evaluate(&state, &sample(0.10, 0.10, 10)).await;

        let snap = state.controls().snapshot();
        assert_eq!(*snap, crate::state::controls::ControlSnapshot::default());
    }

    #[tokio::test]
    async fn deferred_ops_pop_by_priority_then_fifo() {
        let ops = DeferredOps::new();
        let order = std::sync::Arc::new(Mutex::new(Vec::new()));

        for (priority, label) in [(1u8, "low"), (5, "mid-a"), (5, "mid-b"), (9, "high")] {
            let order = order.clone();
            ops.push(
                priority,
                Box::pin(async move {
                    order.lock().unwrap().push(label);
                    Ok(())
                }),
            );
        }

        while let Some(entry) = ops.pop() {
            entry.task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high", "mid-a", "mid-b", "low"]);
    }

    #[tokio::test]
    async fn queued_operations_wait_on_the_shared_state() {
        let state = fresh_state();
        state.controls().update(|c| c.defer_resource_intensive_ops = true);

        let compact_state = state.clone();
        queue_resource_intensive(&state, 7, async move {
            compact_state.replays().compact();
            Ok(())
        });

        assert_eq!(state.deferred().len(), 1);

        // Lifted deferral: the entry is served by the worker loop; here we
        // just pop it directly.
        let entry = state.deferred().pop().unwrap();
        assert_eq!(entry.priority, 7);
        entry.task.await.unwrap();
    }

    #[tokio::test]
    async fn stale_queued_creations_are_discarded() {
        let state = fresh_state();
        {
            let mut queue = state.creation_queue().lock().unwrap();
            queue.push_back(QueuedCreate {
                player_id: "p-stale".into(),
                player_name: "Old".into(),
                max_players: None,
                submitted_at: now_ms().saturating_sub(QUEUE_ENTRY_TTL_MS + 1_000),
            });
            queue.push_back(QueuedCreate {
                player_id: "p-fresh".into(),
                player_name: "New".into(),
                max_players: Some(2),
                submitted_at: now_ms(),
            });
        }

        let created = drain_creation_queue(&state).await;
        assert_eq!(created, 1);
        assert_eq!(state.active_games(), 1);
        assert!(state.creation_queue().lock().unwrap().is_empty());
    }
}
