pub mod controls;
pub mod game;
pub mod state_machine;

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex as StdMutex},
    time::Instant,
};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    config::AppConfig,
    corpus::TextCorpus,
    error::ServiceError,
    routes::rate_limit::HttpRateLimiter,
    services::{
        fanout::{ClientConnection, FanoutCounters, Room},
        replay_service::ReplayStore,
        self_healing::{DeferredOps, HostSample, QueuedCreate},
    },
    state::{
        controls::ControlPlane,
        game::{GameId, PlayerId, RaceSession},
    },
};

pub type SharedState = Arc<AppState>;
/// A session guarded by its own lock; all mutations are serialized per game.
pub type SharedSession = Arc<Mutex<RaceSession>>;

/// Central application state: the session registry, connection registry,
/// rooms, replay store, and controller plumbing. Built once at startup and
/// by every test that needs a fresh graph; no globals.
pub struct AppState {
    config: AppConfig,
    corpus: TextCorpus,
    sessions: DashMap<GameId, SharedSession>,
    /// Sessions a player id is currently part of, for disconnect routing.
    player_sessions: DashMap<PlayerId, HashSet<GameId>>,
    connections: DashMap<PlayerId, ClientConnection>,
    rooms: DashMap<GameId, Room>,
    controls: ControlPlane,
    replays: ReplayStore,
    creation_queue: StdMutex<VecDeque<QueuedCreate>>,
    deferred: DeferredOps,
    counters: FanoutCounters,
    last_sample: StdMutex<Option<HostSample>>,
    http_limiter: HttpRateLimiter,
    started_at: Instant,
}

impl AppState {
    /// Construct the state graph wrapped in an [`Arc`] so it can be cloned
    /// cheaply into spawned tasks.
    pub fn new(config: AppConfig, corpus: TextCorpus) -> SharedState {
        Arc::new(Self {
            config,
            corpus,
            sessions: DashMap::new(),
            player_sessions: DashMap::new(),
            connections: DashMap::new(),
            rooms: DashMap::new(),
            controls: ControlPlane::new(),
            replays: ReplayStore::new(),
            creation_queue: StdMutex::new(VecDeque::new()),
            deferred: DeferredOps::new(),
            counters: FanoutCounters::default(),
            last_sample: StdMutex::new(None),
            http_limiter: HttpRateLimiter::new(),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn corpus(&self) -> &TextCorpus {
        &self.corpus
    }

    /// Session registry keyed by game id.
    pub fn sessions(&self) -> &DashMap<GameId, SharedSession> {
        &self.sessions
    }

    /// Look up a session or fail with [`ServiceError::GameNotFound`].
    pub fn session(&self, id: GameId) -> Result<SharedSession, ServiceError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(ServiceError::GameNotFound(id))
    }

    pub fn active_games(&self) -> usize {
        self.sessions.len()
    }

    /// Registry of live client connections keyed by connection id.
    pub fn connections(&self) -> &DashMap<PlayerId, ClientConnection> {
        &self.connections
    }

    /// Broadcast rooms keyed by game id.
    pub fn rooms(&self) -> &DashMap<GameId, Room> {
        &self.rooms
    }

    pub fn controls(&self) -> &ControlPlane {
        &self.controls
    }

    pub fn replays(&self) -> &ReplayStore {
        &self.replays
    }

    pub fn creation_queue(&self) -> &StdMutex<VecDeque<QueuedCreate>> {
        &self.creation_queue
    }

    pub fn deferred(&self) -> &DeferredOps {
        &self.deferred
    }

    pub fn counters(&self) -> &FanoutCounters {
        &self.counters
    }

    pub fn http_limiter(&self) -> &HttpRateLimiter {
        &self.http_limiter
    }

    /// Record a player's membership in a session.
    pub fn track_player_session(&self, player_id: &PlayerId, game_id: GameId) {
        self.player_sessions
            .entry(player_id.clone())
            .or_default()
            .insert(game_id);
    }

    /// Drop a player's membership record; removes the entry when empty.
    pub fn untrack_player_session(&self, player_id: &PlayerId, game_id: GameId) {
        if let Some(mut entry) = self.player_sessions.get_mut(player_id) {
            entry.remove(&game_id);
            if entry.is_empty() {
                drop(entry);
                self.player_sessions.remove(player_id);
            }
        }
    }

    /// Sessions the player currently belongs to.
    pub fn sessions_for_player(&self, player_id: &PlayerId) -> Vec<GameId> {
        self.player_sessions
            .get(player_id)
            .map(|entry| entry.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Store the most recent controller sample for the monitoring surface.
    pub fn record_sample(&self, sample: HostSample) {
        if let Ok(mut slot) = self.last_sample.lock() {
            *slot = Some(sample);
        }
    }

    pub fn last_sample(&self) -> Option<HostSample> {
        self.last_sample.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
