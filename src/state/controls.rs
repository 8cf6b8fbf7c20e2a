//! Mitigation flags published by the self-healing controller.
//!
//! The controller is the single writer; the engine and fan-out layer read a
//! consistent immutable snapshot on every hot-path decision without taking a
//! lock. A version counter lets observers detect transitions.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;

/// Default interval between admitted replay snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 100;
/// Snapshot interval while the CPU mitigation is active.
pub const LOAD_ALERT_SNAPSHOT_INTERVAL_MS: u64 = 500;
/// Default replay retention after session destruction (1 hour).
pub const DEFAULT_REPLAY_RETENTION_MS: u64 = 3_600_000;
/// Replay retention while the game-count mitigation is active (15 minutes).
pub const GAME_ALERT_REPLAY_RETENTION_MS: u64 = 900_000;

/// Cadence of outbound progress broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFrequency {
    Normal,
    Low,
}

impl UpdateFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateFrequency::Normal => "normal",
            UpdateFrequency::Low => "low",
        }
    }
}

/// One immutable view of every controller tunable and alert latch.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSnapshot {
    pub accepting_new_players: bool,
    pub throttling_enabled: bool,
    pub update_frequency: UpdateFrequency,
    pub replay_snapshot_interval_ms: u64,
    pub replay_retention_ms: u64,
    pub game_creation_queue_enabled: bool,
    pub creation_backoff_enabled: bool,
    pub defer_resource_intensive_ops: bool,
    /// Shrink capacity of newly created sessions by one (floor 2).
    pub reduce_max_players: bool,
    pub memory_alert: bool,
    pub load_alert: bool,
    pub game_count_alert: bool,
}

impl Default for ControlSnapshot {
    fn default() -> Self {
        Self {
            accepting_new_players: true,
            throttling_enabled: false,
            update_frequency: UpdateFrequency::Normal,
            replay_snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
            replay_retention_ms: DEFAULT_REPLAY_RETENTION_MS,
            game_creation_queue_enabled: false,
            creation_backoff_enabled: false,
            defer_resource_intensive_ops: false,
            reduce_max_players: false,
            memory_alert: false,
            load_alert: false,
            game_count_alert: false,
        }
    }
}

impl ControlSnapshot {
    /// Whether progress broadcasts should currently be rate-limited.
    pub fn throttle_progress(&self) -> bool {
        self.throttling_enabled && self.update_frequency == UpdateFrequency::Low
    }
}

/// Single-writer publisher of [`ControlSnapshot`] values.
pub struct ControlPlane {
    current: ArcSwap<ControlSnapshot>,
    version: AtomicU64,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlane {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ControlSnapshot::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Lock-free read of the current snapshot.
    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.current.load_full()
    }

    /// Number of updates published so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Publish a modified snapshot. Only the controller (and the admin
    /// config surface) call this; concurrent writers are not supported.
    pub fn update(&self, mutate: impl FnOnce(&mut ControlSnapshot)) -> Arc<ControlSnapshot> {
        let mut next = (*self.current.load_full()).clone();
        mutate(&mut next);
        let next = Arc::new(next);
        self.current.store(next.clone());
        self.version.fetch_add(1, Ordering::AcqRel);
        next
    }
}
