//! Per-session replay capture: append-only progress snapshots with
//! admission control, exactly-once finalization, compaction, and TTL
//! eviction.

use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    dto::replay::ReplayListItem,
    state::{
        SharedState,
        game::{GameId, PlayerId},
    },
};

/// Players with more than this many snapshots are eligible for compaction.
pub const COMPACTION_THRESHOLD: usize = 20;
/// Compaction retains every Nth snapshot.
pub const COMPACTION_STRIDE: usize = 5;
/// Position delta that bypasses the snapshot interval check.
const POSITION_DELTA_PCT: f64 = 5.0;

/// One recorded progress point for a racer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub timestamp: u64,
    pub position: f64,
    pub current_index: usize,
    pub wpm: f64,
    pub accuracy: f64,
}

/// Stats frozen when a racer finishes (or when the race ends under them).
#[derive(Debug, Clone)]
pub struct FinalStats {
    pub wpm: f64,
    pub accuracy: f64,
    pub finish_time: Option<u64>,
    pub rank: usize,
}

/// Replay track for a single racer.
#[derive(Debug, Clone, Default)]
pub struct PlayerReplay {
    pub name: String,
    pub snapshots: Vec<ProgressSnapshot>,
    pub final_stats: Option<FinalStats>,
}

/// Recorded history of one race.
#[derive(Debug, Clone)]
pub struct RaceReplay {
    pub game_id: GameId,
    pub text: String,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub players: IndexMap<PlayerId, PlayerReplay>,
}

/// In-memory replay registry. Writers are the race engine; the controller
/// triggers compaction and retention eviction.
pub struct ReplayStore {
    replays: DashMap<GameId, RaceReplay>,
}

impl Default for ReplayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayStore {
    pub fn new() -> Self {
        Self {
            replays: DashMap::new(),
        }
    }

    /// Create the replay shell on countdown entry.
    pub fn init(&self, game_id: GameId, text: String, racers: &[(PlayerId, String)]) {
        let players = racers
            .iter()
            .map(|(id, name)| {
                (
                    id.clone(),
                    PlayerReplay {
                        name: name.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();

        self.replays.insert(
            game_id,
            RaceReplay {
                game_id,
                text,
                start_time: None,
                end_time: None,
                players,
            },
        );
    }

    pub fn set_start_time(&self, game_id: GameId, start_time: u64) {
        if let Some(mut replay) = self.replays.get_mut(&game_id) {
            replay.start_time = Some(start_time);
        }
    }

    pub fn set_end_time(&self, game_id: GameId, end_time: u64) {
        if let Some(mut replay) = self.replays.get_mut(&game_id) {
            replay.end_time = Some(end_time);
        }
    }

    /// Record a snapshot, subject to admission: the previous snapshot is
    /// absent, the interval elapsed, the position moved by at least five
    /// percent, or the racer just hit 100 (the finish snapshot is always
    /// kept). Finalized players are ignored.
    pub fn record(
        &self,
        game_id: GameId,
        player_id: &PlayerId,
        snapshot: ProgressSnapshot,
        interval_ms: u64,
    ) -> bool {
        let Some(mut replay) = self.replays.get_mut(&game_id) else {
            return false;
        };
        let Some(track) = replay.players.get_mut(player_id) else {
            return false;
        };
        if track.final_stats.is_some() {
            return false;
        }

        let admitted = match track.snapshots.last() {
            None => true,
            Some(previous) => {
                snapshot.timestamp.saturating_sub(previous.timestamp) >= interval_ms
                    || (snapshot.position - previous.position).abs() >= POSITION_DELTA_PCT
                    || snapshot.position >= 100.0
            }
        };

        if admitted {
            track.snapshots.push(snapshot);
        }
        admitted
    }

    /// Freeze a racer's final stats; later calls are ignored.
    pub fn finalize_player(&self, game_id: GameId, player_id: &PlayerId, stats: FinalStats) {
        let Some(mut replay) = self.replays.get_mut(&game_id) else {
            return;
        };
        if let Some(track) = replay.players.get_mut(player_id)
            && track.final_stats.is_none()
        {
            track.final_stats = Some(stats);
        }
    }

    pub fn get(&self, game_id: GameId) -> Option<RaceReplay> {
        self.replays.get(&game_id).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<ReplayListItem> {
        self.replays
            .iter()
            .map(|entry| ReplayListItem {
                game_id: entry.game_id,
                player_count: entry.players.len(),
                snapshot_count: entry
                    .players
                    .values()
                    .map(|track| track.snapshots.len())
                    .sum(),
                finalized: entry.end_time.is_some(),
            })
            .collect()
    }

    pub fn remove(&self, game_id: GameId) -> bool {
        self.replays.remove(&game_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.replays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replays.is_empty()
    }

    /// Cache compaction: for every track with more than
    /// [`COMPACTION_THRESHOLD`] snapshots, retain every
    /// [`COMPACTION_STRIDE`]th snapshot in order. Returns the number of
    /// snapshots discarded.
    pub fn compact(&self) -> usize {
        let mut discarded = 0;
        for mut replay in self.replays.iter_mut() {
            for track in replay.players.values_mut() {
                if track.snapshots.len() > COMPACTION_THRESHOLD {
                    let before = track.snapshots.len();
                    track.snapshots = track
                        .snapshots
                        .iter()
                        .step_by(COMPACTION_STRIDE)
                        .cloned()
                        .collect();
                    discarded += before - track.snapshots.len();
                }
            }
        }
        if discarded > 0 {
            debug!(discarded, "compacted replay snapshots");
        }
        discarded
    }
}

/// Arm the retention timer for a destroyed session's replay. The retention
/// window is read from the control plane at scheduling time.
pub fn schedule_retention(state: SharedState, game_id: GameId) {
    let retention_ms = state.controls().snapshot().replay_retention_ms;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(retention_ms)).await;
        if state.replays().remove(game_id) {
            info!(game_id = %game_id, "replay evicted after retention window");
        }
    });
}
