use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::state::state_machine::{InvalidTransition, RaceEvent, RacePhase, RaceStateMachine};

/// Opaque session identifier, unique across the process lifetime.
pub type GameId = Uuid;
/// Player identifier; equal to the owning connection's identifier.
pub type PlayerId = String;

/// Fixed palette cycled through as racers join.
pub const PLAYER_PALETTE: [&str; 8] = [
    "#E6194B", "#3CB44B", "#FFE119", "#4363D8", "#F58231", "#911EB4", "#46F0F0", "#F032E6",
];
/// Neutral color assigned to spectators.
pub const SPECTATOR_COLOR: &str = "#AAAAAA";
/// Display names are clamped to this many characters.
pub const MAX_NAME_LEN: usize = 15;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A connection-bound participant in a race session.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    /// Percent of the passage completed, 0–100.
    pub position: f64,
    /// Character offset into the passage.
    pub current_index: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub is_ready: bool,
    pub finish_time: Option<u64>,
    pub is_connected: bool,
    pub is_spectator: bool,
}

impl Player {
    /// New racer with zeroed progress.
    pub fn racer(id: PlayerId, name: String, color: String) -> Self {
        Self {
            id,
            name,
            color,
            position: 0.0,
            current_index: 0,
            wpm: 0.0,
            accuracy: 0.0,
            is_ready: false,
            finish_time: None,
            is_connected: true,
            is_spectator: false,
        }
    }

    /// New spectator; always ready, progress fields are never written.
    pub fn spectator(id: PlayerId, name: String) -> Self {
        Self {
            id,
            name: format!("{name} (Spectator)"),
            color: SPECTATOR_COLOR.to_string(),
            position: 0.0,
            current_index: 0,
            wpm: 0.0,
            accuracy: 0.0,
            is_ready: true,
            finish_time: None,
            is_connected: true,
            is_spectator: true,
        }
    }

    /// Zero all progress fields at race start.
    pub fn reset_progress(&mut self) {
        self.position = 0.0;
        self.current_index = 0;
        self.wpm = 0.0;
        self.accuracy = 0.0;
        self.finish_time = None;
    }

    pub fn has_finished(&self) -> bool {
        self.finish_time.is_some()
    }
}

/// Cancellation-capable timers owned by a session. Terminal transitions and
/// cleanup abort whatever is still pending.
#[derive(Debug, Default)]
pub struct SessionTimers {
    pub countdown: Option<JoinHandle<()>>,
    pub deadline: Option<JoinHandle<()>>,
    pub cleanup: Option<JoinHandle<()>>,
}

impl SessionTimers {
    pub fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    pub fn cancel_deadline(&mut self) {
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_countdown();
        self.cancel_deadline();
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}

/// One race instance: the authoritative session state mutated only by the
/// race engine under the session lock.
#[derive(Debug)]
pub struct RaceSession {
    pub id: GameId,
    machine: RaceStateMachine,
    /// Participants in join order, keyed by player id.
    pub players: IndexMap<PlayerId, Player>,
    /// The passage typed in this race; immutable after creation.
    pub text: String,
    pub max_players: usize,
    pub created_at: u64,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    /// Seconds left; only meaningful while in [`RacePhase::Countdown`].
    pub countdown_remaining: u32,
    pub summary: Option<RaceSummary>,
    pub timers: SessionTimers,
}

impl RaceSession {
    /// Build a new session in the waiting state with its creator as the
    /// first racer.
    pub fn new(id: GameId, text: String, max_players: usize, creator: Player) -> Self {
        let mut players = IndexMap::new();
        players.insert(creator.id.clone(), creator);

        Self {
            id,
            machine: RaceStateMachine::new(),
            players,
            text,
            max_players,
            created_at: now_ms(),
            start_time: None,
            end_time: None,
            countdown_remaining: 0,
            summary: None,
            timers: SessionTimers::default(),
        }
    }

    pub fn phase(&self) -> RacePhase {
        self.machine.phase()
    }

    pub fn version(&self) -> usize {
        self.machine.version()
    }

    /// Advance the state machine.
    pub fn apply(&mut self, event: RaceEvent) -> Result<RacePhase, InvalidTransition> {
        self.machine.apply(event)
    }

    /// Connected, non-spectator participants.
    pub fn connected_racers(&self) -> impl Iterator<Item = &Player> {
        self.players
            .values()
            .filter(|p| p.is_connected && !p.is_spectator)
    }

    /// Number of characters in this session's passage. Progress offsets are
    /// character offsets, so byte length must not leak into the math.
    pub fn text_char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Position percentage for a character offset into this session's text.
    pub fn position_for(&self, current_index: usize) -> f64 {
        let char_len = self.text_char_len();
        if char_len == 0 {
            return 100.0;
        }
        (current_index as f64 / char_len as f64 * 100.0).min(100.0)
    }

    /// Age used by idle termination: time since the race started, or since
    /// creation when it never did.
    pub fn game_age_ms(&self, now: u64) -> u64 {
        let reference = self.start_time.unwrap_or(self.created_at);
        now.saturating_sub(reference)
    }
}

/// Final per-race summary emitted with `game_finished`.
#[derive(Debug, Clone)]
pub struct RaceSummary {
    pub total_time: u64,
    pub rankings: Vec<RankedPlayer>,
    pub stats: SummaryStats,
    pub replay_available: bool,
}

/// One row of the final ranking.
#[derive(Debug, Clone)]
pub struct RankedPlayer {
    pub id: PlayerId,
    pub name: String,
    pub rank: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub finished: bool,
}

/// Aggregates computed over finished players only.
#[derive(Debug, Clone)]
pub struct SummaryStats {
    pub avg_wpm: f64,
    pub avg_accuracy: f64,
    pub finish_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RaceSession {
        RaceSession::new(
            Uuid::new_v4(),
            "abcdefghij".to_string(),
            4,
            Player::racer("p1".into(), "Ada".into(), PLAYER_PALETTE[0].into()),
        )
    }

    #[test]
    fn position_is_clamped_to_100() {
        let s = session();
        assert_eq!(s.position_for(5), 50.0);
        assert_eq!(s.position_for(10), 100.0);
        assert_eq!(s.position_for(25), 100.0);
    }

    #[test]
    fn position_uses_character_offsets_for_multibyte_text() {
        let mut s = session();
        // 12 characters, 13 bytes.
        s.text = "café au lait".to_string();
        assert_eq!(s.text_char_len(), 12);
        assert_eq!(s.position_for(6), 50.0);
        assert_eq!(s.position_for(12), 100.0);
    }

    #[test]
    fn spectator_name_is_suffixed() {
        let p = Player::spectator("p2".into(), "Carol".into());
        assert_eq!(p.name, "Carol (Spectator)");
        assert_eq!(p.color, SPECTATOR_COLOR);
        assert!(p.is_ready);
    }

    #[test]
    fn game_age_prefers_start_time() {
        let mut s = session();
        s.created_at = 1_000;
        assert_eq!(s.game_age_ms(5_000), 4_000);
        s.start_time = Some(4_000);
        assert_eq!(s.game_age_ms(5_000), 1_000);
    }

    #[test]
    fn reset_progress_clears_finish() {
        let mut p = Player::racer("p1".into(), "Ada".into(), "#E6194B".into());
        p.position = 100.0;
        p.finish_time = Some(42);
        p.reset_progress();
        assert_eq!(p.position, 0.0);
        assert!(p.finish_time.is_none());
    }
}
