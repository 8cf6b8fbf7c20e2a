use thiserror::Error;

/// High-level phases a race session moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    /// Players are joining and readying up.
    Waiting,
    /// The pre-race countdown is ticking.
    Countdown,
    /// The race is live and progress updates are accepted.
    Racing,
    /// The race ended; the session awaits cleanup.
    Finished,
}

impl RacePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RacePhase::Waiting => "waiting",
            RacePhase::Countdown => "countdown",
            RacePhase::Racing => "racing",
            RacePhase::Finished => "finished",
        }
    }
}

/// Events that can be applied to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceEvent {
    /// Enough ready players; begin the countdown.
    StartCountdown,
    /// Countdown reached zero; the race is live.
    StartRace,
    /// All racers finished, everyone left, or the deadline fired.
    EndRace,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: RacePhase,
    /// The event that cannot be applied from this phase.
    pub event: RaceEvent,
}

/// Per-session state machine enforcing the Waiting → Countdown → Racing →
/// Finished progression. The version increments on every transition so
/// observers can detect missed updates.
#[derive(Debug, Clone)]
pub struct RaceStateMachine {
    phase: RacePhase,
    version: usize,
}

impl Default for RaceStateMachine {
    fn default() -> Self {
        Self {
            phase: RacePhase::Waiting,
            version: 0,
        }
    }
}

impl RaceStateMachine {
    /// Create a new state machine initialised in the waiting state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    /// Transition count since creation.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply an event, returning the new phase or an [`InvalidTransition`].
    pub fn apply(&mut self, event: RaceEvent) -> Result<RacePhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Compute the target phase for an event if the transition is valid.
    fn compute_transition(&self, event: RaceEvent) -> Result<RacePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (RacePhase::Waiting, RaceEvent::StartCountdown) => RacePhase::Countdown,
            (RacePhase::Countdown, RaceEvent::StartRace) => RacePhase::Racing,
            (RacePhase::Racing, RaceEvent::EndRace) => RacePhase::Finished,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_waiting() {
        let sm = RaceStateMachine::new();
        assert_eq!(sm.phase(), RacePhase::Waiting);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn full_happy_path_through_race() {
        let mut sm = RaceStateMachine::new();

        assert_eq!(sm.apply(RaceEvent::StartCountdown), Ok(RacePhase::Countdown));
        assert_eq!(sm.apply(RaceEvent::StartRace), Ok(RacePhase::Racing));
        assert_eq!(sm.apply(RaceEvent::EndRace), Ok(RacePhase::Finished));
        assert_eq!(sm.version(), 3);
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut sm = RaceStateMachine::new();
        let err = sm.apply(RaceEvent::StartRace).unwrap_err();
        assert_eq!(err.from, RacePhase::Waiting);
        assert_eq!(err.event, RaceEvent::StartRace);

        let err = sm.apply(RaceEvent::EndRace).unwrap_err();
        assert_eq!(err.from, RacePhase::Waiting);
    }

    #[test]
    fn no_cycles_after_finished() {
        let mut sm = RaceStateMachine::new();
        sm.apply(RaceEvent::StartCountdown).unwrap();
        sm.apply(RaceEvent::StartRace).unwrap();
        sm.apply(RaceEvent::EndRace).unwrap();

        assert!(sm.apply(RaceEvent::StartCountdown).is_err());
        assert!(sm.apply(RaceEvent::StartRace).is_err());
        assert!(sm.apply(RaceEvent::EndRace).is_err());
        assert_eq!(sm.phase(), RacePhase::Finished);
    }

    #[test]
    fn version_is_untouched_by_invalid_events() {
        let mut sm = RaceStateMachine::new();
        let _ = sm.apply(RaceEvent::EndRace);
        assert_eq!(sm.version(), 0);
    }
}
