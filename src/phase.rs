//! Phase tracking and the per-session countdown.
//!
//! The [`PhaseStateMachine`] holds the current and previous phase plus at most one running
//! countdown. A countdown carries its continuation as data ([`PhaseEnd`]); when it runs out, or
//! is skipped, the continuation is handed back to the caller exactly once and the countdown is
//! gone. Natural expiry and a skip therefore run the same downstream code and can never both
//! fire.

use serde::{Deserialize, Serialize};

use crate::{Phase, Timestamp};

/// What to do when a timed phase ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEnd {
    /// Swipe is over: move to discussion.
    Swipe,
    /// Discussion is over: open the vote.
    Discussion,
    /// Voting is over: resolve the tally.
    Voting,
}

impl PhaseEnd {
    /// The continuation belonging to a timed phase.
    #[must_use]
    pub const fn for_phase(phase: Phase) -> Option<Self> {
        match phase {
            Phase::Swipe => Some(Self::Swipe),
            Phase::Discussion => Some(Self::Discussion),
            Phase::Voting => Some(Self::Voting),
            Phase::Waiting | Phase::Resolution | Phase::Ended => None,
        }
    }

    /// The phase this continuation ends.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Swipe => Phase::Swipe,
            Self::Discussion => Phase::Discussion,
            Self::Voting => Phase::Voting,
        }
    }
}

/// Identifies one started countdown.
///
/// Cancelling with a handle only affects the countdown it was issued for; a handle from a
/// countdown that was replaced, finished or skipped is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountdownHandle {
    generation: u64,
}

/// A recorded phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// The phase that was left.
    pub from: Phase,
    /// The phase that was entered.
    pub to: Phase,
    /// When it happened.
    pub at: Timestamp,
}

/// Result of advancing the countdown by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// Still running.
    Running {
        /// The phase being counted down.
        phase: Phase,
        /// Whole seconds left.
        remaining: u32,
    },
    /// Reached zero. The countdown is gone and the continuation must run now.
    Finished(PhaseEnd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Countdown {
    generation: u64,
    remaining: u32,
    on_expiry: PhaseEnd,
}

/// Current phase, previous phase and the single active countdown of a session.
#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    current: Phase,
    previous: Option<Phase>,
    started_at: Option<Timestamp>,
    countdown: Option<Countdown>,
    next_generation: u64,
}

impl Default for PhaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStateMachine {
    /// Creates a machine in [`Phase::Waiting`] with no countdown.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: Phase::Waiting,
            previous: None,
            started_at: None,
            countdown: None,
            next_generation: 0,
        }
    }

    /// The current phase.
    #[must_use]
    pub const fn current(&self) -> Phase {
        self.current
    }

    /// The phase before the current one.
    #[must_use]
    pub const fn previous(&self) -> Option<Phase> {
        self.previous
    }

    /// When the current phase began. `None` while waiting after a reset.
    #[must_use]
    pub const fn phase_started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    /// Whether the current phase is `phase`.
    #[must_use]
    pub fn is_phase(&self, phase: Phase) -> bool {
        self.current == phase
    }

    /// Moves to `phase`. Setting the phase that is already current changes nothing and returns
    /// `None`.
    pub fn set_phase(&mut self, phase: Phase, now: Timestamp) -> Option<PhaseTransition> {
        if self.current == phase {
            return None;
        }
        let transition = PhaseTransition {
            from: self.current,
            to: phase,
            at: now,
        };
        tracing::debug!(from = %transition.from, to = %transition.to, at = %now, "phase transition");
        self.previous = Some(self.current);
        self.current = phase;
        self.started_at = Some(now);
        Some(transition)
    }

    /// Back to [`Phase::Waiting`] with no history and no countdown.
    pub fn reset(&mut self) {
        self.current = Phase::Waiting;
        self.previous = None;
        self.started_at = None;
        self.countdown = None;
    }

    /// Starts a countdown of `seconds`, replacing any running one.
    ///
    /// A zero-length countdown finishes on the first tick.
    pub fn start_countdown(&mut self, seconds: u32, on_expiry: PhaseEnd) -> CountdownHandle {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.countdown = Some(Countdown {
            generation,
            remaining: seconds,
            on_expiry,
        });
        tracing::trace!(seconds, phase = %on_expiry.phase(), generation, "countdown started");
        CountdownHandle { generation }
    }

    /// Advances the countdown by one second. `None` if no countdown is running.
    pub fn tick(&mut self) -> Option<CountdownStep> {
        let countdown = self.countdown.as_mut()?;
        countdown.remaining = countdown.remaining.saturating_sub(1);
        if countdown.remaining == 0 {
            let on_expiry = countdown.on_expiry;
            self.countdown = None;
            Some(CountdownStep::Finished(on_expiry))
        } else {
            Some(CountdownStep::Running {
                phase: countdown.on_expiry.phase(),
                remaining: countdown.remaining,
            })
        }
    }

    /// Removes the running countdown and returns its continuation.
    pub fn skip(&mut self) -> Option<PhaseEnd> {
        self.countdown.take().map(|c| c.on_expiry)
    }

    /// Cancels the countdown identified by `handle`. Returns whether anything was cancelled.
    pub fn cancel(&mut self, handle: CountdownHandle) -> bool {
        match self.countdown {
            Some(countdown) if countdown.generation == handle.generation => {
                self.countdown = None;
                true
            },
            Some(_) | None => false,
        }
    }

    /// Cancels whatever countdown is running.
    pub fn cancel_any(&mut self) -> bool {
        self.countdown.take().is_some()
    }

    /// Seconds left on the running countdown.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining)
    }

    /// Handle of the running countdown.
    #[must_use]
    pub fn active_countdown(&self) -> Option<CountdownHandle> {
        self.countdown.map(|c| CountdownHandle {
            generation: c.generation,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn setting_the_same_phase_twice_records_once() {
        let mut machine = PhaseStateMachine::new();
        let first = machine.set_phase(Phase::Swipe, Timestamp::from_secs(1));
        assert_eq!(
            first,
            Some(PhaseTransition {
                from: Phase::Waiting,
                to: Phase::Swipe,
                at: Timestamp::from_secs(1)
            })
        );
        assert_eq!(machine.set_phase(Phase::Swipe, Timestamp::from_secs(9)), None);
        assert_eq!(machine.previous(), Some(Phase::Waiting));
        assert_eq!(machine.phase_started_at(), Some(Timestamp::from_secs(1)));
        assert!(machine.is_phase(Phase::Swipe));
    }

    #[test]
    fn countdown_finishes_after_its_length() {
        let mut machine = PhaseStateMachine::new();
        machine.start_countdown(3, PhaseEnd::Discussion);
        assert_eq!(
            machine.tick(),
            Some(CountdownStep::Running {
                phase: Phase::Discussion,
                remaining: 2
            })
        );
        assert_eq!(machine.remaining(), Some(2));
        machine.tick();
        assert_eq!(
            machine.tick(),
            Some(CountdownStep::Finished(PhaseEnd::Discussion))
        );
        assert_eq!(machine.tick(), None);
        assert_eq!(machine.remaining(), None);
    }

    #[test]
    fn skip_yields_the_continuation_once() {
        let mut machine = PhaseStateMachine::new();
        machine.start_countdown(30, PhaseEnd::Voting);
        assert_eq!(machine.skip(), Some(PhaseEnd::Voting));
        assert_eq!(machine.skip(), None);
        assert_eq!(machine.tick(), None);
    }

    #[test]
    fn cancel_only_matches_its_generation() {
        let mut machine = PhaseStateMachine::new();
        let old = machine.start_countdown(30, PhaseEnd::Swipe);
        let new = machine.start_countdown(60, PhaseEnd::Discussion);
        assert_ne!(old, new);

        assert!(!machine.cancel(old));
        assert_eq!(machine.active_countdown(), Some(new));
        assert!(machine.cancel(new));
        assert!(!machine.cancel(new));
        assert_eq!(machine.skip(), None);
    }

    #[test]
    fn zero_length_countdown_finishes_on_first_tick() {
        let mut machine = PhaseStateMachine::new();
        machine.start_countdown(0, PhaseEnd::Swipe);
        assert_eq!(machine.tick(), Some(CountdownStep::Finished(PhaseEnd::Swipe)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut machine = PhaseStateMachine::new();
        machine.set_phase(Phase::Voting, Timestamp::from_secs(4));
        machine.start_countdown(10, PhaseEnd::Voting);
        machine.reset();
        assert!(machine.is_phase(Phase::Waiting));
        assert_eq!(machine.previous(), None);
        assert_eq!(machine.phase_started_at(), None);
        assert_eq!(machine.remaining(), None);
    }

    #[test]
    fn continuations_map_to_timed_phases() {
        for phase in [Phase::Swipe, Phase::Discussion, Phase::Voting] {
            assert_eq!(PhaseEnd::for_phase(phase).map(|end| end.phase()), Some(phase));
        }
        assert_eq!(PhaseEnd::for_phase(Phase::Resolution), None);
    }
}
