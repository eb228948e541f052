use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::{AbilityKind, ActorId, Phase, SessionId};

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), SparkError>`].
///
/// Every rejection is side-effect free: the engine validates a request completely before it writes
/// any field, so receiving an error means the session is exactly as it was before the call.
///
/// [`Result<(), SparkError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq)]
pub enum SparkError {
    /// A skip or forced transition asked for a phase that is not reachable from the current one.
    InvalidTransition {
        /// The phase the session was in.
        from: Phase,
        /// The phase that was requested.
        to: Phase,
    },
    /// A vote or ability was attempted by someone who may not perform it right now.
    IneligibleAction {
        /// Why the action was rejected.
        reason: IneligibleReason,
    },
    /// [`GameState::validate_state`] failed at a round boundary. The round was aborted and the
    /// session left in its last valid phase.
    ///
    /// [`GameState::validate_state`]: crate::GameState::validate_state
    CorruptedState {
        /// Description of the broken invariant.
        details: String,
    },
    /// A game was started without something it cannot run without.
    MissingPrerequisite {
        /// What was missing (e.g. `"players"` or `"spawn locations"`).
        what: &'static str,
    },
    /// No session with this id is registered.
    UnknownSession {
        /// The id that was looked up.
        session: SessionId,
    },
    /// A configuration value is outside its accepted range.
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The session is not running a game (still waiting, or already ended).
    GameNotActive,
}

/// The reasons an action can be ineligible.
///
/// Carried by [`SparkError::IneligibleAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum IneligibleReason {
    /// The request did not name an actor.
    MissingActor,
    /// The request did not name a target.
    MissingTarget,
    /// The acting participant is not alive (or not in this game).
    ActorNotAlive(ActorId),
    /// The targeted participant is not alive (or not in this game).
    TargetNotAlive(ActorId),
    /// The actor is alive but the actor directory reports them as disconnected.
    Disconnected(ActorId),
    /// Actors may not vote for, or use a targeted ability on, themselves.
    SelfTarget,
    /// The actor already cast a vote in this voting phase.
    AlreadyVoted(ActorId),
    /// The actor's role does not grant this ability.
    WrongRole {
        /// The actor.
        actor: ActorId,
        /// The ability that was attempted.
        kind: AbilityKind,
    },
    /// The ability was already consumed this round.
    AlreadyUsed {
        /// The actor.
        actor: ActorId,
        /// The ability that was attempted.
        kind: AbilityKind,
    },
    /// The action is not legal in the current phase.
    WrongPhase {
        /// The phase the session is in.
        current: Phase,
    },
    /// The ability resolves instantly and never opens a window.
    Instant(AbilityKind),
    /// The ability needs an open window and none is active.
    NoActiveWindow(AbilityKind),
    /// A window of this kind is already open for the actor.
    WindowAlreadyOpen(AbilityKind),
    /// A cure was attempted on a target without a pending death.
    NoPendingDeath(ActorId),
    /// The target is already flagged as infected this round.
    AlreadyInfected(ActorId),
}

impl Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingActor => write!(f, "no actor was given"),
            Self::MissingTarget => write!(f, "no target was given"),
            Self::ActorNotAlive(actor) => write!(f, "{} is not alive", actor),
            Self::TargetNotAlive(target) => write!(f, "target {} is not alive", target),
            Self::Disconnected(actor) => write!(f, "{} is disconnected", actor),
            Self::SelfTarget => write!(f, "actors cannot target themselves"),
            Self::AlreadyVoted(actor) => write!(f, "{} already voted this phase", actor),
            Self::WrongRole { actor, kind } => {
                write!(f, "{} does not have the {} ability", actor, kind)
            },
            Self::AlreadyUsed { actor, kind } => {
                write!(f, "{} already used {} this round", actor, kind)
            },
            Self::WrongPhase { current } => {
                write!(f, "not allowed during the {} phase", current)
            },
            Self::Instant(kind) => write!(f, "{} resolves instantly and has no window", kind),
            Self::NoActiveWindow(kind) => write!(f, "no active {} window", kind),
            Self::WindowAlreadyOpen(kind) => write!(f, "a {} window is already open", kind),
            Self::NoPendingDeath(target) => write!(f, "{} has no pending death", target),
            Self::AlreadyInfected(target) => write!(f, "{} is already infected", target),
        }
    }
}

impl From<IneligibleReason> for SparkError {
    fn from(reason: IneligibleReason) -> Self {
        Self::IneligibleAction { reason }
    }
}

impl Display for SparkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparkError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition from {} to {}", from, to)
            },
            SparkError::IneligibleAction { reason } => {
                write!(f, "Ineligible action: {}", reason)
            },
            SparkError::CorruptedState { details } => {
                write!(f, "Game state is corrupted, round aborted: {}", details)
            },
            SparkError::MissingPrerequisite { what } => {
                write!(f, "Cannot start game: no {}", what)
            },
            SparkError::UnknownSession { session } => {
                write!(f, "Unknown session {}", session)
            },
            SparkError::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for {}: {}", field, reason)
            },
            SparkError::GameNotActive => {
                write!(f, "The session is not running a game.")
            },
        }
    }
}

impl Error for SparkError {}

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
    fn ineligible_reason_converts_into_error() {
        let err: SparkError = IneligibleReason::SelfTarget.into();
        assert_eq!(
            err,
            SparkError::IneligibleAction {
                reason: IneligibleReason::SelfTarget
            }
        );
    }

    #[test]
    fn display_mentions_the_details() {
        let err = SparkError::InvalidTransition {
            from: Phase::Swipe,
            to: Phase::Voting,
        };
        assert_eq!(err.to_string(), "Invalid transition from swipe to voting");

        let err: SparkError = IneligibleReason::WrongRole {
            actor: ActorId::new(4),
            kind: AbilityKind::Cure,
        }
        .into();
        assert!(err.to_string().contains("actor#4"));
        assert!(err.to_string().contains("cure"));

        let err = SparkError::MissingPrerequisite {
            what: "spawn locations",
        };
        assert_eq!(err.to_string(), "Cannot start game: no spawn locations");
    }

    #[test]
    fn errors_are_std_errors() {
        fn assert_error<E: Error>(_: &E) {}
        assert_error(&SparkError::GameNotActive);
    }
}
