//! # Spark
//!
//! Spark is the rules engine of a hidden-role ("social deduction") party game. One participant
//! is secretly the **Spark**, one is the **Medic**, everyone else is an **Innocent**. Rounds cycle
//! through timed phases, the Spark infects players, the Medic cures them before the pending death
//! fires, and the group votes to eliminate a suspect against a threshold that adapts to the number
//! of players still alive.
//!
//! The engine never renders, moves or persists anything. A host drives it with wall-clock ticks
//! and raw player actions, and listens to [`GameEvent`]s to update its own world.
//!
//! ```
//! use spark_engine::{ActorId, GameConfig, GameSetup, Phase, SessionRegistry, SpawnPoint};
//!
//! let mut registry = SessionRegistry::builder().build();
//! let setup = GameSetup::new("lobby-1", (1..=6).map(ActorId::new))
//!     .with_spawns(vec![SpawnPoint::new("arena", 0.0, 64.0, 0.0)])
//!     .with_seed(7);
//!
//! let id = registry.start_game(setup, &GameConfig::default()).unwrap();
//! assert_eq!(registry.current_phase(id), Some(Phase::Swipe));
//! assert_eq!(registry.current_round(id), Some(1));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use serde::{Deserialize, Serialize};
use web_time::Duration;

pub use abilities::{AbilityWindow, AbilityWindowManager, WindowToken};
pub use config::{
    AbilityConfig, GameConfig, PhaseDurations, ThresholdAnchor, ThresholdConfig,
};
pub use error::{IneligibleReason, SparkError};
pub use events::{
    CollectingListener, EliminationCause, EventDispatcher, GameEvent, GameEventListener,
    WindowCloseReason,
};
pub use host::{
    ActorDirectory, AllConnected, Clock, ConfigProvider, ManualClock, SpawnPoint, SystemClock,
};
pub use phase::{CountdownHandle, CountdownStep, PhaseEnd, PhaseStateMachine, PhaseTransition};
pub use registry::{RegistryBuilder, SessionRegistry};
pub use roles::RoleAssigner;
pub use session::{GameSetup, Session, SessionSnapshot};
pub use state::GameState;
pub use voting::tally::VoteTally;
pub use voting::threshold::DynamicVotingThreshold;
pub use win::{WinConditionEvaluator, WinResult};

pub mod abilities;
pub mod config;
#[cfg(feature = "tokio")]
pub mod driver;
#[doc(hidden)]
pub mod error;
pub mod events;
pub mod host;
pub mod phase;
pub mod registry;
/// Internal random number generator module based on PCG32.
///
/// Provides the seeded shuffle used to hand out roles without pulling in the `rand` crate.
pub mod rng;
pub mod roles;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod voting;
pub mod win;

/// Small inline list of actors, used for tied targets and sight reveals.
pub type ActorList = smallvec::SmallVec<[ActorId; 8]>;

/// Opaque identifier of a participant.
///
/// The engine never interprets the value; hosts map their own player identities onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(u64);

impl ActorId {
    /// Wraps a raw host identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

impl From<u64> for ActorId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of one game session inside a [`SessionRegistry`].
///
/// Session ids are allocated by the registry and never reused during its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw session number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw session number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// A point on the host's monotonic clock, in milliseconds.
///
/// Only differences and ordering matter; the origin is whatever the host's [`Clock`] uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp from milliseconds since the clock origin.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp from whole seconds since the clock origin.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Milliseconds since the clock origin.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns `self + duration`, saturating at the end of the clock.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The secret role of a participant.
///
/// Roles are a closed set; every place that depends on a role matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The impostor. Infects players and spreads delusions.
    Spark,
    /// Support role. Cures infections before the pending death fires.
    Medic,
    /// Bystander. Votes and deduces.
    Innocent,
}

impl Role {
    /// Returns a string representation suitable for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spark => "spark",
            Self::Medic => "medic",
            Self::Innocent => "innocent",
        }
    }

    /// Whether this role may use `kind` at all (ignores phase and per-round usage).
    #[must_use]
    pub const fn permits(&self, kind: AbilityKind) -> bool {
        match (self, kind) {
            (Self::Spark, AbilityKind::Swipe)
            | (Self::Spark, AbilityKind::Delusion)
            | (Self::Spark, AbilityKind::HunterVision) => true,
            (Self::Medic, AbilityKind::Cure) | (Self::Medic, AbilityKind::HealingSight) => true,
            (Self::Spark, _) | (Self::Medic, _) | (Self::Innocent, _) => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phases a session cycles through.
///
/// `Swipe → Discussion → Voting → Resolution → Swipe → …` until a win condition moves the session
/// to `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before the game starts.
    Waiting,
    /// The Spark and Medic use their abilities.
    Swipe,
    /// Players talk.
    Discussion,
    /// Players vote on a suspect.
    Voting,
    /// Votes are counted and the elimination, if any, is applied.
    Resolution,
    /// A win condition fired or the session was ended.
    Ended,
}

impl Phase {
    /// Returns a string representation suitable for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Swipe => "swipe",
            Self::Discussion => "discussion",
            Self::Voting => "voting",
            Self::Resolution => "resolution",
            Self::Ended => "ended",
        }
    }

    /// The only phase reachable from `self` by a regular transition.
    #[must_use]
    pub const fn successor(&self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Swipe),
            Self::Swipe => Some(Self::Discussion),
            Self::Discussion => Some(Self::Voting),
            Self::Voting => Some(Self::Resolution),
            Self::Resolution => Some(Self::Swipe),
            Self::Ended => None,
        }
    }

    /// Whether this phase runs a countdown.
    #[must_use]
    pub const fn is_timed(&self) -> bool {
        matches!(self, Self::Swipe | Self::Discussion | Self::Voting)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-restricted abilities.
///
/// `Swipe`, `Cure` and `Delusion` must be armed through an ability window first; the two sight
/// abilities resolve instantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    /// Spark: infect a target, scheduling its death.
    Swipe,
    /// Medic: cancel a target's pending death.
    Cure,
    /// Spark: plant a fake infection flag without a pending death.
    Delusion,
    /// Medic: reveal every actor currently flagged as infected.
    HealingSight,
    /// Spark: reveal every alive non-Spark actor.
    HunterVision,
}

impl AbilityKind {
    /// Returns a string representation suitable for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Swipe => "swipe",
            Self::Cure => "cure",
            Self::Delusion => "delusion",
            Self::HealingSight => "healing_sight",
            Self::HunterVision => "hunter_vision",
        }
    }

    /// Whether the ability has to be armed through an [`AbilityWindow`] before use.
    #[must_use]
    pub const fn uses_window(&self) -> bool {
        matches!(self, Self::Swipe | Self::Cure | Self::Delusion)
    }
}

impl fmt::Display for AbilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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
    fn phase_successors_form_a_cycle() {
        let mut phase = Phase::Swipe;
        let mut visited = Vec::new();
        for _ in 0..4 {
            visited.push(phase);
            phase = phase.successor().unwrap();
        }
        assert_eq!(
            visited,
            vec![Phase::Swipe, Phase::Discussion, Phase::Voting, Phase::Resolution]
        );
        assert_eq!(phase, Phase::Swipe);
        assert_eq!(Phase::Ended.successor(), None);
        assert_eq!(Phase::Waiting.successor(), Some(Phase::Swipe));
    }

    #[test]
    fn only_three_phases_are_timed() {
        let timed: Vec<Phase> = [
            Phase::Waiting,
            Phase::Swipe,
            Phase::Discussion,
            Phase::Voting,
            Phase::Resolution,
            Phase::Ended,
        ]
        .into_iter()
        .filter(Phase::is_timed)
        .collect();
        assert_eq!(timed, vec![Phase::Swipe, Phase::Discussion, Phase::Voting]);
    }

    #[test]
    fn role_permissions() {
        assert!(Role::Spark.permits(AbilityKind::Swipe));
        assert!(Role::Spark.permits(AbilityKind::Delusion));
        assert!(Role::Spark.permits(AbilityKind::HunterVision));
        assert!(!Role::Spark.permits(AbilityKind::Cure));
        assert!(Role::Medic.permits(AbilityKind::Cure));
        assert!(Role::Medic.permits(AbilityKind::HealingSight));
        assert!(!Role::Medic.permits(AbilityKind::Swipe));
        for kind in [
            AbilityKind::Swipe,
            AbilityKind::Cure,
            AbilityKind::Delusion,
            AbilityKind::HealingSight,
            AbilityKind::HunterVision,
        ] {
            assert!(!Role::Innocent.permits(kind));
        }
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = Timestamp::from_secs(5);
        assert_eq!(t.as_millis(), 5000);
        assert_eq!(
            t.saturating_add(Duration::from_secs(10)),
            Timestamp::from_secs(15)
        );
        assert_eq!(
            Timestamp::from_millis(u64::MAX).saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(u64::MAX)
        );
        assert_eq!(
            Timestamp::ZERO.saturating_since(t),
            Duration::ZERO
        );
        assert_eq!(t.saturating_since(Timestamp::ZERO), Duration::from_secs(5));
    }

    #[test]
    fn display_formats() {
        assert_eq!(ActorId::new(3).to_string(), "actor#3");
        assert_eq!(SessionId::new(9).to_string(), "session#9");
        assert_eq!(Phase::Voting.to_string(), "voting");
        assert_eq!(Role::Medic.to_string(), "medic");
        assert_eq!(AbilityKind::HealingSight.to_string(), "healing_sight");
    }
}
