//! Presentation events and their synchronous dispatch.
//!
//! Sessions describe everything observable that happens to them as [`GameEvent`]s. Hosts
//! register [`GameEventListener`]s to render messages, inventories or particles; the engine never
//! reads anything back from a listener.
//!
//! Listeners run synchronously, in registration order. A listener that panics is contained: the
//! panic is reported as a [`ViolationKind::Listener`] violation and the remaining listeners still
//! receive the event.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::telemetry::{report_to_observer, RuleViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    AbilityKind, ActorId, ActorList, Phase, Role, SessionId, SpawnPoint, Timestamp, WinResult,
};

/// Why a participant was removed from the alive set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    /// An uncured infection reached its pending-death time.
    Infection,
    /// The group voted them out.
    Vote,
}

/// Why an ability window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowCloseReason {
    /// The ability was used.
    Used,
    /// The window ran out.
    Expired,
    /// The round or the session ended, or the actor left.
    Discarded,
}

/// Everything observable that happens inside a session.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum GameEvent {
    /// Roles were dealt and the first round is about to begin.
    GameStarted {
        /// Host-facing session name.
        session_name: String,
        /// The secret roles. Hosts reveal each entry only to its own actor.
        roles: BTreeMap<ActorId, Role>,
        /// Where the host may place players.
        spawns: Vec<SpawnPoint>,
    },
    /// An actor was dealt a role. Hosts deliver this privately to `actor`.
    RoleAssigned {
        /// The actor.
        actor: ActorId,
        /// Their secret role.
        role: Role,
    },
    /// A new round began (also emitted for round 1).
    RoundStarted {
        /// The round number, starting at 1.
        round: u32,
    },
    /// The session changed phase.
    PhaseChanged {
        /// The phase that was left, if any.
        from: Option<Phase>,
        /// The phase that was entered.
        to: Phase,
        /// The current round.
        round: u32,
        /// When the transition happened.
        at: Timestamp,
    },
    /// The active countdown ticked.
    CountdownTick {
        /// The phase being counted down.
        phase: Phase,
        /// Whole seconds left.
        remaining: u32,
    },
    /// A countdown ended, naturally or by skip. Transient per-player UI should be cleared.
    CountdownFinished {
        /// The phase whose countdown ended.
        phase: Phase,
        /// Whether the host skipped the rest of the countdown.
        skipped: bool,
    },
    /// An ability window was armed.
    AbilityWindowOpened {
        /// The actor who armed it.
        actor: ActorId,
        /// The ability.
        kind: AbilityKind,
        /// When the window closes on its own.
        expires_at: Timestamp,
    },
    /// An ability window closed. The host should restore the actor's default visuals.
    AbilityWindowClosed {
        /// The actor who owned it.
        actor: ActorId,
        /// The ability.
        kind: AbilityKind,
        /// Why it closed.
        reason: WindowCloseReason,
    },
    /// The Spark infected a target.
    Infected {
        /// The Spark.
        actor: ActorId,
        /// The infected target.
        target: ActorId,
        /// When the target dies unless cured.
        dies_at: Timestamp,
    },
    /// The Medic cured a target.
    Cured {
        /// The Medic.
        actor: ActorId,
        /// The cured target.
        target: ActorId,
    },
    /// The Spark planted a fake infection.
    DelusionPlanted {
        /// The Spark.
        actor: ActorId,
        /// The deluded target.
        target: ActorId,
        /// When the fake flag fades, if it decays.
        fades_at: Option<Timestamp>,
    },
    /// A delusion decayed and its infected flag was cleared.
    DelusionFaded {
        /// The formerly deluded target.
        target: ActorId,
    },
    /// A sight ability revealed a set of actors to its user.
    SightRevealed {
        /// The actor who used the sight.
        actor: ActorId,
        /// Which sight.
        kind: AbilityKind,
        /// The revealed actors.
        revealed: ActorList,
    },
    /// A vote was registered.
    VoteCast {
        /// The voter.
        voter: ActorId,
        /// The suspect.
        target: ActorId,
        /// Votes for this target so far.
        votes_for_target: u32,
    },
    /// The voting phase was tallied.
    VoteResolved {
        /// The unique most-voted target, or `None` on a tie or an empty ballot.
        target: Option<ActorId>,
        /// Votes for that target.
        votes: u32,
        /// Votes required to eliminate.
        required: u32,
        /// Whether the target was eliminated.
        eliminated: bool,
        /// Consecutive voting phases without elimination, after this one.
        consecutive_no_elimination: u32,
    },
    /// A participant was removed from the alive set.
    Eliminated {
        /// The participant.
        actor: ActorId,
        /// Their role, revealed.
        role: Role,
        /// How they were eliminated.
        cause: EliminationCause,
    },
    /// A participant left the game.
    ActorLeft {
        /// The participant.
        actor: ActorId,
    },
    /// The game state failed validation at a round boundary and the round was aborted.
    StateCorrupted {
        /// Description of the broken invariant.
        details: String,
    },
    /// A win condition fired.
    GameEnded {
        /// Who won.
        result: WinResult,
        /// The round in which the game ended.
        round: u32,
    },
    /// The host ended the session, or every participant left.
    SessionClosed,
}

impl GameEvent {
    /// Short name of the variant, suitable for logging/metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GameStarted { .. } => "game_started",
            Self::RoleAssigned { .. } => "role_assigned",
            Self::RoundStarted { .. } => "round_started",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::CountdownTick { .. } => "countdown_tick",
            Self::CountdownFinished { .. } => "countdown_finished",
            Self::AbilityWindowOpened { .. } => "ability_window_opened",
            Self::AbilityWindowClosed { .. } => "ability_window_closed",
            Self::Infected { .. } => "infected",
            Self::Cured { .. } => "cured",
            Self::DelusionPlanted { .. } => "delusion_planted",
            Self::DelusionFaded { .. } => "delusion_faded",
            Self::SightRevealed { .. } => "sight_revealed",
            Self::VoteCast { .. } => "vote_cast",
            Self::VoteResolved { .. } => "vote_resolved",
            Self::Eliminated { .. } => "eliminated",
            Self::ActorLeft { .. } => "actor_left",
            Self::StateCorrupted { .. } => "state_corrupted",
            Self::GameEnded { .. } => "game_ended",
            Self::SessionClosed => "session_closed",
        }
    }

    /// Serializes this event to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// A sink for [`GameEvent`]s.
///
/// # Example
///
/// ```
/// use spark_engine::{GameEvent, GameEventListener, SessionId};
///
/// struct ChatAnnouncer;
///
/// impl GameEventListener for ChatAnnouncer {
///     fn on_event(&self, session: SessionId, event: &GameEvent) {
///         if let GameEvent::GameEnded { result, .. } = event {
///             let _line = format!("{}: {} win!", session, result);
///         }
///     }
/// }
/// ```
pub trait GameEventListener: Send + Sync {
    /// Called once per event, synchronously, on the session's timeline.
    fn on_event(&self, session: SessionId, event: &GameEvent);
}

/// An ordered list of listeners.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    listeners: Vec<Arc<dyn GameEventListener>>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener. Listeners are called in the order they were added.
    pub fn add_listener(&mut self, listener: Arc<dyn GameEventListener>) {
        self.listeners.push(listener);
    }

    /// Routes listener panics to `observer` instead of the default tracing output.
    pub fn set_violation_observer(&mut self, observer: Option<Arc<dyn ViolationObserver>>) {
        self.violation_observer = observer;
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` to every listener, containing panics per listener.
    pub fn dispatch(&self, session: SessionId, event: &GameEvent) {
        tracing::trace!(%session, event = event.name(), "dispatching event");
        for (index, listener) in self.listeners.iter().enumerate() {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_event(session, event)));
            if delivered.is_err() {
                let violation = RuleViolation::new(
                    ViolationSeverity::Error,
                    ViolationKind::Listener,
                    format!("listener #{} panicked while handling {}", index, event.name()),
                    concat!(file!(), ":", line!()),
                )
                .with_session(session);
                report_to_observer(self.violation_observer.as_ref(), &violation);
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("num_listeners", &self.listeners.len())
            .field("has_violation_observer", &self.violation_observer.is_some())
            .finish()
    }
}

/// Built-in listener that records every event, for tests and replays.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: Mutex<Vec<(SessionId, GameEvent)>>,
}

impl CollectingListener {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<(SessionId, GameEvent)> {
        self.events.lock().clone()
    }

    /// Recorded events of one session, in delivery order.
    #[must_use]
    pub fn events_for(&self, session: SessionId) -> Vec<GameEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Number of recorded events matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&GameEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|(_, e)| predicate(e)).count()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl GameEventListener for CollectingListener {
    fn on_event(&self, session: SessionId, event: &GameEvent) {
        self.events.lock().push((session, event.clone()));
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
    use crate::telemetry::CollectingObserver;

    struct Panicky;

    impl GameEventListener for Panicky {
        fn on_event(&self, _session: SessionId, _event: &GameEvent) {
            panic!("listener failure");
        }
    }

    struct OrderProbe {
        id: u8,
        log: Arc<Mutex<Vec<u8>>>,
    }

    impl GameEventListener for OrderProbe {
        fn on_event(&self, _session: SessionId, _event: &GameEvent) {
            self.log.lock().push(self.id);
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for id in [3, 1, 2] {
            dispatcher.add_listener(Arc::new(OrderProbe {
                id,
                log: log.clone(),
            }));
        }
        dispatcher.dispatch(SessionId::new(1), &GameEvent::SessionClosed);
        assert_eq!(*log.lock(), vec![3, 1, 2]);
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let observer = Arc::new(CollectingObserver::new());
        let collector = Arc::new(CollectingListener::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.set_violation_observer(Some(observer.clone()));
        dispatcher.add_listener(Arc::new(Panicky));
        dispatcher.add_listener(collector.clone());

        dispatcher.dispatch(SessionId::new(7), &GameEvent::RoundStarted { round: 2 });

        assert_eq!(
            collector.events(),
            vec![(SessionId::new(7), GameEvent::RoundStarted { round: 2 })]
        );
        assert!(observer.has_violation(ViolationKind::Listener));
        assert_eq!(observer.violations()[0].session, Some(SessionId::new(7)));
    }

    #[test]
    fn collecting_listener_filters_by_session() {
        let collector = CollectingListener::new();
        collector.on_event(SessionId::new(1), &GameEvent::RoundStarted { round: 1 });
        collector.on_event(SessionId::new(2), &GameEvent::SessionClosed);
        collector.on_event(SessionId::new(1), &GameEvent::RoundStarted { round: 2 });

        assert_eq!(collector.events_for(SessionId::new(1)).len(), 2);
        assert_eq!(
            collector.count(|e| matches!(e, GameEvent::SessionClosed)),
            1
        );
        collector.clear();
        assert!(collector.events().is_empty());
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = GameEvent::Eliminated {
            actor: ActorId::new(4),
            role: Role::Medic,
            cause: EliminationCause::Vote,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"eliminated""#));
        assert!(json.contains(r#""role":"medic""#));
        assert!(json.contains(r#""cause":"vote""#));
        assert_eq!(event.name(), "eliminated");
    }
}
