//! Session registry.
//!
//! The [`SessionRegistry`] maps [`SessionId`]s to owned [`Session`]s. There is no global game
//! manager: hosts keep a registry wherever they like (typically behind an
//! `Arc<parking_lot::Mutex<_>>` when several threads feed it) and address every operation by id.
//!
//! Sessions whose game ended, or whose last participant left, are dropped at the end of the call
//! that ended them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::abilities::WindowToken;
use crate::error::SparkError;
use crate::events::{EventDispatcher, GameEventListener};
use crate::host::{ActorDirectory, AllConnected, Clock, ConfigProvider, SystemClock};
use crate::session::{GameSetup, Session, SessionSnapshot};
use crate::telemetry::ViolationObserver;
use crate::{AbilityKind, ActorId, Phase, SessionId, Timestamp};

/// Builds a [`SessionRegistry`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use spark_engine::telemetry::CollectingObserver;
/// use spark_engine::{CollectingListener, ManualClock, SessionRegistry};
///
/// let clock = Arc::new(ManualClock::new());
/// let events = Arc::new(CollectingListener::new());
/// let registry = SessionRegistry::builder()
///     .with_clock(clock.clone())
///     .with_listener(events.clone())
///     .with_violation_observer(Arc::new(CollectingObserver::new()))
///     .build();
/// assert!(registry.is_empty());
/// ```
#[must_use = "RegistryBuilder does nothing until build() is called"]
pub struct RegistryBuilder {
    clock: Arc<dyn Clock>,
    directory: Arc<dyn ActorDirectory>,
    listeners: Vec<Arc<dyn GameEventListener>>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("num_listeners", &self.listeners.len())
            .field("has_violation_observer", &self.violation_observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// A builder with a [`SystemClock`], [`AllConnected`], no listeners and violations going to
    /// tracing.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            directory: Arc::new(AllConnected),
            listeners: Vec::new(),
            violation_observer: None,
        }
    }

    /// Uses `clock` for every operation that does not take an explicit timestamp.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `directory` to decide who is connected.
    pub fn with_actor_directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Appends a listener. Listeners receive events in the order they were added.
    pub fn with_listener(mut self, listener: Arc<dyn GameEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Routes violations (corrupted state, listener panics, ...) to `observer`.
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Builds the registry.
    pub fn build(self) -> SessionRegistry {
        let mut dispatcher = EventDispatcher::new();
        for listener in self.listeners {
            dispatcher.add_listener(listener);
        }
        dispatcher.set_violation_observer(self.violation_observer.clone());
        SessionRegistry {
            sessions: BTreeMap::new(),
            next_id: 1,
            clock: self.clock,
            directory: self.directory,
            dispatcher: Arc::new(dispatcher),
            violation_observer: self.violation_observer,
        }
    }
}

/// Owns every running session.
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    next_id: u64,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn ActorDirectory>,
    dispatcher: Arc<EventDispatcher>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.keys())
            .field("next_id", &self.next_id)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// A registry with default collaborators. See [`RegistryBuilder::new`].
    #[must_use]
    pub fn new() -> Self {
        RegistryBuilder::new().build()
    }

    /// Starts configuring a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The registry's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Starts a new session, reading its configuration from `config` once.
    ///
    /// # Errors
    ///
    /// Everything [`Session::start_game`] rejects. No session is created and no id is consumed.
    pub fn start_game<C: ConfigProvider + ?Sized>(
        &mut self,
        setup: GameSetup,
        config: &C,
    ) -> Result<SessionId, SparkError> {
        let id = SessionId::new(self.next_id);
        let mut session = Session::with_collaborators(
            id,
            self.dispatcher.clone(),
            self.directory.clone(),
            self.violation_observer.clone(),
        );
        session.start_game(setup, config.game_config(), self.clock.now())?;
        self.next_id = self.next_id.saturating_add(1);
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Ends a session without a winner and drops it.
    ///
    /// # Errors
    ///
    /// [`SparkError::UnknownSession`] if `id` is not registered.
    pub fn end_game(&mut self, id: SessionId) -> Result<(), SparkError> {
        let mut session = self
            .sessions
            .remove(&id)
            .ok_or(SparkError::UnknownSession { session: id })?;
        session.end(self.clock.now());
        Ok(())
    }

    /// Advances one session to `now`.
    ///
    /// Windows, infections and countdowns are stamped with [`SessionRegistry::clock`], so `now`
    /// must be read from that same clock. [`SessionRegistry::tick_to_clock`] does this for every
    /// session.
    ///
    /// # Errors
    ///
    /// [`SparkError::UnknownSession`] if `id` is not registered.
    pub fn tick(&mut self, id: SessionId, now: Timestamp) -> Result<(), SparkError> {
        self.with_session(id, |session, _| {
            session.tick(now);
            Ok(())
        })
    }

    /// Advances every session to the registry clock's current time.
    pub fn tick_to_clock(&mut self) {
        let now = self.clock.now();
        self.tick_all(now);
    }

    /// Advances every session to `now`, which must come from [`SessionRegistry::clock`].
    pub fn tick_all(&mut self, now: Timestamp) {
        for session in self.sessions.values_mut() {
            session.tick(now);
        }
        self.sessions.retain(|id, session| {
            let keep = session.is_active();
            if !keep {
                debug!(session = %id, "dropping finished session");
            }
            keep
        });
    }

    /// Registers a vote. Returns whether it was accepted; rejections are logged at debug level.
    pub fn cast_vote(&mut self, id: SessionId, voter: ActorId, target: ActorId) -> bool {
        let outcome = self.with_session(id, |session, _| {
            session.cast_vote(Some(voter), Some(target))
        });
        match outcome {
            Ok(_) => true,
            Err(err) => {
                debug!(session = %id, %voter, %target, error = %err, "vote rejected");
                false
            },
        }
    }

    /// Arms an ability window.
    ///
    /// # Errors
    ///
    /// [`SparkError::UnknownSession`] or whatever [`Session::open_ability_window`] rejects.
    pub fn open_ability_window(
        &mut self,
        id: SessionId,
        actor: ActorId,
        kind: AbilityKind,
    ) -> Result<WindowToken, SparkError> {
        self.with_session(id, |session, now| session.open_ability_window(actor, kind, now))
    }

    /// Uses an ability. Returns whether it was applied; rejections are logged at debug level.
    pub fn use_ability(
        &mut self,
        id: SessionId,
        actor: ActorId,
        kind: AbilityKind,
        target: Option<ActorId>,
    ) -> bool {
        let outcome = self.with_session(id, |session, now| {
            session.use_ability(Some(actor), kind, target, now)
        });
        match outcome {
            Ok(()) => true,
            Err(err) => {
                debug!(session = %id, %actor, %kind, ?target, error = %err, "ability rejected");
                false
            },
        }
    }

    /// Ends the current timed phase early.
    ///
    /// # Errors
    ///
    /// [`SparkError::UnknownSession`] or whatever [`Session::skip_phase`] rejects.
    pub fn skip_phase(&mut self, id: SessionId) -> Result<(), SparkError> {
        self.with_session(id, |session, now| session.skip_phase(now))
    }

    /// Moves a session to the successor of its current phase.
    ///
    /// # Errors
    ///
    /// [`SparkError::UnknownSession`] or whatever [`Session::force_phase`] rejects.
    pub fn force_phase(&mut self, id: SessionId, phase: Phase) -> Result<(), SparkError> {
        self.with_session(id, |session, now| session.force_phase(phase, now))
    }

    /// Removes a participant who left.
    ///
    /// # Errors
    ///
    /// [`SparkError::UnknownSession`] or whatever [`Session::actor_left`] rejects.
    pub fn actor_left(&mut self, id: SessionId, actor: ActorId) -> Result<(), SparkError> {
        self.with_session(id, |session, now| session.actor_left(actor, now))
    }

    /// Current phase of a session.
    #[must_use]
    pub fn current_phase(&self, id: SessionId) -> Option<Phase> {
        self.sessions.get(&id).map(Session::phase)
    }

    /// Current round of a session.
    #[must_use]
    pub fn current_round(&self, id: SessionId) -> Option<u32> {
        self.sessions.get(&id).map(Session::round)
    }

    /// A registered session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Public view of a registered session.
    #[must_use]
    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(&id).map(Session::snapshot)
    }

    /// Ids of every registered session, ascending.
    pub fn session_ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Runs `op` on a session with the current clock reading, then drops the session if the
    /// call ended its game.
    fn with_session<R>(
        &mut self,
        id: SessionId,
        op: impl FnOnce(&mut Session, Timestamp) -> Result<R, SparkError>,
    ) -> Result<R, SparkError> {
        let now = self.clock.now();
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SparkError::UnknownSession { session: id })?;
        let outcome = op(session, now);
        if !session.is_active() {
            debug!(session = %id, "dropping finished session");
            self.sessions.remove(&id);
        }
        outcome
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
    use crate::{GameConfig, ManualClock, SpawnPoint};

    fn setup(name: &str, n: u64) -> GameSetup {
        GameSetup::new(name, (1..=n).map(ActorId::new))
            .with_spawns(vec![SpawnPoint::new("arena", 0.0, 0.0, 0.0)])
            .with_seed(3)
    }

    #[test]
    fn ids_are_allocated_in_order_and_not_burned_by_failures() {
        let mut registry = SessionRegistry::new();
        let first = registry
            .start_game(setup("a", 4), &GameConfig::default())
            .unwrap();
        assert!(registry
            .start_game(GameSetup::new("bad", []), &GameConfig::default())
            .is_err());
        let second = registry
            .start_game(setup("b", 4), &GameConfig::default())
            .unwrap();
        assert_eq!(first, SessionId::new(1));
        assert_eq!(second, SessionId::new(2));
        assert_eq!(registry.session_ids().collect::<Vec<_>>(), vec![first, second]);
    }

    #[test]
    fn unknown_sessions_are_reported() {
        let mut registry = SessionRegistry::new();
        let ghost = SessionId::new(42);
        assert_eq!(
            registry.skip_phase(ghost),
            Err(SparkError::UnknownSession { session: ghost })
        );
        assert!(!registry.cast_vote(ghost, ActorId::new(1), ActorId::new(2)));
        assert_eq!(registry.current_phase(ghost), None);
        assert_eq!(registry.current_round(ghost), None);
    }

    #[test]
    fn end_game_drops_the_session() {
        let mut registry = SessionRegistry::new();
        let id = registry
            .start_game(setup("a", 4), &GameConfig::default())
            .unwrap();
        registry.end_game(id).unwrap();
        assert!(registry.session(id).is_none());
        assert_eq!(
            registry.end_game(id),
            Err(SparkError::UnknownSession { session: id })
        );
    }

    #[test]
    fn sessions_are_independent() {
        let clock = Arc::new(ManualClock::new());
        let mut registry = SessionRegistry::builder()
            .with_clock(clock.clone())
            .build();
        let a = registry
            .start_game(setup("a", 4), &GameConfig::default())
            .unwrap();
        let b = registry
            .start_game(setup("b", 4), &GameConfig::quick())
            .unwrap();

        registry.skip_phase(a).unwrap();
        assert_eq!(registry.current_phase(a), Some(Phase::Discussion));
        assert_eq!(registry.current_phase(b), Some(Phase::Swipe));

        clock.advance(web_time::Duration::from_secs(15));
        registry.tick_all(clock.now());
        assert_eq!(registry.current_phase(b), Some(Phase::Discussion));
        assert_eq!(registry.current_phase(a), Some(Phase::Discussion));
    }

    #[test]
    fn tick_to_clock_uses_the_clock_windows_were_stamped_with() {
        let clock = Arc::new(ManualClock::new());
        clock.advance(web_time::Duration::from_secs(1_000));
        let mut registry = SessionRegistry::builder()
            .with_clock(clock.clone())
            .build();
        let id = registry
            .start_game(setup("a", 4), &GameConfig::default())
            .unwrap();
        let spark = registry
            .session(id)
            .unwrap()
            .state()
            .roles()
            .iter()
            .find(|(_, role)| **role == crate::Role::Spark)
            .map(|(actor, _)| *actor)
            .unwrap();
        let token = registry
            .open_ability_window(id, spark, crate::AbilityKind::Swipe)
            .unwrap();
        assert_eq!(token.expires_at(), Timestamp::from_secs(1_010));

        clock.advance(web_time::Duration::from_secs(9));
        registry.tick_to_clock();
        assert_eq!(registry.session(id).unwrap().windows().len(), 1);

        clock.advance(web_time::Duration::from_secs(1));
        registry.tick_to_clock();
        assert!(registry.session(id).unwrap().windows().is_empty());
        assert_eq!(registry.current_phase(id), Some(Phase::Swipe));
    }
}
