//! One game session: the round lifecycle coordinator.
//!
//! A [`Session`] owns the [`GameState`], the phase machine, the ability windows and the vote tally
//! of a single game and is the only thing that mutates them. Every public operation validates
//! the whole request before writing anything, so a rejected call leaves the session exactly as it
//! was.
//!
//! Time only moves through [`Session::tick`]. Each tick:
//!
//! 1. closes ability windows that ran out
//! 2. fades expired delusions
//! 3. kills actors whose pending death is due, checking win conditions after each death
//! 4. advances the phase countdown by the whole seconds elapsed and, when it runs out, runs the
//!    phase's continuation

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use web_time::Duration;

use crate::abilities::{AbilityWindow, AbilityWindowManager, WindowToken};
use crate::error::{IneligibleReason, SparkError};
use crate::events::{EliminationCause, EventDispatcher, GameEvent, WindowCloseReason};
use crate::host::{ActorDirectory, AllConnected, SpawnPoint};
use crate::phase::{CountdownStep, PhaseEnd, PhaseStateMachine};
use crate::rng::{Pcg32, Rng};
use crate::roles::RoleAssigner;
use crate::state::GameState;
use crate::telemetry::{
    report_to_observer, RuleViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::voting::tally::VoteTally;
use crate::voting::threshold::DynamicVotingThreshold;
use crate::win::{WinConditionEvaluator, WinResult};
use crate::{
    debug_check_invariants, AbilityKind, ActorId, ActorList, GameConfig, Phase, Role, SessionId,
    Timestamp,
};

const ONE_SECOND: Duration = Duration::from_secs(1);

/// Everything needed to start a game.
///
/// # Example
///
/// ```
/// use spark_engine::{ActorId, GameSetup, SpawnPoint};
///
/// let setup = GameSetup::new("lobby-7", [ActorId::new(10), ActorId::new(11), ActorId::new(12)])
///     .with_spawns(vec![SpawnPoint::new("arena", 0.5, 65.0, 0.5)])
///     .with_seed(2024);
/// assert_eq!(setup.actors().len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GameSetup {
    name: String,
    actors: Vec<ActorId>,
    spawns: Vec<SpawnPoint>,
    seed: Option<u64>,
}

impl GameSetup {
    /// A setup for `actors` without spawn points or seed.
    #[must_use]
    pub fn new(name: impl Into<String>, actors: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            name: name.into(),
            actors: actors.into_iter().collect(),
            spawns: Vec::new(),
            seed: None,
        }
    }

    /// Sets the spawn points handed back in [`GameEvent::GameStarted`].
    #[must_use]
    pub fn with_spawns(mut self, spawns: impl IntoIterator<Item = SpawnPoint>) -> Self {
        self.spawns = spawns.into_iter().collect();
        self
    }

    /// Makes the role hand-out reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The actors, in the order given.
    #[must_use]
    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    /// The spawn points.
    #[must_use]
    pub fn spawns(&self) -> &[SpawnPoint] {
        &self.spawns
    }

    /// The role seed, if fixed.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

/// Public, role-free view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: SessionId,
    /// Session name.
    pub name: String,
    /// Current phase.
    pub phase: Phase,
    /// Previous phase.
    pub previous_phase: Option<Phase>,
    /// Current round.
    pub round: u32,
    /// Seconds left on the phase countdown.
    pub remaining_seconds: Option<u32>,
    /// Alive actors in ascending id order.
    pub alive: Vec<ActorId>,
    /// Participating actors in ascending id order.
    pub participating: Vec<ActorId>,
    /// Votes per target in the current voting phase.
    pub vote_counts: Vec<(ActorId, u32)>,
    /// Votes needed to eliminate right now.
    pub required_votes: u32,
    /// Consecutive voting phases without elimination.
    pub consecutive_no_elimination: u32,
    /// Outcome, once the game is won.
    pub result: Option<WinResult>,
}

impl SessionSnapshot {
    /// Serializes this snapshot to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Serializes this snapshot to a pretty-printed JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json_pretty(&self) -> Option<String> {
        serde_json::to_string_pretty(self).ok()
    }
}

/// A single game.
pub struct Session {
    id: SessionId,
    config: GameConfig,
    state: GameState,
    phase: PhaseStateMachine,
    windows: AbilityWindowManager,
    tally: VoteTally,
    threshold: DynamicVotingThreshold,
    consecutive_no_elimination: u32,
    countdown_anchor: Timestamp,
    spawns: Vec<SpawnPoint>,
    seed: Option<u64>,
    result: Option<WinResult>,
    dispatcher: Arc<EventDispatcher>,
    directory: Arc<dyn ActorDirectory>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase.current())
            .field("round", &self.state.round())
            .field("alive", &self.state.alive_count())
            .field("consecutive_no_elimination", &self.consecutive_no_elimination)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A waiting session with no listeners, every actor connected and violations going to
    /// tracing.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self::with_collaborators(id, Arc::new(EventDispatcher::new()), Arc::new(AllConnected), None)
    }

    /// A waiting session wired to the given host collaborators.
    #[must_use]
    pub fn with_collaborators(
        id: SessionId,
        dispatcher: Arc<EventDispatcher>,
        directory: Arc<dyn ActorDirectory>,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        Self {
            id,
            config: GameConfig::default(),
            state: GameState::default(),
            phase: PhaseStateMachine::new(),
            windows: AbilityWindowManager::new(),
            tally: VoteTally::new(),
            threshold: DynamicVotingThreshold::default(),
            consecutive_no_elimination: 0,
            countdown_anchor: Timestamp::ZERO,
            spawns: Vec::new(),
            seed: None,
            result: None,
            dispatcher,
            directory,
            violation_observer,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    /// Current round. Zero before the first game.
    #[must_use]
    pub fn round(&self) -> u32 {
        self.state.round()
    }

    /// Whether a game is running (started and not ended).
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self.phase.current(), Phase::Waiting | Phase::Ended)
    }

    /// The game state.
    #[must_use]
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// The phase machine.
    #[must_use]
    pub fn phase_machine(&self) -> &PhaseStateMachine {
        &self.phase
    }

    /// The ability windows.
    #[must_use]
    pub fn windows(&self) -> &AbilityWindowManager {
        &self.windows
    }

    /// The vote tally of the current voting phase.
    #[must_use]
    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    /// The configuration the current game started with.
    #[must_use]
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Spawn points of the current game.
    #[must_use]
    pub fn spawns(&self) -> &[SpawnPoint] {
        &self.spawns
    }

    /// Seed used for the current role hand-out.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Consecutive voting phases that ended without an elimination.
    #[must_use]
    pub fn consecutive_no_elimination(&self) -> u32 {
        self.consecutive_no_elimination
    }

    /// Votes needed to eliminate someone with the current alive count and stalemate streak.
    #[must_use]
    pub fn required_votes(&self) -> u32 {
        self.threshold
            .required_votes(self.alive_u32(), self.consecutive_no_elimination)
    }

    /// The winner, once a win condition fired.
    #[must_use]
    pub fn result(&self) -> Option<WinResult> {
        self.result
    }

    /// Public, role-free view of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            name: self.state.session_name().to_owned(),
            phase: self.phase.current(),
            previous_phase: self.phase.previous(),
            round: self.state.round(),
            remaining_seconds: self.phase.remaining(),
            alive: self.state.alive().collect(),
            participating: self.state.participating().collect(),
            vote_counts: self
                .tally
                .vote_counts()
                .iter()
                .map(|(target, votes)| (*target, *votes))
                .collect(),
            required_votes: self.required_votes(),
            consecutive_no_elimination: self.consecutive_no_elimination,
            result: self.result,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Smallest lobby [`Session::start_game`] accepts.
    pub const MIN_PLAYERS: usize = 3;

    /// Deals roles and enters the first swipe phase.
    ///
    /// Any game already running in this session is discarded. Lobbies smaller than
    /// [`Session::MIN_PLAYERS`] are rejected: with one or two players a win condition already
    /// holds when roles are dealt, and win conditions are otherwise only evaluated after deaths,
    /// eliminations and departures.
    ///
    /// # Errors
    ///
    /// - [`SparkError::InvalidConfig`] if `config` fails validation or an actor is listed twice
    /// - [`SparkError::MissingPrerequisite`] if there are no actors, fewer than
    ///   [`Session::MIN_PLAYERS`] of them, or no spawn points
    pub fn start_game(
        &mut self,
        setup: GameSetup,
        config: GameConfig,
        now: Timestamp,
    ) -> Result<(), SparkError> {
        config.validate()?;
        if setup.actors.is_empty() {
            return Err(SparkError::MissingPrerequisite { what: "players" });
        }
        if setup.spawns.is_empty() {
            return Err(SparkError::MissingPrerequisite {
                what: "spawn locations",
            });
        }
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = setup.actors.iter().find(|actor| !seen.insert(**actor)) {
            return Err(SparkError::InvalidConfig {
                field: "actors",
                reason: format!("{} is listed more than once", duplicate),
            });
        }
        if setup.actors.len() < Self::MIN_PLAYERS {
            return Err(SparkError::MissingPrerequisite {
                what: "at least three players",
            });
        }

        let seed = setup
            .seed
            .unwrap_or_else(|| Pcg32::from_entropy().next_u64());
        let roles = RoleAssigner::assign_seeded(&setup.actors, seed);

        self.phase.reset();
        self.windows.invalidate_round(1);
        self.tally.clear();
        self.state.populate(setup.name, roles);
        self.config = config;
        self.threshold = DynamicVotingThreshold::new(config.threshold);
        self.consecutive_no_elimination = 0;
        self.spawns = setup.spawns;
        self.seed = Some(seed);
        self.result = None;

        info!(
            session = %self.id,
            name = self.state.session_name(),
            players = self.state.participating_count(),
            seed,
            "game started"
        );
        self.emit(GameEvent::GameStarted {
            session_name: self.state.session_name().to_owned(),
            roles: self.state.roles().clone(),
            spawns: self.spawns.clone(),
        });
        let dealt: Vec<(ActorId, Role)> = self
            .state
            .roles()
            .iter()
            .map(|(actor, role)| (*actor, *role))
            .collect();
        for (actor, role) in dealt {
            self.emit(GameEvent::RoleAssigned { actor, role });
        }
        self.emit(GameEvent::RoundStarted { round: 1 });
        self.enter_phase(Phase::Swipe, now);
        debug_check_invariants!(self.state, "start_game");
        Ok(())
    }

    /// Begins the next round: clears per-round flags, ability windows and votes, then enters the
    /// swipe phase. Roles, the alive set and pending deaths carry over.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::CorruptedState`] if the game state fails validation. The violation is
    ///   reported, [`GameEvent::StateCorrupted`] is emitted and the phase is left as it was.
    pub fn start_new_round(&mut self, now: Timestamp) -> Result<(), SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        if let Err(err) = self.state.validate_state() {
            let details = match &err {
                SparkError::CorruptedState { details } => details.clone(),
                other => other.to_string(),
            };
            let violation = RuleViolation::new(
                ViolationSeverity::Critical,
                ViolationKind::GameState,
                format!("round {} aborted: {}", self.state.round(), details),
                concat!(file!(), ":", line!()),
            )
            .with_session(self.id)
            .with_context("phase", self.phase.current().as_str());
            report_to_observer(self.violation_observer.as_ref(), &violation);
            self.emit(GameEvent::StateCorrupted { details });
            return Err(err);
        }

        let round = self.state.advance_round();
        self.state.clear_round_flags();
        let discarded = self.windows.invalidate_round(round);
        self.announce_closed(discarded, WindowCloseReason::Discarded);
        self.tally.clear();
        debug!(session = %self.id, round, "new round");
        self.emit(GameEvent::RoundStarted { round });
        self.enter_phase(Phase::Swipe, now);
        Ok(())
    }

    /// Advances the session to `now`. Ticks of a session that is not running are ignored.
    pub fn tick(&mut self, now: Timestamp) {
        if !self.is_active() {
            return;
        }

        let expired = self.windows.expire(now);
        self.announce_closed(expired, WindowCloseReason::Expired);

        for target in self.state.fade_delusions(now) {
            trace!(session = %self.id, %target, "delusion faded");
            self.emit(GameEvent::DelusionFaded { target });
        }

        for actor in self.state.due_deaths(now) {
            self.eliminate(actor, EliminationCause::Infection);
            if self.check_win(now) {
                return;
            }
        }

        if self.phase.remaining().is_none() {
            self.countdown_anchor = now;
            return;
        }
        while now.saturating_since(self.countdown_anchor) >= ONE_SECOND {
            self.countdown_anchor = self.countdown_anchor.saturating_add(ONE_SECOND);
            match self.phase.tick() {
                Some(CountdownStep::Running { phase, remaining }) => {
                    self.emit(GameEvent::CountdownTick { phase, remaining });
                },
                Some(CountdownStep::Finished(end)) => {
                    self.emit(GameEvent::CountdownFinished {
                        phase: end.phase(),
                        skipped: false,
                    });
                    if let Err(err) = self.run_phase_end(end, now) {
                        debug!(session = %self.id, error = %err, "phase continuation failed");
                    }
                    break;
                },
                None => break,
            }
        }
        debug_check_invariants!(self.state, "tick");
    }

    /// Ends the current timed phase early, running the same continuation as natural expiry.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::InvalidTransition`] if no countdown is running
    /// - whatever the continuation returns (see [`Session::start_new_round`])
    pub fn skip_phase(&mut self, now: Timestamp) -> Result<(), SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        let current = self.phase.current();
        let Some(end) = self.phase.skip() else {
            return Err(SparkError::InvalidTransition {
                from: current,
                to: current.successor().unwrap_or(current),
            });
        };
        debug!(session = %self.id, phase = %current, "phase skipped");
        self.emit(GameEvent::CountdownFinished {
            phase: end.phase(),
            skipped: true,
        });
        self.run_phase_end(end, now)
    }

    /// Moves to `target`, which must be the successor of the current phase.
    ///
    /// Leaving a timed phase runs its continuation; leaving [`Phase::Resolution`] starts the next
    /// round.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::InvalidTransition`] if `target` is not the successor
    pub fn force_phase(&mut self, target: Phase, now: Timestamp) -> Result<(), SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        let current = self.phase.current();
        if current.successor() != Some(target) {
            return Err(SparkError::InvalidTransition {
                from: current,
                to: target,
            });
        }
        debug!(session = %self.id, from = %current, to = %target, "forcing phase");
        match self.phase.skip().or_else(|| PhaseEnd::for_phase(current)) {
            Some(end) => {
                self.emit(GameEvent::CountdownFinished {
                    phase: end.phase(),
                    skipped: true,
                });
                self.run_phase_end(end, now)
            },
            None => self.start_new_round(now),
        }
    }

    /// Ends the session without a winner. Idempotent.
    pub fn end(&mut self, now: Timestamp) {
        if self.phase.is_phase(Phase::Ended) {
            return;
        }
        self.phase.cancel_any();
        let discarded = self.windows.invalidate_round(self.state.round());
        self.announce_closed(discarded, WindowCloseReason::Discarded);
        self.tally.clear();
        self.enter_phase(Phase::Ended, now);
        info!(session = %self.id, round = self.state.round(), "session closed");
        self.emit(GameEvent::SessionClosed);
    }

    // ------------------------------------------------------------------
    // Player actions
    // ------------------------------------------------------------------

    /// Registers a vote during the voting phase and returns the target's new vote count.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::IneligibleAction`] outside the voting phase, for disconnected voters and
    ///   for every rejection of [`VoteTally::register_vote`]
    pub fn cast_vote(
        &mut self,
        voter: Option<ActorId>,
        target: Option<ActorId>,
    ) -> Result<u32, SparkError> {
        self.require_phase(&[Phase::Voting])?;
        if let Some(voter) = voter {
            self.require_connected(voter)?;
        }
        let votes_for_target = self.tally.register_vote(&self.state, voter, target)?;
        if let (Some(voter), Some(target)) = (voter, target) {
            trace!(session = %self.id, %voter, %target, votes_for_target, "vote cast");
            self.emit(GameEvent::VoteCast {
                voter,
                target,
                votes_for_target,
            });
        }
        Ok(votes_for_target)
    }

    /// Arms a `Swipe`, `Cure` or `Delusion` window for `actor`.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::IneligibleAction`] for disconnected actors and every rejection of
    ///   [`AbilityWindowManager::start_window`]
    pub fn open_ability_window(
        &mut self,
        actor: ActorId,
        kind: AbilityKind,
        now: Timestamp,
    ) -> Result<WindowToken, SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        self.require_connected(actor)?;
        let token = self.windows.start_window(
            &self.state,
            self.phase.current(),
            actor,
            kind,
            self.config.abilities.window,
            now,
        )?;
        self.emit(GameEvent::AbilityWindowOpened {
            actor,
            kind,
            expires_at: token.expires_at(),
        });
        Ok(token)
    }

    /// Uses an ability.
    ///
    /// `Swipe`, `Cure` and `Delusion` need an open window and a target; the sight abilities
    /// resolve instantly during swipe or discussion and ignore `target`.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::IneligibleAction`] when the actor or target is missing, dead or
    ///   disconnected, when the role does not grant `kind`, when no window is open, when the
    ///   target is the actor or already infected (swipe, delusion), when a swipe target still
    ///   carries a pending death from an earlier round, when the target has no
    ///   pending death (cure), or when a sight was already used this round
    pub fn use_ability(
        &mut self,
        actor: Option<ActorId>,
        kind: AbilityKind,
        target: Option<ActorId>,
        now: Timestamp,
    ) -> Result<(), SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        let actor = actor.ok_or(IneligibleReason::MissingActor)?;
        self.require_connected(actor)?;
        if !self.state.is_alive(actor) {
            return Err(IneligibleReason::ActorNotAlive(actor).into());
        }
        match self.state.role_of(actor) {
            Some(role) if role.permits(kind) => {},
            Some(_) | None => return Err(IneligibleReason::WrongRole { actor, kind }.into()),
        }

        match kind {
            AbilityKind::Swipe => {
                let token = self.windows.require_active(actor, kind, now)?;
                let target = target.ok_or(IneligibleReason::MissingTarget)?;
                self.require_fresh_target(actor, target)?;
                if self.state.pending_death(target).is_some() {
                    return Err(IneligibleReason::AlreadyInfected(target).into());
                }

                let dies_at = now.saturating_add(self.config.abilities.infection_delay);
                self.state.mark_used(actor, kind);
                self.state.mark_infected(target);
                self.state.schedule_death(target, dies_at);
                self.consume_window(actor, kind, token);
                debug!(session = %self.id, %actor, %target, %dies_at, "infection");
                self.emit(GameEvent::Infected {
                    actor,
                    target,
                    dies_at,
                });
            },
            AbilityKind::Cure => {
                let token = self.windows.require_active(actor, kind, now)?;
                let target = target.ok_or(IneligibleReason::MissingTarget)?;
                if self.state.pending_death(target).is_none() {
                    return Err(IneligibleReason::NoPendingDeath(target).into());
                }

                self.state.cancel_death(target);
                self.state.clear_infected(target);
                self.state.mark_used(actor, kind);
                self.consume_window(actor, kind, token);
                debug!(session = %self.id, %actor, %target, "cure");
                self.emit(GameEvent::Cured { actor, target });
            },
            AbilityKind::Delusion => {
                let token = self.windows.require_active(actor, kind, now)?;
                let target = target.ok_or(IneligibleReason::MissingTarget)?;
                self.require_fresh_target(actor, target)?;

                let fades_at = self
                    .config
                    .abilities
                    .delusion_decay
                    .map(|decay| now.saturating_add(decay));
                self.state.mark_used(actor, kind);
                self.state.plant_delusion(target, fades_at);
                self.consume_window(actor, kind, token);
                debug!(session = %self.id, %actor, %target, "delusion");
                self.emit(GameEvent::DelusionPlanted {
                    actor,
                    target,
                    fades_at,
                });
            },
            AbilityKind::HealingSight | AbilityKind::HunterVision => {
                self.require_phase(&[Phase::Swipe, Phase::Discussion])?;
                if self.state.has_used(actor, kind) {
                    return Err(IneligibleReason::AlreadyUsed { actor, kind }.into());
                }
                let revealed: ActorList = if kind == AbilityKind::HealingSight {
                    self.state.infected()
                } else {
                    self.state
                        .alive()
                        .filter(|other| self.state.role_of(*other) != Some(Role::Spark))
                        .collect()
                };
                self.state.mark_used(actor, kind);
                self.emit(GameEvent::SightRevealed {
                    actor,
                    kind,
                    revealed,
                });
            },
        }
        debug_check_invariants!(self.state, "use_ability");
        Ok(())
    }

    /// Removes a participant who left the game and re-checks win conditions.
    ///
    /// # Errors
    ///
    /// - [`SparkError::GameNotActive`] if no game is running
    /// - [`SparkError::IneligibleAction`] if `actor` is not alive in this game
    pub fn actor_left(&mut self, actor: ActorId, now: Timestamp) -> Result<(), SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        if !self.state.is_alive(actor) {
            return Err(IneligibleReason::ActorNotAlive(actor).into());
        }
        self.state.eliminate(actor);
        self.tally.remove_actor(actor);
        let owned = self.windows.remove_actor(actor);
        self.announce_closed(owned, WindowCloseReason::Discarded);
        info!(session = %self.id, %actor, "actor left");
        self.emit(GameEvent::ActorLeft { actor });
        self.check_win(now);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn run_phase_end(&mut self, end: PhaseEnd, now: Timestamp) -> Result<(), SparkError> {
        if !self.phase.is_phase(end.phase()) {
            report_to_observer(
                self.violation_observer.as_ref(),
                &RuleViolation::new(
                    ViolationSeverity::Error,
                    ViolationKind::PhaseTransition,
                    format!(
                        "continuation for {} ran during {}",
                        end.phase(),
                        self.phase.current()
                    ),
                    concat!(file!(), ":", line!()),
                )
                .with_session(self.id),
            );
            return Err(SparkError::InvalidTransition {
                from: self.phase.current(),
                to: end.phase().successor().unwrap_or(Phase::Ended),
            });
        }
        match end {
            PhaseEnd::Swipe => {
                let closed = self.windows.invalidate_round(self.state.round());
                self.announce_closed(closed, WindowCloseReason::Discarded);
                self.enter_phase(Phase::Discussion, now);
                Ok(())
            },
            PhaseEnd::Discussion => {
                self.tally.clear();
                self.enter_phase(Phase::Voting, now);
                Ok(())
            },
            PhaseEnd::Voting => {
                self.enter_phase(Phase::Resolution, now);
                self.resolve_votes(now);
                if self.phase.is_phase(Phase::Ended) {
                    return Ok(());
                }
                self.start_new_round(now)
            },
        }
    }

    fn resolve_votes(&mut self, now: Timestamp) {
        let alive = self.alive_u32();
        let required = self
            .threshold
            .required_votes(alive, self.consecutive_no_elimination);
        let target = self.tally.most_voted();
        let votes = target.map_or(0, |t| self.tally.votes_for(t));
        let eliminated = target.is_some()
            && self
                .threshold
                .meets_threshold(votes, alive, self.consecutive_no_elimination);

        if eliminated {
            self.consecutive_no_elimination = 0;
        } else {
            self.consecutive_no_elimination = self.consecutive_no_elimination.saturating_add(1);
        }
        debug!(
            session = %self.id,
            ?target,
            votes,
            required,
            eliminated,
            stalemates = self.consecutive_no_elimination,
            "votes resolved"
        );
        self.emit(GameEvent::VoteResolved {
            target,
            votes,
            required,
            eliminated,
            consecutive_no_elimination: self.consecutive_no_elimination,
        });
        self.tally.clear();

        if let (true, Some(target)) = (eliminated, target) {
            self.eliminate(target, EliminationCause::Vote);
            self.check_win(now);
        }
    }

    fn eliminate(&mut self, actor: ActorId, cause: EliminationCause) {
        let Some(role) = self.state.role_of(actor) else {
            return;
        };
        if !self.state.eliminate(actor) {
            return;
        }
        self.tally.remove_actor(actor);
        let owned = self.windows.remove_actor(actor);
        self.announce_closed(owned, WindowCloseReason::Discarded);
        info!(session = %self.id, %actor, %role, ?cause, "eliminated");
        self.emit(GameEvent::Eliminated { actor, role, cause });
    }

    /// Ends the game if a win condition holds. Returns whether it did.
    fn check_win(&mut self, now: Timestamp) -> bool {
        let Some(result) = WinConditionEvaluator::evaluate(&self.state) else {
            return false;
        };
        self.finish(result, now);
        true
    }

    fn finish(&mut self, result: WinResult, now: Timestamp) {
        self.phase.cancel_any();
        let discarded = self.windows.invalidate_round(self.state.round());
        self.announce_closed(discarded, WindowCloseReason::Discarded);
        self.tally.clear();
        self.result = Some(result);
        self.enter_phase(Phase::Ended, now);
        info!(session = %self.id, %result, round = self.state.round(), "game ended");
        self.emit(GameEvent::GameEnded {
            result,
            round: self.state.round(),
        });
    }

    fn enter_phase(&mut self, phase: Phase, now: Timestamp) {
        if let Some(transition) = self.phase.set_phase(phase, now) {
            self.emit(GameEvent::PhaseChanged {
                from: Some(transition.from),
                to: transition.to,
                round: self.state.round(),
                at: transition.at,
            });
        }
        if let (Some(seconds), Some(end)) = (
            self.config.phases.seconds_for(phase),
            PhaseEnd::for_phase(phase),
        ) {
            self.phase.start_countdown(seconds, end);
            self.countdown_anchor = now;
        }
    }

    fn consume_window(&mut self, actor: ActorId, kind: AbilityKind, token: WindowToken) {
        if let Some(window) = self.windows.close_window(actor, kind, Some(token)) {
            self.announce_closed(vec![window], WindowCloseReason::Used);
        }
    }

    fn announce_closed(&self, windows: Vec<AbilityWindow>, reason: WindowCloseReason) {
        for window in windows {
            self.emit(GameEvent::AbilityWindowClosed {
                actor: window.actor,
                kind: window.kind,
                reason,
            });
        }
    }

    fn require_phase(&self, allowed: &[Phase]) -> Result<(), SparkError> {
        if !self.is_active() {
            return Err(SparkError::GameNotActive);
        }
        let current = self.phase.current();
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(IneligibleReason::WrongPhase { current }.into())
        }
    }

    fn require_connected(&self, actor: ActorId) -> Result<(), SparkError> {
        if self.directory.is_connected(actor) {
            Ok(())
        } else {
            Err(IneligibleReason::Disconnected(actor).into())
        }
    }

    fn require_fresh_target(&self, actor: ActorId, target: ActorId) -> Result<(), SparkError> {
        if target == actor {
            return Err(IneligibleReason::SelfTarget.into());
        }
        if !self.state.is_alive(target) {
            return Err(IneligibleReason::TargetNotAlive(target).into());
        }
        if self.state.is_infected(target) {
            return Err(IneligibleReason::AlreadyInfected(target).into());
        }
        Ok(())
    }

    fn alive_u32(&self) -> u32 {
        u32::try_from(self.state.alive_count()).unwrap_or(u32::MAX)
    }

    fn emit(&self, event: GameEvent) {
        self.dispatcher.dispatch(self.id, &event);
    }

    #[cfg(test)]
    pub(crate) fn state_mut_for_test(&mut self) -> &mut GameState {
        &mut self.state
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
    use crate::events::{CollectingListener, GameEventListener};
    use crate::telemetry::CollectingObserver;
    use crate::SpawnPoint;

    struct Harness {
        session: Session,
        events: Arc<CollectingListener>,
        observer: Arc<CollectingObserver>,
    }

    fn harness() -> Harness {
        let events = Arc::new(CollectingListener::new());
        let observer = Arc::new(CollectingObserver::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(events.clone());
        let session = Session::with_collaborators(
            SessionId::new(1),
            Arc::new(dispatcher),
            Arc::new(AllConnected),
            Some(observer.clone()),
        );
        Harness {
            session,
            events,
            observer,
        }
    }

    fn setup(n: u64) -> GameSetup {
        GameSetup::new("unit", (1..=n).map(ActorId::new))
            .with_spawns(vec![SpawnPoint::new("arena", 0.0, 0.0, 0.0)])
            .with_seed(11)
    }

    fn started(n: u64) -> Harness {
        let mut h = harness();
        h.session
            .start_game(setup(n), GameConfig::default(), Timestamp::ZERO)
            .unwrap();
        h
    }

    fn with_role(session: &Session, role: Role) -> ActorId {
        session
            .state()
            .roles()
            .iter()
            .find(|(_, r)| **r == role)
            .map(|(a, _)| *a)
            .unwrap()
    }

    #[test]
    fn start_game_rejections_do_not_mutate() {
        let mut h = harness();
        let no_spawns = GameSetup::new("x", [ActorId::new(1), ActorId::new(2)]);
        assert_eq!(
            h.session
                .start_game(no_spawns, GameConfig::default(), Timestamp::ZERO),
            Err(SparkError::MissingPrerequisite {
                what: "spawn locations"
            })
        );
        let nobody = GameSetup::new("x", []).with_spawns(vec![SpawnPoint::new("w", 0.0, 0.0, 0.0)]);
        assert_eq!(
            h.session
                .start_game(nobody, GameConfig::default(), Timestamp::ZERO),
            Err(SparkError::MissingPrerequisite { what: "players" })
        );
        let twice = GameSetup::new("x", [ActorId::new(1), ActorId::new(1)])
            .with_spawns(vec![SpawnPoint::new("w", 0.0, 0.0, 0.0)]);
        assert!(matches!(
            h.session
                .start_game(twice, GameConfig::default(), Timestamp::ZERO),
            Err(SparkError::InvalidConfig { field: "actors", .. })
        ));

        assert_eq!(h.session.phase(), Phase::Waiting);
        assert_eq!(h.session.round(), 0);
        assert!(h.events.events().is_empty());
    }

    #[test]
    fn start_game_rejects_lobbies_that_are_already_decided() {
        let mut h = harness();
        for n in 1..=2 {
            assert_eq!(
                h.session
                    .start_game(setup(n), GameConfig::default(), Timestamp::ZERO),
                Err(SparkError::MissingPrerequisite {
                    what: "at least three players"
                })
            );
        }
        assert_eq!(h.session.phase(), Phase::Waiting);
        assert!(h.events.events().is_empty());

        h.session
            .start_game(setup(3), GameConfig::default(), Timestamp::ZERO)
            .unwrap();
        assert_eq!(h.session.phase(), Phase::Swipe);
        assert_eq!(h.session.result(), None);
    }

    #[test]
    fn swipe_cannot_reschedule_a_death_carried_over_from_last_round() {
        let mut h = started(5);
        let spark = with_role(&h.session, Role::Spark);
        let victim = with_role(&h.session, Role::Innocent);
        h.session
            .open_ability_window(spark, AbilityKind::Swipe, Timestamp::ZERO)
            .unwrap();
        h.session
            .use_ability(Some(spark), AbilityKind::Swipe, Some(victim), Timestamp::ZERO)
            .unwrap();
        for _ in 0..3 {
            h.session.skip_phase(Timestamp::ZERO).unwrap();
        }
        assert_eq!(h.session.round(), 2);
        assert!(!h.session.state().is_infected(victim));

        let now = Timestamp::from_secs(4);
        h.session
            .open_ability_window(spark, AbilityKind::Swipe, now)
            .unwrap();
        assert_eq!(
            h.session
                .use_ability(Some(spark), AbilityKind::Swipe, Some(victim), now),
            Err(IneligibleReason::AlreadyInfected(victim).into())
        );
        assert_eq!(
            h.session.state().pending_death(victim),
            Some(Timestamp::from_secs(10))
        );
        assert!(h.session.windows().is_window_active(spark, AbilityKind::Swipe, now));
    }

    #[test]
    fn start_game_deals_roles_and_enters_swipe() {
        let h = started(5);
        assert_eq!(h.session.phase(), Phase::Swipe);
        assert_eq!(h.session.round(), 1);
        assert_eq!(h.session.phase_machine().remaining(), Some(30));
        assert_eq!(h.session.seed(), Some(11));
        assert_eq!(
            h.events
                .count(|e| matches!(e, GameEvent::RoleAssigned { .. })),
            5
        );
        assert!(matches!(
            h.events.events()[0].1,
            GameEvent::GameStarted { .. }
        ));
    }

    #[test]
    fn corrupted_state_aborts_the_round() {
        let mut h = started(4);
        h.session.skip_phase(Timestamp::from_secs(1)).unwrap();
        h.session.skip_phase(Timestamp::from_secs(2)).unwrap();
        assert_eq!(h.session.phase(), Phase::Voting);

        h.session
            .state_mut_for_test()
            .force_alive_unchecked(ActorId::new(99));
        let err = h.session.skip_phase(Timestamp::from_secs(3)).unwrap_err();

        assert!(matches!(err, SparkError::CorruptedState { .. }));
        assert_eq!(h.session.phase(), Phase::Resolution);
        assert_eq!(h.session.round(), 1);
        assert!(h.observer.has_violation(ViolationKind::GameState));
        assert_eq!(
            h.events
                .count(|e| matches!(e, GameEvent::StateCorrupted { .. })),
            1
        );
    }

    #[test]
    fn start_new_round_requires_an_active_game() {
        let mut h = harness();
        assert_eq!(
            h.session.start_new_round(Timestamp::ZERO),
            Err(SparkError::GameNotActive)
        );
    }

    #[test]
    fn force_phase_only_accepts_the_successor() {
        let mut h = started(5);
        assert_eq!(
            h.session.force_phase(Phase::Voting, Timestamp::from_secs(1)),
            Err(SparkError::InvalidTransition {
                from: Phase::Swipe,
                to: Phase::Voting
            })
        );
        h.session
            .force_phase(Phase::Discussion, Timestamp::from_secs(1))
            .unwrap();
        assert_eq!(h.session.phase(), Phase::Discussion);
        assert_eq!(h.session.phase_machine().remaining(), Some(60));
    }

    #[test]
    fn sight_abilities_reveal_once_per_round() {
        let mut h = started(5);
        let spark = with_role(&h.session, Role::Spark);
        let medic = with_role(&h.session, Role::Medic);
        let now = Timestamp::from_secs(1);

        h.session
            .use_ability(Some(spark), AbilityKind::HunterVision, None, now)
            .unwrap();
        let err = h
            .session
            .use_ability(Some(spark), AbilityKind::HunterVision, None, now)
            .unwrap_err();
        assert!(matches!(
            err,
            SparkError::IneligibleAction {
                reason: IneligibleReason::AlreadyUsed { .. }
            }
        ));

        h.session
            .use_ability(Some(medic), AbilityKind::HealingSight, None, now)
            .unwrap();
        let reveals: Vec<(AbilityKind, usize)> = h
            .events
            .events()
            .into_iter()
            .filter_map(|(_, e)| match e {
                GameEvent::SightRevealed { kind, revealed, .. } => Some((kind, revealed.len())),
                _ => None,
            })
            .collect();
        assert_eq!(
            reveals,
            vec![(AbilityKind::HunterVision, 4), (AbilityKind::HealingSight, 0)]
        );
    }

    #[test]
    fn listener_panics_do_not_break_the_session() {
        struct Boom;
        impl GameEventListener for Boom {
            fn on_event(&self, _session: SessionId, _event: &GameEvent) {
                panic!("boom");
            }
        }
        let observer = Arc::new(CollectingObserver::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(Arc::new(Boom));
        dispatcher.set_violation_observer(Some(observer.clone()));
        let mut session = Session::with_collaborators(
            SessionId::new(3),
            Arc::new(dispatcher),
            Arc::new(AllConnected),
            None,
        );
        session
            .start_game(setup(4), GameConfig::default(), Timestamp::ZERO)
            .unwrap();
        assert_eq!(session.phase(), Phase::Swipe);
        assert!(observer.has_violation(ViolationKind::Listener));
    }

    #[test]
    fn end_is_idempotent_and_closes_windows() {
        let mut h = started(4);
        let spark = with_role(&h.session, Role::Spark);
        h.session
            .open_ability_window(spark, AbilityKind::Swipe, Timestamp::ZERO)
            .unwrap();
        h.session.end(Timestamp::from_secs(1));
        h.session.end(Timestamp::from_secs(2));

        assert_eq!(h.session.phase(), Phase::Ended);
        assert!(h.session.windows().is_empty());
        assert_eq!(h.session.phase_machine().remaining(), None);
        assert_eq!(
            h.events.count(|e| matches!(e, GameEvent::SessionClosed)),
            1
        );
        assert_eq!(
            h.session.cast_vote(Some(spark), Some(ActorId::new(2))),
            Err(SparkError::GameNotActive)
        );
    }
}
