//! The authoritative per-session game store.
//!
//! [`GameState`] owns the role map, the alive and participating sets, the per-round ability flags
//! and the pending deaths of one session. Fields are private; every mutation goes through a named
//! method so the structural invariants checked by [`GameState::validate_state`] can only be broken
//! by the engine itself, never by a caller.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SparkError;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{AbilityKind, ActorId, ActorList, Role, Timestamp};

/// Per-session game state.
///
/// # Invariants
///
/// - `alive ⊆ participating`
/// - every key of `roles` is in `participating`
/// - `participating` non-empty implies `roles` non-empty
/// - every key of `pending_death` is in `participating`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameState {
    session_name: String,
    round: u32,
    roles: BTreeMap<ActorId, Role>,
    alive: BTreeSet<ActorId>,
    participating: BTreeSet<ActorId>,
    // Per-round flags.
    swiped: BTreeSet<ActorId>,
    cured: BTreeSet<ActorId>,
    infected: BTreeSet<ActorId>,
    deluded: BTreeSet<ActorId>,
    used_healing_sight: BTreeSet<ActorId>,
    used_hunter_vision: BTreeSet<ActorId>,
    delusions: BTreeMap<ActorId, Option<Timestamp>>,
    // Survives round boundaries.
    pending_death: BTreeMap<ActorId, Timestamp>,
}

impl GameState {
    /// Creates an empty state for a session called `session_name`.
    #[must_use]
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            ..Self::default()
        }
    }

    /// Resets everything and seats the given role hand-out. Every seated actor starts alive.
    ///
    /// The round counter is set to 1.
    pub fn populate(&mut self, session_name: impl Into<String>, roles: BTreeMap<ActorId, Role>) {
        self.clear_all();
        self.session_name = session_name.into();
        self.participating = roles.keys().copied().collect();
        self.alive = self.participating.clone();
        self.roles = roles;
        self.round = 1;
    }

    /// Host-facing name of the session.
    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// The current round, starting at 1. Zero before the game starts.
    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Increments the round counter and returns the new round.
    pub fn advance_round(&mut self) -> u32 {
        self.round = self.round.saturating_add(1);
        self.round
    }

    // ------------------------------------------------------------------
    // Roles and membership
    // ------------------------------------------------------------------

    /// The role of `actor`, if they are part of this game.
    #[must_use]
    pub fn role_of(&self, actor: ActorId) -> Option<Role> {
        self.roles.get(&actor).copied()
    }

    /// The full role map.
    #[must_use]
    pub fn roles(&self) -> &BTreeMap<ActorId, Role> {
        &self.roles
    }

    /// Whether `actor` is alive.
    #[must_use]
    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.alive.contains(&actor)
    }

    /// Whether `actor` started this game.
    #[must_use]
    pub fn is_participating(&self, actor: ActorId) -> bool {
        self.participating.contains(&actor)
    }

    /// Alive actors in ascending id order.
    pub fn alive(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.alive.iter().copied()
    }

    /// Participating actors in ascending id order.
    pub fn participating(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.participating.iter().copied()
    }

    /// Number of alive actors.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    /// Number of participating actors.
    #[must_use]
    pub fn participating_count(&self) -> usize {
        self.participating.len()
    }

    /// Number of alive actors holding `role`.
    #[must_use]
    pub fn alive_with_role(&self, role: Role) -> usize {
        self.alive
            .iter()
            .filter(|actor| self.roles.get(actor) == Some(&role))
            .count()
    }

    /// Removes `actor` from the alive set and drops everything that only matters to the living:
    /// their per-round flags, delusion and pending death.
    ///
    /// Participation is kept. Returns `false` if the actor was not alive.
    pub fn eliminate(&mut self, actor: ActorId) -> bool {
        let was_alive = self.alive.remove(&actor);
        self.clear_flags_of(actor);
        self.pending_death.remove(&actor);
        was_alive
    }

    // ------------------------------------------------------------------
    // Per-round flags
    // ------------------------------------------------------------------

    /// Whether `actor` already consumed `kind` this round.
    #[must_use]
    pub fn has_used(&self, actor: ActorId, kind: AbilityKind) -> bool {
        self.flag_set(kind).contains(&actor)
    }

    /// Records that `actor` consumed `kind` this round.
    pub fn mark_used(&mut self, actor: ActorId, kind: AbilityKind) {
        self.flag_set_mut(kind).insert(actor);
    }

    /// Whether `target` carries the infected flag this round (real or delusion).
    #[must_use]
    pub fn is_infected(&self, target: ActorId) -> bool {
        self.infected.contains(&target)
    }

    /// Actors carrying the infected flag, in ascending id order.
    #[must_use]
    pub fn infected(&self) -> ActorList {
        self.infected.iter().copied().collect()
    }

    /// Sets the infected flag on `target`.
    pub fn mark_infected(&mut self, target: ActorId) {
        self.infected.insert(target);
    }

    /// Clears the infected flag on `target`, together with any delusion backing it.
    pub fn clear_infected(&mut self, target: ActorId) {
        self.infected.remove(&target);
        self.delusions.remove(&target);
    }

    /// Plants a fake infection on `target`. `fades_at` of `None` keeps it until the round ends.
    pub fn plant_delusion(&mut self, target: ActorId, fades_at: Option<Timestamp>) {
        self.infected.insert(target);
        self.delusions.insert(target, fades_at);
    }

    /// Whether `target` currently carries a delusion.
    #[must_use]
    pub fn is_deluded(&self, target: ActorId) -> bool {
        self.delusions.contains_key(&target)
    }

    /// Removes every delusion that faded at or before `now`.
    ///
    /// The infected flag is cleared only when the target has no real pending death. Returns the
    /// actors whose flag was cleared.
    pub fn fade_delusions(&mut self, now: Timestamp) -> ActorList {
        let faded: ActorList = self
            .delusions
            .iter()
            .filter(|(_, fades_at)| fades_at.is_some_and(|at| at <= now))
            .map(|(target, _)| *target)
            .collect();
        let mut cleared = ActorList::new();
        for target in faded {
            self.delusions.remove(&target);
            if !self.pending_death.contains_key(&target) {
                self.infected.remove(&target);
                cleared.push(target);
            }
        }
        cleared
    }

    /// Resets every per-round flag set. Roles, alive set and pending deaths are untouched.
    pub fn clear_round_flags(&mut self) {
        self.swiped.clear();
        self.cured.clear();
        self.infected.clear();
        self.deluded.clear();
        self.used_healing_sight.clear();
        self.used_hunter_vision.clear();
        self.delusions.clear();
    }

    /// Whether every per-round flag set is empty.
    #[must_use]
    pub fn round_flags_empty(&self) -> bool {
        self.swiped.is_empty()
            && self.cured.is_empty()
            && self.infected.is_empty()
            && self.deluded.is_empty()
            && self.used_healing_sight.is_empty()
            && self.used_hunter_vision.is_empty()
            && self.delusions.is_empty()
    }

    /// Resets the whole state except the session name.
    pub fn clear_all(&mut self) {
        self.clear_round_flags();
        self.roles.clear();
        self.alive.clear();
        self.participating.clear();
        self.pending_death.clear();
        self.round = 0;
    }

    // ------------------------------------------------------------------
    // Pending deaths
    // ------------------------------------------------------------------

    /// Schedules `target` to die at `at`. An existing schedule is never pushed back: the earlier
    /// of the two deadlines is kept.
    pub fn schedule_death(&mut self, target: ActorId, at: Timestamp) {
        self.pending_death
            .entry(target)
            .and_modify(|deadline| *deadline = (*deadline).min(at))
            .or_insert(at);
    }

    /// Cancels the pending death of `target`, returning when it would have fired.
    pub fn cancel_death(&mut self, target: ActorId) -> Option<Timestamp> {
        self.pending_death.remove(&target)
    }

    /// When `target` is scheduled to die, if at all.
    #[must_use]
    pub fn pending_death(&self, target: ActorId) -> Option<Timestamp> {
        self.pending_death.get(&target).copied()
    }

    /// Number of scheduled deaths.
    #[must_use]
    pub fn pending_death_count(&self) -> usize {
        self.pending_death.len()
    }

    /// Actors whose pending death is due at `now`, in ascending id order. Nothing is removed.
    #[must_use]
    pub fn due_deaths(&self, now: Timestamp) -> ActorList {
        self.pending_death
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(actor, _)| *actor)
            .collect()
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Checks the structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SparkError::CorruptedState`] describing the first broken invariant.
    pub fn validate_state(&self) -> Result<(), SparkError> {
        self.check_invariants()
            .map_err(|violation| SparkError::CorruptedState {
                details: violation.to_string(),
            })
    }

    fn flag_set(&self, kind: AbilityKind) -> &BTreeSet<ActorId> {
        match kind {
            AbilityKind::Swipe => &self.swiped,
            AbilityKind::Cure => &self.cured,
            AbilityKind::Delusion => &self.deluded,
            AbilityKind::HealingSight => &self.used_healing_sight,
            AbilityKind::HunterVision => &self.used_hunter_vision,
        }
    }

    fn flag_set_mut(&mut self, kind: AbilityKind) -> &mut BTreeSet<ActorId> {
        match kind {
            AbilityKind::Swipe => &mut self.swiped,
            AbilityKind::Cure => &mut self.cured,
            AbilityKind::Delusion => &mut self.deluded,
            AbilityKind::HealingSight => &mut self.used_healing_sight,
            AbilityKind::HunterVision => &mut self.used_hunter_vision,
        }
    }

    fn clear_flags_of(&mut self, actor: ActorId) {
        self.swiped.remove(&actor);
        self.cured.remove(&actor);
        self.infected.remove(&actor);
        self.deluded.remove(&actor);
        self.used_healing_sight.remove(&actor);
        self.used_hunter_vision.remove(&actor);
        self.delusions.remove(&actor);
    }

    /// Puts an actor into the alive set without seating them. Only for corruption tests.
    #[cfg(test)]
    pub(crate) fn force_alive_unchecked(&mut self, actor: ActorId) {
        self.alive.insert(actor);
    }

    /// Drops the role map while keeping participants. Only for corruption tests.
    #[cfg(test)]
    pub(crate) fn force_clear_roles_unchecked(&mut self) {
        self.roles.clear();
    }
}

impl InvariantChecker for GameState {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if let Some(stray) = self.alive.difference(&self.participating).next() {
            return Err(InvariantViolation::new(
                "GameState",
                "alive is not a subset of participating",
            )
            .with_details(format!("{} is alive but not participating", stray)));
        }

        if let Some(stray) = self
            .roles
            .keys()
            .find(|actor| !self.participating.contains(actor))
        {
            return Err(InvariantViolation::new(
                "GameState",
                "roles reference a non-participant",
            )
            .with_details(format!("{} has a role but is not participating", stray)));
        }

        if !self.participating.is_empty() && self.roles.is_empty() {
            return Err(InvariantViolation::new(
                "GameState",
                "participants exist but no roles were assigned",
            )
            .with_details(format!("participating={}", self.participating.len())));
        }

        if let Some(stray) = self
            .pending_death
            .keys()
            .find(|actor| !self.participating.contains(actor))
        {
            return Err(InvariantViolation::new(
                "GameState",
                "pending death references a non-participant",
            )
            .with_details(format!("{}", stray)));
        }

        Ok(())
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
    use crate::test_config::miri_case_count;
    use proptest::prelude::*;

    fn a(raw: u64) -> ActorId {
        ActorId::new(raw)
    }

    fn seated(n: u64) -> GameState {
        let mut roles = BTreeMap::new();
        for raw in 1..=n {
            let role = match raw {
                1 => Role::Spark,
                2 => Role::Medic,
                _ => Role::Innocent,
            };
            roles.insert(a(raw), role);
        }
        let mut state = GameState::new("test");
        state.populate("test", roles);
        state
    }

    #[test]
    fn populate_seats_everyone_alive() {
        let state = seated(5);
        assert_eq!(state.round(), 1);
        assert_eq!(state.alive_count(), 5);
        assert_eq!(state.participating_count(), 5);
        assert_eq!(state.role_of(a(1)), Some(Role::Spark));
        assert_eq!(state.alive_with_role(Role::Innocent), 3);
        assert!(state.validate_state().is_ok());
    }

    #[test]
    fn eliminate_keeps_participation() {
        let mut state = seated(4);
        state.mark_infected(a(3));
        state.schedule_death(a(3), Timestamp::from_secs(10));

        assert!(state.eliminate(a(3)));
        assert!(!state.is_alive(a(3)));
        assert!(state.is_participating(a(3)));
        assert!(!state.is_infected(a(3)));
        assert_eq!(state.pending_death(a(3)), None);
        assert!(!state.eliminate(a(3)));
        assert!(state.validate_state().is_ok());
    }

    #[test]
    fn round_flags_clear_but_pending_deaths_survive() {
        let mut state = seated(4);
        state.mark_used(a(1), AbilityKind::Swipe);
        state.mark_used(a(2), AbilityKind::HealingSight);
        state.mark_infected(a(3));
        state.schedule_death(a(3), Timestamp::from_secs(10));
        state.plant_delusion(a(4), None);

        state.clear_round_flags();

        assert!(state.round_flags_empty());
        assert!(!state.has_used(a(1), AbilityKind::Swipe));
        assert_eq!(state.pending_death(a(3)), Some(Timestamp::from_secs(10)));
        assert_eq!(state.alive_count(), 4);
    }

    #[test]
    fn rescheduling_a_death_never_postpones_it() {
        let mut state = seated(4);
        state.schedule_death(a(3), Timestamp::from_secs(10));
        state.schedule_death(a(3), Timestamp::from_secs(14));
        assert_eq!(state.pending_death(a(3)), Some(Timestamp::from_secs(10)));

        state.schedule_death(a(3), Timestamp::from_secs(7));
        assert_eq!(state.pending_death(a(3)), Some(Timestamp::from_secs(7)));
        assert_eq!(state.pending_death_count(), 1);
    }

    #[test]
    fn due_deaths_are_inclusive_of_now() {
        let mut state = seated(4);
        state.schedule_death(a(3), Timestamp::from_secs(10));
        state.schedule_death(a(4), Timestamp::from_secs(11));
        assert!(state.due_deaths(Timestamp::from_millis(9_999)).is_empty());
        assert_eq!(
            state.due_deaths(Timestamp::from_secs(10)).as_slice(),
            &[a(3)]
        );
        assert_eq!(state.due_deaths(Timestamp::from_secs(60)).len(), 2);
    }

    #[test]
    fn delusion_fades_unless_backed_by_real_infection() {
        let mut state = seated(5);
        state.plant_delusion(a(3), Some(Timestamp::from_secs(60)));
        state.plant_delusion(a(4), Some(Timestamp::from_secs(60)));
        state.schedule_death(a(4), Timestamp::from_secs(90));

        assert!(state.fade_delusions(Timestamp::from_secs(59)).is_empty());
        let cleared = state.fade_delusions(Timestamp::from_secs(60));

        assert_eq!(cleared.as_slice(), &[a(3)]);
        assert!(!state.is_infected(a(3)));
        assert!(state.is_infected(a(4)));
        assert!(!state.is_deluded(a(4)));
    }

    #[test]
    fn undecaying_delusion_never_fades() {
        let mut state = seated(3);
        state.plant_delusion(a(3), None);
        assert!(state.fade_delusions(Timestamp::from_millis(u64::MAX)).is_empty());
        assert!(state.is_infected(a(3)));
    }

    #[test]
    fn clear_all_forgets_the_game() {
        let mut state = seated(4);
        state.advance_round();
        state.schedule_death(a(2), Timestamp::from_secs(1));
        state.clear_all();
        assert_eq!(state.round(), 0);
        assert_eq!(state.participating_count(), 0);
        assert_eq!(state.pending_death_count(), 0);
        assert_eq!(state.session_name(), "test");
        assert!(state.validate_state().is_ok());
    }

    #[test]
    fn validate_catches_alive_non_participant() {
        let mut state = seated(3);
        state.force_alive_unchecked(a(99));
        let err = state.validate_state().unwrap_err();
        assert!(matches!(err, SparkError::CorruptedState { ref details } if details.contains("actor#99")));
    }

    #[test]
    fn validate_catches_missing_roles() {
        let mut state = seated(3);
        state.force_clear_roles_unchecked();
        assert!(matches!(
            state.validate_state(),
            Err(SparkError::CorruptedState { .. })
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Eliminate(u64),
        Schedule(u64, u64),
        Cancel(u64),
        Infect(u64),
        Delude(u64, u64),
        Fade(u64),
        Use(u64, u8),
        NextRound,
        ApplyDue(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..10).prop_map(Op::Eliminate),
            (1u64..10, 0u64..100).prop_map(|(x, t)| Op::Schedule(x, t)),
            (1u64..10).prop_map(Op::Cancel),
            (1u64..10).prop_map(Op::Infect),
            (1u64..10, 0u64..100).prop_map(|(x, t)| Op::Delude(x, t)),
            (0u64..100).prop_map(Op::Fade),
            (1u64..10, 0u8..5).prop_map(|(x, k)| Op::Use(x, k)),
            Just(Op::NextRound),
            (0u64..100).prop_map(Op::ApplyDue),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: miri_case_count(),
            ..ProptestConfig::default()
        })]

        #[test]
        fn invariants_hold_under_engine_operations(
            players in 1u64..9,
            ops in proptest::collection::vec(op_strategy(), 0..64),
        ) {
            let mut state = seated(players);
            let roles_before = state.roles().clone();
            for op in ops {
                match op {
                    // Engine callers only schedule deaths for seated actors.
                    Op::Schedule(x, t) if state.is_alive(a(x)) => {
                        state.schedule_death(a(x), Timestamp::from_secs(t));
                    },
                    Op::Schedule(..) => {},
                    Op::Eliminate(x) => { state.eliminate(a(x)); },
                    Op::Cancel(x) => { state.cancel_death(a(x)); },
                    Op::Infect(x) => state.mark_infected(a(x)),
                    Op::Delude(x, t) => state.plant_delusion(a(x), Some(Timestamp::from_secs(t))),
                    Op::Fade(t) => { state.fade_delusions(Timestamp::from_secs(t)); },
                    Op::Use(x, k) => {
                        let kind = match k {
                            0 => AbilityKind::Swipe,
                            1 => AbilityKind::Cure,
                            2 => AbilityKind::Delusion,
                            3 => AbilityKind::HealingSight,
                            _ => AbilityKind::HunterVision,
                        };
                        state.mark_used(a(x), kind);
                    },
                    Op::NextRound => {
                        state.advance_round();
                        state.clear_round_flags();
                        prop_assert!(state.round_flags_empty());
                    },
                    Op::ApplyDue(t) => {
                        for actor in state.due_deaths(Timestamp::from_secs(t)) {
                            state.eliminate(actor);
                        }
                    },
                }
                prop_assert!(state.check_invariants().is_ok());
                prop_assert!(state.alive_count() <= state.participating_count());
            }
            prop_assert_eq!(state.roles(), &roles_before);
        }
    }
}
