//! Property-based tests for whole game sessions.
//!
//! A session is driven by a random mix of clock jumps, ability use, votes, skips and departures.
//! After every step the following must hold:
//!
//! - the game state passes `validate_state` and its `InvariantChecker`
//! - every announced phase change follows the phase cycle or ends the game
//! - an active session never satisfies a win condition (it would have ended)
//! - an ended session's result is exactly what the win rules say about its final state
//! - rounds never go backwards and the role map never changes

use std::sync::Arc;

use proptest::prelude::*;
use spark_engine::telemetry::InvariantChecker;
use spark_engine::{
    AbilityKind, ActorId, AllConnected, CollectingListener, EventDispatcher, GameConfig,
    GameEvent, Phase, Session, SessionId, Timestamp, WinConditionEvaluator,
};
use web_time::Duration;

use crate::common::lobby;

// ============================================================================
// Property Test Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Action {
    Wait(u64),
    OpenWindow(usize, AbilityKind),
    UseAbility(usize, AbilityKind, usize),
    Vote(usize, usize),
    Skip,
    Leave(usize),
}

fn kind_strategy() -> impl Strategy<Value = AbilityKind> {
    prop_oneof![
        Just(AbilityKind::Swipe),
        Just(AbilityKind::Cure),
        Just(AbilityKind::Delusion),
        Just(AbilityKind::HealingSight),
        Just(AbilityKind::HunterVision),
    ]
}

/// Seat indices are taken modulo the player count when applied.
fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (0u64..15_000).prop_map(Action::Wait),
        3 => (0usize..16, kind_strategy()).prop_map(|(a, k)| Action::OpenWindow(a, k)),
        3 => (0usize..16, kind_strategy(), 0usize..16)
            .prop_map(|(a, k, t)| Action::UseAbility(a, k, t)),
        3 => (0usize..16, 0usize..16).prop_map(|(v, t)| Action::Vote(v, t)),
        1 => Just(Action::Skip),
        1 => (0usize..16).prop_map(Action::Leave),
    ]
}

fn config_strategy() -> impl Strategy<Value = GameConfig> {
    prop_oneof![
        Just(GameConfig::default()),
        Just(GameConfig::quick()),
        Just(GameConfig::large_lobby()),
    ]
}

// ============================================================================
// Harness
// ============================================================================

struct Game {
    session: Session,
    events: Arc<CollectingListener>,
    actors: Vec<ActorId>,
    now: Timestamp,
}

impl Game {
    fn start(players: u64, seed: u64, config: GameConfig) -> Self {
        let events = Arc::new(CollectingListener::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(events.clone());
        let mut session = Session::with_collaborators(
            SessionId::new(1),
            Arc::new(dispatcher),
            Arc::new(AllConnected),
            None,
        );
        session
            .start_game(lobby(players, seed), config, Timestamp::ZERO)
            .unwrap();
        Self {
            session,
            events,
            actors: (1..=players).map(ActorId::new).collect(),
            now: Timestamp::ZERO,
        }
    }

    fn seat(&self, index: usize) -> ActorId {
        self.actors[index % self.actors.len()]
    }

    fn apply(&mut self, action: &Action) {
        // Rejections are part of the exercise; only the resulting state is checked.
        match *action {
            Action::Wait(ms) => {
                self.now = self.now.saturating_add(Duration::from_millis(ms));
                self.session.tick(self.now);
            },
            Action::OpenWindow(actor, kind) => {
                let _ = self
                    .session
                    .open_ability_window(self.seat(actor), kind, self.now);
            },
            Action::UseAbility(actor, kind, target) => {
                let _ = self.session.use_ability(
                    Some(self.seat(actor)),
                    kind,
                    Some(self.seat(target)),
                    self.now,
                );
            },
            Action::Vote(voter, target) => {
                let _ = self
                    .session
                    .cast_vote(Some(self.seat(voter)), Some(self.seat(target)));
            },
            Action::Skip => {
                let _ = self.session.skip_phase(self.now);
            },
            Action::Leave(actor) => {
                let _ = self.session.actor_left(self.seat(actor), self.now);
            },
        }
    }
}

fn is_legal(from: Phase, to: Phase) -> bool {
    to == Phase::Ended || from.successor() == Some(to)
}

// ============================================================================
// Session Invariant Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_random_play_preserves_invariants(
        players in 3u64..12,
        seed in any::<u64>(),
        config in config_strategy(),
        actions in prop::collection::vec(action_strategy(), 0..80),
    ) {
        let mut game = Game::start(players, seed, config);
        let roles = game.session.state().roles().clone();
        let mut round = game.session.round();

        for (step, action) in actions.iter().enumerate() {
            game.apply(action);
            let session = &game.session;
            let state = session.state();

            prop_assert!(state.validate_state().is_ok(), "step {}: {:?}", step, action);
            let checked = state.check_invariants();
            prop_assert!(checked.is_ok(), "step {}: {:?}", step, checked.err());
            prop_assert_eq!(state.roles(), &roles);
            prop_assert!(session.round() >= round);
            round = session.round();

            if session.is_active() {
                prop_assert_eq!(WinConditionEvaluator::evaluate(state), None);
                prop_assert!(session.phase().is_timed(), "settled in {}", session.phase());
            } else {
                prop_assert_eq!(session.phase(), Phase::Ended);
                prop_assert_eq!(session.result(), WinConditionEvaluator::evaluate(state));
                prop_assert!(session.windows().is_empty());
            }
        }

        for event in game.events.events_for(SessionId::new(1)) {
            if let GameEvent::PhaseChanged { from: Some(from), to, .. } = event {
                prop_assert!(is_legal(from, to), "illegal transition {} -> {}", from, to);
            }
        }
    }

    #[test]
    fn prop_round_reset_keeps_roles_alive_and_deaths(
        players in 4u64..12,
        seed in any::<u64>(),
        actions in prop::collection::vec(action_strategy(), 0..40),
    ) {
        let mut game = Game::start(players, seed, GameConfig::default());
        for action in actions.iter().filter(|a| !matches!(a, Action::Wait(_) | Action::Skip)) {
            game.apply(action);
        }
        prop_assume!(game.session.is_active());
        while game.session.phase() != Phase::Voting {
            game.session.skip_phase(game.now).unwrap();
        }

        let before = game.session.state().clone();
        game.session.skip_phase(game.now).unwrap();
        prop_assume!(game.session.is_active());

        let after = game.session.state();
        prop_assert_eq!(after.round(), before.round() + 1);
        prop_assert!(after.round_flags_empty());
        prop_assert_eq!(after.roles(), before.roles());
        for actor in before.alive() {
            let eliminated = game
                .events
                .events()
                .iter()
                .any(|(_, e)| matches!(e, GameEvent::Eliminated { actor: a, .. } if *a == actor));
            prop_assert_eq!(after.is_alive(actor), !eliminated);
            if !eliminated {
                prop_assert_eq!(after.pending_death(actor), before.pending_death(actor));
            }
        }
    }

    #[test]
    fn prop_required_votes_never_exceed_alive(
        players in 3u64..30,
        stalemates in 0u32..6,
    ) {
        let mut game = Game::start(players, 1, GameConfig::default());
        for _ in 0..stalemates {
            for _ in 0..3 {
                game.session.skip_phase(game.now).unwrap();
            }
        }
        let alive = u32::try_from(game.session.state().alive_count()).unwrap();
        prop_assert_eq!(game.session.consecutive_no_elimination(), stalemates);
        prop_assert!(game.session.required_votes() >= 1);
        prop_assert!(game.session.required_votes() <= alive);
    }
}
