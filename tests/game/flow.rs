//! Round lifecycle: countdowns, skips, forced transitions, infections over time and game end.

use spark_engine::{
    assert_no_violations, AbilityKind, EliminationCause, GameConfig, GameEvent, Phase, Role,
    SparkError, Timestamp, WinResult,
};
use web_time::Duration;

use crate::common::TestHost;

fn transitions(host: &TestHost, id: spark_engine::SessionId) -> Vec<(Phase, Phase)> {
    host.events_where(id, |e| matches!(e, GameEvent::PhaseChanged { .. }))
        .into_iter()
        .filter_map(|e| match e {
            GameEvent::PhaseChanged { from, to, .. } => from.map(|from| (from, to)),
            _ => None,
        })
        .collect()
}

#[test]
fn phases_follow_their_countdowns_through_a_full_round() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());

    host.advance_secs(29);
    assert_eq!(host.registry.current_phase(id), Some(Phase::Swipe));
    host.advance_secs(1);
    assert_eq!(host.registry.current_phase(id), Some(Phase::Discussion));
    host.advance_secs(60);
    assert_eq!(host.registry.current_phase(id), Some(Phase::Voting));
    host.advance_secs(30);
    assert_eq!(host.registry.current_phase(id), Some(Phase::Swipe));
    assert_eq!(host.registry.current_round(id), Some(2));

    assert_eq!(
        transitions(&host, id),
        vec![
            (Phase::Waiting, Phase::Swipe),
            (Phase::Swipe, Phase::Discussion),
            (Phase::Discussion, Phase::Voting),
            (Phase::Voting, Phase::Resolution),
            (Phase::Resolution, Phase::Swipe),
        ]
    );
    assert_no_violations!(host.violations);
}

#[test]
fn countdown_ticks_down_to_one_then_finishes() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    host.advance_secs(30);

    let remaining: Vec<u32> = host
        .events_where(id, |e| {
            matches!(
                e,
                GameEvent::CountdownTick {
                    phase: Phase::Swipe,
                    ..
                }
            )
        })
        .into_iter()
        .filter_map(|e| match e {
            GameEvent::CountdownTick { remaining, .. } => Some(remaining),
            _ => None,
        })
        .collect();
    assert_eq!(remaining, (1..=29).rev().collect::<Vec<u32>>());
    assert_eq!(
        host.events_where(id, |e| matches!(
            e,
            GameEvent::CountdownFinished {
                phase: Phase::Swipe,
                skipped: false
            }
        ))
        .len(),
        1
    );
}

#[test]
fn a_late_tick_catches_up_on_the_countdown() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());

    host.advance(Duration::from_secs(45));

    let session = host.registry.session(id).unwrap();
    assert_eq!(session.phase(), Phase::Discussion);
    assert_eq!(session.phase_machine().remaining(), Some(60));
}

#[test]
fn a_skipped_countdown_never_fires_later() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());

    host.registry.skip_phase(id).unwrap();
    assert_eq!(host.registry.current_phase(id), Some(Phase::Discussion));

    host.advance_secs(30);
    assert_eq!(host.registry.current_phase(id), Some(Phase::Discussion));
    assert_eq!(
        host.registry.session(id).unwrap().phase_machine().remaining(),
        Some(30)
    );
    let finished: Vec<GameEvent> =
        host.events_where(id, |e| matches!(e, GameEvent::CountdownFinished { .. }));
    assert_eq!(
        finished,
        vec![GameEvent::CountdownFinished {
            phase: Phase::Swipe,
            skipped: true
        }]
    );
}

#[test]
fn skip_and_expiry_land_in_the_same_place() {
    let mut skipped = TestHost::new();
    let a = skipped.start(5, GameConfig::default());
    for _ in 0..3 {
        skipped.registry.skip_phase(a).unwrap();
    }

    let mut expired = TestHost::new();
    let b = expired.start(5, GameConfig::default());
    expired.advance_secs(120);

    let a = skipped.registry.snapshot(a).unwrap();
    let b = expired.registry.snapshot(b).unwrap();
    assert_eq!((a.round, a.phase), (2, Phase::Swipe));
    assert_eq!((b.round, b.phase), (2, Phase::Swipe));
    assert_eq!(a.remaining_seconds, b.remaining_seconds);
    assert_eq!(a.alive, b.alive);
    assert_eq!(a.consecutive_no_elimination, 1);
    assert_eq!(b.consecutive_no_elimination, 1);
    assert_eq!(transitions(&skipped, a.id), transitions(&expired, b.id));
}

#[test]
fn force_phase_out_of_voting_resolves_and_starts_the_next_round() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    host.registry.force_phase(id, Phase::Discussion).unwrap();
    host.registry.force_phase(id, Phase::Voting).unwrap();

    assert_eq!(
        host.registry.force_phase(id, Phase::Swipe),
        Err(SparkError::InvalidTransition {
            from: Phase::Voting,
            to: Phase::Swipe
        })
    );
    host.registry.force_phase(id, Phase::Resolution).unwrap();

    assert_eq!(host.registry.current_phase(id), Some(Phase::Swipe));
    assert_eq!(host.registry.current_round(id), Some(2));
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::VoteResolved { .. }))
            .len(),
        1
    );
}

#[test]
fn new_round_clears_flags_but_keeps_roles_alive_and_pending_deaths() {
    let mut host = TestHost::new();
    let id = host.start(6, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    let medic = host.actor_with(id, Role::Medic);
    let victim = host.actor_with(id, Role::Innocent);

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(victim)));
    assert!(host
        .registry
        .use_ability(id, medic, AbilityKind::HealingSight, None));
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::HunterVision, None));

    let (roles_before, alive_before) = {
        let state = host.registry.session(id).unwrap().state();
        assert!(!state.round_flags_empty());
        (state.roles().clone(), state.alive().collect::<Vec<_>>())
    };

    for _ in 0..3 {
        host.registry.skip_phase(id).unwrap();
    }

    let session = host.registry.session(id).unwrap();
    assert_eq!(session.round(), 2);
    assert_eq!(session.phase(), Phase::Swipe);
    let state = session.state();
    assert!(state.round_flags_empty());
    assert!(!state.has_used(spark, AbilityKind::Swipe));
    assert!(!state.is_infected(victim));
    assert_eq!(state.roles(), &roles_before);
    assert_eq!(state.alive().collect::<Vec<_>>(), alive_before);
    assert_eq!(state.pending_death(victim), Some(Timestamp::from_secs(10)));

    host.advance_secs(10);
    assert!(!host.registry.session(id).unwrap().state().is_alive(victim));
}

#[test]
fn swiping_a_doomed_target_again_does_not_postpone_the_death() {
    let mut host = TestHost::new();
    let id = host.start(6, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    let victim = host.actor_with(id, Role::Innocent);

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(victim)));
    for _ in 0..3 {
        host.registry.skip_phase(id).unwrap();
    }
    assert_eq!(host.registry.current_round(id), Some(2));

    host.advance_secs(4);
    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(!host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(victim)));
    assert_eq!(
        host.registry
            .session(id)
            .unwrap()
            .state()
            .pending_death(victim),
        Some(Timestamp::from_secs(10))
    );

    host.advance_secs(6);
    assert!(!host.registry.session(id).unwrap().state().is_alive(victim));
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::Infected { .. }))
            .len(),
        1
    );
}

#[test]
fn cure_before_the_deadline_saves_the_target() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    let medic = host.actor_with(id, Role::Medic);
    let target = host.actor_with(id, Role::Innocent);

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(target)));

    host.advance_secs(5);
    host.registry
        .open_ability_window(id, medic, AbilityKind::Cure)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, medic, AbilityKind::Cure, Some(target)));

    host.advance_secs(6);
    let state = host.registry.session(id).unwrap().state();
    assert!(state.is_alive(target));
    assert_eq!(state.pending_death(target), None);
    assert!(!state.is_infected(target));
    assert!(state.has_used(medic, AbilityKind::Cure));
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::Cured { .. }))
            .len(),
        1
    );
    assert!(host
        .events_where(id, |e| matches!(e, GameEvent::Eliminated { .. }))
        .is_empty());
}

#[test]
fn uncured_infection_kills_at_the_deadline() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    let target = host.actor_with(id, Role::Innocent);

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(target)));

    host.advance_secs(9);
    assert!(host.registry.session(id).unwrap().state().is_alive(target));
    host.advance_secs(1);

    let state = host.registry.session(id).unwrap().state();
    assert!(!state.is_alive(target));
    assert!(state.is_participating(target));
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::Eliminated { .. })),
        vec![GameEvent::Eliminated {
            actor: target,
            role: Role::Innocent,
            cause: EliminationCause::Infection
        }]
    );
}

#[test]
fn delusion_fades_and_sight_cannot_tell_it_apart() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    let medic = host.actor_with(id, Role::Medic);
    let target = host.actor_with(id, Role::Innocent);

    host.advance_secs(1);
    host.registry
        .open_ability_window(id, spark, AbilityKind::Delusion)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::Delusion, Some(target)));
    {
        let state = host.registry.session(id).unwrap().state();
        assert!(state.is_infected(target));
        assert!(state.is_deluded(target));
        assert_eq!(state.pending_death(target), None);
    }

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(!host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(target)));

    host.advance_secs(59);
    assert!(host.registry.session(id).unwrap().state().is_infected(target));
    host.advance_secs(1);

    assert_eq!(host.registry.current_phase(id), Some(Phase::Discussion));
    assert!(!host.registry.session(id).unwrap().state().is_infected(target));
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::DelusionFaded { .. })),
        vec![GameEvent::DelusionFaded { target }]
    );

    assert!(host
        .registry
        .use_ability(id, medic, AbilityKind::HealingSight, None));
    let revealed = host
        .events_where(id, |e| matches!(e, GameEvent::SightRevealed { .. }))
        .into_iter()
        .find_map(|e| match e {
            GameEvent::SightRevealed { revealed, .. } => Some(revealed),
            _ => None,
        })
        .unwrap();
    assert!(revealed.is_empty());
}

#[test]
fn spark_leaving_hands_the_innocents_the_win() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);

    host.registry.actor_left(id, spark).unwrap();

    assert_eq!(host.registry.current_phase(id), None);
    assert!(host.registry.is_empty());
    let tail: Vec<GameEvent> = host
        .events
        .events_for(id)
        .into_iter()
        .rev()
        .take(1)
        .collect();
    assert_eq!(
        tail,
        vec![GameEvent::GameEnded {
            result: WinResult::InnocentsWin,
            round: 1
        }]
    );
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::ActorLeft { .. }))
            .len(),
        1
    );
}

#[test]
fn two_survivors_end_the_game_for_the_spark() {
    let mut host = TestHost::new();
    let id = host.start(4, GameConfig::default());
    let medic = host.actor_with(id, Role::Medic);
    let innocent = host.actor_with(id, Role::Innocent);

    host.registry.actor_left(id, medic).unwrap();
    assert_eq!(host.registry.current_phase(id), Some(Phase::Swipe));
    host.registry.actor_left(id, innocent).unwrap();

    assert_eq!(host.registry.current_phase(id), None);
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::GameEnded { .. })),
        vec![GameEvent::GameEnded {
            result: WinResult::SparkWins,
            round: 1
        }]
    );
}

#[test]
fn infection_death_can_end_the_game() {
    let mut host = TestHost::new();
    let id = host.start(3, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    let innocent = host.actor_with(id, Role::Innocent);

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert!(host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(innocent)));
    host.advance_secs(10);

    assert!(host.registry.is_empty());
    let ended = host.events_where(id, |e| matches!(e, GameEvent::GameEnded { .. }));
    assert_eq!(
        ended,
        vec![GameEvent::GameEnded {
            result: WinResult::SparkWins,
            round: 1
        }]
    );
    assert_eq!(
        host.events_where(id, |e| matches!(
            e,
            GameEvent::PhaseChanged {
                to: Phase::Ended,
                ..
            }
        ))
        .len(),
        1
    );
}

#[test]
fn ending_a_game_discards_open_windows() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);
    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();

    host.registry.end_game(id).unwrap();

    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::AbilityWindowClosed { .. })),
        vec![GameEvent::AbilityWindowClosed {
            actor: spark,
            kind: AbilityKind::Swipe,
            reason: spark_engine::WindowCloseReason::Discarded
        }]
    );
    assert_eq!(
        host.events.events_for(id).last(),
        Some(&GameEvent::SessionClosed)
    );
}
