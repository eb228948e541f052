//! Voting phases end to end: tallies, ties, the stalemate counter and vote eliminations.

use spark_engine::{
    ActorId, EliminationCause, GameConfig, GameEvent, Phase, Role, SessionId, WinResult,
};

use crate::common::TestHost;

fn skip_to_voting(host: &mut TestHost, id: SessionId) {
    host.registry.skip_phase(id).unwrap();
    host.registry.skip_phase(id).unwrap();
    assert_eq!(host.registry.current_phase(id), Some(Phase::Voting));
}

fn resolutions(host: &TestHost, id: SessionId) -> Vec<GameEvent> {
    host.events_where(id, |e| matches!(e, GameEvent::VoteResolved { .. }))
}

struct Cast {
    spark: ActorId,
    medic: ActorId,
    innocents: Vec<ActorId>,
}

fn cast(host: &TestHost, id: SessionId) -> Cast {
    Cast {
        spark: host.actor_with(id, Role::Spark),
        medic: host.actor_with(id, Role::Medic),
        innocents: host.actors_with(id, Role::Innocent),
    }
}

#[test]
fn a_tie_eliminates_nobody_and_counts_as_a_stalemate() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let c = cast(&host, id);
    skip_to_voting(&mut host, id);

    assert!(host.registry.cast_vote(id, c.innocents[0], c.spark));
    assert!(host.registry.cast_vote(id, c.innocents[1], c.spark));
    assert!(host.registry.cast_vote(id, c.innocents[2], c.medic));
    assert!(host.registry.cast_vote(id, c.spark, c.medic));
    host.registry.skip_phase(id).unwrap();

    assert_eq!(
        resolutions(&host, id),
        vec![GameEvent::VoteResolved {
            target: None,
            votes: 0,
            required: 2,
            eliminated: false,
            consecutive_no_elimination: 1
        }]
    );
    let snapshot = host.registry.snapshot(id).unwrap();
    assert_eq!(snapshot.alive.len(), 5);
    assert_eq!(snapshot.consecutive_no_elimination, 1);
    assert_eq!((snapshot.round, snapshot.phase), (2, Phase::Swipe));
    assert!(snapshot.vote_counts.is_empty());
}

#[test]
fn reaching_the_threshold_eliminates_the_leader() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let c = cast(&host, id);
    let suspect = c.innocents[2];
    skip_to_voting(&mut host, id);

    assert!(host.registry.cast_vote(id, c.innocents[0], suspect));
    assert!(host.registry.cast_vote(id, c.innocents[1], suspect));
    assert!(host.registry.cast_vote(id, c.medic, c.spark));
    let mut expected = vec![(c.spark, 1), (suspect, 2)];
    expected.sort();
    assert_eq!(host.registry.snapshot(id).unwrap().vote_counts, expected);
    host.registry.skip_phase(id).unwrap();

    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::Eliminated { .. })),
        vec![GameEvent::Eliminated {
            actor: suspect,
            role: Role::Innocent,
            cause: EliminationCause::Vote
        }]
    );
    let session = host.registry.session(id).unwrap();
    assert!(!session.state().is_alive(suspect));
    assert!(session.state().is_participating(suspect));
    assert_eq!(session.consecutive_no_elimination(), 0);
    assert_eq!(session.round(), 2);

    skip_to_voting(&mut host, id);
    assert!(!host.registry.cast_vote(id, suspect, c.spark));
    assert!(!host.registry.cast_vote(id, c.spark, suspect));
}

#[test]
fn a_single_vote_below_the_threshold_is_not_enough() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let c = cast(&host, id);
    skip_to_voting(&mut host, id);

    assert!(host.registry.cast_vote(id, c.medic, c.spark));
    host.registry.skip_phase(id).unwrap();

    assert_eq!(
        resolutions(&host, id),
        vec![GameEvent::VoteResolved {
            target: Some(c.spark),
            votes: 1,
            required: 2,
            eliminated: false,
            consecutive_no_elimination: 1
        }]
    );
    assert_eq!(host.registry.current_round(id), Some(2));
}

#[test]
fn voting_out_the_spark_ends_the_game() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let c = cast(&host, id);
    skip_to_voting(&mut host, id);

    for voter in &c.innocents {
        assert!(host.registry.cast_vote(id, *voter, c.spark));
    }
    host.advance_secs(30);

    assert!(host.registry.is_empty());
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::GameEnded { .. })),
        vec![GameEvent::GameEnded {
            result: WinResult::InnocentsWin,
            round: 1
        }]
    );
    assert!(host
        .events_where(id, |e| matches!(e, GameEvent::RoundStarted { round: 2 }))
        .is_empty());
}

#[test]
fn invalid_votes_are_rejected_without_side_effects() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let c = cast(&host, id);

    assert!(!host.registry.cast_vote(id, c.medic, c.spark));

    skip_to_voting(&mut host, id);
    assert!(!host.registry.cast_vote(id, c.medic, c.medic));
    assert!(!host.registry.cast_vote(id, c.medic, ActorId::new(404)));
    assert!(!host.registry.cast_vote(id, ActorId::new(404), c.medic));
    assert!(host.registry.cast_vote(id, c.medic, c.spark));
    assert!(!host.registry.cast_vote(id, c.medic, c.innocents[0]));

    let session = host.registry.session(id).unwrap();
    assert_eq!(session.tally().total_votes(), 1);
    assert_eq!(session.tally().votes_for(c.spark), 1);
    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::VoteCast { .. }))
            .len(),
        1
    );
}

#[test]
fn a_voter_whose_target_left_may_vote_again() {
    let mut host = TestHost::new();
    let id = host.start(6, GameConfig::default());
    let c = cast(&host, id);
    skip_to_voting(&mut host, id);

    assert!(host.registry.cast_vote(id, c.medic, c.innocents[0]));
    host.registry.actor_left(id, c.innocents[0]).unwrap();

    let session = host.registry.session(id).unwrap();
    assert_eq!(session.tally().total_votes(), 0);
    assert!(!session.tally().has_voted(c.medic));
    assert!(host.registry.cast_vote(id, c.medic, c.innocents[1]));
}

#[test]
fn stalemates_lower_the_bar_until_someone_is_eliminated() {
    let mut host = TestHost::new();
    let id = host.start(7, GameConfig::default());
    let c = cast(&host, id);
    assert_eq!(host.registry.snapshot(id).unwrap().required_votes, 3);

    for _ in 0..3 {
        for _ in 0..3 {
            host.registry.skip_phase(id).unwrap();
        }
    }
    let snapshot = host.registry.snapshot(id).unwrap();
    assert_eq!(snapshot.round, 4);
    assert_eq!(snapshot.consecutive_no_elimination, 3);
    assert_eq!(snapshot.required_votes, 2);

    skip_to_voting(&mut host, id);
    assert!(host.registry.cast_vote(id, c.innocents[0], c.innocents[1]));
    assert!(host.registry.cast_vote(id, c.medic, c.innocents[1]));
    host.registry.skip_phase(id).unwrap();

    let snapshot = host.registry.snapshot(id).unwrap();
    assert!(!snapshot.alive.contains(&c.innocents[1]));
    assert_eq!(snapshot.consecutive_no_elimination, 0);
    assert_eq!(snapshot.required_votes, 3);
    let last = resolutions(&host, id).pop().unwrap();
    assert_eq!(
        last,
        GameEvent::VoteResolved {
            target: Some(c.innocents[1]),
            votes: 2,
            required: 2,
            eliminated: true,
            consecutive_no_elimination: 0
        }
    );
}
