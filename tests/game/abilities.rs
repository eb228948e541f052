//! Ability windows and ability use through the registry and a bare session.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use spark_engine::{
    AbilityKind, ActorDirectory, ActorId, CollectingListener, EventDispatcher, GameConfig,
    GameEvent, IneligibleReason, Phase, Role, Session, SessionId, SessionRegistry, SparkError,
    Timestamp, WindowCloseReason,
};

use crate::common::{lobby, TestHost};

fn ineligible(reason: IneligibleReason) -> SparkError {
    SparkError::IneligibleAction { reason }
}

fn with_role(session: &Session, role: Role) -> ActorId {
    session
        .state()
        .roles()
        .iter()
        .find(|(_, r)| **r == role)
        .map(|(actor, _)| *actor)
        .unwrap()
}

fn bare_session(players: u64) -> (Session, Arc<CollectingListener>) {
    let events = Arc::new(CollectingListener::new());
    let mut dispatcher = EventDispatcher::new();
    dispatcher.add_listener(events.clone());
    let mut session = Session::with_collaborators(
        SessionId::new(1),
        Arc::new(dispatcher),
        Arc::new(spark_engine::AllConnected),
        None,
    );
    session
        .start_game(lobby(players, 21), GameConfig::default(), Timestamp::ZERO)
        .unwrap();
    (session, events)
}

#[test]
fn window_requests_are_checked_in_order() {
    let (mut session, _) = bare_session(5);
    let spark = with_role(&session, Role::Spark);
    let medic = with_role(&session, Role::Medic);
    let innocent = with_role(&session, Role::Innocent);
    let now = Timestamp::ZERO;

    assert_eq!(
        session.open_ability_window(spark, AbilityKind::HunterVision, now),
        Err(ineligible(IneligibleReason::Instant(AbilityKind::HunterVision)))
    );
    assert_eq!(
        session.open_ability_window(innocent, AbilityKind::Swipe, now),
        Err(ineligible(IneligibleReason::WrongRole {
            actor: innocent,
            kind: AbilityKind::Swipe
        }))
    );
    assert_eq!(
        session.open_ability_window(medic, AbilityKind::Swipe, now),
        Err(ineligible(IneligibleReason::WrongRole {
            actor: medic,
            kind: AbilityKind::Swipe
        }))
    );

    session
        .open_ability_window(spark, AbilityKind::Swipe, now)
        .unwrap();
    assert_eq!(
        session.open_ability_window(spark, AbilityKind::Swipe, now),
        Err(ineligible(IneligibleReason::WindowAlreadyOpen(
            AbilityKind::Swipe
        )))
    );

    session.skip_phase(Timestamp::from_secs(1)).unwrap();
    assert_eq!(
        session.open_ability_window(spark, AbilityKind::Delusion, Timestamp::from_secs(1)),
        Err(ineligible(IneligibleReason::WrongPhase {
            current: Phase::Discussion
        }))
    );
}

#[test]
fn windowed_abilities_need_an_open_window_and_a_fresh_target() {
    let (mut session, _) = bare_session(5);
    let spark = with_role(&session, Role::Spark);
    let medic = with_role(&session, Role::Medic);
    let now = Timestamp::ZERO;

    assert_eq!(
        session.use_ability(Some(spark), AbilityKind::Swipe, Some(medic), now),
        Err(ineligible(IneligibleReason::NoActiveWindow(AbilityKind::Swipe)))
    );
    assert_eq!(
        session.use_ability(None, AbilityKind::Swipe, Some(medic), now),
        Err(ineligible(IneligibleReason::MissingActor))
    );

    session
        .open_ability_window(spark, AbilityKind::Swipe, now)
        .unwrap();
    assert_eq!(
        session.use_ability(Some(spark), AbilityKind::Swipe, None, now),
        Err(ineligible(IneligibleReason::MissingTarget))
    );
    assert_eq!(
        session.use_ability(Some(spark), AbilityKind::Swipe, Some(spark), now),
        Err(ineligible(IneligibleReason::SelfTarget))
    );
    assert_eq!(
        session.use_ability(Some(spark), AbilityKind::Swipe, Some(ActorId::new(404)), now),
        Err(ineligible(IneligibleReason::TargetNotAlive(ActorId::new(404))))
    );
    assert!(session.windows().is_window_active(spark, AbilityKind::Swipe, now));
    assert!(session.state().round_flags_empty());

    session
        .use_ability(Some(spark), AbilityKind::Swipe, Some(medic), now)
        .unwrap();
    assert!(!session.windows().is_window_active(spark, AbilityKind::Swipe, now));
    assert_eq!(
        session.open_ability_window(spark, AbilityKind::Swipe, now),
        Err(ineligible(IneligibleReason::AlreadyUsed {
            actor: spark,
            kind: AbilityKind::Swipe
        }))
    );

    session
        .open_ability_window(spark, AbilityKind::Delusion, now)
        .unwrap();
    assert_eq!(
        session.use_ability(Some(spark), AbilityKind::Delusion, Some(medic), now),
        Err(ineligible(IneligibleReason::AlreadyInfected(medic)))
    );
}

#[test]
fn cure_without_a_pending_death_keeps_the_window_open() {
    let (mut session, events) = bare_session(5);
    let medic = with_role(&session, Role::Medic);
    let innocent = with_role(&session, Role::Innocent);
    let now = Timestamp::from_secs(2);

    session
        .open_ability_window(medic, AbilityKind::Cure, now)
        .unwrap();
    assert_eq!(
        session.use_ability(Some(medic), AbilityKind::Cure, Some(innocent), now),
        Err(ineligible(IneligibleReason::NoPendingDeath(innocent)))
    );

    assert!(session.windows().is_window_active(medic, AbilityKind::Cure, now));
    assert!(!session.state().has_used(medic, AbilityKind::Cure));
    assert_eq!(events.count(|e| matches!(e, GameEvent::Cured { .. })), 0);
}

#[test]
fn medic_may_cure_themselves() {
    let (mut session, _) = bare_session(5);
    let spark = with_role(&session, Role::Spark);
    let medic = with_role(&session, Role::Medic);
    let now = Timestamp::ZERO;

    session
        .open_ability_window(spark, AbilityKind::Swipe, now)
        .unwrap();
    session
        .use_ability(Some(spark), AbilityKind::Swipe, Some(medic), now)
        .unwrap();
    session
        .open_ability_window(medic, AbilityKind::Cure, now)
        .unwrap();
    session
        .use_ability(Some(medic), AbilityKind::Cure, Some(medic), Timestamp::from_secs(3))
        .unwrap();

    assert_eq!(session.state().pending_death(medic), None);
    session.tick(Timestamp::from_secs(15));
    assert!(session.state().is_alive(medic));
}

#[test]
fn unused_windows_expire_with_an_event() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);

    let token = host
        .registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
    assert_eq!(token.expires_at(), Timestamp::from_secs(10));

    host.advance_secs(9);
    assert!(host
        .registry
        .session(id)
        .unwrap()
        .windows()
        .is_window_active(spark, AbilityKind::Swipe, Timestamp::from_secs(9)));
    host.advance_secs(1);

    let closed = host.events_where(id, |e| matches!(e, GameEvent::AbilityWindowClosed { .. }));
    assert_eq!(
        closed,
        vec![GameEvent::AbilityWindowClosed {
            actor: spark,
            kind: AbilityKind::Swipe,
            reason: WindowCloseReason::Expired
        }]
    );
    assert!(!host
        .registry
        .use_ability(id, spark, AbilityKind::Swipe, Some(ActorId::new(1))));

    host.registry
        .open_ability_window(id, spark, AbilityKind::Swipe)
        .unwrap();
}

#[test]
fn windows_still_open_when_swipe_ends_are_discarded() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let spark = host.actor_with(id, Role::Spark);

    host.advance_secs(25);
    host.registry
        .open_ability_window(id, spark, AbilityKind::Delusion)
        .unwrap();
    host.advance_secs(5);

    assert_eq!(host.registry.current_phase(id), Some(Phase::Discussion));
    assert!(host.registry.session(id).unwrap().windows().is_empty());
    assert_eq!(
        host.events_where(id, |e| matches!(
            e,
            GameEvent::AbilityWindowClosed {
                reason: WindowCloseReason::Discarded,
                ..
            }
        ))
        .len(),
        1
    );
}

#[test]
fn rejected_abilities_leave_no_trace() {
    let mut host = TestHost::new();
    let id = host.start(5, GameConfig::default());
    let innocent = host.actor_with(id, Role::Innocent);
    let before = host.events.events_for(id).len();

    for kind in [
        AbilityKind::Swipe,
        AbilityKind::Cure,
        AbilityKind::Delusion,
        AbilityKind::HealingSight,
        AbilityKind::HunterVision,
    ] {
        assert!(!host.registry.use_ability(id, innocent, kind, Some(ActorId::new(1))));
    }

    assert_eq!(host.events.events_for(id).len(), before);
    assert!(host
        .registry
        .session(id)
        .unwrap()
        .state()
        .round_flags_empty());
}

#[derive(Default)]
struct Lobby {
    offline: Mutex<BTreeSet<ActorId>>,
}

impl Lobby {
    fn disconnect(&self, actor: ActorId) {
        self.offline.lock().insert(actor);
    }
}

impl ActorDirectory for Lobby {
    fn is_connected(&self, actor: ActorId) -> bool {
        !self.offline.lock().contains(&actor)
    }
}

#[test]
fn disconnected_actors_cannot_act() {
    let lobby_directory = Arc::new(Lobby::default());
    let events = Arc::new(CollectingListener::new());
    let mut registry = SessionRegistry::builder()
        .with_clock(Arc::new(spark_engine::ManualClock::new()))
        .with_actor_directory(lobby_directory.clone())
        .with_listener(events.clone())
        .build();
    let id = registry
        .start_game(lobby(5, 7), &GameConfig::default())
        .unwrap();
    let spark = events
        .events_for(id)
        .into_iter()
        .find_map(|e| match e {
            GameEvent::RoleAssigned {
                actor,
                role: Role::Spark,
            } => Some(actor),
            _ => None,
        })
        .unwrap();

    lobby_directory.disconnect(spark);
    assert_eq!(
        registry.open_ability_window(id, spark, AbilityKind::Swipe),
        Err(ineligible(IneligibleReason::Disconnected(spark)))
    );
    assert!(!registry.use_ability(id, spark, AbilityKind::HunterVision, None));

    registry.force_phase(id, Phase::Discussion).unwrap();
    registry.force_phase(id, Phase::Voting).unwrap();
    let other = ActorId::new(if spark == ActorId::new(1) { 2 } else { 1 });
    assert!(!registry.cast_vote(id, spark, other));
    assert!(registry.cast_vote(id, other, spark));
}
