//! Several sessions side by side in one registry.

use std::sync::Arc;

use spark_engine::telemetry::{CollectingObserver, CompositeObserver, ViolationKind};
use spark_engine::{
    assert_no_violations, assert_violation, ActorId, Clock, GameEventListener, ManualClock,
    SessionRegistry, ConfigProvider, GameConfig, GameEvent, Phase, PhaseDurations, Role, SessionId,
    SparkError,
};
use web_time::Duration;

use crate::common::{lobby, TestHost};

struct LobbyConfig {
    swipe_secs: u64,
}

impl ConfigProvider for LobbyConfig {
    fn game_config(&self) -> GameConfig {
        GameConfig {
            phases: PhaseDurations {
                swipe: Duration::from_secs(self.swipe_secs),
                ..PhaseDurations::default()
            },
            ..GameConfig::default()
        }
    }
}

#[test]
fn sessions_run_on_their_own_clocks_and_configs() {
    let mut host = TestHost::new();
    let fast = host
        .registry
        .start_game(lobby(4, 1), &LobbyConfig { swipe_secs: 5 })
        .unwrap();
    let slow = host.start(4, GameConfig::default());

    host.advance_secs(5);
    assert_eq!(host.registry.current_phase(fast), Some(Phase::Discussion));
    assert_eq!(host.registry.current_phase(slow), Some(Phase::Swipe));
    assert_eq!(host.registry.len(), 2);
    assert_eq!(
        host.registry.session_ids().collect::<Vec<_>>(),
        vec![SessionId::new(1), SessionId::new(2)]
    );

    let fast_events = host.events.events_for(fast);
    let slow_events = host.events.events_for(slow);
    assert!(fast_events
        .iter()
        .any(|e| matches!(e, GameEvent::PhaseChanged { to: Phase::Discussion, .. })));
    assert!(!slow_events
        .iter()
        .any(|e| matches!(e, GameEvent::PhaseChanged { to: Phase::Discussion, .. })));
}

#[test]
fn finished_sessions_are_dropped_and_others_keep_going() {
    let mut host = TestHost::new();
    let doomed = host.start(4, GameConfig::default());
    let survivor = host.start(4, GameConfig::default());
    let spark = host.actor_with(doomed, Role::Spark);

    host.registry.actor_left(doomed, spark).unwrap();

    assert!(host.registry.session(doomed).is_none());
    assert_eq!(host.registry.current_phase(survivor), Some(Phase::Swipe));
    assert_eq!(
        host.registry.actor_left(doomed, spark),
        Err(SparkError::UnknownSession { session: doomed })
    );
    assert_eq!(
        host.registry.tick(doomed, host.clock.now()),
        Err(SparkError::UnknownSession { session: doomed })
    );

    let next = host.start(4, GameConfig::default());
    assert_eq!(next, SessionId::new(3));
}

#[test]
fn invalid_setups_never_register_a_session() {
    let mut host = TestHost::new();
    let no_spawns = spark_engine::GameSetup::new("bare", [ActorId::new(1), ActorId::new(2)]);
    assert_eq!(
        host.registry.start_game(no_spawns, &GameConfig::default()),
        Err(SparkError::MissingPrerequisite {
            what: "spawn locations"
        })
    );

    let mut broken = GameConfig::default();
    broken.phases.voting = Duration::ZERO;
    assert!(matches!(
        host.registry.start_game(lobby(4, 1), &broken),
        Err(SparkError::InvalidConfig { .. })
    ));

    assert!(host.registry.is_empty());
    assert!(host.events.events().is_empty());
}

#[test]
fn snapshots_hide_roles() {
    let mut host = TestHost::new();
    let id = host.start(6, GameConfig::default());
    host.advance_secs(3);

    let snapshot = host.registry.snapshot(id).unwrap();
    assert_eq!(snapshot.id, id);
    assert_eq!(snapshot.name, "lobby-7");
    assert_eq!(snapshot.phase, Phase::Swipe);
    assert_eq!(snapshot.previous_phase, Some(Phase::Waiting));
    assert_eq!(snapshot.remaining_seconds, Some(27));
    assert_eq!(snapshot.alive, (1..=6).map(ActorId::new).collect::<Vec<_>>());
    assert_eq!(snapshot.participating, snapshot.alive);
    assert_eq!(snapshot.required_votes, 3);
    assert_eq!(snapshot.result, None);
}

#[cfg(feature = "json")]
#[test]
fn snapshot_serializes_to_json() {
    let mut host = TestHost::new();
    let id = host.start(4, GameConfig::default());

    let json = host.registry.snapshot(id).unwrap().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["phase"], "swipe");
    assert_eq!(value["round"], 1);
    assert_eq!(value["alive"].as_array().map(Vec::len), Some(4));
    assert!(!json.contains("spark"));
}

#[test]
fn ending_a_game_emits_session_closed_once() {
    let mut host = TestHost::new();
    let id = host.start(4, GameConfig::default());

    host.registry.end_game(id).unwrap();
    host.advance_secs(40);

    assert_eq!(
        host.events_where(id, |e| matches!(e, GameEvent::SessionClosed))
            .len(),
        1
    );
    assert!(host
        .events_where(id, |e| matches!(e, GameEvent::CountdownFinished { .. }))
        .is_empty());
    assert!(host.registry.is_empty());
}

struct Heckler;

impl GameEventListener for Heckler {
    fn on_event(&self, _session: SessionId, event: &GameEvent) {
        if matches!(event, GameEvent::PhaseChanged { to: Phase::Discussion, .. }) {
            panic!("heckled");
        }
    }
}

#[test]
fn a_panicking_listener_is_reported_to_every_observer() {
    let audit = Arc::new(CollectingObserver::new());
    let alerts = Arc::new(CollectingObserver::new());
    let observers = CompositeObserver::from_observers(vec![audit.clone(), alerts.clone()]);
    let mut registry = SessionRegistry::builder()
        .with_clock(Arc::new(ManualClock::new()))
        .with_listener(Arc::new(Heckler))
        .with_violation_observer(Arc::new(observers))
        .build();
    let id = registry
        .start_game(lobby(5, 3), &GameConfig::default())
        .unwrap();
    assert_no_violations!(audit);

    registry.skip_phase(id).unwrap();

    assert_eq!(registry.current_phase(id), Some(Phase::Discussion));
    assert_violation!(audit, ViolationKind::Listener);
    assert_violation!(alerts, ViolationKind::Listener);
    assert_eq!(audit.violations()[0].session, Some(id));
}
