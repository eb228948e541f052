//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - [`TestHost`]: a registry wired to a manual clock, an event collector and a violation
//!   collector
//! - lobby helpers to start games with fixed seeds
//! - `init_logging()` to see engine logs in failing tests
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{TestHost, lobby};
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use spark_engine::telemetry::CollectingObserver;
use spark_engine::{
    ActorId, Clock, CollectingListener, GameConfig, GameEvent, GameSetup, ManualClock, Role,
    SessionId, SessionRegistry, SpawnPoint,
};
use web_time::Duration;

static LOGGING: OnceLock<()> = OnceLock::new();

/// Routes engine logs to the test writer. Set `TEST_LOG=debug` for more output.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let level = match std::env::var("TEST_LOG").as_deref() {
            Ok("trace") => tracing::Level::TRACE,
            Ok("debug") => tracing::Level::DEBUG,
            Ok("info") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .without_time()
            .try_init()
            .ok();
    });
}

/// A game setup for actors `1..=players` with one spawn point and a fixed seed.
pub fn lobby(players: u64, seed: u64) -> GameSetup {
    GameSetup::new(format!("lobby-{seed}"), (1..=players).map(ActorId::new))
        .with_spawns(vec![SpawnPoint::new("arena", 0.5, 64.0, 0.5)])
        .with_seed(seed)
}

/// A registry plus the instruments tests need to drive and observe it.
pub struct TestHost {
    pub registry: SessionRegistry,
    pub clock: Arc<ManualClock>,
    pub events: Arc<CollectingListener>,
    pub violations: Arc<CollectingObserver>,
}

impl TestHost {
    pub fn new() -> Self {
        init_logging();
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(CollectingListener::new());
        let violations = Arc::new(CollectingObserver::new());
        let registry = SessionRegistry::builder()
            .with_clock(clock.clone())
            .with_listener(events.clone())
            .with_violation_observer(violations.clone())
            .build();
        Self {
            registry,
            clock,
            events,
            violations,
        }
    }

    /// Starts a game for `players` actors with `config`.
    pub fn start(&mut self, players: u64, config: GameConfig) -> SessionId {
        self.registry
            .start_game(lobby(players, 7), &config)
            .expect("game should start")
    }

    /// Moves the clock forward and ticks every session.
    pub fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
        let now = self.clock.now();
        self.registry.tick_all(now);
    }

    /// Moves the clock forward one second at a time, ticking after each.
    pub fn advance_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            self.advance(Duration::from_secs(1));
        }
    }

    /// Role map as announced in `GameStarted`.
    pub fn roles(&self, id: SessionId) -> BTreeMap<ActorId, Role> {
        self.events
            .events_for(id)
            .into_iter()
            .find_map(|event| match event {
                GameEvent::GameStarted { roles, .. } => Some(roles),
                _ => None,
            })
            .expect("game started event")
    }

    /// The lowest-id actor holding `role`.
    pub fn actor_with(&self, id: SessionId, role: Role) -> ActorId {
        self.roles(id)
            .into_iter()
            .find(|(_, r)| *r == role)
            .map(|(actor, _)| actor)
            .expect("role should be dealt")
    }

    /// Every actor holding `role`, ascending.
    pub fn actors_with(&self, id: SessionId, role: Role) -> Vec<ActorId> {
        self.roles(id)
            .into_iter()
            .filter(|(_, r)| *r == role)
            .map(|(actor, _)| actor)
            .collect()
    }

    /// Events of `id` matching `predicate`.
    pub fn events_where(&self, id: SessionId, predicate: impl Fn(&GameEvent) -> bool) -> Vec<GameEvent> {
        self.events
            .events_for(id)
            .into_iter()
            .filter(|event| predicate(event))
            .collect()
    }
}
