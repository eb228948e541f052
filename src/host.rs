//! Narrow interfaces to the host environment.
//!
//! The engine never talks to a game server, a world or a config file directly. Everything it
//! needs from outside comes through the traits in this module.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use web_time::{Duration, Instant};

use crate::{ActorId, GameConfig, Timestamp};

/// Resolves whether an actor is currently connected and able to act.
///
/// Alive-but-disconnected actors stay in the game (and can still be voted out or die of an
/// infection) but cannot vote or use abilities until they reconnect.
pub trait ActorDirectory: Send + Sync {
    /// Whether `actor` is currently connected.
    fn is_connected(&self, actor: ActorId) -> bool;
}

/// Actor directory that treats every actor as connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllConnected;

impl ActorDirectory for AllConnected {
    fn is_connected(&self, _actor: ActorId) -> bool {
        true
    }
}

/// A monotonically non-decreasing time source.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by [`web_time::Instant`], measured from the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp::from_millis(millis)
    }
}

/// A clock that only moves when told to.
///
/// Used by tests and by hosts that already keep their own game time (e.g. a server tick
/// counter).
///
/// # Example
///
/// ```
/// use spark_engine::{Clock, ManualClock, Timestamp};
/// use web_time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_secs(3));
/// assert_eq!(clock.now(), Timestamp::from_secs(3));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at [`Timestamp::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            millis: AtomicU64::new(0),
        }
    }

    /// Creates a clock at `start`.
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(millis))
            });
    }

    /// Sets the clock to `to`. Moving backwards is ignored.
    pub fn set(&self, to: Timestamp) {
        self.millis.fetch_max(to.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Supplies the configuration of a session when it starts.
///
/// The engine reads the config exactly once per [`start_game`](crate::SessionRegistry::start_game);
/// later changes only affect sessions started afterwards.
pub trait ConfigProvider {
    /// The configuration for the next session.
    fn game_config(&self) -> GameConfig;
}

impl ConfigProvider for GameConfig {
    fn game_config(&self) -> GameConfig {
        *self
    }
}

/// A place the host may put a player at game start.
///
/// The engine only checks that at least one exists and hands the set back in
/// [`GameEvent::GameStarted`](crate::GameEvent::GameStarted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// Host-side world or map name.
    pub world: String,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl SpawnPoint {
    /// Creates a spawn point.
    #[must_use]
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
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

    #[test]
    fn manual_clock_moves_forward_only() {
        let clock = ManualClock::starting_at(Timestamp::from_secs(10));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Timestamp::from_millis(10_500));
        clock.set(Timestamp::from_secs(2));
        assert_eq!(clock.now(), Timestamp::from_millis(10_500));
        clock.set(Timestamp::from_secs(20));
        assert_eq!(clock.now(), Timestamp::from_secs(20));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn game_config_provides_itself() {
        let config = GameConfig::quick();
        assert_eq!(config.game_config(), config);
    }

    #[test]
    fn all_connected_accepts_everyone() {
        assert!(AllConnected.is_connected(ActorId::new(1)));
        assert!(AllConnected.is_connected(ActorId::new(u64::MAX)));
    }
}
