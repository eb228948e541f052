//! Tokio ticker for a shared registry.
//!
//! The engine itself is synchronous: every session advances only when [`SessionRegistry::tick`]
//! or [`SessionRegistry::tick_all`] is called. Hosts already running a Tokio runtime can hand the
//! registry to [`spawn_ticker`] instead of wiring their own timer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use spark_engine::driver::spawn_ticker;
//! use spark_engine::SessionRegistry;
//! use web_time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let registry = Arc::new(Mutex::new(SessionRegistry::new()));
//!     let ticker = spawn_ticker(registry.clone(), Duration::from_millis(250));
//!
//!     // ... feed player actions into `registry` from other tasks ...
//!
//!     ticker.stop().await;
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use web_time::Duration;

use crate::SessionRegistry;

/// Handle to a running ticker task.
#[derive(Debug)]
pub struct TickerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TickerHandle {
    /// Asks the ticker to stop and waits for it to finish its current tick.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::debug!(error = %err, "ticker task ended abnormally");
        }
    }

    /// Whether the ticker task already ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a task that calls [`SessionRegistry::tick_to_clock`] every `period`.
///
/// Missed periods are not replayed in a burst: sessions convert elapsed wall time into countdown
/// seconds themselves.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn spawn_ticker(registry: Arc<Mutex<SessionRegistry>>, period: Duration) -> TickerHandle {
    let (shutdown, mut stopped) = watch::channel(false);
    let period = period.max(Duration::from_millis(1));
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => registry.lock().tick_to_clock(),
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                },
            }
        }
        tracing::debug!("session ticker stopped");
    });
    TickerHandle { shutdown, task }
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
    use crate::{ActorId, GameConfig, GameSetup, ManualClock, Phase, SpawnPoint};

    #[tokio::test]
    async fn ticker_advances_sessions_with_the_registry_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut registry = SessionRegistry::builder()
            .with_clock(clock.clone())
            .build();
        let id = registry
            .start_game(
                GameSetup::new("tokio", (1..=4).map(ActorId::new))
                    .with_spawns(vec![SpawnPoint::new("arena", 0.0, 0.0, 0.0)])
                    .with_seed(1),
                &GameConfig::quick(),
            )
            .unwrap();
        let registry = Arc::new(Mutex::new(registry));

        clock.advance(Duration::from_secs(15));
        let ticker = spawn_ticker(registry.clone(), Duration::from_millis(5));

        let mut phase = None;
        for _ in 0..200 {
            phase = registry.lock().current_phase(id);
            if phase == Some(Phase::Discussion) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        ticker.stop().await;
        assert_eq!(phase, Some(Phase::Discussion));
    }
}
