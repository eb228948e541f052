//! Time-boxed ability windows.
//!
//! `Swipe`, `Cure` and `Delusion` are two-step abilities: the actor first arms a window, then
//! names a target before the window runs out. The [`AbilityWindowManager`] only decides whether
//! a window may be opened and whether one is active; applying the ability is the session's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::error::{IneligibleReason, SparkError};
use crate::state::GameState;
use crate::{AbilityKind, ActorId, Phase, Timestamp};

/// Identifies one specific window.
///
/// A token handed out for a window that has since been replaced, consumed or discarded never
/// matches again, so delayed cleanup for an old window cannot close a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowToken {
    round: u32,
    expires_at: Timestamp,
}

impl WindowToken {
    /// The round the window was opened in.
    #[must_use]
    pub const fn round(&self) -> u32 {
        self.round
    }

    /// When the window closes on its own.
    #[must_use]
    pub const fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

/// An armed ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityWindow {
    /// The actor who armed it.
    pub actor: ActorId,
    /// The ability.
    pub kind: AbilityKind,
    /// When it was opened.
    pub opened_at: Timestamp,
    /// When it closes on its own.
    pub expires_at: Timestamp,
    /// The round it belongs to.
    pub round: u32,
}

impl AbilityWindow {
    /// The token identifying this window.
    #[must_use]
    pub const fn token(&self) -> WindowToken {
        WindowToken {
            round: self.round,
            expires_at: self.expires_at,
        }
    }

    /// Whether the window is still open at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// At most one window per (actor, ability) pair, scoped to the current round.
#[derive(Debug, Clone, Default)]
pub struct AbilityWindowManager {
    round: u32,
    windows: BTreeMap<(ActorId, AbilityKind), AbilityWindow>,
}

impl AbilityWindowManager {
    /// Creates a manager with no windows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The round new windows are tagged with.
    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Opens a window for `actor` to use `kind` until `now + duration`.
    ///
    /// # Errors
    ///
    /// Returns [`SparkError::IneligibleAction`] when:
    /// - `kind` is an instant ability
    /// - `phase` is not [`Phase::Swipe`]
    /// - the actor is not alive, or their role does not grant `kind`
    /// - the actor already used `kind` this round
    /// - a window of the same kind is still open for the actor
    pub fn start_window(
        &mut self,
        state: &GameState,
        phase: Phase,
        actor: ActorId,
        kind: AbilityKind,
        duration: Duration,
        now: Timestamp,
    ) -> Result<WindowToken, SparkError> {
        if !kind.uses_window() {
            return Err(IneligibleReason::Instant(kind).into());
        }
        if phase != Phase::Swipe {
            return Err(IneligibleReason::WrongPhase { current: phase }.into());
        }
        if !state.is_alive(actor) {
            return Err(IneligibleReason::ActorNotAlive(actor).into());
        }
        match state.role_of(actor) {
            Some(role) if role.permits(kind) => {},
            Some(_) | None => return Err(IneligibleReason::WrongRole { actor, kind }.into()),
        }
        if state.has_used(actor, kind) {
            return Err(IneligibleReason::AlreadyUsed { actor, kind }.into());
        }
        if self.is_window_active(actor, kind, now) {
            return Err(IneligibleReason::WindowAlreadyOpen(kind).into());
        }

        let window = AbilityWindow {
            actor,
            kind,
            opened_at: now,
            expires_at: now.saturating_add(duration),
            round: self.round,
        };
        tracing::debug!(%actor, %kind, expires_at = %window.expires_at, "ability window opened");
        self.windows.insert((actor, kind), window);
        Ok(window.token())
    }

    /// Whether `actor` has an open `kind` window from the current round at `now`.
    #[must_use]
    pub fn is_window_active(&self, actor: ActorId, kind: AbilityKind, now: Timestamp) -> bool {
        self.windows
            .get(&(actor, kind))
            .is_some_and(|w| w.round == self.round && w.is_open_at(now))
    }

    /// The token of the active `kind` window of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`IneligibleReason::NoActiveWindow`] if there is none.
    pub fn require_active(
        &self,
        actor: ActorId,
        kind: AbilityKind,
        now: Timestamp,
    ) -> Result<WindowToken, SparkError> {
        match self.windows.get(&(actor, kind)) {
            Some(window) if window.round == self.round && window.is_open_at(now) => {
                Ok(window.token())
            },
            Some(_) | None => Err(IneligibleReason::NoActiveWindow(kind).into()),
        }
    }

    /// Removes the `kind` window of `actor`.
    ///
    /// With `Some(token)` only the window identified by that token is closed; a stale token
    /// leaves the current window alone.
    pub fn close_window(
        &mut self,
        actor: ActorId,
        kind: AbilityKind,
        token: Option<WindowToken>,
    ) -> Option<AbilityWindow> {
        let key = (actor, kind);
        match (self.windows.get(&key), token) {
            (Some(window), Some(token)) if window.token() != token => None,
            (Some(_), _) => self.windows.remove(&key),
            (None, _) => None,
        }
    }

    /// Closes every window whose expiry is at or before `now` and returns them.
    pub fn expire(&mut self, now: Timestamp) -> Vec<AbilityWindow> {
        let due: Vec<(ActorId, AbilityKind)> = self
            .windows
            .iter()
            .filter(|(_, w)| !w.is_open_at(now))
            .map(|(key, _)| *key)
            .collect();
        due.into_iter()
            .filter_map(|key| self.windows.remove(&key))
            .collect()
    }

    /// Closes every window owned by `actor` and returns them.
    pub fn remove_actor(&mut self, actor: ActorId) -> Vec<AbilityWindow> {
        let owned: Vec<(ActorId, AbilityKind)> = self
            .windows
            .keys()
            .filter(|(owner, _)| *owner == actor)
            .copied()
            .collect();
        owned
            .into_iter()
            .filter_map(|key| self.windows.remove(&key))
            .collect()
    }

    /// Discards every window and tags future windows with `round`.
    pub fn invalidate_round(&mut self, round: u32) -> Vec<AbilityWindow> {
        self.round = round;
        std::mem::take(&mut self.windows).into_values().collect()
    }

    /// Number of tracked windows, including ones that expired but were not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no window is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
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
    use crate::Role;

    const SPARK: ActorId = ActorId::new(1);
    const MEDIC: ActorId = ActorId::new(2);
    const INNOCENT: ActorId = ActorId::new(3);
    const TEN_SECS: Duration = Duration::from_secs(10);

    fn state() -> GameState {
        let mut roles = BTreeMap::new();
        roles.insert(SPARK, Role::Spark);
        roles.insert(MEDIC, Role::Medic);
        roles.insert(INNOCENT, Role::Innocent);
        let mut state = GameState::new("windows");
        state.populate("windows", roles);
        state
    }

    fn manager() -> AbilityWindowManager {
        let mut manager = AbilityWindowManager::new();
        manager.invalidate_round(1);
        manager
    }

    fn reason(err: SparkError) -> IneligibleReason {
        match err {
            SparkError::IneligibleAction { reason } => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn window_is_active_until_expiry() {
        let state = state();
        let mut windows = manager();
        let t0 = Timestamp::from_secs(5);
        let token = windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Swipe, TEN_SECS, t0)
            .unwrap();

        assert_eq!(token.expires_at(), Timestamp::from_secs(15));
        assert_eq!(token.round(), 1);
        assert!(windows.is_window_active(SPARK, AbilityKind::Swipe, Timestamp::from_secs(14)));
        assert!(!windows.is_window_active(SPARK, AbilityKind::Swipe, Timestamp::from_secs(15)));
        assert!(!windows.is_window_active(SPARK, AbilityKind::Delusion, t0));
    }

    #[test]
    fn start_window_rejections() {
        let mut state = state();
        let mut windows = manager();
        let now = Timestamp::ZERO;

        let err = windows
            .start_window(&state, Phase::Discussion, SPARK, AbilityKind::Swipe, TEN_SECS, now)
            .unwrap_err();
        assert_eq!(
            reason(err),
            IneligibleReason::WrongPhase {
                current: Phase::Discussion
            }
        );

        let err = windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::Swipe, TEN_SECS, now)
            .unwrap_err();
        assert_eq!(
            reason(err),
            IneligibleReason::WrongRole {
                actor: MEDIC,
                kind: AbilityKind::Swipe
            }
        );

        let err = windows
            .start_window(&state, Phase::Swipe, INNOCENT, AbilityKind::Cure, TEN_SECS, now)
            .unwrap_err();
        assert!(matches!(reason(err), IneligibleReason::WrongRole { .. }));

        let err = windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::HealingSight, TEN_SECS, now)
            .unwrap_err();
        assert_eq!(reason(err), IneligibleReason::Instant(AbilityKind::HealingSight));

        state.mark_used(SPARK, AbilityKind::Swipe);
        let err = windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Swipe, TEN_SECS, now)
            .unwrap_err();
        assert_eq!(
            reason(err),
            IneligibleReason::AlreadyUsed {
                actor: SPARK,
                kind: AbilityKind::Swipe
            }
        );

        state.eliminate(MEDIC);
        let err = windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::Cure, TEN_SECS, now)
            .unwrap_err();
        assert_eq!(reason(err), IneligibleReason::ActorNotAlive(MEDIC));
        assert!(windows.is_empty());
    }

    #[test]
    fn reopening_an_active_window_is_rejected_but_expired_one_is_replaced() {
        let state = state();
        let mut windows = manager();
        windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Delusion, TEN_SECS, Timestamp::ZERO)
            .unwrap();

        let err = windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Delusion, TEN_SECS, Timestamp::from_secs(3))
            .unwrap_err();
        assert_eq!(reason(err), IneligibleReason::WindowAlreadyOpen(AbilityKind::Delusion));

        let token = windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Delusion, TEN_SECS, Timestamp::from_secs(10))
            .unwrap();
        assert_eq!(token.expires_at(), Timestamp::from_secs(20));
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn stale_token_does_not_close_newer_window() {
        let state = state();
        let mut windows = manager();
        let old = windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::Cure, TEN_SECS, Timestamp::ZERO)
            .unwrap();
        let new = windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::Cure, TEN_SECS, Timestamp::from_secs(12))
            .unwrap();

        assert!(windows.close_window(MEDIC, AbilityKind::Cure, Some(old)).is_none());
        assert!(windows.is_window_active(MEDIC, AbilityKind::Cure, Timestamp::from_secs(13)));
        assert!(windows.close_window(MEDIC, AbilityKind::Cure, Some(new)).is_some());
        assert!(windows.close_window(MEDIC, AbilityKind::Cure, None).is_none());
    }

    #[test]
    fn expire_reports_only_due_windows() {
        let state = state();
        let mut windows = manager();
        windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Swipe, Duration::from_secs(5), Timestamp::ZERO)
            .unwrap();
        windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::Cure, TEN_SECS, Timestamp::ZERO)
            .unwrap();

        let expired = windows.expire(Timestamp::from_secs(5));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].actor, SPARK);
        assert_eq!(windows.len(), 1);
        assert!(windows.require_active(MEDIC, AbilityKind::Cure, Timestamp::from_secs(6)).is_ok());
    }

    #[test]
    fn invalidate_round_discards_everything() {
        let state = state();
        let mut windows = manager();
        let token = windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Swipe, TEN_SECS, Timestamp::ZERO)
            .unwrap();

        let discarded = windows.invalidate_round(2);
        assert_eq!(discarded.len(), 1);
        assert_eq!(windows.round(), 2);
        assert!(!windows.is_window_active(SPARK, AbilityKind::Swipe, Timestamp::from_secs(1)));
        assert!(windows.close_window(SPARK, AbilityKind::Swipe, Some(token)).is_none());
    }

    #[test]
    fn remove_actor_only_touches_their_windows() {
        let state = state();
        let mut windows = manager();
        windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Swipe, TEN_SECS, Timestamp::ZERO)
            .unwrap();
        windows
            .start_window(&state, Phase::Swipe, SPARK, AbilityKind::Delusion, TEN_SECS, Timestamp::ZERO)
            .unwrap();
        windows
            .start_window(&state, Phase::Swipe, MEDIC, AbilityKind::Cure, TEN_SECS, Timestamp::ZERO)
            .unwrap();

        assert_eq!(windows.remove_actor(SPARK).len(), 2);
        assert_eq!(windows.len(), 1);
    }
}
