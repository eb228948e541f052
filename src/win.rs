//! Win conditions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::GameState;
use crate::Role;

/// Which side won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinResult {
    /// The Spark is out.
    InnocentsWin,
    /// The Spark outlasted the group.
    SparkWins,
}

impl WinResult {
    /// Returns a string representation suitable for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InnocentsWin => "innocents",
            Self::SparkWins => "spark",
        }
    }

    /// Whether a participant holding `role` is on the winning side.
    ///
    /// The Medic plays for the Innocents.
    #[must_use]
    pub const fn is_winner(&self, role: Role) -> bool {
        match (self, role) {
            (Self::SparkWins, Role::Spark) => true,
            (Self::InnocentsWin, Role::Medic | Role::Innocent) => true,
            (Self::SparkWins, Role::Medic | Role::Innocent) | (Self::InnocentsWin, Role::Spark) => {
                false
            },
        }
    }
}

impl fmt::Display for WinResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a game is over. Stateless; every call looks only at the [`GameState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WinConditionEvaluator;

impl WinConditionEvaluator {
    /// Evaluates the rules in order and returns the first that fires:
    ///
    /// 1. no Spark alive → [`WinResult::InnocentsWin`]
    /// 2. no Innocent alive → [`WinResult::SparkWins`]
    /// 3. exactly two players alive → [`WinResult::SparkWins`]
    ///
    /// `None` means the game continues.
    #[must_use]
    pub fn evaluate(state: &GameState) -> Option<WinResult> {
        if state.alive_with_role(Role::Spark) == 0 {
            return Some(WinResult::InnocentsWin);
        }
        if state.alive_with_role(Role::Innocent) == 0 {
            return Some(WinResult::SparkWins);
        }
        if state.alive_count() == 2 {
            return Some(WinResult::SparkWins);
        }
        None
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
    use crate::ActorId;
    use std::collections::BTreeMap;

    fn a(raw: u64) -> ActorId {
        ActorId::new(raw)
    }

    /// Actor 1 is the Spark, actor 2 the Medic, the rest Innocents.
    fn state(n: u64) -> GameState {
        let roles: BTreeMap<_, _> = (1..=n)
            .map(|raw| {
                let role = match raw {
                    1 => Role::Spark,
                    2 => Role::Medic,
                    _ => Role::Innocent,
                };
                (a(raw), role)
            })
            .collect();
        let mut state = GameState::new("win");
        state.populate("win", roles);
        state
    }

    #[test]
    fn full_lobby_continues() {
        assert_eq!(WinConditionEvaluator::evaluate(&state(5)), None);
    }

    #[test]
    fn dead_spark_means_innocents_win() {
        let mut state = state(5);
        state.eliminate(a(1));
        assert_eq!(
            WinConditionEvaluator::evaluate(&state),
            Some(WinResult::InnocentsWin)
        );
    }

    #[test]
    fn spark_wins_without_innocents_even_if_medic_lives() {
        let mut state = state(5);
        for raw in 3..=5 {
            state.eliminate(a(raw));
        }
        assert_eq!(
            WinConditionEvaluator::evaluate(&state),
            Some(WinResult::SparkWins)
        );
    }

    #[test]
    fn two_survivors_hand_the_spark_the_win() {
        let mut state = state(4);
        state.eliminate(a(2));
        state.eliminate(a(3));
        assert_eq!(state.alive_count(), 2);
        assert_eq!(
            WinConditionEvaluator::evaluate(&state),
            Some(WinResult::SparkWins)
        );
    }

    #[test]
    fn dead_spark_takes_precedence_over_two_survivors() {
        let mut state = state(4);
        state.eliminate(a(1));
        state.eliminate(a(2));
        assert_eq!(
            WinConditionEvaluator::evaluate(&state),
            Some(WinResult::InnocentsWin)
        );
    }

    #[test]
    fn medic_sides_with_innocents() {
        assert!(WinResult::InnocentsWin.is_winner(Role::Medic));
        assert!(!WinResult::InnocentsWin.is_winner(Role::Spark));
        assert!(WinResult::SparkWins.is_winner(Role::Spark));
        assert_eq!(WinResult::SparkWins.to_string(), "spark");
    }
}
