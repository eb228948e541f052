//! Role hand-out.

use std::collections::BTreeMap;

use crate::rng::{Pcg32, Rng};
use crate::{ActorId, Role};

/// Deals roles: the actors are shuffled, the first seat becomes the Spark, the second the Medic
/// (when there are at least two players) and everyone else an Innocent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAssigner;

impl RoleAssigner {
    /// The role dealt to `seat` (0-based, after shuffling).
    #[must_use]
    pub const fn role_for_seat(seat: usize) -> Role {
        match seat {
            0 => Role::Spark,
            1 => Role::Medic,
            _ => Role::Innocent,
        }
    }

    /// Shuffles `actors` with `rng` and deals the roles.
    ///
    /// Duplicate ids collapse into one entry; callers reject duplicates beforehand.
    #[must_use]
    pub fn assign<R: Rng>(actors: &[ActorId], rng: &mut R) -> BTreeMap<ActorId, Role> {
        let mut seats = actors.to_vec();
        rng.shuffle(&mut seats);
        seats
            .into_iter()
            .enumerate()
            .map(|(seat, actor)| (actor, Self::role_for_seat(seat)))
            .collect()
    }

    /// Deals roles reproducibly from `seed`.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_engine::{ActorId, Role, RoleAssigner};
    ///
    /// let actors: Vec<ActorId> = (1..=5).map(ActorId::new).collect();
    /// let roles = RoleAssigner::assign_seeded(&actors, 42);
    /// assert_eq!(roles.values().filter(|r| **r == Role::Spark).count(), 1);
    /// assert_eq!(roles, RoleAssigner::assign_seeded(&actors, 42));
    /// ```
    #[must_use]
    pub fn assign_seeded(actors: &[ActorId], seed: u64) -> BTreeMap<ActorId, Role> {
        Self::assign(actors, &mut Pcg32::seed_from_u64(seed))
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
    use crate::test_config::miri_case_count;
    use proptest::prelude::*;

    fn count(roles: &BTreeMap<ActorId, Role>, role: Role) -> usize {
        roles.values().filter(|r| **r == role).count()
    }

    #[test]
    fn single_player_is_the_spark() {
        let roles = RoleAssigner::assign_seeded(&[ActorId::new(9)], 1);
        assert_eq!(roles.get(&ActorId::new(9)), Some(&Role::Spark));
    }

    #[test]
    fn two_players_get_spark_and_medic() {
        let roles = RoleAssigner::assign_seeded(&[ActorId::new(1), ActorId::new(2)], 5);
        assert_eq!(count(&roles, Role::Spark), 1);
        assert_eq!(count(&roles, Role::Medic), 1);
        assert_eq!(count(&roles, Role::Innocent), 0);
    }

    #[test]
    fn the_spark_moves_around_between_seeds() {
        let actors: Vec<ActorId> = (1..=6).map(ActorId::new).collect();
        let sparks: std::collections::BTreeSet<ActorId> = (0..50)
            .filter_map(|seed| {
                RoleAssigner::assign_seeded(&actors, seed)
                    .into_iter()
                    .find(|(_, role)| *role == Role::Spark)
                    .map(|(actor, _)| actor)
            })
            .collect();
        assert!(sparks.len() > 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: miri_case_count(),
            ..ProptestConfig::default()
        })]

        #[test]
        fn exactly_one_spark_and_at_most_one_medic(n in 1u64..40, seed in any::<u64>()) {
            let actors: Vec<ActorId> = (0..n).map(ActorId::new).collect();
            let roles = RoleAssigner::assign_seeded(&actors, seed);
            prop_assert_eq!(roles.len(), actors.len());
            prop_assert_eq!(count(&roles, Role::Spark), 1);
            prop_assert_eq!(count(&roles, Role::Medic), usize::from(n >= 2));
            prop_assert_eq!(count(&roles, Role::Innocent), actors.len().saturating_sub(2));
        }
    }
}
