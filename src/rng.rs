//! Seeded shuffling for the role hand-out.
//!
//! Hosts that record the seed of a game can deal the exact same roles again later, so the
//! generator has to be small, portable and stable across releases. [`Pcg32`] (PCG-XSH-RR with
//! 64 bits of state) is all the engine needs. It is NOT cryptographically secure.
//!
//! Reference: <https://www.pcg-random.org/>
//!
//! ```rust
//! use spark_engine::rng::{Pcg32, Rng};
//!
//! let mut seats = vec![1, 2, 3, 4, 5];
//! Pcg32::seed_from_u64(12345).shuffle(&mut seats);
//! assert_eq!(seats.len(), 5);
//! ```

use crate::{
    report_violation,
    telemetry::{ViolationKind, ViolationSeverity},
};

const MULTIPLIER: u64 = 6364136223846793005;
const STREAM: u64 = 1442695040888963407;

/// PCG32 generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    /// A generator that always produces the same sequence for `seed`.
    #[must_use]
    pub const fn seed_from_u64(seed: u64) -> Self {
        let inc = (STREAM << 1) | 1;
        let state = inc.wrapping_add(seed);
        Self {
            state: state.wrapping_mul(MULTIPLIER).wrapping_add(inc),
            inc,
        }
    }

    /// A generator seeded from the wall clock and the current thread, for games started without
    /// an explicit seed.
    #[must_use]
    pub fn from_entropy() -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        use web_time::{SystemTime, UNIX_EPOCH};

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        nanos.hash(&mut hasher);
        Self::seed_from_u64(hasher.finish())
    }
}

/// Source of random numbers for role dealing.
pub trait Rng {
    /// Next 32 random bits.
    fn next_u32(&mut self) -> u32;

    /// Next 64 random bits.
    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    /// A uniform value in `0..bound`, without modulo bias.
    ///
    /// A zero bound is reported as a violation and yields 0.
    fn below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::InternalError,
                "random index requested from an empty range"
            );
            return 0;
        }
        let bound = bound as u64;
        let zone = bound.wrapping_neg() % bound;
        loop {
            let value = self.next_u64();
            if value >= zone {
                return (value % bound) as usize;
            }
        }
    }

    /// Fisher-Yates shuffle in place.
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }
}

impl Rng for Pcg32 {
    fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(MULTIPLIER).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        xorshifted.rotate_right((old >> 59) as u32)
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

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Pcg32::seed_from_u64(12345);
        let mut b = Pcg32::seed_from_u64(12345);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = Pcg32::seed_from_u64(12345);
        let mut b = Pcg32::seed_from_u64(54321);
        let same = (0..100).filter(|_| a.next_u32() == b.next_u32()).count();
        assert!(same < 10);
    }

    #[test]
    fn below_zero_yields_zero() {
        assert_eq!(Pcg32::seed_from_u64(7).below(0), 0);
    }

    #[test]
    fn every_seat_is_reachable() {
        let mut seen = [false; 4];
        for seed in 0..200 {
            let mut seats = [0u8, 1, 2, 3];
            Pcg32::seed_from_u64(seed).shuffle(&mut seats);
            seen[seats.iter().position(|&x| x == 0).unwrap()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: miri_case_count(),
            ..ProptestConfig::default()
        })]

        #[test]
        fn below_stays_in_bounds(seed in any::<u64>(), bound in 1usize..1000) {
            let mut rng = Pcg32::seed_from_u64(seed);
            for _ in 0..16 {
                prop_assert!(rng.below(bound) < bound);
            }
        }

        #[test]
        fn shuffle_is_a_permutation(seed in any::<u64>(), len in 0usize..64) {
            let mut items: Vec<usize> = (0..len).collect();
            Pcg32::seed_from_u64(seed).shuffle(&mut items);
            items.sort_unstable();
            prop_assert_eq!(items, (0..len).collect::<Vec<usize>>());
        }
    }
}
