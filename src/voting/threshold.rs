//! The dynamic vote threshold.
//!
//! Small games need a large share of the group to agree; large games only a fifth of it.
//! Between the configured anchors the required fraction follows a logarithmic curve, and every
//! voting phase that ends without an elimination lowers the bar a little so stalemates resolve.

use crate::config::{ThresholdAnchor, ThresholdConfig};

/// Absorbs floating point noise before rounding a vote count up.
const CEIL_EPSILON: f64 = 1e-9;

/// Pure threshold maths over a [`ThresholdConfig`].
///
/// # Example
///
/// ```
/// use spark_engine::{DynamicVotingThreshold, ThresholdConfig};
///
/// let threshold = DynamicVotingThreshold::new(ThresholdConfig::default());
/// assert_eq!(threshold.required_votes(20, 0), 4);
/// assert_eq!(threshold.required_votes(7, 0), 3);
/// assert_eq!(threshold.required_votes(7, 3), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DynamicVotingThreshold {
    config: ThresholdConfig,
}

impl DynamicVotingThreshold {
    /// Wraps a threshold configuration.
    #[must_use]
    pub const fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Required vote fraction for `alive` players before any stalemate relief.
    ///
    /// Fewer than two alive players can never eliminate anyone, so the fraction is `1.0`.
    #[must_use]
    pub fn base_threshold(&self, alive: u32) -> f64 {
        let ThresholdConfig {
            small,
            medium,
            large,
            ..
        } = self.config;

        if alive < 2 {
            1.0
        } else if alive <= small.players {
            small.fraction
        } else if alive <= medium.players {
            interpolate(alive, small, medium)
        } else if alive <= large.players {
            interpolate(alive, medium, large)
        } else {
            large.fraction
        }
    }

    /// Threshold reduction after `no_elimination_phases` consecutive stalemates.
    #[must_use]
    pub fn penalty(&self, no_elimination_phases: u32) -> f64 {
        let counted = no_elimination_phases.min(self.config.max_penalty_phases);
        (f64::from(counted) * self.config.penalty_per_phase).min(self.config.max_penalty)
    }

    /// Base threshold minus the stalemate penalty, clamped to `[0, 1]`.
    #[must_use]
    pub fn effective_threshold(&self, alive: u32, no_elimination_phases: u32) -> f64 {
        (self.base_threshold(alive) - self.penalty(no_elimination_phases)).clamp(0.0, 1.0)
    }

    /// Votes a single target needs to be eliminated.
    #[must_use]
    pub fn required_votes(&self, alive: u32, no_elimination_phases: u32) -> u32 {
        let exact = f64::from(alive) * self.effective_threshold(alive, no_elimination_phases);
        (exact - CEIL_EPSILON).ceil().max(0.0) as u32
    }

    /// Whether `votes` reach the required count.
    #[must_use]
    pub fn meets_threshold(&self, votes: u32, alive: u32, no_elimination_phases: u32) -> bool {
        votes >= self.required_votes(alive, no_elimination_phases)
    }
}

/// Interpolates the fraction between two anchors on a log player scale. Exact anchor counts
/// return the anchor's own fraction.
fn interpolate(alive: u32, from: ThresholdAnchor, to: ThresholdAnchor) -> f64 {
    if alive == from.players {
        return from.fraction;
    }
    if alive == to.players {
        return to.fraction;
    }
    let x = f64::from(alive).ln();
    let x1 = f64::from(from.players).ln();
    let x2 = f64::from(to.players).ln();
    from.fraction + (to.fraction - from.fraction) * (x - x1) / (x2 - x1)
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

    fn default_threshold() -> DynamicVotingThreshold {
        DynamicVotingThreshold::new(ThresholdConfig::default())
    }

    #[test]
    fn twenty_players_need_four_votes() {
        assert_eq!(default_threshold().required_votes(20, 0), 4);
    }

    #[test]
    fn seven_players_need_three_votes() {
        assert_eq!(default_threshold().required_votes(7, 0), 3);
    }

    #[test]
    fn three_players_need_two_votes() {
        assert_eq!(default_threshold().required_votes(3, 0), 2);
    }

    #[test]
    fn stalemates_lower_the_bar() {
        let threshold = default_threshold();
        let effective = threshold.effective_threshold(7, 3);
        assert!((effective - 0.2001).abs() < 1e-9, "effective = {effective}");
        assert_eq!(threshold.required_votes(7, 3), 2);
        assert!(threshold.meets_threshold(2, 7, 3));
        assert!(!threshold.meets_threshold(2, 7, 0));
    }

    #[test]
    fn anchors_are_exact() {
        let threshold = default_threshold();
        assert_eq!(threshold.base_threshold(3), 0.50);
        assert_eq!(threshold.base_threshold(7), 0.30);
        assert_eq!(threshold.base_threshold(20), 0.20);
    }

    #[test]
    fn edges_of_the_curve() {
        let threshold = default_threshold();
        assert_eq!(threshold.base_threshold(0), 1.0);
        assert_eq!(threshold.base_threshold(1), 1.0);
        assert_eq!(threshold.base_threshold(2), 0.50);
        assert_eq!(threshold.base_threshold(100), 0.20);
        assert_eq!(threshold.required_votes(0, 0), 0);
        assert_eq!(threshold.required_votes(1, 0), 1);
        assert_eq!(threshold.required_votes(2, 0), 1);
    }

    #[test]
    fn interpolation_stays_between_anchors() {
        let threshold = default_threshold();
        for alive in 4..7 {
            let value = threshold.base_threshold(alive);
            assert!(value < 0.50 && value > 0.30, "{alive}: {value}");
        }
        for alive in 8..20 {
            let value = threshold.base_threshold(alive);
            assert!(value < 0.30 && value > 0.20, "{alive}: {value}");
        }
    }

    #[test]
    fn penalty_caps_at_phase_limit_and_total() {
        let threshold = default_threshold();
        assert_eq!(threshold.penalty(0), 0.0);
        assert!((threshold.penalty(1) - 0.0333).abs() < 1e-12);
        assert_eq!(threshold.penalty(3), threshold.penalty(50));
        assert!(threshold.penalty(50) <= 0.10);

        let strict = DynamicVotingThreshold::new(ThresholdConfig::strict());
        assert_eq!(strict.penalty(10), 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: miri_case_count(),
            ..ProptestConfig::default()
        })]

        #[test]
        fn base_threshold_never_rises_with_more_players(a in 3u32..=20, b in 3u32..=20) {
            prop_assume!(a < b);
            let threshold = default_threshold();
            prop_assert!(threshold.base_threshold(a) >= threshold.base_threshold(b));
        }

        #[test]
        fn effective_threshold_is_bounded(alive in 0u32..200, stalemates in 0u32..20) {
            let threshold = default_threshold();
            let base = threshold.base_threshold(alive);
            let effective = threshold.effective_threshold(alive, stalemates);
            let floor = (base - threshold.config().max_penalty).max(0.0);
            prop_assert!(effective <= base);
            prop_assert!(effective >= floor - 1e-12);
        }

        #[test]
        fn required_votes_never_exceed_alive(alive in 0u32..500, stalemates in 0u32..10) {
            let threshold = default_threshold();
            prop_assert!(threshold.required_votes(alive, stalemates) <= alive);
        }
    }
}
