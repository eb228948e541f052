//! Configuration types for Spark sessions.
//!
//! A [`GameConfig`] is read once when a session starts; changing a provider's config afterwards
//! only affects sessions started later.
//!
//! # Overview
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `PhaseDurations` | Countdown length of the timed phases | `quick()`, `relaxed()` |
//! | `ThresholdConfig` | Vote threshold anchors and stalemate penalty | `strict()` |
//! | `AbilityConfig` | Window length, infection delay, delusion decay | `quick()` |
//! | `GameConfig` | Everything above | `quick()`, `relaxed()`, `large_lobby()` |
//!
//! # Example
//!
//! ```
//! use spark_engine::{GameConfig, PhaseDurations};
//! use web_time::Duration;
//!
//! let config = GameConfig {
//!     phases: PhaseDurations {
//!         discussion: Duration::from_secs(90),
//!         ..PhaseDurations::default()
//!     },
//!     ..GameConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::{Phase, SparkError};

/// Longest accepted countdown for any timed phase.
const MAX_PHASE_SECS: u64 = 3600;

/// Countdown lengths of the three timed phases.
///
/// Countdowns tick once per second, so sub-second parts are rounded up to the next whole second.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Always use the
/// `..PhaseDurations::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "PhaseDurations has no effect unless placed in a GameConfig"]
pub struct PhaseDurations {
    /// How long the Spark and Medic have to use their abilities.
    ///
    /// Default: 30s
    pub swipe: Duration,
    /// How long players talk before voting opens.
    ///
    /// Default: 60s
    pub discussion: Duration,
    /// How long the vote stays open.
    ///
    /// Default: 30s
    pub voting: Duration,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            swipe: Duration::from_secs(30),
            discussion: Duration::from_secs(60),
            voting: Duration::from_secs(30),
        }
    }
}

impl PhaseDurations {
    /// Creates a new `PhaseDurations` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short phases for small lobbies and local testing.
    pub fn quick() -> Self {
        Self {
            swipe: Duration::from_secs(15),
            discussion: Duration::from_secs(20),
            voting: Duration::from_secs(15),
        }
    }

    /// Long phases for voice-chat groups that like to argue.
    pub fn relaxed() -> Self {
        Self {
            swipe: Duration::from_secs(45),
            discussion: Duration::from_secs(120),
            voting: Duration::from_secs(45),
        }
    }

    /// Countdown length in whole seconds for a timed phase, `None` for untimed phases.
    #[must_use]
    pub fn seconds_for(&self, phase: Phase) -> Option<u32> {
        let duration = match phase {
            Phase::Swipe => self.swipe,
            Phase::Discussion => self.discussion,
            Phase::Voting => self.voting,
            Phase::Waiting | Phase::Resolution | Phase::Ended => return None,
        };
        let mut secs = duration.as_secs();
        if duration.subsec_nanos() > 0 {
            secs += 1;
        }
        Some(u32::try_from(secs).unwrap_or(u32::MAX))
    }

    /// Validates every duration.
    ///
    /// # Errors
    ///
    /// Returns [`SparkError::InvalidConfig`] if a duration is zero or longer than an hour.
    pub fn validate(&self) -> Result<(), SparkError> {
        for (field, duration) in [
            ("phases.swipe", self.swipe),
            ("phases.discussion", self.discussion),
            ("phases.voting", self.voting),
        ] {
            if duration.is_zero() || duration > Duration::from_secs(MAX_PHASE_SECS) {
                return Err(SparkError::InvalidConfig {
                    field,
                    reason: format!(
                        "must be between 1s and {}s, got {}ms",
                        MAX_PHASE_SECS,
                        duration.as_millis()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// One anchor point of the vote threshold curve: with `players` alive, `fraction` of them must
/// vote for the same target to eliminate it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAnchor {
    /// Alive player count at this anchor.
    pub players: u32,
    /// Required vote fraction at this anchor, in `(0, 1]`.
    pub fraction: f64,
}

impl ThresholdAnchor {
    /// Creates an anchor.
    #[must_use]
    pub const fn new(players: u32, fraction: f64) -> Self {
        Self { players, fraction }
    }
}

/// Parameters of the dynamic voting threshold.
///
/// Between anchors the fraction is interpolated on a logarithmic player scale. Every voting
/// phase that ends without an elimination lowers the bar by `penalty_per_phase`, up to
/// `max_penalty_phases` phases and never by more than `max_penalty` in total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "ThresholdConfig has no effect unless placed in a GameConfig"]
pub struct ThresholdConfig {
    /// Anchor for small games. Any alive count at or below it uses this fraction.
    ///
    /// Default: 3 players → 50%
    pub small: ThresholdAnchor,
    /// Anchor for medium games.
    ///
    /// Default: 7 players → 30%
    pub medium: ThresholdAnchor,
    /// Anchor for large games. Any alive count above it uses this fraction.
    ///
    /// Default: 20 players → 20%
    pub large: ThresholdAnchor,
    /// Threshold reduction per consecutive voting phase without elimination.
    ///
    /// Default: 0.0333
    pub penalty_per_phase: f64,
    /// Number of consecutive no-elimination phases that still increase the penalty.
    ///
    /// Default: 3
    pub max_penalty_phases: u32,
    /// Upper bound on the total penalty.
    ///
    /// Default: 0.10
    pub max_penalty: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            small: ThresholdAnchor::new(3, 0.50),
            medium: ThresholdAnchor::new(7, 0.30),
            large: ThresholdAnchor::new(20, 0.20),
            penalty_per_phase: 0.0333,
            max_penalty_phases: 3,
            max_penalty: 0.10,
        }
    }
}

impl ThresholdConfig {
    /// Creates a new `ThresholdConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Higher bars and no stalemate relief. Eliminations need broad agreement.
    pub fn strict() -> Self {
        Self {
            small: ThresholdAnchor::new(3, 0.67),
            medium: ThresholdAnchor::new(7, 0.45),
            large: ThresholdAnchor::new(20, 0.30),
            penalty_per_phase: 0.0,
            max_penalty_phases: 0,
            max_penalty: 0.0,
        }
    }

    /// Validates the anchors and penalty parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SparkError::InvalidConfig`] if the anchors are not strictly increasing in player
    /// count starting at 2 or more, if a fraction lies outside `(0, 1]` or rises with the player
    /// count, or if a penalty value is negative or above 1.
    pub fn validate(&self) -> Result<(), SparkError> {
        if self.small.players < 2 {
            return Err(SparkError::InvalidConfig {
                field: "threshold.small.players",
                reason: format!("must be at least 2, got {}", self.small.players),
            });
        }
        if self.medium.players <= self.small.players || self.large.players <= self.medium.players
        {
            return Err(SparkError::InvalidConfig {
                field: "threshold.players",
                reason: format!(
                    "anchors must be strictly increasing, got {} / {} / {}",
                    self.small.players, self.medium.players, self.large.players
                ),
            });
        }
        for (field, anchor) in [
            ("threshold.small.fraction", self.small),
            ("threshold.medium.fraction", self.medium),
            ("threshold.large.fraction", self.large),
        ] {
            if !(anchor.fraction > 0.0 && anchor.fraction <= 1.0) {
                return Err(SparkError::InvalidConfig {
                    field,
                    reason: format!("must be in (0, 1], got {}", anchor.fraction),
                });
            }
        }
        if self.medium.fraction > self.small.fraction || self.large.fraction > self.medium.fraction
        {
            return Err(SparkError::InvalidConfig {
                field: "threshold.fraction",
                reason: "fractions must not rise with the player count".to_owned(),
            });
        }
        for (field, value) in [
            ("threshold.penalty_per_phase", self.penalty_per_phase),
            ("threshold.max_penalty", self.max_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SparkError::InvalidConfig {
                    field,
                    reason: format!("must be in [0, 1], got {}", value),
                });
            }
        }
        Ok(())
    }
}

/// Timing of the ability system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "AbilityConfig has no effect unless placed in a GameConfig"]
pub struct AbilityConfig {
    /// How long an ability window stays open once armed.
    ///
    /// Default: 10s
    pub window: Duration,
    /// Delay between a successful swipe and the target's death. This is the Medic's reaction time.
    ///
    /// Default: 10s
    pub infection_delay: Duration,
    /// How long a delusion keeps its target flagged as infected. `None` keeps the flag until the
    /// next round reset.
    ///
    /// Default: `Some(60s)`
    pub delusion_decay: Option<Duration>,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            infection_delay: Duration::from_secs(10),
            delusion_decay: Some(Duration::from_secs(60)),
        }
    }
}

impl AbilityConfig {
    /// Creates a new `AbilityConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short windows and delays to match [`PhaseDurations::quick`].
    pub fn quick() -> Self {
        Self {
            window: Duration::from_secs(5),
            infection_delay: Duration::from_secs(5),
            delusion_decay: Some(Duration::from_secs(20)),
        }
    }

    /// Validates the ability timings.
    ///
    /// # Errors
    ///
    /// Returns [`SparkError::InvalidConfig`] if the window or the infection delay is zero, or if a
    /// delusion decay of zero is configured.
    pub fn validate(&self) -> Result<(), SparkError> {
        if self.window.is_zero() {
            return Err(SparkError::InvalidConfig {
                field: "abilities.window",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.infection_delay.is_zero() {
            return Err(SparkError::InvalidConfig {
                field: "abilities.infection_delay",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.delusion_decay.is_some_and(|decay| decay.is_zero()) {
            return Err(SparkError::InvalidConfig {
                field: "abilities.delusion_decay",
                reason: "use None to disable decay instead of zero".to_owned(),
            });
        }
        Ok(())
    }
}

/// Complete configuration of one game session.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Always use the
/// `..GameConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[must_use = "GameConfig has no effect unless passed to SessionRegistry::start_game()"]
pub struct GameConfig {
    /// Countdown lengths.
    pub phases: PhaseDurations,
    /// Vote threshold curve.
    pub threshold: ThresholdConfig,
    /// Ability timings.
    pub abilities: AbilityConfig,
}

impl GameConfig {
    /// Creates a new `GameConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short phases and ability timings.
    pub fn quick() -> Self {
        Self {
            phases: PhaseDurations::quick(),
            threshold: ThresholdConfig::default(),
            abilities: AbilityConfig::quick(),
        }
    }

    /// Long discussion and voting for slower groups.
    pub fn relaxed() -> Self {
        Self {
            phases: PhaseDurations::relaxed(),
            ..Self::default()
        }
    }

    /// Tuned for lobbies of 15 or more players: longer discussion and a slower-decaying
    /// delusion so the Medic has a chance to sweep a crowd.
    pub fn large_lobby() -> Self {
        Self {
            phases: PhaseDurations {
                swipe: Duration::from_secs(40),
                discussion: Duration::from_secs(90),
                voting: Duration::from_secs(40),
            },
            threshold: ThresholdConfig::default(),
            abilities: AbilityConfig {
                window: Duration::from_secs(12),
                infection_delay: Duration::from_secs(15),
                delusion_decay: Some(Duration::from_secs(90)),
            },
        }
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`SparkError::InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), SparkError> {
        self.phases.validate()?;
        self.threshold.validate()?;
        self.abilities.validate()
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
    fn defaults_are_valid() {
        assert!(GameConfig::default().validate().is_ok());
        assert!(GameConfig::quick().validate().is_ok());
        assert!(GameConfig::relaxed().validate().is_ok());
        assert!(GameConfig::large_lobby().validate().is_ok());
        assert!(ThresholdConfig::strict().validate().is_ok());
    }

    #[test]
    fn default_threshold_anchors() {
        let t = ThresholdConfig::default();
        assert_eq!(t.small, ThresholdAnchor::new(3, 0.50));
        assert_eq!(t.medium, ThresholdAnchor::new(7, 0.30));
        assert_eq!(t.large, ThresholdAnchor::new(20, 0.20));
        assert!((t.penalty_per_phase - 0.0333).abs() < f64::EPSILON);
        assert_eq!(t.max_penalty_phases, 3);
        assert!((t.max_penalty - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn seconds_round_up_and_skip_untimed_phases() {
        let phases = PhaseDurations {
            swipe: Duration::from_millis(1500),
            ..PhaseDurations::default()
        };
        assert_eq!(phases.seconds_for(Phase::Swipe), Some(2));
        assert_eq!(phases.seconds_for(Phase::Discussion), Some(60));
        assert_eq!(phases.seconds_for(Phase::Voting), Some(30));
        assert_eq!(phases.seconds_for(Phase::Resolution), None);
        assert_eq!(phases.seconds_for(Phase::Waiting), None);
    }

    #[test]
    fn zero_phase_duration_is_rejected() {
        let config = GameConfig {
            phases: PhaseDurations {
                voting: Duration::ZERO,
                ..PhaseDurations::default()
            },
            ..GameConfig::default()
        };
        match config.validate() {
            Err(SparkError::InvalidConfig { field, .. }) => assert_eq!(field, "phases.voting"),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn non_increasing_anchor_players_are_rejected() {
        let threshold = ThresholdConfig {
            medium: ThresholdAnchor::new(3, 0.30),
            ..ThresholdConfig::default()
        };
        assert!(matches!(
            threshold.validate(),
            Err(SparkError::InvalidConfig {
                field: "threshold.players",
                ..
            })
        ));
    }

    #[test]
    fn rising_fractions_are_rejected() {
        let threshold = ThresholdConfig {
            large: ThresholdAnchor::new(20, 0.40),
            ..ThresholdConfig::default()
        };
        assert!(threshold.validate().is_err());
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        let threshold = ThresholdConfig {
            small: ThresholdAnchor::new(3, 1.5),
            ..ThresholdConfig::default()
        };
        assert!(matches!(
            threshold.validate(),
            Err(SparkError::InvalidConfig {
                field: "threshold.small.fraction",
                ..
            })
        ));
    }

    #[test]
    fn zero_delusion_decay_is_rejected_but_none_is_fine() {
        let mut abilities = AbilityConfig {
            delusion_decay: Some(Duration::ZERO),
            ..AbilityConfig::default()
        };
        assert!(abilities.validate().is_err());
        abilities.delusion_decay = None;
        assert!(abilities.validate().is_ok());
    }

    #[test]
    fn quick_preset_is_shorter_than_default() {
        let quick = GameConfig::quick();
        let default = GameConfig::default();
        assert!(quick.phases.swipe < default.phases.swipe);
        assert!(quick.phases.discussion < default.phases.discussion);
        assert!(quick.abilities.infection_delay < default.abilities.infection_delay);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = GameConfig::large_lobby();
        let json = serde_json::to_string(&config).unwrap();
        let back: GameConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
