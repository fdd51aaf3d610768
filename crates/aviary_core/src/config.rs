//! # Generation Parameters
//!
//! Spawn periods, probabilities, lifetimes and the spawn area. Validated
//! once before any store sees them.

use serde::{Deserialize, Serialize};

use crate::entity::{Kind, Millis};
use crate::error::{PopulationError, PopulationResult};

/// Parameters that drive spawning and expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Minimum time between adult spawn attempts.
    pub adult_period: Millis,
    /// Probability that an adult spawn attempt succeeds.
    pub adult_prob: f64,
    /// Minimum time between chick spawn attempts.
    pub chick_period: Millis,
    /// Chicks are capped at this percentage of the adult count.
    pub chick_percent: i64,
    /// Lifetime of new adults.
    pub adult_lifetime: Millis,
    /// Lifetime of new chicks.
    pub chick_lifetime: Millis,
    /// Width of the spawn area.
    pub area_width: i32,
    /// Height of the spawn area.
    pub area_height: i32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            adult_period: 2000,
            adult_prob: 0.5,
            chick_period: 3000,
            chick_percent: 30,
            adult_lifetime: Kind::Adult.default_lifetime(),
            chick_lifetime: Kind::Chick.default_lifetime(),
            area_width: 800,
            area_height: 800,
        }
    }
}

impl PopulationConfig {
    /// Checks every parameter range.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::InvalidConfiguration`] naming the first
    /// parameter that is out of range.
    pub fn validate(&self) -> PopulationResult<()> {
        fn invalid(field: &'static str, reason: &'static str) -> PopulationResult<()> {
            Err(PopulationError::InvalidConfiguration { field, reason })
        }

        if self.adult_period <= 0 {
            return invalid("adult_period", "must be positive");
        }
        if self.chick_period <= 0 {
            return invalid("chick_period", "must be positive");
        }
        // NaN fails the range check as well.
        if !(0.0..=1.0).contains(&self.adult_prob) {
            return invalid("adult_prob", "must lie in [0, 1]");
        }
        if self.chick_percent < 0 {
            return invalid("chick_percent", "must not be negative");
        }
        if self.adult_lifetime <= 0 {
            return invalid("adult_lifetime", "must be positive");
        }
        if self.chick_lifetime <= 0 {
            return invalid("chick_lifetime", "must be positive");
        }
        if self.area_width <= 0 {
            return invalid("area_width", "must be positive");
        }
        if self.area_height <= 0 {
            return invalid("area_height", "must be positive");
        }
        Ok(())
    }

    /// Lifetime assigned to new entities of `kind`.
    #[inline]
    #[must_use]
    pub const fn lifetime(&self, kind: Kind) -> Millis {
        match kind {
            Kind::Adult => self.adult_lifetime,
            Kind::Chick => self.chick_lifetime,
        }
    }
}
