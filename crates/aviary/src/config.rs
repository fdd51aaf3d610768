//! # Session Configuration
//!
//! Loaded from a TOML file. Every field has a default, so a missing file or
//! a partial file both work.
//!
//! ```toml
//! [simulation]
//! adult_period_ms = 2000
//! adult_prob = 0.5
//! chick_period_ms = 3000
//! chick_percent = 30
//! adult_lifetime_ms = 10000
//! chick_lifetime_ms = 5000
//! area_width = 800
//! area_height = 800
//! tick_interval_ms = 50
//! # seed = 42
//!
//! [flock]
//! interval_ms = 3000
//! adult_active = true
//! chick_active = true
//!
//! [network]
//! host = "127.0.0.1"
//! port = 12345
//! transfer_kind = "chick"
//! ```

use std::path::Path;
use std::time::Duration;

use aviary_core::{Kind, Millis, PopulationConfig};
use aviary_networking::DEFAULT_PORT;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Spawn parameters and the clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Minimum time between adult spawn attempts.
    pub adult_period_ms: Millis,
    /// Probability that an adult spawn attempt succeeds.
    pub adult_prob: f64,
    /// Minimum time between chick spawn attempts.
    pub chick_period_ms: Millis,
    /// Chicks are capped at this percentage of the adult count.
    pub chick_percent: i64,
    /// Lifetime of new adults.
    pub adult_lifetime_ms: Millis,
    /// Lifetime of new chicks.
    pub chick_lifetime_ms: Millis,
    /// Width of the spawn area.
    pub area_width: i32,
    /// Height of the spawn area.
    pub area_height: i32,
    /// Wall-clock time between simulation steps.
    pub tick_interval_ms: u64,
    /// Fixed RNG seed; entropy when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        let population = PopulationConfig::default();
        Self {
            adult_period_ms: population.adult_period,
            adult_prob: population.adult_prob,
            chick_period_ms: population.chick_period,
            chick_percent: population.chick_percent,
            adult_lifetime_ms: population.adult_lifetime,
            chick_lifetime_ms: population.chick_lifetime,
            area_width: population.area_width,
            area_height: population.area_height,
            tick_interval_ms: 50,
            seed: None,
        }
    }
}

impl SimulationSection {
    /// Generation parameters for the population store.
    #[must_use]
    pub fn population_config(&self) -> PopulationConfig {
        PopulationConfig {
            adult_period: self.adult_period_ms,
            adult_prob: self.adult_prob,
            chick_period: self.chick_period_ms,
            chick_percent: self.chick_percent,
            adult_lifetime: self.adult_lifetime_ms,
            chick_lifetime: self.chick_lifetime_ms,
            area_width: self.area_width,
            area_height: self.area_height,
        }
    }

    /// Copies the generation parameters of `population` into this section.
    pub fn set_population_config(&mut self, population: &PopulationConfig) {
        self.adult_period_ms = population.adult_period;
        self.adult_prob = population.adult_prob;
        self.chick_period_ms = population.chick_period;
        self.chick_percent = population.chick_percent;
        self.adult_lifetime_ms = population.adult_lifetime;
        self.chick_lifetime_ms = population.chick_lifetime;
        self.area_width = population.area_width;
        self.area_height = population.area_height;
    }

    /// Wall-clock time between simulation steps.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Flock worker settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockSection {
    /// Time between heading changes.
    pub interval_ms: u64,
    /// Adults start in flocking mode.
    pub adult_active: bool,
    /// Chicks start in flocking mode.
    pub chick_active: bool,
}

impl Default for FlockSection {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            adult_active: true,
            chick_active: true,
        }
    }
}

impl FlockSection {
    /// Time between heading changes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Initial movement mode of `kind`.
    #[must_use]
    pub const fn active(&self, kind: Kind) -> bool {
        match kind {
            Kind::Adult => self.adult_active,
            Kind::Chick => self.chick_active,
        }
    }
}

/// Coordination server settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Kind removed when a peer requests a transfer.
    pub transfer_kind: Kind,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            transfer_kind: Kind::Chick,
        }
    }
}

impl NetworkSection {
    /// `host:port` for connecting.
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete session configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AviaryConfig {
    /// `[simulation]`
    pub simulation: SimulationSection,
    /// `[flock]`
    pub flock: FlockSection,
    /// `[network]`
    pub network: NetworkSection,
}

impl AviaryConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the file exists but cannot be read and
    /// [`AppError::Config`] if it does not parse or validate.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] on syntax or range errors.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Writes the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] or [`AppError::Config`].
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        tracing::info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Checks every range.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] naming the offending field.
    pub fn validate(&self) -> AppResult<()> {
        self.simulation
            .population_config()
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        if self.simulation.tick_interval_ms == 0 {
            return Err(AppError::Config("simulation.tick_interval_ms must be positive".into()));
        }
        if self.flock.interval_ms == 0 {
            return Err(AppError::Config("flock.interval_ms must be positive".into()));
        }
        if self.network.host.is_empty() {
            return Err(AppError::Config("network.host must not be empty".into()));
        }
        Ok(())
    }
}
