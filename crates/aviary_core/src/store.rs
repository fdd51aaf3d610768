//! # Population Store
//!
//! Cloneable handle to one [`Population`] behind a single mutex.
//!
//! ## Thread Safety
//!
//! The clock driver calls `advance`, flock workers call `set_flock_heading`,
//! and network listeners call `reduce_population`, all concurrently. Every
//! method takes the one lock for its whole duration, so no two operations
//! interleave. Nothing here performs I/O while the lock is held.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::PopulationConfig;
use crate::entity::{Entity, Kind, Millis};
use crate::error::PopulationResult;
use crate::population::{BirthRecord, FlockState, Population, StateBlob, Statistics};

/// Shared, thread-safe population handle.
#[derive(Clone, Debug)]
pub struct PopulationStore {
    inner: Arc<Mutex<Population>>,
}

impl PopulationStore {
    /// Creates an empty store with an entropy-seeded RNG.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PopulationError::InvalidConfiguration`] if `config`
    /// fails validation.
    pub fn configure(config: PopulationConfig) -> PopulationResult<Self> {
        Self::from_rng(config, ChaCha8Rng::from_entropy())
    }

    /// Creates an empty store whose random draws are reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PopulationError::InvalidConfiguration`] if `config`
    /// fails validation.
    pub fn with_seed(config: PopulationConfig, seed: u64) -> PopulationResult<Self> {
        Self::from_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn from_rng(config: PopulationConfig, rng: ChaCha8Rng) -> PopulationResult<Self> {
        let population = Population::new(config, rng)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(population)),
        })
    }

    /// Replaces the generation parameters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PopulationError::InvalidConfiguration`].
    pub fn reconfigure(&self, config: PopulationConfig) -> PopulationResult<()> {
        self.inner.lock().reconfigure(config)
    }

    /// Changes the chick-to-adult cap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PopulationError::InvalidArgument`] outside `[0, 100]`.
    pub fn set_chick_percent(&self, percent: i64) -> PopulationResult<()> {
        self.inner.lock().set_chick_percent(percent)
    }

    /// Runs one simulation step at time `elapsed`.
    pub fn advance(&self, elapsed: Millis) {
        self.inner.lock().advance(elapsed);
    }

    /// Switches `kind` between flocking and jitter.
    pub fn set_flock_active(&self, kind: Kind, active: bool) {
        self.inner.lock().set_flock_active(kind, active);
    }

    /// Overwrites the heading of one kind.
    pub fn set_heading(&self, kind: Kind, angle: f64) {
        self.inner.lock().set_heading(kind, angle);
    }

    /// Overwrites the heading of both kinds in one critical section.
    pub fn set_flock_heading(&self, angle: f64) {
        let mut population = self.inner.lock();
        for kind in Kind::ALL {
            population.set_heading(kind, angle);
        }
    }

    /// Movement state of `kind`.
    #[must_use]
    pub fn flock_state(&self, kind: Kind) -> FlockState {
        self.inner.lock().flock_state(kind)
    }

    /// Removes `percent`% of the live entities of `kind`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PopulationError::InvalidArgument`] above 100.
    pub fn reduce_population(&self, kind: Kind, percent: u32) -> PopulationResult<usize> {
        self.inner.lock().reduce(kind, percent)
    }

    /// Current counts and time.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.inner.lock().statistics()
    }

    /// Copy of the generation parameters.
    #[must_use]
    pub fn config(&self) -> PopulationConfig {
        self.inner.lock().config().clone()
    }

    /// Copy of every live entity in iteration order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.inner.lock().entities().to_vec()
    }

    /// Copy of the live entities of `kind`.
    #[must_use]
    pub fn entities_of(&self, kind: Kind) -> Vec<Entity> {
        self.inner
            .lock()
            .entities()
            .iter()
            .filter(|e| e.kind == kind)
            .copied()
            .collect()
    }

    /// Birth time of every live id, ascending by id.
    #[must_use]
    pub fn birth_times(&self) -> Vec<BirthRecord> {
        self.inner.lock().birth_times()
    }

    /// Merges externally loaded entities. Returns how many were accepted.
    pub fn import(&self, entities: Vec<Entity>) -> usize {
        self.inner.lock().import(entities)
    }

    /// Exports the whole state.
    #[must_use]
    pub fn snapshot(&self) -> StateBlob {
        self.inner.lock().snapshot()
    }

    /// Replaces the whole state atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PopulationError::CorruptSnapshot`] or
    /// [`crate::PopulationError::InvalidConfiguration`]; the current state
    /// is untouched on error.
    pub fn restore(&self, blob: StateBlob) -> PopulationResult<()> {
        self.inner.lock().restore(blob)
    }

    /// Empties the population, keeping configuration and flock settings.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_configure_rejects_invalid() {
        let config = PopulationConfig {
            chick_lifetime: 0,
            ..PopulationConfig::default()
        };
        assert!(PopulationStore::configure(config).is_err());
    }

    #[test]
    fn test_shared_heading_sets_both_kinds() {
        let store = PopulationStore::with_seed(PopulationConfig::default(), 1).unwrap();
        store.set_flock_heading(2.0);
        assert!((store.flock_state(Kind::Adult).heading - 2.0).abs() < f64::EPSILON);
        assert!((store.flock_state(Kind::Chick).heading - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_state() {
        let store = PopulationStore::with_seed(PopulationConfig::default(), 1).unwrap();
        let other = store.clone();
        let handle = thread::spawn(move || other.set_flock_active(Kind::Adult, false));
        handle.join().unwrap();
        assert!(!store.flock_state(Kind::Adult).active);
    }

    #[test]
    fn test_entities_of_filters_kind() {
        let store = PopulationStore::with_seed(PopulationConfig::default(), 1).unwrap();
        let make = |id, kind| Entity {
            id: crate::EntityId(id),
            kind,
            x: 0,
            y: 0,
            birth_time: 0,
            lifetime: 10,
        };
        store.import(vec![make(1001, Kind::Adult), make(1002, Kind::Chick)]);
        assert_eq!(store.entities_of(Kind::Chick).len(), 1);
        assert_eq!(store.entities().len(), 2);
    }
}
