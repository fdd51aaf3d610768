//! # Population
//!
//! The single owner of all entity state: spawning, expiry, movement,
//! reduction and snapshots. Pure logic over `&mut self`; sharing across
//! threads is the job of [`crate::PopulationStore`].
//!
//! ## Tick Order
//!
//! ```text
//! advance(t)
//!   1. adult spawn   (period elapsed? roll adult_prob)
//!   2. chick spawn   (period elapsed? chicks*100 < adults*chick_percent)
//!   3. expiry        (t - birth_time >= lifetime)
//!   4. movement      (flock heading, or per-axis jitter)
//!   5. simulation_time = t
//! ```

use std::collections::{HashMap, HashSet};
use std::f64::consts::FRAC_PI_4;
use std::fmt;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::PopulationConfig;
use crate::entity::{Entity, EntityId, Kind, Millis};
use crate::error::{PopulationError, PopulationResult};

/// Movement mode and shared heading of one kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlockState {
    /// Flocking when true, jittering otherwise.
    pub active: bool,
    /// Heading in radians used while flocking.
    pub heading: f64,
}

impl Default for FlockState {
    fn default() -> Self {
        Self {
            active: true,
            heading: FRAC_PI_4,
        }
    }
}

/// Population counts at a point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Live adults.
    pub adult_count: usize,
    /// Live chicks.
    pub chick_count: usize,
    /// Time passed to the latest `advance`.
    pub simulation_time: Millis,
}

impl Statistics {
    /// Live count of `kind`.
    #[must_use]
    pub const fn count(&self, kind: Kind) -> usize {
        match kind {
            Kind::Adult => self.adult_count,
            Kind::Chick => self.chick_count,
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[allow(clippy::cast_precision_loss)]
        let seconds = self.simulation_time as f64 / 1000.0;
        write!(
            f,
            "adults: {}, chicks: {}, time: {seconds:.1}s",
            self.adult_count, self.chick_count
        )
    }
}

/// Birth time of one live id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthRecord {
    /// The entity.
    pub id: EntityId,
    /// When it spawned.
    pub birth_time: Millis,
}

/// Plain-data export of the whole population state.
///
/// Field order keeps scalars ahead of tables so text encoders that need it
/// can serialize the blob directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateBlob {
    /// Time of the latest `advance`.
    pub simulation_time: Millis,
    /// Time of the latest adult spawn attempt.
    pub last_adult_spawn: Millis,
    /// Time of the latest chick spawn attempt.
    pub last_chick_spawn: Millis,
    /// Live ids, ascending.
    pub ids: Vec<EntityId>,
    /// Generation parameters.
    pub config: PopulationConfig,
    /// Adult movement state.
    pub adult_flock: FlockState,
    /// Chick movement state.
    pub chick_flock: FlockState,
    /// Birth time of every live id, ascending by id.
    pub birth_times: Vec<BirthRecord>,
    /// Live entities in iteration order.
    pub entities: Vec<Entity>,
}

/// All entity state of one simulation.
#[derive(Debug)]
pub struct Population {
    /// Generation parameters.
    config: PopulationConfig,
    /// Live entities, insertion ordered.
    entities: Vec<Entity>,
    /// Live ids for O(1) collision checks.
    ids: HashSet<EntityId>,
    /// Birth time per live id.
    birth_times: HashMap<EntityId, Millis>,
    /// Time of the latest adult spawn attempt.
    last_adult_spawn: Millis,
    /// Time of the latest chick spawn attempt.
    last_chick_spawn: Millis,
    /// Time of the latest `advance`.
    simulation_time: Millis,
    /// Movement state per kind.
    flocks: [FlockState; 2],
    /// Source of spawn rolls, positions, ids and jitter.
    rng: ChaCha8Rng,
}

impl Population {
    /// Creates an empty population.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::InvalidConfiguration`] if `config` fails
    /// validation.
    pub fn new(config: PopulationConfig, rng: ChaCha8Rng) -> PopulationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            entities: Vec::new(),
            ids: HashSet::new(),
            birth_times: HashMap::new(),
            last_adult_spawn: 0,
            last_chick_spawn: 0,
            simulation_time: 0,
            flocks: [FlockState::default(); 2],
            rng,
        })
    }

    /// Replaces the generation parameters, keeping every live entity.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::InvalidConfiguration`]; the old
    /// parameters stay in place.
    pub fn reconfigure(&mut self, config: PopulationConfig) -> PopulationResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Changes the chick-to-adult cap.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::InvalidArgument`] unless `percent` is in
    /// `[0, 100]`.
    pub fn set_chick_percent(&mut self, percent: i64) -> PopulationResult<()> {
        if !(0..=100).contains(&percent) {
            return Err(PopulationError::InvalidArgument(format!(
                "chick percent {percent} outside [0, 100]"
            )));
        }
        self.config.chick_percent = percent;
        Ok(())
    }

    /// Runs one simulation step at time `elapsed`.
    ///
    /// A decreasing `elapsed` is accepted as-is.
    pub fn advance(&mut self, elapsed: Millis) {
        if elapsed.saturating_sub(self.last_adult_spawn) >= self.config.adult_period {
            if self.rng.gen::<f64>() < self.config.adult_prob {
                self.spawn(Kind::Adult, elapsed);
            }
            self.last_adult_spawn = elapsed;
        }

        if elapsed.saturating_sub(self.last_chick_spawn) >= self.config.chick_period {
            if self.chick_slot_open() {
                self.spawn(Kind::Chick, elapsed);
            }
            self.last_chick_spawn = elapsed;
        }

        self.expire(elapsed);
        self.move_entities();
        self.simulation_time = elapsed;
    }

    /// True while chicks are below `chick_percent` of a non-empty adult flock.
    fn chick_slot_open(&self) -> bool {
        let adults = self.count(Kind::Adult) as i64;
        let chicks = self.count(Kind::Chick) as i64;
        adults > 0 && chicks.saturating_mul(100) < adults.saturating_mul(self.config.chick_percent)
    }

    /// Spawns one entity at a random position inside the area.
    fn spawn(&mut self, kind: Kind, now: Millis) -> Option<EntityId> {
        let Some(id) = self.generate_unique_id() else {
            tracing::warn!("id space exhausted, skipping {} spawn", kind);
            return None;
        };
        let x = self.rng.gen_range(0..self.config.area_width);
        let y = self.rng.gen_range(0..self.config.area_height);
        self.insert(Entity {
            id,
            kind,
            x,
            y,
            birth_time: now,
            lifetime: self.config.lifetime(kind),
        });
        Some(id)
    }

    /// Draws ids until one is free.
    ///
    /// Rejection sampling terminates quickly while the population is small
    /// next to the 9000-id space; there is no hard bound on the number of
    /// draws. Returns `None` only when every id is live.
    fn generate_unique_id(&mut self) -> Option<EntityId> {
        if self.ids.len() >= EntityId::SPACE {
            return None;
        }
        loop {
            let id = EntityId(self.rng.gen_range(EntityId::MIN..=EntityId::MAX));
            if !self.ids.contains(&id) {
                return Some(id);
            }
        }
    }

    fn insert(&mut self, entity: Entity) {
        self.ids.insert(entity.id);
        self.birth_times.insert(entity.id, entity.birth_time);
        self.entities.push(entity);
    }

    /// Removes every expired entity. Returns how many were removed.
    fn expire(&mut self, now: Millis) -> usize {
        let ids = &mut self.ids;
        let birth_times = &mut self.birth_times;
        let before = self.entities.len();
        self.entities.retain(|entity| {
            if entity.is_expired(now) {
                ids.remove(&entity.id);
                birth_times.remove(&entity.id);
                false
            } else {
                true
            }
        });
        before - self.entities.len()
    }

    /// Applies flocking displacement or jitter to every entity.
    #[allow(clippy::cast_possible_truncation)]
    fn move_entities(&mut self) {
        let steps = Kind::ALL.map(|kind| {
            let flock = self.flocks[kind.index()];
            let speed = kind.flock_speed();
            (
                flock.active,
                (speed * flock.heading.cos()).round() as i32,
                (speed * flock.heading.sin()).round() as i32,
            )
        });

        for entity in &mut self.entities {
            let (flocking, dx, dy) = steps[entity.kind.index()];
            if flocking {
                entity.x = entity.x.saturating_add(dx);
                entity.y = entity.y.saturating_add(dy);
            } else {
                let jitter = entity.kind.jitter();
                entity.x = entity.x.saturating_add(self.rng.gen_range(-jitter..=jitter));
                entity.y = entity.y.saturating_add(self.rng.gen_range(-jitter..=jitter));
            }
        }
    }

    /// Switches `kind` between flocking and jitter from the next step on.
    pub fn set_flock_active(&mut self, kind: Kind, active: bool) {
        self.flocks[kind.index()].active = active;
    }

    /// Overwrites the shared heading of `kind`.
    pub fn set_heading(&mut self, kind: Kind, angle: f64) {
        self.flocks[kind.index()].heading = angle;
    }

    /// Movement state of `kind`.
    #[must_use]
    pub const fn flock_state(&self, kind: Kind) -> FlockState {
        self.flocks[kind.index()]
    }

    /// Removes `floor(count(kind) * percent / 100)` entities of `kind`,
    /// oldest-inserted first. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::InvalidArgument`] unless `percent` is in
    /// `[0, 100]`.
    pub fn reduce(&mut self, kind: Kind, percent: u32) -> PopulationResult<usize> {
        if percent > 100 {
            return Err(PopulationError::InvalidArgument(format!(
                "reduction percent {percent} outside [0, 100]"
            )));
        }
        let to_remove = self.count(kind) * percent as usize / 100;
        if to_remove == 0 {
            return Ok(0);
        }

        let mut remaining = to_remove;
        let ids = &mut self.ids;
        let birth_times = &mut self.birth_times;
        self.entities.retain(|entity| {
            if remaining > 0 && entity.kind == kind {
                remaining -= 1;
                ids.remove(&entity.id);
                birth_times.remove(&entity.id);
                false
            } else {
                true
            }
        });
        Ok(to_remove)
    }

    /// Live count of `kind`.
    #[must_use]
    pub fn count(&self, kind: Kind) -> usize {
        self.entities.iter().filter(|e| e.kind == kind).count()
    }

    /// Current counts and time.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        Statistics {
            adult_count: self.count(Kind::Adult),
            chick_count: self.count(Kind::Chick),
            simulation_time: self.simulation_time,
        }
    }

    /// Time of the latest `advance`.
    #[must_use]
    pub const fn simulation_time(&self) -> Millis {
        self.simulation_time
    }

    /// Generation parameters.
    #[must_use]
    pub const fn config(&self) -> &PopulationConfig {
        &self.config
    }

    /// Live entities in iteration order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Birth time of every live id, ascending by id.
    #[must_use]
    pub fn birth_times(&self) -> Vec<BirthRecord> {
        let mut records: Vec<BirthRecord> = self
            .birth_times
            .iter()
            .map(|(&id, &birth_time)| BirthRecord { id, birth_time })
            .collect();
        records.sort_unstable_by_key(|r| r.id);
        records
    }

    /// Merges externally loaded entities. Returns how many were accepted.
    ///
    /// Entities whose id is out of range or already live are skipped.
    pub fn import(&mut self, entities: impl IntoIterator<Item = Entity>) -> usize {
        let mut accepted = 0;
        for entity in entities {
            if !entity.id.in_range() || self.ids.contains(&entity.id) {
                tracing::debug!("skipping imported {} {}", entity.kind, entity.id);
                continue;
            }
            self.insert(entity);
            accepted += 1;
        }
        accepted
    }

    /// Empties the population and resets spawn bookkeeping.
    ///
    /// Configuration and flock settings are kept.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.ids.clear();
        self.birth_times.clear();
        self.last_adult_spawn = 0;
        self.last_chick_spawn = 0;
    }

    /// Exports the whole state.
    #[must_use]
    pub fn snapshot(&self) -> StateBlob {
        let mut ids: Vec<EntityId> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        StateBlob {
            simulation_time: self.simulation_time,
            last_adult_spawn: self.last_adult_spawn,
            last_chick_spawn: self.last_chick_spawn,
            ids,
            config: self.config.clone(),
            adult_flock: self.flocks[Kind::Adult.index()],
            chick_flock: self.flocks[Kind::Chick.index()],
            birth_times: self.birth_times(),
            entities: self.entities.clone(),
        }
    }

    /// Replaces the whole state with `blob`.
    ///
    /// The RNG is kept; everything else comes from the blob.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::InvalidConfiguration`] or
    /// [`PopulationError::CorruptSnapshot`] without touching the current
    /// state.
    pub fn restore(&mut self, blob: StateBlob) -> PopulationResult<()> {
        blob.config.validate()?;

        let mut ids = HashSet::with_capacity(blob.entities.len());
        for entity in &blob.entities {
            if !entity.id.in_range() {
                return Err(corrupt(format!("entity id {} out of range", entity.id)));
            }
            if !ids.insert(entity.id) {
                return Err(corrupt(format!("duplicate entity id {}", entity.id)));
            }
        }

        let listed: HashSet<EntityId> = blob.ids.iter().copied().collect();
        if listed.len() != blob.ids.len() || listed != ids {
            return Err(corrupt("id set does not match entities".to_string()));
        }

        let birth_times: HashMap<EntityId, Millis> = blob
            .birth_times
            .iter()
            .map(|r| (r.id, r.birth_time))
            .collect();
        if birth_times.len() != blob.birth_times.len() || birth_times.len() != ids.len() {
            return Err(corrupt("birth records do not match entities".to_string()));
        }
        for entity in &blob.entities {
            if birth_times.get(&entity.id) != Some(&entity.birth_time) {
                return Err(corrupt(format!("birth record mismatch for id {}", entity.id)));
            }
        }

        self.config = blob.config;
        self.entities = blob.entities;
        self.ids = ids;
        self.birth_times = birth_times;
        self.last_adult_spawn = blob.last_adult_spawn;
        self.last_chick_spawn = blob.last_chick_spawn;
        self.simulation_time = blob.simulation_time;
        self.flocks = [blob.adult_flock, blob.chick_flock];
        Ok(())
    }
}

fn corrupt(reason: String) -> PopulationError {
    PopulationError::CorruptSnapshot(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn population(config: PopulationConfig) -> Population {
        Population::new(config, ChaCha8Rng::seed_from_u64(7)).unwrap()
    }

    fn certain_adults() -> PopulationConfig {
        PopulationConfig {
            adult_period: 1000,
            adult_prob: 1.0,
            chick_period: 1000,
            chick_percent: 0,
            adult_lifetime: 100_000,
            chick_lifetime: 100_000,
            ..PopulationConfig::default()
        }
    }

    fn bird(id: u16, kind: Kind, birth_time: Millis) -> Entity {
        Entity {
            id: EntityId(id),
            kind,
            x: 10,
            y: 10,
            birth_time,
            lifetime: 100_000,
        }
    }

    #[test]
    fn test_spawn_boundary() {
        let mut pop = population(certain_adults());

        pop.advance(999);
        assert_eq!(pop.count(Kind::Adult), 0);

        pop.advance(1000);
        assert_eq!(pop.count(Kind::Adult), 1);
        assert_eq!(pop.simulation_time(), 1000);
    }

    #[test]
    fn test_spawn_inside_area() {
        let config = PopulationConfig {
            area_width: 50,
            area_height: 30,
            ..certain_adults()
        };
        let mut pop = population(config);
        // Stop movement so positions stay where they spawned.
        pop.set_heading(Kind::Adult, 0.0);
        pop.set_flock_active(Kind::Adult, true);

        for step in 1..=20 {
            pop.advance(step * 1000);
        }
        assert_eq!(pop.count(Kind::Adult), 20);
        for (age, entity) in pop.entities().iter().rev().enumerate() {
            // Each step moves adults 5 to the right.
            let drift = 5 * (age as i32 + 1);
            assert!((0..50).contains(&(entity.x - drift)));
            assert!((0..30).contains(&entity.y));
        }
    }

    #[test]
    fn test_zero_probability_never_spawns_but_advances_bookkeeping() {
        let config = PopulationConfig {
            adult_prob: 0.0,
            ..certain_adults()
        };
        let mut pop = population(config);
        pop.advance(1000);
        assert_eq!(pop.count(Kind::Adult), 0);
        assert_eq!(pop.snapshot().last_adult_spawn, 1000);
        pop.advance(1500);
        assert_eq!(pop.snapshot().last_adult_spawn, 1000);
    }

    #[test]
    fn test_chick_ratio_gating() {
        let config = PopulationConfig {
            adult_prob: 0.0,
            chick_percent: 50,
            ..certain_adults()
        };
        let mut pop = population(config);
        pop.import([bird(1001, Kind::Adult, 0), bird(1002, Kind::Adult, 0)]);

        pop.advance(1000);
        assert_eq!(pop.count(Kind::Chick), 1);

        // 1 * 100 is not below 2 * 50.
        pop.advance(2000);
        assert_eq!(pop.count(Kind::Chick), 1);
    }

    #[test]
    fn test_no_chicks_without_adults() {
        let config = PopulationConfig {
            adult_prob: 0.0,
            chick_percent: 100,
            ..certain_adults()
        };
        let mut pop = population(config);
        pop.advance(1000);
        pop.advance(2000);
        assert_eq!(pop.count(Kind::Chick), 0);
    }

    #[test]
    fn test_expiry_releases_ids() {
        let config = PopulationConfig {
            adult_lifetime: 1500,
            ..certain_adults()
        };
        let mut pop = population(config);
        pop.advance(1000);
        let id = pop.entities()[0].id;

        pop.advance(2499);
        assert!(pop.entities().iter().any(|e| e.id == id));

        pop.advance(2500);
        assert!(!pop.entities().iter().any(|e| e.id == id));
        assert!(!pop.birth_times().iter().any(|r| r.id == id));
    }

    #[test]
    fn test_flock_movement() {
        let mut pop = population(certain_adults());
        pop.import([bird(1001, Kind::Adult, 0), bird(1002, Kind::Chick, 0)]);
        pop.set_heading(Kind::Adult, 0.0);
        pop.set_heading(Kind::Chick, std::f64::consts::FRAC_PI_2);

        pop.advance(1);
        let adult = pop.entities()[0];
        let chick = pop.entities()[1];
        assert_eq!((adult.x, adult.y), (15, 10));
        assert_eq!((chick.x, chick.y), (10, 13));
    }

    #[test]
    fn test_jitter_bounds() {
        let mut pop = population(certain_adults());
        pop.import([bird(1001, Kind::Adult, 0), bird(1002, Kind::Chick, 0)]);
        pop.set_flock_active(Kind::Adult, false);
        pop.set_flock_active(Kind::Chick, false);

        for t in 1..200 {
            let before: Vec<Entity> = pop.entities().to_vec();
            pop.advance(t);
            for (old, new) in before.iter().zip(pop.entities()) {
                let limit = old.kind.jitter();
                assert!((new.x - old.x).abs() <= limit);
                assert!((new.y - old.y).abs() <= limit);
            }
        }
    }

    #[test]
    fn test_reduce_oldest_first() {
        let mut pop = population(certain_adults());
        pop.import((0..4).map(|i| bird(1000 + i, Kind::Chick, Millis::from(i))));
        pop.import([bird(2000, Kind::Adult, 0)]);

        assert_eq!(pop.reduce(Kind::Chick, 50), Ok(2));
        let left: Vec<u16> = pop.entities().iter().map(|e| e.id.0).collect();
        assert_eq!(left, vec![1002, 1003, 2000]);
    }

    #[test]
    fn test_reduce_rounds_down_and_validates() {
        let mut pop = population(certain_adults());
        pop.import([bird(1001, Kind::Chick, 0)]);

        assert_eq!(pop.reduce(Kind::Chick, 99), Ok(0));
        assert_eq!(pop.count(Kind::Chick), 1);
        assert!(matches!(
            pop.reduce(Kind::Chick, 101),
            Err(PopulationError::InvalidArgument(_))
        ));
        assert_eq!(pop.reduce(Kind::Chick, 100), Ok(1));
    }

    #[test]
    fn test_import_skips_collisions() {
        let mut pop = population(certain_adults());
        let accepted = pop.import([
            bird(1001, Kind::Adult, 0),
            bird(1001, Kind::Chick, 0),
            bird(42, Kind::Chick, 0),
        ]);
        assert_eq!(accepted, 1);
        assert_eq!(pop.entities().len(), 1);
    }

    #[test]
    fn test_clear_keeps_settings() {
        let mut pop = population(certain_adults());
        pop.set_flock_active(Kind::Chick, false);
        pop.set_heading(Kind::Adult, 1.25);
        pop.advance(1000);
        pop.clear();

        let blob = pop.snapshot();
        assert!(blob.entities.is_empty());
        assert!(blob.ids.is_empty());
        assert!(blob.birth_times.is_empty());
        assert_eq!(blob.last_adult_spawn, 0);
        assert!(!blob.chick_flock.active);
        assert!((blob.adult_flock.heading - 1.25).abs() < f64::EPSILON);
        assert_eq!(blob.config, certain_adults());
    }

    #[test]
    fn test_restore_rejects_corrupt_blob() {
        let mut pop = population(certain_adults());
        pop.advance(1000);
        let good = pop.snapshot();

        let mut duplicate = good.clone();
        duplicate.entities.push(duplicate.entities[0]);
        assert!(matches!(
            pop.restore(duplicate),
            Err(PopulationError::CorruptSnapshot(_))
        ));

        let mut missing_birth = good.clone();
        missing_birth.birth_times.clear();
        assert!(pop.restore(missing_birth).is_err());

        let mut bad_config = good.clone();
        bad_config.config.area_width = 0;
        assert!(matches!(
            pop.restore(bad_config),
            Err(PopulationError::InvalidConfiguration { .. })
        ));

        // Failed restores leave the state alone.
        assert_eq!(pop.snapshot(), good);
    }

    #[test]
    fn test_set_chick_percent() {
        let mut pop = population(certain_adults());
        assert!(pop.set_chick_percent(40).is_ok());
        assert_eq!(pop.config().chick_percent, 40);
        assert!(pop.set_chick_percent(101).is_err());
        assert_eq!(pop.config().chick_percent, 40);
    }
}
