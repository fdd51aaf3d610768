//! # Flock Controller
//!
//! Two periodic workers, one per kind, that pick a random heading each
//! tick and write it into the shared store. Both write the same heading
//! register for both kinds, so the last writer wins and the flocks move
//! together.

use std::f64::consts::TAU;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::entity::Kind;
use crate::error::WorkerError;
use crate::store::PopulationStore;
use crate::worker::{PeriodicWorker, SchedulingHint, WorkerState};

/// Default wait between heading changes.
pub const DEFAULT_FLOCK_INTERVAL: Duration = Duration::from_millis(3000);

/// Owns the `flock-adult` and `flock-chick` workers.
#[derive(Debug)]
pub struct FlockController {
    store: PopulationStore,
    workers: [PeriodicWorker; 2],
}

impl FlockController {
    /// Creates idle workers for both kinds.
    ///
    /// With a `seed`, each worker draws from its own deterministic RNG.
    pub fn new(store: PopulationStore, interval: Duration, seed: Option<u64>) -> Self {
        let workers = Kind::ALL.map(|kind| {
            let mut rng = match seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(kind.index() as u64 + 1)),
                None => ChaCha8Rng::from_entropy(),
            };
            let target = store.clone();
            PeriodicWorker::new(format!("flock-{kind}"), interval, move || {
                let angle = rng.gen_range(0.0..TAU);
                target.set_flock_heading(angle);
                tracing::trace!(%kind, angle, "flock heading changed");
                Ok(())
            })
        });
        Self { store, workers }
    }

    /// Starts both workers.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] if either worker cannot start. A worker that
    /// already started is left running.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        for worker in &mut self.workers {
            worker.start()?;
        }
        Ok(())
    }

    /// Suspends heading changes from `kind`'s worker and switches that
    /// kind to jitter movement.
    pub fn pause(&self, kind: Kind) {
        self.workers[kind.index()].pause();
        self.store.set_flock_active(kind, false);
    }

    /// Resumes `kind`'s worker and switches that kind back to flocking.
    pub fn resume(&self, kind: Kind) {
        self.store.set_flock_active(kind, true);
        self.workers[kind.index()].resume();
    }

    /// Stops both workers and waits for their threads.
    pub fn stop(&mut self) {
        for worker in &self.workers {
            worker.stop();
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }

    /// Records an advisory priority for `kind`'s worker.
    pub fn set_scheduling_hint(&self, kind: Kind, hint: SchedulingHint) {
        self.workers[kind.index()].set_scheduling_hint(hint);
    }

    /// The worker driving `kind`.
    #[must_use]
    pub fn worker(&self, kind: Kind) -> &PeriodicWorker {
        &self.workers[kind.index()]
    }

    /// Lifecycle state of `kind`'s worker.
    #[must_use]
    pub fn state(&self, kind: Kind) -> WorkerState {
        self.workers[kind.index()].state()
    }
}
