//! # Simulation Session
//!
//! A [`Session`] owns one population store and everything that drives it:
//! the clock worker that advances simulation time, the two flock workers
//! and an optional coordination client. Simulation time is measured from
//! the last start and survives snapshot loads; `stop` clears the store and
//! rewinds it to zero.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use aviary_core::{
    BirthRecord, FlockController, Kind, Millis, PeriodicWorker, PopulationStore, Statistics,
};
use aviary_networking::{ClientCallbacks, CoordinationClient, NetError};
use parking_lot::Mutex;

use crate::command::{Command, HELP};
use crate::config::AviaryConfig;
use crate::error::{AppError, AppResult};
use crate::persistence;

/// Wall clock mapped onto simulation milliseconds.
#[derive(Debug)]
struct SimClock {
    base: Mutex<(Instant, Millis)>,
}

impl SimClock {
    fn new() -> Self {
        Self {
            base: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Simulation time now.
    fn now(&self) -> Millis {
        let (origin, offset) = *self.base.lock();
        let elapsed = Millis::try_from(origin.elapsed().as_millis()).unwrap_or(Millis::MAX);
        offset.saturating_add(elapsed)
    }

    /// Makes `now()` read `time` at this instant.
    fn rebase(&self, time: Millis) {
        *self.base.lock() = (Instant::now(), time);
    }
}

#[derive(Debug)]
struct Running {
    clock: PeriodicWorker,
    flock: FlockController,
}

impl Running {
    fn shutdown(mut self) {
        self.clock.stop();
        self.flock.stop();
        self.clock.join();
    }
}

/// One simulation with its workers and network membership.
#[derive(Debug)]
pub struct Session {
    config: AviaryConfig,
    store: PopulationStore,
    clock: Arc<SimClock>,
    running: Option<Running>,
    client: Option<CoordinationClient>,
    resume_from: Millis,
}

impl Session {
    /// Creates an idle session with an empty population.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] or [`AppError::Population`] if the
    /// configuration does not validate.
    pub fn new(config: AviaryConfig) -> AppResult<Self> {
        config.validate()?;
        let population = config.simulation.population_config();
        let store = match config.simulation.seed {
            Some(seed) => PopulationStore::with_seed(population, seed)?,
            None => PopulationStore::configure(population)?,
        };
        for kind in Kind::ALL {
            store.set_flock_active(kind, config.flock.active(kind));
        }
        Ok(Self {
            config,
            store,
            clock: Arc::new(SimClock::new()),
            running: None,
            client: None,
            resume_from: 0,
        })
    }

    /// The shared population.
    #[must_use]
    pub const fn store(&self) -> &PopulationStore {
        &self.store
    }

    /// Configuration the session was created with.
    #[must_use]
    pub const fn config(&self) -> &AviaryConfig {
        &self.config
    }

    /// The configuration as it stands now, with console changes such as
    /// the chick percent and flock toggles folded in.
    #[must_use]
    pub fn current_config(&self) -> AviaryConfig {
        let mut config = self.config.clone();
        config.simulation.set_population_config(&self.store.config());
        config.flock.adult_active = self.store.flock_state(Kind::Adult).active;
        config.flock.chick_active = self.store.flock_state(Kind::Chick).active;
        config
    }

    /// Writes [`Session::current_config`] to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] or [`AppError::Config`].
    pub fn save_config(&self, path: impl AsRef<Path>) -> AppResult<()> {
        self.current_config().save(path)
    }

    /// True between `start` and `stop`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Simulation time as the clock currently reads it.
    #[must_use]
    pub fn simulation_time(&self) -> Millis {
        if self.is_running() {
            self.clock.now()
        } else {
            self.resume_from
        }
    }

    /// Starts the clock and flock workers.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Command`] if already running and
    /// [`AppError::Worker`] if a thread cannot be spawned.
    pub fn start(&mut self) -> AppResult<()> {
        if self.running.is_some() {
            return Err(AppError::Command("already running".into()));
        }

        self.clock.rebase(self.resume_from);
        let mut clock = {
            let store = self.store.clone();
            let clock = Arc::clone(&self.clock);
            PeriodicWorker::new("sim-clock", self.config.simulation.tick_interval(), move || {
                store.advance(clock.now());
                Ok(())
            })
        };
        let mut flock = FlockController::new(
            self.store.clone(),
            self.config.flock.interval(),
            self.config.simulation.seed,
        );

        clock.start()?;
        if let Err(e) = flock.start() {
            clock.stop();
            clock.join();
            flock.stop();
            return Err(e.into());
        }
        let running = Running { clock, flock };
        sync_flock(&self.store, &running.flock);
        self.running = Some(running);

        tracing::info!(time = self.resume_from, "simulation started");
        Ok(())
    }

    /// Stops every worker, clears the population and returns the final
    /// statistics.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Command`] if the session is not running.
    pub fn stop(&mut self) -> AppResult<Statistics> {
        let running = self
            .running
            .take()
            .ok_or_else(|| AppError::Command("not running".into()))?;
        running.shutdown();

        let stats = self.store.statistics();
        self.store.clear();
        self.resume_from = 0;
        tracing::info!(%stats, "simulation stopped");
        Ok(stats)
    }

    /// Current counts and simulation time.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.store.statistics()
    }

    /// Birth time of every live entity, ascending by id.
    #[must_use]
    pub fn birth_times(&self) -> Vec<BirthRecord> {
        self.store.birth_times()
    }

    /// Changes the chick cap.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Population`] outside `0..=100`.
    pub fn set_chick_percent(&self, percent: i64) -> AppResult<()> {
        self.store.set_chick_percent(percent)?;
        tracing::info!(percent, "chick percent changed");
        Ok(())
    }

    /// Removes `percent` of `kind`, oldest first. Returns how many went.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Population`] above 100.
    pub fn reduce(&self, kind: Kind, percent: u32) -> AppResult<usize> {
        Ok(self.store.reduce_population(kind, percent)?)
    }

    /// Switches `kind` between flocking and jitter.
    ///
    /// While running this also pauses or resumes the kind's flock worker.
    pub fn set_flock(&self, kind: Kind, active: bool) {
        match (&self.running, active) {
            (Some(running), true) => running.flock.resume(kind),
            (Some(running), false) => running.flock.pause(kind),
            (None, _) => self.store.set_flock_active(kind, active),
        }
    }

    /// Joins the coordination server as `username`.
    ///
    /// Transfer requests from peers remove the configured transfer kind
    /// from this session's population.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Command`] if already connected and
    /// [`AppError::Net`] if the connection fails.
    pub fn connect(&mut self, username: &str) -> AppResult<()> {
        if self.client.as_ref().is_some_and(CoordinationClient::is_connected) {
            return Err(AppError::Command("already connected".into()));
        }

        let store = self.store.clone();
        let kind = self.config.network.transfer_kind;
        let callbacks = ClientCallbacks::new()
            .on_roster_updated(|names| tracing::info!(peers = ?names, "roster updated"))
            .on_transfer_request(move |from, percent| {
                let before = store.statistics().count(kind);
                match store.reduce_population(kind, percent) {
                    Ok(removed) => tracing::info!(
                        %from,
                        percent,
                        %kind,
                        before,
                        after = before.saturating_sub(removed),
                        "transfer request applied"
                    ),
                    Err(e) => tracing::warn!(%from, percent, error = %e, "transfer request ignored"),
                }
            });

        let address = self.config.network.server_address();
        self.client = Some(CoordinationClient::connect(address.as_str(), username, callbacks)?);
        Ok(())
    }

    /// Asks `target` to give up `percent` of its population.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Net`] when not connected or the request is
    /// rejected locally.
    pub fn request_transfer(&self, target: &str, percent: u32) -> AppResult<()> {
        let client = self.client.as_ref().ok_or(NetError::NotConnected)?;
        client.request_transfer(target, percent)?;
        tracing::info!(%target, percent, "transfer requested");
        Ok(())
    }

    /// The last roster received, empty when not connected.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        self.client
            .as_ref()
            .map(CoordinationClient::roster)
            .unwrap_or_default()
    }

    /// True while a coordination connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(CoordinationClient::is_connected)
    }

    /// Leaves the coordination server. Returns false if not connected.
    pub fn disconnect(&mut self) -> bool {
        match self.client.take() {
            Some(mut client) => {
                client.close();
                true
            }
            None => false,
        }
    }

    /// Writes the whole state to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] or [`AppError::Snapshot`].
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> AppResult<()> {
        persistence::save_snapshot(path, &self.store.snapshot())
    }

    /// Replaces the state with the snapshot at `path`.
    ///
    /// Simulation time continues from the snapshot's time.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`], [`AppError::Snapshot`] or
    /// [`AppError::Population`]; the current state is kept on error.
    pub fn load_snapshot(&mut self, path: impl AsRef<Path>) -> AppResult<()> {
        let blob = persistence::load_snapshot(path)?;
        let time = blob.simulation_time;
        self.store.restore(blob)?;
        match &self.running {
            Some(running) => {
                self.clock.rebase(time);
                sync_flock(&self.store, &running.flock);
            }
            None => self.resume_from = time,
        }
        Ok(())
    }

    /// Writes the live entities of `kind` to `path`. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] or [`AppError::Snapshot`].
    pub fn export_entities(&self, kind: Kind, path: impl AsRef<Path>) -> AppResult<usize> {
        persistence::save_entities(path, kind, &self.store.entities_of(kind))
    }

    /// Merges the entities exported at `path`. Returns how many were
    /// accepted; ids already live are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] or [`AppError::Snapshot`].
    pub fn import_entities(&self, path: impl AsRef<Path>) -> AppResult<usize> {
        let entities = persistence::load_entities(path)?;
        let offered = entities.len();
        let accepted = self.store.import(entities);
        tracing::info!(offered, accepted, "entities imported");
        Ok(accepted)
    }

    /// Runs one console command and renders its output.
    ///
    /// # Errors
    ///
    /// Propagates the error of the underlying operation.
    pub fn execute(&mut self, command: Command) -> AppResult<String> {
        let output = match command {
            Command::Start => {
                self.start()?;
                "started".to_string()
            }
            Command::Stop => format!("stopped ({})", self.stop()?),
            Command::Stats => self.statistics().to_string(),
            Command::Objects => {
                let records = self.birth_times();
                let mut out = format!("{} live", records.len());
                for record in records {
                    let _ = write!(out, "\n  {} born {}ms", record.id, record.birth_time);
                }
                out
            }
            Command::ChickPercent(percent) => {
                self.set_chick_percent(percent)?;
                format!("chick percent set to {percent}")
            }
            Command::Reduce { kind, percent } => {
                let removed = self.reduce(kind, percent)?;
                format!("removed {removed} {kind}(s)")
            }
            Command::Flock { kind, active } => {
                self.set_flock(kind, active);
                format!("{kind} flocking {}", if active { "on" } else { "off" })
            }
            Command::Connect(name) => {
                self.connect(&name)?;
                format!("connected as {name}")
            }
            Command::Peers => {
                let roster = self.roster();
                if roster.is_empty() {
                    "no peers".to_string()
                } else {
                    roster.join(", ")
                }
            }
            Command::Transfer { target, percent } => {
                self.request_transfer(&target, percent)?;
                format!("asked {target} for {percent}%")
            }
            Command::Save(path) => {
                self.save_snapshot(&path)?;
                format!("saved to {}", path.display())
            }
            Command::Load(path) => {
                self.load_snapshot(&path)?;
                format!("loaded {}", path.display())
            }
            Command::Export { kind, path } => {
                let count = self.export_entities(kind, &path)?;
                format!("exported {count} {kind}(s) to {}", path.display())
            }
            Command::SaveConfig(path) => {
                self.save_config(&path)?;
                format!("configuration saved to {}", path.display())
            }
            Command::Import(path) => {
                let count = self.import_entities(&path)?;
                format!("imported {count} entities")
            }
            Command::Help => HELP.to_string(),
            Command::Quit => String::new(),
        };
        Ok(output)
    }
}

/// Matches each flock worker to its kind's movement flag in the store.
fn sync_flock(store: &PopulationStore, flock: &FlockController) {
    for kind in Kind::ALL {
        if store.flock_state(kind).active {
            flock.resume(kind);
        } else {
            flock.pause(kind);
        }
    }
}
