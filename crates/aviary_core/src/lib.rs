//! # AVIARY Core
//!
//! Population engine for a two-kind bird simulation.
//!
//! ## Design Principles
//!
//! 1. **One owner of state** - every entity lives in a single [`Population`]
//!    behind the mutex of a [`PopulationStore`]
//! 2. **Fixed tick order** - spawn, expire, move, then publish the time
//! 3. **Seedable randomness** - each RNG owner can be made deterministic
//! 4. **Cooperative workers** - [`PeriodicWorker`] pauses and stops through
//!    a control channel, and `stop` always wakes a paused worker
//!
//! ## Thread Safety
//!
//! [`PopulationStore`] is `Clone + Send + Sync`. The clock driver, the flock
//! workers and network listeners may all hold a clone.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aviary_core::{Kind, PopulationConfig, PopulationStore};
//!
//! let store = PopulationStore::configure(PopulationConfig::default())?;
//! store.advance(2_000);
//! store.reduce_population(Kind::Chick, 50)?;
//! println!("{}", store.statistics());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod entity;
pub mod error;
pub mod flock;
pub mod population;
pub mod store;
pub mod worker;

pub use config::PopulationConfig;
pub use entity::{Entity, EntityId, Kind, Millis};
pub use error::{PopulationError, PopulationResult, TickError, WorkerError};
pub use flock::{FlockController, DEFAULT_FLOCK_INTERVAL};
pub use population::{BirthRecord, FlockState, Population, StateBlob, Statistics};
pub use store::PopulationStore;
pub use worker::{PeriodicWorker, SchedulingHint, TickFn, WorkerState};
