//! # AVIARY
//!
//! A headless bird population simulation session: configuration, the
//! workers that drive the population engine, coordination with other
//! sessions and snapshot files.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──> start ──> (stats / reduce / flock / transfer / save / load) ──> stop
//!           ^                                                              |
//!           └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `stop` clears the population, so a later `start` begins from an empty
//! area at time zero unless a snapshot is loaded first.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aviary::{AviaryConfig, Command, Session};
//!
//! let mut session = Session::new(AviaryConfig::load("aviary.toml")?)?;
//! session.start()?;
//! session.execute(Command::parse("reduce chick 50")?.unwrap())?;
//! println!("{}", session.stop()?);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod command;
pub mod config;
pub mod error;
pub mod persistence;
pub mod session;

pub use command::Command;
pub use config::{AviaryConfig, FlockSection, NetworkSection, SimulationSection};
pub use error::{AppError, AppResult};
pub use session::Session;
