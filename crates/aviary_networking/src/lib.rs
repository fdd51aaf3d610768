//! # AVIARY Networking
//!
//! Coordination layer that lets independent simulations see each other
//! and ask one another to give up part of their population.
//!
//! ## Architecture
//!
//! ```text
//! CLIENT alice                   SERVER                    CLIENT bob
//!   |--- "alice" ------------------>|                           |
//!   |<-- CLIENTS:alice -------------|                           |
//!   |                               |<------------- "bob" ------|
//!   |<-- CLIENTS:alice,bob ---------|--- CLIENTS:alice,bob ---->|
//!   |--- TRANSFER:bob:30 ---------->|                           |
//!   |                               |--- TRANSFER_FROM:alice:30>|
//! ```
//!
//! The server keeps no simulation state; it only relays. Unknown targets
//! and malformed lines are dropped without telling the sender.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aviary_networking::{ClientCallbacks, CoordinationClient, CoordinationServer, ServerConfig};
//!
//! let server = CoordinationServer::bind(ServerConfig::default())?.spawn()?;
//! let callbacks = ClientCallbacks::new()
//!     .on_transfer_request(|from, percent| println!("{from} asks for {percent}%"));
//! let client = CoordinationClient::connect(server.local_addr(), "alice", callbacks)?;
//! client.request_transfer("bob", 30)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{ClientCallbacks, CoordinationClient, RosterCallback, TransferCallback};
pub use error::{NetError, NetResult};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use server::{
    ConnectionId, CoordinationServer, PeerConnection, PeerRegistry, Roster, ServerConfig,
    ServerHandle, ServerStats,
};

/// Port the coordination server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 12345;
