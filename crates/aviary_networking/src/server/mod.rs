//! # Coordination Server
//!
//! Relays rosters and transfer notices between registered peers.
//!
//! ## Architecture
//!
//! ```text
//!   accept thread (non-blocking poll)
//!        │ one named thread per connection
//!        ▼
//!   peer-N handler ── first line ──> registry.register(name) ──> broadcast CLIENTS
//!        │
//!        ├── TRANSFER:<t>:<p> ──> registry.lookup(t) ──> TRANSFER_FROM:<name>:<p>
//!        │
//!        └── EOF / error ──> CleanupGuard::drop
//!                              remove name if still ours ──> broadcast CLIENTS
//!                              shut the socket
//! ```
//!
//! Broadcasts copy the registry under its lock and write after releasing
//! it; each write is bounded by [`ServerConfig::write_timeout`]. One peer's
//! failure never reaches another peer's handler.

mod connection;
mod registry;

pub use connection::{ConnectionId, PeerConnection};
pub use registry::{PeerRegistry, Roster};

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{NetError, NetResult};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::DEFAULT_PORT;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_address: SocketAddr,
    /// Upper bound on a single write to a peer.
    pub write_timeout: Duration,
    /// Sleep between accept polls while idle.
    pub accept_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            write_timeout: Duration::from_secs(2),
            accept_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Server statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections accepted since bind.
    pub connections_accepted: u64,
    /// Connections currently open, registered or not.
    pub open_connections: usize,
    /// Peers currently registered.
    pub active_peers: usize,
    /// Transfer notices delivered.
    pub transfers_relayed: u64,
    /// Transfer requests for unknown or unreachable targets.
    pub transfers_dropped: u64,
    /// Lines that looked like a transfer but failed to parse.
    pub malformed_lines: u64,
}

#[derive(Default)]
struct Counters {
    connections_accepted: AtomicU64,
    transfers_relayed: AtomicU64,
    transfers_dropped: AtomicU64,
    malformed_lines: AtomicU64,
}

/// State shared by the accept loop and every handler.
struct Shared {
    config: ServerConfig,
    registry: PeerRegistry,
    /// Every open connection, registered or not.
    connections: Mutex<HashMap<ConnectionId, Arc<PeerConnection>>>,
    counters: Counters,
    next_id: AtomicU32,
    running: AtomicBool,
}

impl Shared {
    fn stats(&self) -> ServerStats {
        ServerStats {
            connections_accepted: self.counters.connections_accepted.load(Ordering::Relaxed),
            open_connections: self.connections.lock().len(),
            active_peers: self.registry.len(),
            transfers_relayed: self.counters.transfers_relayed.load(Ordering::Relaxed),
            transfers_dropped: self.counters.transfers_dropped.load(Ordering::Relaxed),
            malformed_lines: self.counters.malformed_lines.load(Ordering::Relaxed),
        }
    }

    /// Writes `roster` to every peer in it. Called without any lock held.
    fn broadcast(&self, roster: &Roster) {
        let line = ServerMessage::Clients(roster.names.clone()).encode();
        for peer in &roster.peers {
            // A failed write already shut the peer down; its handler cleans up.
            let _ = peer.send_roster(roster.generation, &line);
        }
        tracing::debug!(generation = roster.generation, peers = roster.peers.len(), "roster broadcast");
    }

    fn handle_line(&self, sender: &str, line: &str) {
        match ClientMessage::parse(line) {
            Ok(ClientMessage::Transfer { target, percent }) => self.relay(sender, &target, percent),
            Ok(ClientMessage::Register(_)) | Err(ProtocolError::UnknownMessage(_)) => {
                tracing::debug!(%sender, "ignoring line");
            }
            Err(err) => {
                self.counters.malformed_lines.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%sender, error = %err, "malformed line ignored");
            }
        }
    }

    fn relay(&self, sender: &str, target: &str, percent: u32) {
        let Some(peer) = self.registry.lookup(target) else {
            self.counters.transfers_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%sender, %target, "transfer target not registered, dropped");
            return;
        };
        let notice = ServerMessage::TransferFrom {
            from: sender.to_string(),
            percent,
        };
        if peer.send(&notice.encode()).is_ok() {
            self.counters.transfers_relayed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%sender, %target, percent, "transfer relayed");
        } else {
            self.counters.transfers_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stops accepting and shuts every open connection down.
    fn close_all(&self) {
        self.running.store(false, Ordering::Release);
        self.registry.drain();
        let open: Vec<Arc<PeerConnection>> = self.connections.lock().values().cloned().collect();
        for peer in open {
            peer.shutdown();
        }
    }
}

/// Runs on every exit route of a handler.
struct CleanupGuard<'a> {
    shared: &'a Shared,
    peer: Arc<PeerConnection>,
    name: Option<String>,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let id = self.peer.id();
        if let Some(name) = self.name.take() {
            match self.shared.registry.remove_if_owned(&name, id) {
                Some(roster) => {
                    tracing::info!(peer = %id, %name, "peer left");
                    self.shared.broadcast(&roster);
                }
                None => tracing::debug!(peer = %id, %name, "name already taken over"),
            }
        }
        self.shared.connections.lock().remove(&id);
        self.peer.shutdown();
        tracing::info!(peer = %id, addr = %self.peer.addr(), "peer disconnected");
    }
}

fn handle_connection(stream: TcpStream, id: ConnectionId, shared: &Shared) {
    let peer = match PeerConnection::new(id, &stream, shared.config.write_timeout) {
        Ok(peer) => Arc::new(peer),
        Err(err) => {
            tracing::warn!(peer = %id, error = %err, "failed to set up connection");
            return;
        }
    };
    shared.connections.lock().insert(id, Arc::clone(&peer));
    let mut guard = CleanupGuard {
        shared,
        peer: Arc::clone(&peer),
        name: None,
    };
    tracing::info!(peer = %id, addr = %peer.addr(), "peer connected");

    // Shutdown may have swept the connection table before this insert.
    if !shared.running.load(Ordering::Acquire) {
        return;
    }

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => {
            tracing::debug!(peer = %id, "closed before registering");
            return;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::debug!(peer = %id, error = %err, "read failed before registering");
            return;
        }
    }

    let name = match ClientMessage::parse_registration(&line) {
        Ok(ClientMessage::Register(name)) => name,
        Ok(ClientMessage::Transfer { .. }) => return,
        Err(err) => {
            tracing::warn!(peer = %id, error = %err, "registration rejected");
            return;
        }
    };

    let (displaced, roster) = shared.registry.register(&name, Arc::clone(&peer));
    guard.name = Some(name.clone());
    match displaced {
        Some(old) => {
            tracing::info!(peer = %id, %name, previous = %old.id(), "peer re-registered");
            old.shutdown();
        }
        None => tracing::info!(peer = %id, %name, "peer registered"),
    }
    shared.broadcast(&roster);

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => shared.handle_line(&name, &line),
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                shared.counters.malformed_lines.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(peer = %id, %name, "non UTF-8 line ignored");
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(peer = %id, %name, error = %err, "read failed");
                break;
            }
        }
    }
}

/// The coordination server.
pub struct CoordinationServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl CoordinationServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidConfig`] for a zero write timeout and
    /// [`NetError::Io`] if the address cannot be bound.
    pub fn bind(config: ServerConfig) -> NetResult<Self> {
        if config.write_timeout.is_zero() {
            return Err(NetError::InvalidConfig("write_timeout must be positive".into()));
        }
        let listener = TcpListener::bind(config.bind_address)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "coordination server listening");

        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                config,
                registry: PeerRegistry::new(),
                connections: Mutex::new(HashMap::new()),
                counters: Counters::default(),
                next_id: AtomicU32::new(1),
                running: AtomicBool::new(true),
            }),
        })
    }

    /// Address actually bound, with the OS-assigned port when binding `:0`.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registered peers.
    #[must_use]
    pub fn registry(&self) -> &PeerRegistry {
        &self.shared.registry
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.shared.stats()
    }

    /// Accepts connections until shut down. Blocks the calling thread.
    pub fn run(&self) {
        let poll = self.shared.config.accept_poll_interval;
        while self.shared.running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => self.accept(stream, addr),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    thread::sleep(poll);
                }
            }
        }
        self.shared.close_all();
        tracing::info!(local_addr = %self.local_addr, "coordination server stopped");
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let id = ConnectionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.counters.connections_accepted.fetch_add(1, Ordering::Relaxed);

        // Accepted sockets inherit non-blocking mode on some platforms.
        if let Err(err) = stream.set_nonblocking(false) {
            tracing::warn!(peer = %id, %addr, error = %err, "failed to configure socket");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("peer-{}", id.0))
            .spawn(move || handle_connection(stream, id, &shared));
        if let Err(err) = spawned {
            tracing::warn!(peer = %id, %addr, error = %err, "failed to spawn handler");
        }
    }

    /// Runs the accept loop on a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetError::Io`] if the thread cannot be spawned.
    pub fn spawn(self) -> NetResult<ServerHandle> {
        let local_addr = self.local_addr;
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("coordination-accept".into())
            .spawn(move || self.run())?;
        Ok(ServerHandle {
            local_addr,
            shared,
            thread: Some(thread),
        })
    }
}

impl std::fmt::Debug for CoordinationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationServer")
            .field("local_addr", &self.local_addr)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Handle to a server running on a background thread.
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server listens on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registered peers.
    #[must_use]
    pub fn registry(&self) -> &PeerRegistry {
        &self.shared.registry
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.shared.stats()
    }

    /// Stops accepting, closes every peer and waits for the accept thread.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("accept thread panicked");
            }
        }
        self.shared.close_all();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}
