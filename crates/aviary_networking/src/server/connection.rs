//! # Peer Connections
//!
//! One accepted TCP stream, split into a reader owned by the handler thread
//! and a writer shared by everyone who needs to send to the peer.
//!
//! ## Design
//!
//! - Writes are serialized by a per-connection mutex, never the registry lock
//! - Every write is bounded by the configured write timeout
//! - A failed write shuts the socket down so the handler sees EOF and cleans up
//! - Roster lines carry a generation; an older roster never overwrites a newer one

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use parking_lot::Mutex;

/// Unique identifier of one accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Write side of a connection.
struct Writer {
    stream: TcpStream,
    /// Generation of the latest roster written.
    roster_generation: u64,
}

/// The send half of an accepted peer.
pub struct PeerConnection {
    id: ConnectionId,
    addr: SocketAddr,
    writer: Mutex<Writer>,
    /// Separate handle so shutdown never waits behind a blocked write.
    control: TcpStream,
}

impl PeerConnection {
    /// Wraps `stream` for writing. The caller keeps its own clone for reads.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be cloned or configured.
    pub fn new(id: ConnectionId, stream: &TcpStream, write_timeout: Duration) -> io::Result<Self> {
        let addr = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        writer.set_write_timeout(Some(write_timeout))?;
        writer.set_nodelay(true)?;
        let control = stream.try_clone()?;
        Ok(Self {
            id,
            addr,
            writer: Mutex::new(Writer {
                stream: writer,
                roster_generation: 0,
            }),
            control,
        })
    }

    /// Connection id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    #[inline]
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Writes one encoded line.
    ///
    /// # Errors
    ///
    /// On failure the socket is shut down and the I/O error returned.
    pub fn send(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        self.write_locked(&mut writer, line)
    }

    /// Writes a roster line unless a newer roster was already written.
    ///
    /// Returns false if the roster was stale and skipped.
    ///
    /// # Errors
    ///
    /// On failure the socket is shut down and the I/O error returned.
    pub fn send_roster(&self, generation: u64, line: &str) -> io::Result<bool> {
        let mut writer = self.writer.lock();
        if generation <= writer.roster_generation {
            return Ok(false);
        }
        self.write_locked(&mut writer, line)?;
        writer.roster_generation = generation;
        Ok(true)
    }

    fn write_locked(&self, writer: &mut Writer, line: &str) -> io::Result<()> {
        let result = writer
            .stream
            .write_all(line.as_bytes())
            .and_then(|()| writer.stream.flush());
        if let Err(err) = &result {
            tracing::warn!(peer = %self.id, addr = %self.addr, error = %err, "write failed, dropping peer");
            self.shutdown();
        }
        result
    }

    /// Shuts both directions down. Idempotent.
    pub fn shutdown(&self) {
        // NotConnected after the peer already left is expected.
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}
