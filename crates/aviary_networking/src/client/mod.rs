//! # Coordination Client
//!
//! Connects one simulation to the coordination server, registers under a
//! username and listens for rosters and transfer notices on a background
//! thread.
//!
//! Callbacks run on the listener thread. They may call back into the
//! client, including replacing themselves.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};

use crate::error::{NetError, NetResult};
use crate::protocol::{validate_name, ClientMessage, ProtocolError, ServerMessage};

/// Called with the full roster after every join or leave.
pub type RosterCallback = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Called with the sender name and percent of a relayed transfer.
pub type TransferCallback = Arc<dyn Fn(&str, u32) + Send + Sync>;

/// Callbacks installed at connect time.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    on_roster_updated: Option<RosterCallback>,
    on_transfer_request: Option<TransferCallback>,
}

impl ClientCallbacks {
    /// No callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the roster callback.
    #[must_use]
    pub fn on_roster_updated(mut self, callback: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.on_roster_updated = Some(Arc::new(callback));
        self
    }

    /// Sets the transfer callback.
    #[must_use]
    pub fn on_transfer_request(mut self, callback: impl Fn(&str, u32) + Send + Sync + 'static) -> Self {
        self.on_transfer_request = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field("on_roster_updated", &self.on_roster_updated.is_some())
            .field("on_transfer_request", &self.on_transfer_request.is_some())
            .finish()
    }
}

/// State shared with the listener thread.
struct Shared {
    callbacks: RwLock<ClientCallbacks>,
    roster: RwLock<Vec<String>>,
    connected: AtomicBool,
}

impl Shared {
    fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::Clients(names) => {
                *self.roster.write() = names.clone();
                // Clone out so the callback may replace itself.
                let callback = self.callbacks.read().on_roster_updated.clone();
                if let Some(callback) = callback {
                    callback(&names);
                }
            }
            ServerMessage::TransferFrom { from, percent } => {
                let callback = self.callbacks.read().on_transfer_request.clone();
                match callback {
                    Some(callback) => callback(&from, percent),
                    None => tracing::debug!(%from, percent, "transfer request with no handler"),
                }
            }
        }
    }
}

fn listen(username: &str, stream: TcpStream, shared: &Shared) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => match ServerMessage::parse(&line) {
                Ok(message) => shared.dispatch(message),
                Err(ProtocolError::UnknownMessage(text)) => {
                    tracing::debug!(%username, %text, "ignoring unknown server line");
                }
                Err(err) => tracing::warn!(%username, error = %err, "malformed server line dropped"),
            },
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(%username, "non UTF-8 server line dropped");
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(%username, error = %err, "listener read failed");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Release);
    tracing::info!(%username, "disconnected from coordination server");
}

/// A connection to the coordination server.
pub struct CoordinationClient {
    username: String,
    server_addr: SocketAddr,
    writer: Mutex<TcpStream>,
    control: TcpStream,
    shared: Arc<Shared>,
    listener: Option<JoinHandle<()>>,
}

impl CoordinationClient {
    /// Connects, registers as `username` and starts the listener thread.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidName`] for a name that cannot be framed
    /// and [`NetError::Io`] if the connection fails.
    pub fn connect(
        addr: impl ToSocketAddrs,
        username: &str,
        callbacks: ClientCallbacks,
    ) -> NetResult<Self> {
        validate_name(username)?;

        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let server_addr = stream.peer_addr()?;
        let mut writer = stream.try_clone()?;
        let control = stream.try_clone()?;

        writer.write_all(ClientMessage::Register(username.to_string()).encode().as_bytes())?;
        writer.flush()?;

        let shared = Arc::new(Shared {
            callbacks: RwLock::new(callbacks),
            roster: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
        });

        let listener = {
            let shared = Arc::clone(&shared);
            let name = username.to_string();
            thread::Builder::new()
                .name(format!("client-{username}"))
                .spawn(move || listen(&name, stream, &shared))?
        };
        tracing::info!(%username, %server_addr, "connected to coordination server");

        Ok(Self {
            username: username.to_string(),
            server_addr,
            writer: Mutex::new(writer),
            control,
            shared,
            listener: Some(listener),
        })
    }

    /// Replaces the roster callback.
    pub fn on_roster_updated(&self, callback: impl Fn(&[String]) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_roster_updated = Some(Arc::new(callback));
    }

    /// Replaces the transfer callback.
    pub fn on_transfer_request(&self, callback: impl Fn(&str, u32) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_transfer_request = Some(Arc::new(callback));
    }

    /// Asks the server to notify `target`. No acknowledgment is returned.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidTransfer`] for a target that cannot be
    /// framed or a percent above 100, [`NetError::NotConnected`] after the
    /// connection closed, and [`NetError::Io`] if the write fails.
    pub fn request_transfer(&self, target: &str, percent: u32) -> NetResult<()> {
        if validate_name(target).is_err() {
            return Err(NetError::InvalidTransfer(format!("target {target:?}")));
        }
        if percent > 100 {
            return Err(NetError::InvalidTransfer(format!("percent {percent} above 100")));
        }
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }

        let line = ClientMessage::Transfer {
            target: target.to_string(),
            percent,
        }
        .encode();
        let mut writer = self.writer.lock();
        if let Err(err) = writer.write_all(line.as_bytes()).and_then(|()| writer.flush()) {
            self.shared.connected.store(false, Ordering::Release);
            return Err(err.into());
        }
        tracing::debug!(username = %self.username, %target, percent, "transfer requested");
        Ok(())
    }

    /// Latest roster received, empty before the first broadcast.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        self.shared.roster.read().clone()
    }

    /// True until the server closes the connection or `close` is called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Name this client registered under.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Server address.
    #[must_use]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Shuts the connection down and waits for the listener thread.
    pub fn close(&mut self) {
        self.shared.connected.store(false, Ordering::Release);
        let _ = self.control.shutdown(Shutdown::Both);
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                tracing::error!(username = %self.username, "listener thread panicked");
            }
        }
    }
}

impl Drop for CoordinationClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CoordinationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationClient")
            .field("username", &self.username)
            .field("server_addr", &self.server_addr)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
