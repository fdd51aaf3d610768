//! Integration tests for the coordination server and client over loopback.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use aviary_networking::{
    ClientCallbacks, CoordinationClient, CoordinationServer, NetError, ServerConfig, ServerHandle,
};
use crossbeam_channel::unbounded;

const WAIT: Duration = Duration::from_secs(5);

fn start_server() -> ServerHandle {
    let config = ServerConfig {
        bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        write_timeout: Duration::from_millis(500),
        accept_poll_interval: Duration::from_millis(2),
    };
    CoordinationServer::bind(config).unwrap().spawn().unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// A hand-driven peer that sees the raw wire lines.
struct RawPeer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RawPeer {
    fn connect(addr: SocketAddr, name: &str) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();
        let mut peer = Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        };
        peer.send(name);
        peer
    }

    fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.writer.flush().unwrap();
    }

    fn next_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        matches!(self.reader.read_line(&mut line), Ok(0))
    }
}

#[test]
fn test_roster_broadcast_ordering() {
    let server = start_server();
    let addr = server.local_addr();

    let mut alice = RawPeer::connect(addr, "alice");
    assert_eq!(alice.next_line(), "CLIENTS:alice");

    let mut bob = RawPeer::connect(addr, "bob");
    assert_eq!(bob.next_line(), "CLIENTS:alice,bob");
    assert_eq!(alice.next_line(), "CLIENTS:alice,bob");

    drop(alice);
    assert_eq!(bob.next_line(), "CLIENTS:bob");
    assert!(wait_until(|| server.stats().open_connections == 1));
    assert_eq!(server.registry().names(), vec!["bob".to_string()]);
}

#[test]
fn test_transfer_relay_fidelity() {
    let server = start_server();
    let addr = server.local_addr();

    let mut alice = RawPeer::connect(addr, "alice");
    assert_eq!(alice.next_line(), "CLIENTS:alice");
    let mut bob = RawPeer::connect(addr, "bob");
    assert_eq!(bob.next_line(), "CLIENTS:alice,bob");

    alice.send("TRANSFER:bob:30");
    assert_eq!(bob.next_line(), "TRANSFER_FROM:alice:30");
    assert_eq!(server.stats().transfers_relayed, 1);
}

#[test]
fn test_malformed_lines_keep_connection_open() {
    let server = start_server();
    let addr = server.local_addr();

    let mut alice = RawPeer::connect(addr, "alice");
    assert_eq!(alice.next_line(), "CLIENTS:alice");
    let mut bob = RawPeer::connect(addr, "bob");
    assert_eq!(bob.next_line(), "CLIENTS:alice,bob");

    alice.send("TRANSFER:bob:lots");
    alice.send("TRANSFER:bob");
    alice.send("hello there");
    alice.send("TRANSFER:nobody:10");
    alice.send("TRANSFER:bob:5");

    assert_eq!(bob.next_line(), "TRANSFER_FROM:alice:5");
    let stats = server.stats();
    assert_eq!(stats.malformed_lines, 2);
    assert_eq!(stats.transfers_dropped, 1);
    assert_eq!(stats.transfers_relayed, 1);
    assert_eq!(stats.active_peers, 2);
}

#[test]
fn test_reregistration_survives_old_disconnect() {
    let server = start_server();
    let addr = server.local_addr();

    let mut first = RawPeer::connect(addr, "alice");
    assert_eq!(first.next_line(), "CLIENTS:alice");
    let mut second = RawPeer::connect(addr, "alice");
    assert_eq!(second.next_line(), "CLIENTS:alice");

    // The displaced connection is closed by the server.
    assert!(first.at_eof());
    drop(first);
    assert!(wait_until(|| server.stats().open_connections == 1));
    assert_eq!(server.registry().names(), vec!["alice".to_string()]);

    let mut bob = RawPeer::connect(addr, "bob");
    assert_eq!(bob.next_line(), "CLIENTS:alice,bob");
    assert_eq!(second.next_line(), "CLIENTS:alice,bob");

    bob.send("TRANSFER:alice:40");
    assert_eq!(second.next_line(), "TRANSFER_FROM:bob:40");
}

#[test]
fn test_empty_name_is_rejected() {
    let server = start_server();
    let mut anonymous = RawPeer::connect(server.local_addr(), "");
    assert!(anonymous.at_eof());
    assert!(wait_until(|| server.stats().open_connections == 0));
    assert!(server.registry().is_empty());
    assert_eq!(server.stats().connections_accepted, 1);
}

#[test]
fn test_client_callbacks() {
    let server = start_server();
    let addr = server.local_addr();

    let (roster_tx, roster_rx) = unbounded();
    let alice = CoordinationClient::connect(
        addr,
        "alice",
        ClientCallbacks::new().on_roster_updated(move |names| {
            let _ = roster_tx.send(names.to_vec());
        }),
    )
    .unwrap();

    let (transfer_tx, transfer_rx) = unbounded();
    let bob = CoordinationClient::connect(
        addr,
        "bob",
        ClientCallbacks::new().on_transfer_request(move |from, percent| {
            let _ = transfer_tx.send((from.to_string(), percent));
        }),
    )
    .unwrap();

    loop {
        let names = roster_rx.recv_timeout(WAIT).unwrap();
        if names == ["alice", "bob"] {
            break;
        }
    }
    assert_eq!(alice.roster(), vec!["alice".to_string(), "bob".to_string()]);

    alice.request_transfer("bob", 30).unwrap();
    assert_eq!(transfer_rx.recv_timeout(WAIT).unwrap(), ("alice".to_string(), 30));
    assert!(wait_until(|| bob.roster().len() == 2));
}

#[test]
fn test_client_rejects_bad_requests() {
    let server = start_server();
    assert!(matches!(
        CoordinationClient::connect(server.local_addr(), "a:b", ClientCallbacks::new()),
        Err(NetError::InvalidName(_))
    ));

    let mut client =
        CoordinationClient::connect(server.local_addr(), "carol", ClientCallbacks::new()).unwrap();
    assert!(matches!(
        client.request_transfer("bob:1", 10),
        Err(NetError::InvalidTransfer(_))
    ));
    assert!(matches!(
        client.request_transfer("bob", 101),
        Err(NetError::InvalidTransfer(_))
    ));

    client.close();
    assert!(!client.is_connected());
    assert!(matches!(
        client.request_transfer("bob", 10),
        Err(NetError::NotConnected)
    ));
}

#[test]
fn test_runtime_callback_replacement() {
    let server = start_server();
    let addr = server.local_addr();

    let bob = CoordinationClient::connect(addr, "bob", ClientCallbacks::new()).unwrap();
    let (tx, rx) = unbounded();
    bob.on_transfer_request(move |from, percent| {
        let _ = tx.send((from.to_string(), percent));
    });

    let alice = CoordinationClient::connect(addr, "alice", ClientCallbacks::new()).unwrap();
    assert!(wait_until(|| alice.roster().len() == 2));
    alice.request_transfer("bob", 0).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("alice".to_string(), 0));
}

#[test]
fn test_shutdown_disconnects_clients() {
    let mut server = start_server();
    let client =
        CoordinationClient::connect(server.local_addr(), "dave", ClientCallbacks::new()).unwrap();
    assert!(wait_until(|| client.roster() == ["dave"]));

    server.shutdown();
    assert!(wait_until(|| !client.is_connected()));
}

#[test]
fn test_client_survives_non_utf8_line() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    let fake_server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut registration = String::new();
        reader.read_line(&mut registration).unwrap();
        let mut writer = stream;
        writer.write_all(b"\xff\xfe garbage\n").unwrap();
        writer.write_all(b"TRANSFER_FROM:bob:30\n").unwrap();
        writer.flush().unwrap();
        // Hold the connection open until the client is done.
        let mut rest = String::new();
        let _ = reader.read_line(&mut rest);
        registration
    });

    let (tx, rx) = unbounded();
    let mut client = CoordinationClient::connect(
        addr,
        "alice",
        ClientCallbacks::new().on_transfer_request(move |from, percent| {
            let _ = tx.send((from.to_string(), percent));
        }),
    )
    .unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("bob".to_string(), 30));
    assert!(client.is_connected());
    client.close();
    assert_eq!(fake_server.join().unwrap(), "alice\n");
}

#[test]
fn test_stalled_peer_is_dropped_without_stalling_others() {
    let server = start_server();
    let addr = server.local_addr();

    let mut watcher = RawPeer::connect(addr, "watcher");
    assert_eq!(watcher.next_line(), "CLIENTS:watcher");
    // Registers and then never reads again.
    let _stalled = RawPeer::connect(addr, "stalled");
    assert!(wait_until(|| server.registry().len() == 2));

    // Long sender name so every relayed notice is large.
    let flooder_name = "f".repeat(8 * 1024);
    let mut flooder = RawPeer::connect(addr, &flooder_name);
    assert!(wait_until(|| server.registry().len() == 3));

    let deadline = Instant::now() + Duration::from_secs(30);
    while server.registry().lookup("stalled").is_some() {
        assert!(Instant::now() < deadline, "stalled peer was never dropped");
        for _ in 0..64 {
            flooder.send("TRANSFER:stalled:1");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!server.registry().names().contains(&"stalled".to_string()));

    let joined_at = Instant::now();
    let _carol = RawPeer::connect(addr, "carol");
    let expected = format!("CLIENTS:watcher,{flooder_name},carol");
    loop {
        let line = watcher.next_line();
        if line == expected {
            break;
        }
        assert!(line.starts_with("CLIENTS:"), "unexpected line {line:?}");
    }
    // One write timeout of 500ms plus scheduling slack.
    assert!(joined_at.elapsed() < Duration::from_secs(2));
}
