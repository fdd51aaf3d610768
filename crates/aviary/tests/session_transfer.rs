//! Integration tests for sessions talking through a loopback coordination
//! server, plus snapshot and export files on disk.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use aviary::{AppError, AviaryConfig, Command, Session};
use aviary_core::Kind;
use aviary_networking::{CoordinationServer, ServerConfig, ServerHandle};

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

fn temp_path(name: &str) -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("aviary_session_{name}_{id}.toml"))
}

fn config_for(server: Option<&ServerHandle>, seed: u64) -> AviaryConfig {
    let mut config = AviaryConfig::default();
    config.simulation.seed = Some(seed);
    config.simulation.adult_period_ms = 10;
    config.simulation.adult_prob = 1.0;
    config.simulation.chick_period_ms = 10;
    config.simulation.chick_percent = 100;
    config.simulation.tick_interval_ms = 5;
    config.flock.interval_ms = 5;
    if let Some(server) = server {
        config.network.port = server.local_addr().port();
    }
    config
}

/// Steps the store by hand so counts are known before any worker runs.
fn populate(session: &Session, steps: i64) {
    for step in 1..=steps {
        session.store().advance(step * 10);
    }
}

#[test]
fn test_transfer_reduces_configured_kind() {
    let server = start_server();
    let mut alice = Session::new(config_for(Some(&server), 1)).unwrap();
    let mut bob = Session::new(config_for(Some(&server), 2)).unwrap();
    populate(&alice, 40);
    let before = alice.statistics();
    assert!(before.chick_count >= 2);

    alice.connect("alice").unwrap();
    bob.connect("bob").unwrap();
    assert!(wait_until(|| alice.roster().len() == 2 && bob.roster().len() == 2));
    assert_eq!(alice.roster(), vec!["alice".to_string(), "bob".to_string()]);

    bob.request_transfer("alice", 50).unwrap();
    let expected = before.chick_count - before.chick_count / 2;
    assert!(wait_until(|| alice.statistics().chick_count == expected));
    assert_eq!(alice.statistics().adult_count, before.adult_count);

    assert!(bob.disconnect());
    assert!(wait_until(|| alice.roster() == vec!["alice".to_string()]));
    assert!(!bob.disconnect());
}

#[test]
fn test_transfer_kind_adult() {
    let server = start_server();
    let mut config = config_for(Some(&server), 3);
    config.network.transfer_kind = Kind::Adult;
    let mut carol = Session::new(config).unwrap();
    let mut dave = Session::new(config_for(Some(&server), 4)).unwrap();
    populate(&carol, 20);
    let before = carol.statistics();

    carol.connect("carol").unwrap();
    dave.connect("dave").unwrap();
    assert!(wait_until(|| dave.roster().len() == 2));

    dave.execute(Command::Transfer {
        target: "carol".into(),
        percent: 100,
    })
    .unwrap();
    assert!(wait_until(|| carol.statistics().adult_count == 0));
    assert_eq!(carol.statistics().chick_count, before.chick_count);
}

#[test]
fn test_connect_twice_rejected() {
    let server = start_server();
    let mut erin = Session::new(config_for(Some(&server), 5)).unwrap();
    erin.connect("erin").unwrap();
    assert!(matches!(erin.connect("erin"), Err(AppError::Command(_))));
    assert!(erin.is_connected());
}

#[test]
fn test_snapshot_load_replaces_state() {
    let path = temp_path("snapshot");
    let source = Session::new(config_for(None, 6)).unwrap();
    populate(&source, 30);
    source.set_flock(Kind::Chick, false);
    source.save_snapshot(&path).unwrap();

    let mut target = Session::new(config_for(None, 7)).unwrap();
    target.load_snapshot(&path).unwrap();
    assert_eq!(target.statistics(), source.statistics());
    assert_eq!(target.birth_times(), source.birth_times());
    assert!(!target.store().flock_state(Kind::Chick).active);
    assert_eq!(target.simulation_time(), 300);

    // Time continues from the snapshot once started.
    target.start().unwrap();
    assert!(wait_until(|| target.statistics().simulation_time > 300));
    target.stop().unwrap();
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_corrupt_snapshot_keeps_state() {
    let path = temp_path("corrupt");
    std::fs::write(&path, "format_version = 1\n[state]\nsimulation_time = \"soon\"\n").unwrap();

    let mut session = Session::new(config_for(None, 8)).unwrap();
    populate(&session, 10);
    let before = session.statistics();
    assert!(session.load_snapshot(&path).is_err());
    assert_eq!(session.statistics(), before);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_export_then_import_merges_kind() {
    let path = temp_path("export");
    let source = Session::new(config_for(None, 9)).unwrap();
    populate(&source, 30);
    let chicks = source.statistics().chick_count;
    let written = source.export_entities(Kind::Chick, &path).unwrap();
    assert_eq!(written, chicks);

    let target = Session::new(config_for(None, 10)).unwrap();
    assert_eq!(target.import_entities(&path).unwrap(), chicks);
    assert_eq!(target.statistics().chick_count, chicks);
    assert_eq!(target.statistics().adult_count, 0);

    // Ids already live are skipped.
    assert_eq!(target.import_entities(&path).unwrap(), 0);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_console_script() {
    let mut session = Session::new(config_for(None, 11)).unwrap();
    let script = ["chick-percent 60", "flock adult off", "start", "stats", "stop"];
    for line in script {
        let command = Command::parse(line).unwrap().unwrap();
        session.execute(command).unwrap();
    }
    assert!(!session.is_running());
    assert_eq!(session.store().config().chick_percent, 60);
    assert!(!session.store().flock_state(Kind::Adult).active);

    let err = session.execute(Command::parse("stop").unwrap().unwrap()).unwrap_err();
    assert_eq!(err.to_string(), "not running");
}

#[test]
fn test_console_changes_persist_in_saved_config() {
    let path = temp_path("config");
    let mut session = Session::new(config_for(None, 12)).unwrap();
    for line in ["chick-percent 45", "flock chick off"] {
        session.execute(Command::parse(line).unwrap().unwrap()).unwrap();
    }
    let line = format!("save-config {}", path.display());
    session.execute(Command::parse(&line).unwrap().unwrap()).unwrap();

    let saved = AviaryConfig::load(&path).unwrap();
    assert_eq!(saved.simulation.chick_percent, 45);
    assert!(!saved.flock.chick_active);
    assert!(saved.flock.adult_active);
    assert_eq!(saved.simulation.seed, Some(12));
    assert_eq!(saved.simulation.tick_interval_ms, 5);

    // A session built from the saved file starts where this one left off.
    let restarted = Session::new(saved).unwrap();
    assert_eq!(restarted.current_config(), session.current_config());
    std::fs::remove_file(&path).ok();
}
