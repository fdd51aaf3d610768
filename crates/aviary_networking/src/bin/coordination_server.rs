//! # Coordination Server
//!
//! Relays rosters and transfer notices between AVIARY peers.
//!
//! ## Usage
//!
//! ```bash
//! coordination_server --port 12345 --bind 0.0.0.0 --write-timeout-ms 2000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use aviary_networking::{CoordinationServer, ServerConfig, DEFAULT_PORT};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn print_help() {
    println!("Usage: coordination_server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --port <PORT>              TCP port to listen on (default: {DEFAULT_PORT})");
    println!("  -b, --bind <ADDR>              Address to bind (default: 0.0.0.0)");
    println!("  -w, --write-timeout-ms <MS>    Per-write timeout for peers (default: 2000)");
    println!("  -h, --help                     Show this help");
}

fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();
    let mut port = DEFAULT_PORT;
    let mut host: IpAddr = config.bind_address.ip();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(v) = value {
                    port = v.parse().unwrap_or(DEFAULT_PORT);
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if let Some(v) = value {
                    match v.parse() {
                        Ok(ip) => host = ip,
                        Err(_) => {
                            eprintln!("invalid bind address: {v}");
                            return ExitCode::FAILURE;
                        }
                    }
                    i += 1;
                }
            }
            "--write-timeout-ms" | "-w" => {
                if let Some(v) = value {
                    match v.parse::<u64>() {
                        Ok(ms) if ms > 0 => config.write_timeout = Duration::from_millis(ms),
                        _ => {
                            eprintln!("invalid write timeout: {v} (expected milliseconds > 0)");
                            return ExitCode::FAILURE;
                        }
                    }
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            other => tracing::warn!("ignoring unknown argument {other}"),
        }
        i += 1;
    }
    config.bind_address = SocketAddr::new(host, port);

    let server = match CoordinationServer::bind(config) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, "failed to start coordination server");
            return ExitCode::FAILURE;
        }
    };
    server.run();
    ExitCode::SUCCESS
}
