//! # AVIARY Console
//!
//! Runs one simulation session driven by commands on stdin.
//!
//! ## Usage
//!
//! ```bash
//! aviary --config aviary.toml
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use aviary::{AviaryConfig, Command, Session};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn print_help() {
    println!("Usage: aviary [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>         Configuration file (default: aviary.toml)");
    println!("  -d, --dump-config           Print the effective configuration and exit");
    println!("  -n, --no-save               Do not write the settings back on exit");
    println!("  -h, --help                  Show this help");
    println!();
    println!("Type `help` at the prompt for the command list.");
}

/// Command line options.
#[derive(Debug, PartialEq, Eq)]
struct Options {
    config_path: PathBuf,
    dump_config: bool,
    save_on_exit: bool,
    show_help: bool,
    warnings: Vec<String>,
}

/// Parses the arguments after the program name.
fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        config_path: PathBuf::from("aviary.toml"),
        dump_config: false,
        save_on_exit: true,
        show_help: false,
        warnings: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if let Some(v) = args.get(i + 1) {
                    options.config_path = PathBuf::from(v);
                    i += 1;
                } else {
                    options.warnings.push(format!(
                        "--config needs a path, using {}",
                        options.config_path.display()
                    ));
                }
            }
            "--dump-config" | "-d" => options.dump_config = true,
            "--no-save" | "-n" => options.save_on_exit = false,
            "--help" | "-h" => {
                options.show_help = true;
                break;
            }
            other => options.warnings.push(format!("ignoring unknown argument {other}")),
        }
        i += 1;
    }
    options
}

fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Options {
        config_path,
        dump_config,
        save_on_exit,
        show_help,
        warnings,
    } = parse_args(&args);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if show_help {
        print_help();
        return ExitCode::SUCCESS;
    }

    let config = match AviaryConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if dump_config {
        return match config.to_toml_string() {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let mut session = match Session::new(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("aviary> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("failed to read input: {e}");
                return ExitCode::FAILURE;
            }
        }

        let command = match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match session.execute(command) {
            Ok(output) => println!("{output}"),
            Err(e) => println!("error: {e}"),
        }
    }

    if session.is_running() {
        if let Ok(stats) = session.stop() {
            println!("{stats}");
        }
    }
    session.disconnect();

    // Settings changed at the console carry over to the next run.
    if save_on_exit {
        if let Err(e) = session.save_config(&config_path) {
            eprintln!("failed to save configuration: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
