//! # Console Commands
//!
//! One command per line, words separated by whitespace. Command names are
//! case-insensitive.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use aviary_core::Kind;

use crate::error::{AppError, AppResult};

/// Usage text printed by `help`.
pub const HELP: &str = "\
commands:
  start                       start the clock and the flock workers
  stop                        stop and clear, printing final statistics
  stats                       current counts and simulation time
  objects                     live ids with their birth times
  chick-percent <0-100>       change the chick-to-adult cap
  reduce <adult|chick> <N>    remove N% of a kind, oldest first
  flock <adult|chick> <on|off>
                              toggle flocking for a kind
  connect <name>              join the coordination server
  peers                       last roster received
  transfer <peer> <N>         ask <peer> to give up N%
  save <path>                 write a snapshot
  load <path>                 replace the state with a snapshot
  export <adult|chick> <path> write the live entities of a kind
  import <path>               merge entities from an export
  save-config <path>          write the current settings as TOML
  help                        this text
  quit                        leave";

/// A parsed console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the session.
    Start,
    /// Stop and clear the session.
    Stop,
    /// Print statistics.
    Stats,
    /// List live ids and birth times.
    Objects,
    /// Change the chick cap.
    ChickPercent(i64),
    /// Remove a share of one kind.
    Reduce {
        /// Kind to reduce.
        kind: Kind,
        /// Share to remove.
        percent: u32,
    },
    /// Toggle flocking.
    Flock {
        /// Kind to switch.
        kind: Kind,
        /// Flocking when true.
        active: bool,
    },
    /// Connect to the coordination server.
    Connect(String),
    /// Print the roster.
    Peers,
    /// Request a transfer from a peer.
    Transfer {
        /// Peer name.
        target: String,
        /// Requested share.
        percent: u32,
    },
    /// Save a snapshot.
    Save(PathBuf),
    /// Load a snapshot.
    Load(PathBuf),
    /// Export one kind.
    Export {
        /// Kind to export.
        kind: Kind,
        /// Destination file.
        path: PathBuf,
    },
    /// Merge an export.
    Import(PathBuf),
    /// Write the current settings.
    SaveConfig(PathBuf),
    /// Print usage.
    Help,
    /// Leave the console.
    Quit,
}

fn usage(text: &str) -> AppError {
    AppError::Command(format!("usage: {text}"))
}

fn parse_kind(word: Option<&str>, text: &str) -> AppResult<Kind> {
    word.ok_or_else(|| usage(text))?
        .parse()
        .map_err(AppError::Command)
}

fn parse_number<T: FromStr>(word: Option<&str>, text: &str) -> AppResult<T> {
    let word = word.ok_or_else(|| usage(text))?;
    word.parse()
        .map_err(|_| AppError::Command(format!("not a number: {word}")))
}

fn parse_toggle(word: Option<&str>, text: &str) -> AppResult<bool> {
    match word.map(str::to_ascii_lowercase).as_deref() {
        Some("on" | "true" | "yes") => Ok(true),
        Some("off" | "false" | "no") => Ok(false),
        _ => Err(usage(text)),
    }
}

fn required(word: Option<&str>, text: &str) -> AppResult<String> {
    word.map(str::to_string).ok_or_else(|| usage(text))
}

impl Command {
    /// Parses one console line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Command`] for unknown commands, missing or
    /// malformed arguments and trailing words.
    pub fn parse(line: &str) -> AppResult<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "stats" => Self::Stats,
            "objects" => Self::Objects,
            "chick-percent" => {
                Self::ChickPercent(parse_number(words.next(), "chick-percent <0-100>")?)
            }
            "reduce" => {
                let text = "reduce <adult|chick> <percent>";
                Self::Reduce {
                    kind: parse_kind(words.next(), text)?,
                    percent: parse_number(words.next(), text)?,
                }
            }
            "flock" => {
                let text = "flock <adult|chick> <on|off>";
                Self::Flock {
                    kind: parse_kind(words.next(), text)?,
                    active: parse_toggle(words.next(), text)?,
                }
            }
            "connect" => Self::Connect(required(words.next(), "connect <name>")?),
            "peers" => Self::Peers,
            "transfer" => {
                let text = "transfer <peer> <percent>";
                Self::Transfer {
                    target: required(words.next(), text)?,
                    percent: parse_number(words.next(), text)?,
                }
            }
            "save" => Self::Save(required(words.next(), "save <path>")?.into()),
            "load" => Self::Load(required(words.next(), "load <path>")?.into()),
            "export" => {
                let text = "export <adult|chick> <path>";
                Self::Export {
                    kind: parse_kind(words.next(), text)?,
                    path: required(words.next(), text)?.into(),
                }
            }
            "import" => Self::Import(required(words.next(), "import <path>")?.into()),
            "save-config" => {
                Self::SaveConfig(required(words.next(), "save-config <path>")?.into())
            }
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => {
                return Err(AppError::Command(format!(
                    "unknown command: {other} (try `help`)"
                )))
            }
        };

        if let Some(extra) = words.next() {
            return Err(AppError::Command(format!("unexpected argument: {extra}")));
        }
        Ok(Some(command))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
            Self::Stats => f.write_str("stats"),
            Self::Objects => f.write_str("objects"),
            Self::ChickPercent(p) => write!(f, "chick-percent {p}"),
            Self::Reduce { kind, percent } => write!(f, "reduce {kind} {percent}"),
            Self::Flock { kind, active } => {
                write!(f, "flock {kind} {}", if *active { "on" } else { "off" })
            }
            Self::Connect(name) => write!(f, "connect {name}"),
            Self::Peers => f.write_str("peers"),
            Self::Transfer { target, percent } => write!(f, "transfer {target} {percent}"),
            Self::Save(path) => write!(f, "save {}", path.display()),
            Self::Load(path) => write!(f, "load {}", path.display()),
            Self::Export { kind, path } => write!(f, "export {kind} {}", path.display()),
            Self::Import(path) => write!(f, "import {}", path.display()),
            Self::SaveConfig(path) => write!(f, "save-config {}", path.display()),
            Self::Help => f.write_str("help"),
            Self::Quit => f.write_str("quit"),
        }
    }
}
