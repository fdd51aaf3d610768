//! # Coordination Protocol
//!
//! Newline-delimited UTF-8 text over TCP.
//!
//! ## Messages
//!
//! ```text
//! client -> server   <username>                      first line only, registers
//! client -> server   TRANSFER:<target>:<percent>     ask the server to notify <target>
//! server -> client   CLIENTS:<name1,name2,...>       full roster after every join/leave
//! server -> client   TRANSFER_FROM:<from>:<percent>  relayed transfer notice
//! ```
//!
//! Fields are separated by `:`, roster names by `,`. Names may contain
//! neither, nor line breaks. Percent is a non-negative decimal integer.

use thiserror::Error;

/// Prefix of the roster broadcast.
pub const CLIENTS_PREFIX: &str = "CLIENTS:";
/// Prefix of a client transfer request.
pub const TRANSFER_PREFIX: &str = "TRANSFER:";
/// Prefix of a relayed transfer notice.
pub const TRANSFER_FROM_PREFIX: &str = "TRANSFER_FROM:";

const FIELD_SEPARATOR: char = ':';
const NAME_SEPARATOR: char = ',';

/// Why a line could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line carries no known prefix.
    #[error("unrecognized message: {0:?}")]
    UnknownMessage(String),

    /// A known message with the wrong number of fields.
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Fields the message needs.
        expected: usize,
        /// Fields present on the line.
        found: usize,
    },

    /// The percent field is not a non-negative integer.
    #[error("invalid percent: {0:?}")]
    InvalidPercent(String),

    /// A name that is empty or contains a separator.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Checks that `name` can travel as a single protocol field.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidName`] if `name` is empty or contains
/// `:`, `,` or a line break.
pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    let framing = |c: char| c == FIELD_SEPARATOR || c == NAME_SEPARATOR || c == '\n' || c == '\r';
    if name.is_empty() || name.contains(framing) {
        return Err(ProtocolError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Strips the line terminator left by `read_line`.
#[inline]
#[must_use]
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn parse_percent(field: &str) -> Result<u32, ProtocolError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidPercent(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| ProtocolError::InvalidPercent(field.to_string()))
}

/// Splits `<a>:<b>` after a prefix into exactly two fields.
fn two_fields(rest: &str) -> Result<(&str, &str), ProtocolError> {
    let fields: Vec<&str> = rest.split(FIELD_SEPARATOR).collect();
    match fields.as_slice() {
        [first, second] => Ok((*first, *second)),
        other => Err(ProtocolError::FieldCount {
            expected: 3,
            found: other.len() + 1,
        }),
    }
}

/// Lines a client sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// First line of a connection.
    Register(String),
    /// Ask the server to notify `target`.
    Transfer {
        /// Registered name of the receiving peer.
        target: String,
        /// Share of the receiver's population to remove.
        percent: u32,
    },
}

impl ClientMessage {
    /// Decodes the first line of a connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidName`] for an empty or unframeable
    /// name.
    pub fn parse_registration(line: &str) -> Result<Self, ProtocolError> {
        let name = strip_line_ending(line);
        validate_name(name)?;
        Ok(Self::Register(name.to_string()))
    }

    /// Decodes a line sent after registration.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for anything but a well-formed
    /// `TRANSFER:<target>:<percent>`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = strip_line_ending(line);
        let Some(rest) = line.strip_prefix(TRANSFER_PREFIX) else {
            return Err(ProtocolError::UnknownMessage(line.to_string()));
        };
        let (target, percent) = two_fields(rest)?;
        validate_name(target)?;
        Ok(Self::Transfer {
            target: target.to_string(),
            percent: parse_percent(percent)?,
        })
    }

    /// Encodes the message as one newline-terminated line.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Register(name) => format!("{name}\n"),
            Self::Transfer { target, percent } => format!("{TRANSFER_PREFIX}{target}:{percent}\n"),
        }
    }
}

/// Lines the server sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// Current roster in registry order.
    Clients(Vec<String>),
    /// A peer asked for a transfer to this client.
    TransferFrom {
        /// Registered name of the requesting peer.
        from: String,
        /// Requested percentage.
        percent: u32,
    },
}

impl ServerMessage {
    /// Decodes one server line.
    ///
    /// `CLIENTS:` with nothing after it is an empty roster.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown or malformed lines.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = strip_line_ending(line);
        if let Some(rest) = line.strip_prefix(CLIENTS_PREFIX) {
            let names = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(NAME_SEPARATOR).map(str::to_string).collect()
            };
            return Ok(Self::Clients(names));
        }
        if let Some(rest) = line.strip_prefix(TRANSFER_FROM_PREFIX) {
            let (from, percent) = two_fields(rest)?;
            return Ok(Self::TransferFrom {
                from: from.to_string(),
                percent: parse_percent(percent)?,
            });
        }
        Err(ProtocolError::UnknownMessage(line.to_string()))
    }

    /// Encodes the message as one newline-terminated line.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Clients(names) => format!("{CLIENTS_PREFIX}{}\n", names.join(",")),
            Self::TransferFrom { from, percent } => {
                format!("{TRANSFER_FROM_PREFIX}{from}:{percent}\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_wire_format() {
        let msg = ClientMessage::Transfer {
            target: "bob".into(),
            percent: 30,
        };
        assert_eq!(msg.encode(), "TRANSFER:bob:30\n");
        assert_eq!(ClientMessage::parse("TRANSFER:bob:30\r\n"), Ok(msg));
    }

    #[test]
    fn test_transfer_rejects_malformed() {
        assert!(matches!(
            ClientMessage::parse("TRANSFER:bob"),
            Err(ProtocolError::FieldCount { found: 2, .. })
        ));
        assert!(matches!(
            ClientMessage::parse("TRANSFER:bob:30:extra"),
            Err(ProtocolError::FieldCount { found: 4, .. })
        ));
        assert!(matches!(
            ClientMessage::parse("TRANSFER:bob:-5"),
            Err(ProtocolError::InvalidPercent(_))
        ));
        assert!(matches!(
            ClientMessage::parse("TRANSFER:bob:+5"),
            Err(ProtocolError::InvalidPercent(_))
        ));
        assert!(matches!(
            ClientMessage::parse("TRANSFER::5"),
            Err(ProtocolError::InvalidName(_))
        ));
        assert!(matches!(
            ClientMessage::parse("hello"),
            Err(ProtocolError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_registration() {
        assert_eq!(
            ClientMessage::parse_registration("alice\n"),
            Ok(ClientMessage::Register("alice".into()))
        );
        assert!(ClientMessage::parse_registration("\n").is_err());
        assert!(ClientMessage::parse_registration("a,b\n").is_err());
        assert!(ClientMessage::parse_registration("a:b\n").is_err());
    }

    #[test]
    fn test_clients_roster() {
        let roster = ServerMessage::Clients(vec!["alice".into(), "bob".into()]);
        assert_eq!(roster.encode(), "CLIENTS:alice,bob\n");
        assert_eq!(ServerMessage::parse("CLIENTS:alice,bob\n"), Ok(roster));

        let empty = ServerMessage::Clients(Vec::new());
        assert_eq!(empty.encode(), "CLIENTS:\n");
        assert_eq!(ServerMessage::parse("CLIENTS:"), Ok(empty));
    }

    #[test]
    fn test_transfer_from() {
        let notice = ServerMessage::TransferFrom {
            from: "alice".into(),
            percent: 30,
        };
        assert_eq!(notice.encode(), "TRANSFER_FROM:alice:30\n");
        assert_eq!(ServerMessage::parse("TRANSFER_FROM:alice:30"), Ok(notice));
        assert!(ServerMessage::parse("TRANSFER_FROM:alice:many").is_err());
        assert!(ServerMessage::parse("TRANSFER_FROM:alice").is_err());
        assert!(ServerMessage::parse("NOISE").is_err());
    }
}
