use std::fmt;

pub const SERVER_PORT: u16 = 12000;
pub const ADMIN_PORT: u16 = 6666;
pub const MAX_CLIENTS: usize = 128;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_MUTED: usize = 64;
pub const HISTORY_CAPACITY: usize = 15;

pub const DELIMITER: char = '$';
pub const HISTORY_MARKER: &str = "[History] ";
/// Liveness probe sent by the server; clients answer with `ret-ping$`.
pub const PING_PROBE: &str = "ping$\n";

/// Command half of a `type$payload` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Conn,
    Say,
    SayTo,
    Mute,
    Unmute,
    Rename,
    Disconn,
    Kick,
    RetPing,
    Unknown(String),
}

/// One parsed datagram: the command and its (possibly empty) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The request contained no `$` delimiter. Carries the offending text.
    MissingDelimiter(String),
    /// The part before `$` was empty or whitespace.
    EmptyCommand,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingDelimiter(raw) => {
                write!(f, "Malformed request (no $): {}", raw)
            }
            ParseError::EmptyCommand => write!(f, "Empty command"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Splits a raw datagram into `(command, payload)` on the first `$`.
///
/// NUL padding and surrounding whitespace are stripped before splitting
/// (peers that send fixed-size buffers pad with NUL bytes). The payload may
/// itself contain `$`; only the first delimiter is structural.
pub fn parse_request(raw: &str) -> Result<Request, ParseError> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());

    let (command, payload) = trimmed
        .split_once(DELIMITER)
        .ok_or_else(|| ParseError::MissingDelimiter(trimmed.to_string()))?;

    let command = command.trim_matches(|c: char| c == ' ' || c == '\t');
    let payload = payload.trim_matches(|c: char| c == ' ' || c == '\t');

    if command.is_empty() {
        return Err(ParseError::EmptyCommand);
    }

    let command = match command {
        "conn" => Command::Conn,
        "say" => Command::Say,
        "sayto" => Command::SayTo,
        "mute" => Command::Mute,
        "unmute" => Command::Unmute,
        "rename" => Command::Rename,
        "disconn" => Command::Disconn,
        "kick" => Command::Kick,
        "ret-ping" => Command::RetPing,
        other => Command::Unknown(other.to_string()),
    };

    Ok(Request {
        command,
        payload: payload.to_string(),
    })
}

/// Splits a `sayto` payload into `(recipient, message)`.
///
/// The recipient is the first whitespace-delimited token; the message is the
/// trimmed remainder. Returns `None` when either part is missing.
pub fn split_private(payload: &str) -> Option<(&str, &str)> {
    let (recipient, message) = payload.split_once(char::is_whitespace)?;
    let message = message.trim_matches(|c: char| c == ' ' || c == '\t');
    if recipient.is_empty() || message.is_empty() {
        return None;
    }
    Some((recipient, message))
}

/// A reply line sent from the server to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Informational: `SYS$<text>`.
    System(String),
    /// Rejected or invalid operation: `ERR$<text>`.
    Error(String),
    /// Public chat content: `<name>: <text>`.
    Chat { sender: String, text: String },
    /// Private chat content: `<name> (private): <text>`.
    Private { sender: String, text: String },
}

impl Reply {
    pub fn system(text: impl Into<String>) -> Self {
        Reply::System(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Reply::Error(text.into())
    }

    /// Renders the newline-terminated wire form.
    pub fn to_wire(&self) -> String {
        match self {
            Reply::System(text) => format!("SYS${}\n", text),
            Reply::Error(text) => format!("ERR${}\n", text),
            Reply::Chat { sender, text } => format!("{}: {}\n", sender, text),
            Reply::Private { sender, text } => format!("{} (private): {}\n", sender, text),
        }
    }

    /// The human-readable text as stored in the history buffer: chat lines
    /// keep their sender prefix, system lines drop the `SYS$` framing.
    pub fn history_text(&self) -> String {
        match self {
            Reply::System(text) | Reply::Error(text) => text.clone(),
            Reply::Chat { sender, text } => format!("{}: {}", sender, text),
            Reply::Private { sender, text } => format!("{} (private): {}", sender, text),
        }
    }
}

/// Wraps a stored history entry for replay so receivers can tell replayed
/// context from live traffic.
pub fn history_line(entry: &str) -> String {
    format!("{}{}\n", HISTORY_MARKER, entry)
}
