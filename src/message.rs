//! Line protocol definitions
//!
//! Inbound lines are either commands (`/exit`, `/room`, `/name`) or chat
//! text. Outbound lines, notices and broadcasts alike, share one format:
//! `[HH:MM:SS] <sender>> <text>\n`.

use chrono::Local;

/// Sender shown on notices produced by the server itself
pub const SERVER_SENDER: &str = "Server";

/// Visitor → Server line, after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close the read side of the connection
    Exit,
    /// Report the current room (`None`) or move to another one
    Room(Option<String>),
    /// Report the current name (`None`) or request a new one
    Name(Option<String>),
    /// A line starting with `/` that is not a known command
    Unknown(String),
    /// Chat content for the current room
    Chat(String),
}

impl Command {
    /// Interpret one line with its terminator already stripped
    pub fn parse(line: &str) -> Self {
        if !line.starts_with('/') {
            return Command::Chat(line.to_string());
        }

        let (word, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        let argument = rest.trim();
        let argument = (!argument.is_empty()).then(|| argument.to_string());

        match word {
            "/exit" => Command::Exit,
            "/room" => Command::Room(argument),
            "/name" => Command::Name(argument),
            _ => Command::Unknown(word.to_string()),
        }
    }
}

/// Decode raw bytes read off a connection into a line without its terminator
pub fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Format an outbound line stamped with the local time
pub fn format_line(sender: &str, text: &str) -> String {
    format!("[{}] {}> {}\n", Local::now().format("%H:%M:%S"), sender, text)
}
