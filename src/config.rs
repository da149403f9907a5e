//! Server configuration
//!
//! Command line options come from clap; the tunable limits can be loaded
//! from a JSON file, falling back to the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ChatError;
use crate::types::RoomId;

/// Default raw socket address
pub const DEFAULT_TCP_ADDR: &str = "0.0.0.0:9981";

/// Default WebSocket address
pub const DEFAULT_WS_ADDR: &str = "0.0.0.0:6636";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "multiroom_chat", version, about = "Multi-room chat over TCP and WebSocket")]
pub struct Cli {
    /// Address for raw line-oriented TCP clients
    #[arg(long, default_value = DEFAULT_TCP_ADDR)]
    pub tcp_addr: String,

    /// Address for WebSocket clients
    #[arg(long, default_value = DEFAULT_WS_ADDR)]
    pub ws_addr: String,

    /// JSON file overriding the default limits
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Resolve the limits: from the config file when given, defaults otherwise
    pub fn limits(&self) -> Result<Limits, ChatError> {
        match &self.config {
            Some(path) => Limits::from_file(path),
            None => Ok(Limits::default()),
        }
    }
}

/// Tunable limits shared by every actor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Longest chat line, in characters
    pub max_message_length: usize,
    pub max_name_length: usize,
    pub min_name_length: usize,
    /// Members per room, the lobby included
    pub room_capacity: usize,
    pub visitor_mailbox_capacity: usize,
    pub room_message_capacity: usize,
    /// Bound of each room's enter and leave queues
    pub room_request_capacity: usize,
    pub pending_connection_capacity: usize,
    pub room_change_capacity: usize,
    pub name_change_capacity: usize,
    pub lobby_room_id: String,
    /// Upper bound for one batched write+flush to a visitor connection
    pub write_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_length: 256,
            max_name_length: 32,
            min_name_length: 3,
            room_capacity: 100,
            visitor_mailbox_capacity: 64,
            room_message_capacity: 256,
            room_request_capacity: 100,
            pending_connection_capacity: 128,
            room_change_capacity: 1024,
            name_change_capacity: 256,
            lobby_room_id: "lobby".to_string(),
            write_timeout_secs: 10,
        }
    }
}

impl Limits {
    /// Parse limits from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ChatError> {
        let limits: Limits = serde_json::from_str(json)?;
        limits.validate()?;
        Ok(limits)
    }

    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        let capacities = [
            ("max_message_length", self.max_message_length),
            ("room_capacity", self.room_capacity),
            ("visitor_mailbox_capacity", self.visitor_mailbox_capacity),
            ("room_message_capacity", self.room_message_capacity),
            ("room_request_capacity", self.room_request_capacity),
            ("pending_connection_capacity", self.pending_connection_capacity),
            ("room_change_capacity", self.room_change_capacity),
            ("name_change_capacity", self.name_change_capacity),
        ];
        if let Some((field, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ChatError::InvalidConfig(format!("{} must be at least 1", field)));
        }
        if self.min_name_length == 0 || self.min_name_length > self.max_name_length {
            return Err(ChatError::InvalidConfig(
                "name length bounds must satisfy 1 <= min <= max".to_string(),
            ));
        }
        if self.lobby().is_void() {
            return Err(ChatError::InvalidConfig("lobby_room_id is empty".to_string()));
        }
        Ok(())
    }

    /// The lobby id as rooms see it, braces and padding removed
    pub fn lobby(&self) -> RoomId {
        RoomId::parse(&self.lobby_room_id)
    }

    /// Bytes consumed per read before a line is declared too long
    pub fn read_window(&self) -> u64 {
        (self.max_message_length as u64) * 4 + 1
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Limits::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let limits = Limits::from_json(r#"{"room_capacity": 2, "lobby_room_id": "hall"}"#).unwrap();
        assert_eq!(limits.room_capacity, 2);
        assert_eq!(limits.lobby_room_id, "hall");
        assert_eq!(limits.max_message_length, 256);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = Limits::from_json(r#"{"visitor_mailbox_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ChatError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_inverted_name_bounds() {
        let err = Limits::from_json(r#"{"min_name_length": 10, "max_name_length": 4}"#).unwrap_err();
        assert!(matches!(err, ChatError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_void_lobby() {
        let err = Limits::from_json(r#"{"lobby_room_id": "{}"}"#).unwrap_err();
        assert!(matches!(err, ChatError::InvalidConfig(_)));
    }

    #[test]
    fn test_lobby_id_is_normalized() {
        let limits = Limits::from_json(r#"{"lobby_room_id": " {Hall} "}"#).unwrap();
        assert_eq!(limits.lobby().as_str(), "Hall");
        assert_eq!(limits.lobby().key(), "hall");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["multiroom_chat"]);
        assert_eq!(cli.tcp_addr, DEFAULT_TCP_ADDR);
        assert_eq!(cli.ws_addr, DEFAULT_WS_ADDR);
        assert_eq!(cli.limits().unwrap(), Limits::default());
    }
}
