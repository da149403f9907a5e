//! Error types for the chat server
//!
//! Transport failures inside the frame adapter stay `std::io::Error` because
//! `AsyncRead`/`AsyncWrite` require it; everything above that uses `ChatError`.

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum ChatError {
    /// IO error (fatal for the connection it happened on)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error, including a failed upgrade handshake
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Limits file could not be parsed
    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// Limits parsed but are not usable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Listening socket could not be bound (fatal at startup)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The directory actor is gone
    #[error("Server closed")]
    ServerClosed,

    /// A room actor is gone
    #[error("Room closed")]
    RoomClosed,
}
