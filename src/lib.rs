//! Multi-room Chat Server Library
//!
//! A line-oriented chat server reachable over raw TCP sockets and over
//! WebSocket, built from small actors that only talk through bounded
//! channels.
//!
//! # Features
//! - Lobby plus lazily created rooms (`/room name`)
//! - Case-insensitive unique display names (`/name name`)
//! - Per-line length limit with a single "too long" notice
//! - Room capacity limit
//! - Same protocol on both transports
//!
//! # Architecture
//! - `ChatServer` is the directory actor owning the name and room registries
//! - Each `Room` runs its own loop owning its membership
//! - Each visitor runs a reader task, a writer task and a supervisor
//! - `FrameStream` turns a WebSocket into a byte stream so visitors only
//!   ever see lines
//!
//! # Example
//! ```ignore
//! use multiroom_chat::{handler, ChatServer, Limits};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), multiroom_chat::ChatError> {
//!     let (server, handle) = ChatServer::new(Limits::default());
//!     tokio::spawn(server.run());
//!
//!     let listener = handler::bind("127.0.0.1:9981").await?;
//!     handler::serve_tcp(listener, handle).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod handler;
pub mod members;
pub mod message;
pub mod room;
pub mod server;
pub mod transport;
pub mod types;
pub mod visitor;

// Re-export main types for convenience
pub use config::{Cli, Limits};
pub use error::ChatError;
pub use handler::{serve_tcp, serve_websocket};
pub use message::{format_line, Command};
pub use room::{Room, RoomHandle};
pub use server::{ChatServer, ServerHandle, ServerStats};
pub use transport::{Connection, FrameStream};
pub use types::{RoomId, VisitorId};
pub use visitor::{Visitor, VisitorHandle};
