//! Multi-room Chat Server - Entry Point
//!
//! Starts the ChatServer actor and both listeners.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use multiroom_chat::{handler, ChatError, ChatServer, Cli};

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=multiroom_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("multiroom_chat=info")),
        )
        .init();

    let cli = Cli::parse();
    let limits = cli.limits()?;

    // Binding is the only fatal failure
    let tcp_listener = handler::bind(&cli.tcp_addr).await?;
    let ws_listener = handler::bind(&cli.ws_addr).await?;

    let (server, handle) = ChatServer::new(limits);
    tokio::spawn(server.run());
    info!("ChatServer actor started");

    let tcp = tokio::spawn(handler::serve_tcp(tcp_listener, handle.clone()));
    let ws = tokio::spawn(handler::serve_websocket(ws_listener, handle));

    tokio::select! {
        result = tcp => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("TCP listener stopped: {}", e),
                Err(e) => error!("TCP listener task failed: {}", e),
            }
        }
        result = ws => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("WebSocket listener stopped: {}", e),
                Err(e) => error!("WebSocket listener task failed: {}", e),
            }
        }
    }

    Ok(())
}
