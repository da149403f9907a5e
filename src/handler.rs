//! Listener glue
//!
//! Accept loops for the two transports. Both end in
//! [`ServerHandle::on_new_connection`]; the WebSocket variant first performs
//! the upgrade handshake and wraps the socket in a [`FrameStream`].

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{Method, StatusCode};
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::server::ServerHandle;
use crate::transport::FrameStream;

/// Bind a listener, mapping failure to the fatal startup error
pub async fn bind(addr: &str) -> Result<TcpListener, ChatError> {
    TcpListener::bind(addr).await.map_err(|source| ChatError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Raw socket accept loop: every stream goes straight to the directory
pub async fn serve_tcp(listener: TcpListener, server: ServerHandle) -> Result<(), ChatError> {
    if let Ok(addr) = listener.local_addr() {
        info!("General socket listening at {}", addr);
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New TCP connection from {}", addr);
                server
                    .on_new_connection(Box::new(stream), addr.to_string())
                    .await?;
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// WebSocket accept loop; each handshake runs on its own task
pub async fn serve_websocket(listener: TcpListener, server: ServerHandle) -> Result<(), ChatError> {
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket listening at {}", addr);
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let server = server.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_websocket(stream, server).await {
                        warn!("WebSocket connection from {} rejected: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Upgrade one inbound request and hand it to the directory
pub async fn handle_websocket(stream: TcpStream, server: ServerHandle) -> Result<(), ChatError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("WebSocket handshake with {}", peer_addr);

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, require_get).await?;
    server
        .on_new_connection(Box::new(FrameStream::new(ws_stream)), peer_addr)
        .await
}

/// Handshake callback: only GET may upgrade
fn require_get(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.method() == Method::GET {
        return Ok(response);
    }

    let mut rejection = ErrorResponse::new(Some("Method not allowed".to_string()));
    *rejection.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    Err(rejection)
}
