//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP (optionally TLS-wrapped) connections, completes the WebSocket
//! upgrade, and captures the upgrade request's credentials so the gateway
//! can authorize the session before processing any message.

use crate::handshake::ConnectRequest;
use deck_core::{DeckError, DeckResult};
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

/// Byte stream underneath a WebSocket: plain TCP or TLS over TCP.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<BoxedIo>,
    pub remote_addr: SocketAddr,
    /// Credentials and identity presented on the upgrade request.
    pub request: ConnectRequest,
}

/// How long a client gets to complete the TLS and WebSocket handshakes.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-listener limits applied before a session exists.
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    /// The gateway's message limit. The transport cap is derived from it.
    pub max_message_size: usize,
    pub handshake_timeout: Duration,
}

impl ListenerOptions {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// tungstenite limits, set above the gateway's own limit so slightly
    /// oversized messages still reach the gateway and get a 1009 close.
    pub fn ws_config(&self) -> WebSocketConfig {
        let cap = self
            .max_message_size
            .saturating_mul(2)
            .max(self.max_message_size.saturating_add(1));
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(cap);
        config.max_frame_size = Some(cap);
        config
    }
}

/// Start accepting WebSocket connections on `tcp_listener`.
///
/// Returns a receiver that yields upgraded connections. Handshake failures
/// and timeouts are logged and dropped.
pub fn start_listener(
    tcp_listener: TcpListener,
    tls: Option<TlsAcceptor>,
    options: ListenerOptions,
) -> mpsc::Receiver<WebSocketConnection> {
    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let tls = tls.clone();
                    tokio::spawn(async move {
                        let handshake = accept(stream, addr, tls, options.ws_config());
                        match tokio::time::timeout(options.handshake_timeout, handshake).await {
                            Ok(Ok(conn)) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Ok(Err(e)) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                            Err(_) => {
                                warn!(remote = %addr, "WebSocket handshake timed out");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
            if tx.is_closed() {
                debug!("WebSocket listener stopped");
                break;
            }
        }
    });

    rx
}

async fn accept(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    config: WebSocketConfig,
) -> DeckResult<WebSocketConnection> {
    let io: BoxedIo = match tls {
        Some(acceptor) => Box::new(
            acceptor
                .accept(stream)
                .await
                .map_err(|e| DeckError::Transport(format!("TLS handshake failed: {e}")))?,
        ),
        None => Box::new(stream),
    };

    let mut request = ConnectRequest::default();
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        io,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            request = ConnectRequest::from_parts(req.uri().query(), |name| {
                req.headers().get(name).and_then(|v| v.to_str().ok())
            });
            Ok(resp)
        },
        Some(config),
    )
    .await
    .map_err(|e| DeckError::Transport(format!("WS upgrade failed: {e}")))?;

    Ok(WebSocketConnection {
        ws_stream,
        remote_addr,
        request,
    })
}

/// Build a close frame carrying `code` and `reason`.
pub fn close_frame(code: u16, reason: &'static str) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }
}

/// Helper: send a text message over a WebSocket.
pub async fn ws_send_text(ws: &mut WebSocketStream<BoxedIo>, text: String) -> DeckResult<()> {
    ws.send(Message::Text(text))
        .await
        .map_err(|e| DeckError::Transport(format!("WS send failed: {e}")))
}

/// Helper: send a close frame. Errors are ignored; the peer may already be gone.
pub async fn ws_close(ws: &mut WebSocketStream<BoxedIo>, code: u16, reason: &'static str) {
    if let Err(e) = ws.send(Message::Close(Some(close_frame(code, reason)))).await {
        debug!(error = %e, code, "WS close failed");
    }
}
