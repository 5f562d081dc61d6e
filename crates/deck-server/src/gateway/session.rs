//! Per-connection session loop.

use super::{Gateway, Outcome};
use crate::transport::websocket::{self, BoxedIo, WebSocketConnection};
use deck_core::messages::{CLOSE_MESSAGE_TOO_BIG, CLOSE_UNAUTHORIZED};
use deck_core::{DeckResult, Envelope};
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Normal closure, sent to every live session on shutdown.
const CLOSE_NORMAL: u16 = 1000;

impl Gateway {
    /// Drive one accepted connection from authorization to close.
    pub async fn handle_connection(
        &self,
        conn: WebSocketConnection,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> DeckResult<()> {
        let WebSocketConnection {
            mut ws_stream,
            remote_addr,
            request,
        } = conn;

        if !self.authorize(&request).await {
            warn!(remote = %remote_addr, "rejecting unauthorized connection");
            websocket::ws_close(&mut ws_stream, CLOSE_UNAUTHORIZED, "unauthorized").await;
            return Ok(());
        }

        let client_key = request.client_key(Some(remote_addr));
        let (conn_id, outbound_rx) = self.connections.register().await;
        let registration = self.connections.guard(conn_id);
        info!(conn_id, remote = %remote_addr, client_key = %client_key, "session opened");

        let result = self
            .session_loop(&mut ws_stream, conn_id, &client_key, outbound_rx, shutdown_rx)
            .await;

        drop(registration);
        info!(conn_id, "session closed");
        result
    }

    async fn session_loop(
        &self,
        ws: &mut WebSocketStream<BoxedIo>,
        conn_id: u64,
        client_key: &str,
        mut outbound_rx: mpsc::Receiver<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> DeckResult<()> {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(conn_id, "shutdown signal received, closing session");
                    websocket::ws_close(ws, CLOSE_NORMAL, "server shutdown").await;
                    break;
                }

                // Broadcasts from other sessions
                Some(text) = outbound_rx.recv() => {
                    websocket::ws_send_text(ws, text).await?;
                }

                frame = ws.next() => {
                    let outcome = match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.process(conn_id, client_key, &text).await
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.process_binary(conn_id, client_key, data).await
                        }
                        // tungstenite queues the pong itself.
                        Some(Ok(Message::Ping(_))) => continue,
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(conn_id, "WebSocket session ended (peer closed)");
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(WsError::Capacity(e))) => {
                            warn!(conn_id, client_key, error = %e, "frame exceeds transport limit, closing");
                            websocket::ws_close(ws, CLOSE_MESSAGE_TOO_BIG, "message too big").await;
                            break;
                        }
                        Some(Err(e)) => {
                            debug!(conn_id, error = %e, "WebSocket session ended");
                            break;
                        }
                    };

                    match outcome {
                        Outcome::Reply(text) => websocket::ws_send_text(ws, text).await?,
                        Outcome::Close { code, reason } => {
                            websocket::ws_close(ws, code, reason).await;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Binary frames are processed as UTF-8 text once they pass the size check.
    async fn process_binary(&self, conn_id: u64, client_key: &str, data: Vec<u8>) -> Outcome {
        if data.len() > self.max_message_size {
            return self.reject_oversized(conn_id, client_key, data.len());
        }
        match String::from_utf8(data) {
            Ok(text) => self.process(conn_id, client_key, &text).await,
            Err(_) => {
                debug!(conn_id, "binary frame is not valid UTF-8");
                Outcome::Reply(super::encode(&Envelope::invalid_json()))
            }
        }
    }
}
