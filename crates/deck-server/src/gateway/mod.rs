//! Control session gateway.
//!
//! Owns the live connection set, authorizes sessions, enforces the size and
//! rate limits, and dispatches control messages to the action registry.

pub mod connections;
pub mod dispatch;
mod session;

pub use connections::LiveConnections;

use crate::auth::{RateLimiter, WEBSOCKET_SCOPE};
use crate::handshake::ConnectRequest;
use deck_core::messages::{PING, PONG};
use deck_core::{ActionRegistry, Envelope, InboundMessage, TokenManager, CLOSE_MESSAGE_TOO_BIG};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Serialized fallback used if an envelope cannot be encoded.
const INTERNAL_ERROR_REPLY: &str =
    r#"{"type":"error","status":"error","error":"internal_error","messageId":null}"#;

/// What the session loop should do after processing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this text back to the originating connection.
    Reply(String),
    /// Close the connection without replying.
    Close { code: u16, reason: &'static str },
}

pub struct Gateway {
    tokens: Arc<Mutex<TokenManager>>,
    limiter: Arc<Mutex<RateLimiter>>,
    connections: LiveConnections,
    actions: Arc<ActionRegistry>,
    max_message_size: usize,
}

impl Gateway {
    pub fn new(
        tokens: Arc<Mutex<TokenManager>>,
        limiter: Arc<Mutex<RateLimiter>>,
        connections: LiveConnections,
        actions: Arc<ActionRegistry>,
        max_message_size: usize,
    ) -> Self {
        Self {
            tokens,
            limiter,
            connections,
            actions,
            max_message_size,
        }
    }

    pub fn connections(&self) -> &LiveConnections {
        &self.connections
    }

    /// Whether a connection presenting `request` may open a session.
    ///
    /// While no token exists at all the check is skipped.
    pub async fn authorize(&self, request: &ConnectRequest) -> bool {
        let mut tokens = self.tokens.lock().await;
        if !tokens.requires_auth() {
            warn!("no tokens issued, accepting connection without authentication");
            return true;
        }
        request.token().is_some_and(|token| tokens.is_valid(token))
    }

    /// Run one inbound text message through the per-message pipeline.
    pub async fn process(&self, conn_id: u64, client_key: &str, text: &str) -> Outcome {
        if text.len() > self.max_message_size {
            return self.reject_oversized(conn_id, client_key, text.len());
        }

        if text == PING {
            return Outcome::Reply(PONG.to_string());
        }

        let decision = self.limiter.lock().await.check(WEBSOCKET_SCOPE, client_key);
        if !decision.allowed {
            warn!(
                conn_id,
                client_key,
                retry_after = decision.retry_after_secs,
                "rate limit exceeded"
            );
            return Outcome::Reply(encode(&Envelope::rate_limited(decision.retry_after_secs)));
        }

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(conn_id, error = %e, "invalid JSON message");
                return Outcome::Reply(encode(&Envelope::invalid_json()));
            }
        };

        let broadcast = message.is_broadcast();
        let envelope = dispatch::dispatch(&self.actions, message).await;
        let reply = encode(&envelope);

        if broadcast {
            let delivered = self.connections.broadcast_except(conn_id, &reply).await;
            debug!(conn_id, delivered, "broadcast envelope");
        }
        Outcome::Reply(reply)
    }

    fn reject_oversized(&self, conn_id: u64, client_key: &str, size: usize) -> Outcome {
        warn!(
            conn_id,
            client_key,
            size,
            limit = self.max_message_size,
            "message too large, closing connection"
        );
        Outcome::Close {
            code: CLOSE_MESSAGE_TOO_BIG,
            reason: "message too big",
        }
    }
}

fn encode(envelope: &Envelope) -> String {
    envelope.to_json().unwrap_or_else(|e| {
        error!(error = %e, "failed to encode envelope");
        INTERNAL_ERROR_REPLY.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{DeckError, Metadata};
    use serde_json::{json, Value};

    const MAX: usize = 256;

    fn gateway(requests: u32) -> Gateway {
        let mut limiter = RateLimiter::new();
        limiter.configure(WEBSOCKET_SCOPE, requests, 60.0);
        let mut actions = ActionRegistry::new();
        actions.register_fn("x", |_| async { Ok::<_, DeckError>(json!({"status": "ok"})) });
        Gateway::new(
            Arc::new(Mutex::new(TokenManager::new(3600, Some("boot".into())))),
            Arc::new(Mutex::new(limiter)),
            LiveConnections::new(),
            Arc::new(actions),
            MAX,
        )
    }

    fn reply_json(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Reply(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_short_circuits_rate_limiter() {
        let gw = gateway(1);
        for _ in 0..5 {
            assert_eq!(gw.process(1, "k", "ping").await, Outcome::Reply("pong".into()));
        }
        assert_eq!(gw.limiter.lock().await.stats().bucket_count, 0);
    }

    #[tokio::test]
    async fn oversized_message_closes() {
        let gw = gateway(100);
        let text = "x".repeat(MAX + 1);
        assert_eq!(
            gw.process(1, "k", &text).await,
            Outcome::Close {
                code: CLOSE_MESSAGE_TOO_BIG,
                reason: "message too big"
            }
        );
        // Exactly at the limit is still processed.
        let text = "y".repeat(MAX);
        assert!(matches!(gw.process(1, "k", &text).await, Outcome::Reply(_)));
    }

    #[tokio::test]
    async fn rate_limited_message_gets_inline_error() {
        let gw = gateway(2);
        for _ in 0..2 {
            let value = reply_json(gw.process(1, "k", r#"{"action":"x"}"#).await);
            assert_eq!(value["status"], "ok");
        }
        let value = reply_json(gw.process(1, "k", r#"{"action":"x"}"#).await);
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "rate_limit_exceeded");
        assert!(value["retryAfterSeconds"].as_f64().unwrap() > 0.0);
        assert_eq!(value["messageId"], Value::Null);

        // Other clients are unaffected.
        let value = reply_json(gw.process(2, "other", r#"{"action":"x"}"#).await);
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn invalid_json_gets_inline_error() {
        let gw = gateway(100);
        let value = reply_json(gw.process(1, "k", "{nope").await);
        assert_eq!(
            value,
            json!({"type": "error", "status": "error", "error": "invalid_json", "messageId": null})
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_peers_and_sender() {
        let gw = gateway(100);
        let (a, _rx_a) = gw.connections().register().await;
        let (_b, mut rx_b) = gw.connections().register().await;

        let reply = reply_json(
            gw.process(a, "k", r#"{"action":"x","broadcast":true,"messageId":"m3"}"#)
                .await,
        );
        assert_eq!(reply["messageId"], "m3");

        let peer: Value = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(peer, reply);
    }

    #[tokio::test]
    async fn authorize_checks_tokens() {
        let gw = gateway(100);
        let with = |auth: Option<&str>, query: Option<&str>| {
            ConnectRequest::from_parts(query, |name| match name {
                "authorization" => auth,
                _ => None,
            })
        };

        assert!(gw.authorize(&with(Some("Bearer boot"), None)).await);
        assert!(gw.authorize(&with(None, Some("token=boot"))).await);
        assert!(!gw.authorize(&with(None, None)).await);
        assert!(!gw.authorize(&with(Some("Bearer wrong"), None)).await);

        let issued = gw
            .tokens
            .lock()
            .await
            .issue(Some("deck".into()), Metadata::new())
            .unwrap();
        assert!(gw.authorize(&with(None, Some(&format!("token={}", issued.token)))).await);
    }

    #[tokio::test]
    async fn bootstrap_allows_unauthenticated_sessions() {
        let gw = Gateway::new(
            Arc::new(Mutex::new(TokenManager::new(3600, None))),
            Arc::new(Mutex::new(RateLimiter::new())),
            LiveConnections::new(),
            Arc::new(ActionRegistry::new()),
            MAX,
        );
        assert!(gw.authorize(&ConnectRequest::default()).await);
    }
}
