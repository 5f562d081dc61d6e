//! Control plane: token lifecycle, device pairing and health endpoints.
//!
//! [`ControlPlane`] holds the operations behind the HTTP control listener in
//! [`http`]. It shares the token store, rate limiter and live connection set
//! with the gateway, so both surfaces observe the same state.

pub mod http;

use crate::auth::{PairingManager, RateLimiter};
use crate::cache::EphemeralCache;
use crate::gateway::LiveConnections;
use crate::handshake::{extract_bearer, secrets_match};
use deck_core::{DeckError, DeckResult, Metadata, Token, TokenManager};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cache key of the memoised diagnostics snapshot.
const DIAGNOSTICS_KEY: &str = "diagnostics";
const DIAGNOSTICS_TTL_MS: u64 = 1_000;

/// Static settings of the control plane.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Identity that pairing codes are bound to.
    pub server_id: String,
    /// Secret exchanged for a token at `/tokens/handshake`. `None` disables handshakes.
    pub handshake_secret: Option<String>,
    /// Gateway port advertised by the discovery endpoint.
    pub gateway_port: u16,
    pub tls: bool,
    pub cache_entries: usize,
}

/// Counts removed by one [`ControlPlane::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub tokens: usize,
    pub rate_buckets: usize,
    pub pairing_codes: usize,
    pub cache_entries: usize,
}

pub struct ControlPlane {
    tokens: Arc<Mutex<TokenManager>>,
    limiter: Arc<Mutex<RateLimiter>>,
    pairing: Arc<Mutex<PairingManager>>,
    connections: LiveConnections,
    cache: Mutex<EphemeralCache<Value>>,
    settings: ControlSettings,
    started_at: Instant,
}

impl ControlPlane {
    pub fn new(
        tokens: Arc<Mutex<TokenManager>>,
        limiter: Arc<Mutex<RateLimiter>>,
        pairing: Arc<Mutex<PairingManager>>,
        connections: LiveConnections,
        settings: ControlSettings,
    ) -> Self {
        Self {
            tokens,
            limiter,
            pairing,
            connections,
            cache: Mutex::new(EphemeralCache::new(settings.cache_entries)),
            settings,
            started_at: Instant::now(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.settings.server_id
    }

    pub fn health(&self) -> Value {
        json!({"status": "ok"})
    }

    /// Snapshot of the token store, rate limiter, cache and live sessions.
    ///
    /// Memoised for one second.
    pub async fn diagnostics(&self) -> Value {
        if let Some(cached) = self.cache.lock().await.get(DIAGNOSTICS_KEY) {
            return cached;
        }

        let tokens = self.tokens.lock().await.stats();
        let rate_limiter = self.limiter.lock().await.stats();
        let connections = self.connections.count().await;

        let mut cache = self.cache.lock().await;
        let snapshot = json!({
            "tokens": tokens,
            "rateLimiter": rate_limiter,
            "cache": cache.stats(),
            "connections": connections,
        });
        cache.set(DIAGNOSTICS_KEY, snapshot.clone(), DIAGNOSTICS_TTL_MS);
        snapshot
    }

    pub fn performance(&self) -> Value {
        let uptime = self.started_at.elapsed().as_secs_f64();
        json!({"uptimeSeconds": (uptime * 100.0).round() / 100.0})
    }

    /// Connection details a client needs to reach the gateway.
    pub fn discovery(&self) -> Value {
        json!({
            "serverId": self.settings.server_id,
            "port": self.settings.gateway_port,
            "protocol": if self.settings.tls { "wss" } else { "ws" },
            "capabilities": {
                "tls": self.settings.tls,
                "websocket": true,
                "profiles": true,
            },
        })
    }

    /// Exchange the shared handshake secret for a fresh token.
    pub async fn handshake(&self, secret: Option<&str>, client_id: Option<&str>) -> DeckResult<Value> {
        let secret = present(secret).ok_or_else(|| DeckError::Validation("secret required".into()))?;
        let expected = self.settings.handshake_secret.as_deref().unwrap_or_default();
        if expected.is_empty() || !secrets_match(secret, expected) {
            warn!(client_id = client_id.unwrap_or_default(), "invalid handshake secret");
            return Err(DeckError::Authentication("invalid secret".into()));
        }

        let issued = self
            .tokens
            .lock()
            .await
            .issue(client_id.map(str::to_string), Metadata::new())?;
        info!(client_id = client_id.unwrap_or_default(), "issued token via handshake");
        Ok(issued_body(&issued))
    }

    /// Replace the bearer token in `authorization` with a new one.
    pub async fn rotate(&self, authorization: Option<&str>, client_id: Option<&str>) -> DeckResult<Value> {
        let token = bearer(authorization)
            .ok_or_else(|| DeckError::Authentication("token required".into()))?;

        let rotated = self
            .tokens
            .lock()
            .await
            .rotate(token, client_id.map(str::to_string), Metadata::new());
        match rotated {
            Ok(issued) => {
                info!(client_id = client_id.unwrap_or_default(), "rotated token");
                Ok(issued_body(&issued))
            }
            Err(DeckError::Authentication(_)) => {
                warn!("rotation refused: invalid token");
                Err(DeckError::Validation("invalid token".into()))
            }
            Err(e) => Err(e),
        }
    }

    /// Revoke `token`, or the bearer token in `authorization` when absent.
    pub async fn revoke(&self, token: Option<&str>, authorization: Option<&str>) -> DeckResult<Value> {
        let token = present(token)
            .or_else(|| bearer(authorization))
            .ok_or_else(|| DeckError::Validation("token required".into()))?;

        if !self.tokens.lock().await.revoke(token) {
            return Err(DeckError::NotFound("token not found or default".into()));
        }
        info!("revoked token");
        Ok(json!({"status": "revoked"}))
    }

    /// Metadata of the bearer token in `authorization`.
    pub async fn info(&self, authorization: Option<&str>) -> DeckResult<Value> {
        let token = bearer(authorization)
            .ok_or_else(|| DeckError::Authentication("token required".into()))?;
        let info = self
            .tokens
            .lock()
            .await
            .get_info(token)
            .ok_or_else(|| DeckError::NotFound("token not found or expired".into()))?;
        Ok(serde_json::to_value(info)?)
    }

    /// Issue a pairing code bound to this server.
    pub async fn pairing_request(&self) -> Value {
        let code = self.pairing.lock().await.generate(&self.settings.server_id);
        debug!(expires_at = code.expires_at, "issued pairing code");
        json!({
            "code": code.code,
            "expiresAt": code.expires_at,
            "serverId": code.server_id,
        })
    }

    pub async fn pairing_confirm(
        &self,
        code: Option<&str>,
        server_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> DeckResult<Value> {
        let (Some(code), Some(server_id)) = (present(code), present(server_id)) else {
            return Err(DeckError::Validation("code and serverId required".into()));
        };

        if !self.pairing.lock().await.finalize(code, server_id, fingerprint) {
            warn!(server_id, "pairing confirmation failed");
            return Err(DeckError::Authentication("invalid or expired code".into()));
        }
        info!(server_id, "device paired");
        Ok(json!({"status": "paired", "serverId": server_id}))
    }

    pub async fn paired_servers(&self) -> Value {
        json!({"servers": self.pairing.lock().await.paired_servers()})
    }

    /// Drop expired state from every store.
    pub async fn sweep(&self) -> SweepReport {
        SweepReport {
            tokens: self.tokens.lock().await.cleanup(),
            rate_buckets: self.limiter.lock().await.gc(),
            pairing_codes: self.pairing.lock().await.purge_expired(),
            cache_entries: self.cache.lock().await.purge_expired(),
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn bearer(authorization: Option<&str>) -> Option<&str> {
    present(authorization.map(extract_bearer))
}

fn issued_body(token: &Token) -> Value {
    json!({
        "token": token.token,
        "expiresAt": token.expires_at,
        "clientId": token.client_id,
    })
}
