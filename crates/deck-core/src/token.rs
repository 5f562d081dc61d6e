//! Bearer tokens for the control deck.
//!
//! Tokens are opaque random strings held in an in-memory store keyed by
//! value. Expiry is lazy: any read that finds an expired entry removes it, so
//! the periodic [`TokenManager::cleanup`] sweep is an optimisation only.
//!
//! An optional *default* token never expires and cannot be revoked. It is the
//! bootstrap credential configured at start-up.

use crate::error::{DeckError, DeckResult};
use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form metadata attached to a token.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Default token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 3600;

/// A single issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token: String,
    pub client_id: Option<String>,
    pub metadata: Metadata,
    /// Milliseconds since the Unix epoch.
    pub issued_at: u64,
    /// `None` means the token never expires.
    pub expires_at: Option<u64>,
}

impl Token {
    /// Whether the token is past its expiry at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|exp| exp < now_ms)
    }
}

/// Summary returned by [`TokenManager::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    pub active_count: usize,
    pub has_default: bool,
}

/// Issues, validates, rotates and revokes bearer tokens.
#[derive(Debug)]
pub struct TokenManager {
    ttl_ms: u64,
    default_token: Option<Token>,
    tokens: HashMap<String, Token>,
}

impl TokenManager {
    /// Create a manager issuing tokens valid for `ttl_secs`.
    ///
    /// An empty `default_token` is treated as absent.
    pub fn new(ttl_secs: u64, default_token: Option<String>) -> Self {
        let default_token = default_token.filter(|t| !t.is_empty()).map(|token| {
            let mut metadata = Metadata::new();
            metadata.insert("default".into(), serde_json::Value::Bool(true));
            Token {
                token,
                client_id: None,
                metadata,
                issued_at: now_ms(),
                expires_at: None,
            }
        });

        Self {
            ttl_ms: ttl_secs.saturating_mul(1000),
            default_token,
            tokens: HashMap::new(),
        }
    }

    /// Token lifetime in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_ms / 1000
    }

    /// Issue a fresh token for `client_id`.
    pub fn issue(&mut self, client_id: Option<String>, metadata: Metadata) -> DeckResult<Token> {
        self.issue_at(client_id, metadata, now_ms())
    }

    pub fn issue_at(
        &mut self,
        client_id: Option<String>,
        metadata: Metadata,
        now_ms: u64,
    ) -> DeckResult<Token> {
        // 256 bits of entropy make collisions practically impossible, but a
        // value must never be handed out twice while it is still stored.
        let mut value = generate_token_value()?;
        while self.tokens.contains_key(&value) || self.is_default(&value) {
            value = generate_token_value()?;
        }

        let token = Token {
            token: value.clone(),
            client_id,
            metadata,
            issued_at: now_ms,
            expires_at: Some(now_ms.saturating_add(self.ttl_ms)),
        };
        self.tokens.insert(value, token.clone());
        Ok(token)
    }

    /// Check whether `token` is the default token or a stored, unexpired token.
    pub fn is_valid(&mut self, token: &str) -> bool {
        self.is_valid_at(token, now_ms())
    }

    pub fn is_valid_at(&mut self, token: &str, now_ms: u64) -> bool {
        if token.is_empty() {
            return false;
        }
        if self.is_default(token) {
            return true;
        }
        self.lookup_at(token, now_ms).is_some()
    }

    /// Full record for `token`, or `None` if unknown or expired.
    pub fn get_info(&mut self, token: &str) -> Option<Token> {
        self.get_info_at(token, now_ms())
    }

    pub fn get_info_at(&mut self, token: &str, now_ms: u64) -> Option<Token> {
        if let Some(default) = self.default_token.as_ref().filter(|d| d.token == token) {
            return Some(default.clone());
        }
        self.lookup_at(token, now_ms).cloned()
    }

    /// Remove a non-default token. Returns `false` for the default token and
    /// for tokens that are not stored.
    pub fn revoke(&mut self, token: &str) -> bool {
        if self.is_default(token) {
            return false;
        }
        self.tokens.remove(token).is_some()
    }

    /// Replace `old_token` with a freshly issued one.
    ///
    /// The check, revoke and issue happen under a single `&mut self` borrow,
    /// so callers holding the store's lock observe the swap atomically.
    pub fn rotate(
        &mut self,
        old_token: &str,
        client_id: Option<String>,
        metadata: Metadata,
    ) -> DeckResult<Token> {
        self.rotate_at(old_token, client_id, metadata, now_ms())
    }

    pub fn rotate_at(
        &mut self,
        old_token: &str,
        client_id: Option<String>,
        metadata: Metadata,
        now_ms: u64,
    ) -> DeckResult<Token> {
        if !self.is_valid_at(old_token, now_ms) {
            return Err(DeckError::Authentication("invalid token".into()));
        }
        let issued = self.issue_at(client_id, metadata, now_ms)?;
        self.revoke(old_token);
        Ok(issued)
    }

    /// Drop every expired token. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(now_ms())
    }

    pub fn cleanup_at(&mut self, now_ms: u64) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| !t.is_expired_at(now_ms));
        before - self.tokens.len()
    }

    pub fn stats(&self) -> TokenStats {
        self.stats_at(now_ms())
    }

    pub fn stats_at(&self, now_ms: u64) -> TokenStats {
        let stored = self
            .tokens
            .values()
            .filter(|t| !t.is_expired_at(now_ms))
            .count();
        let has_default = self.default_token.is_some();
        TokenStats {
            active_count: stored + usize::from(has_default),
            has_default,
        }
    }

    /// Whether connections must present a valid token: true as soon as a
    /// default token exists or any unexpired token is stored.
    pub fn requires_auth_at(&self, now_ms: u64) -> bool {
        self.stats_at(now_ms).active_count > 0
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth_at(now_ms())
    }

    fn is_default(&self, token: &str) -> bool {
        self.default_token.as_ref().is_some_and(|d| d.token == token)
    }

    /// Look up a stored token, evicting it if expired.
    fn lookup_at(&mut self, token: &str, now_ms: u64) -> Option<&Token> {
        let expired = self.tokens.get(token)?.is_expired_at(now_ms);
        if expired {
            self.tokens.remove(token);
            return None;
        }
        self.tokens.get(token)
    }
}

/// Generate a random token value (32 bytes, hex-encoded).
pub fn generate_token_value() -> DeckResult<String> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| DeckError::Other("system RNG failure".into()))?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    fn manager() -> TokenManager {
        TokenManager::new(60, Some("dev-token".into()))
    }

    #[test]
    fn issued_token_is_valid_until_expiry() {
        let mut tm = manager();
        let token = tm.issue_at(Some("deck-1".into()), Metadata::new(), T0).unwrap();
        assert_eq!(token.expires_at, Some(T0 + 60_000));
        assert_eq!(token.token.len(), 64);

        assert!(tm.is_valid_at(&token.token, T0 + 60_000 - 1));
        assert!(tm.is_valid_at(&token.token, T0 + 60_000));
        assert!(!tm.is_valid_at(&token.token, T0 + 60_000 + 1));
    }

    #[test]
    fn expired_token_is_evicted_on_read() {
        let mut tm = manager();
        let token = tm.issue_at(None, Metadata::new(), T0).unwrap();
        assert_eq!(tm.stats_at(T0).active_count, 2);

        assert!(tm.get_info_at(&token.token, T0 + 120_000).is_none());
        // Evicted, so even an earlier clock no longer sees it.
        assert!(!tm.is_valid_at(&token.token, T0));
    }

    #[test]
    fn default_token_never_expires_and_cannot_be_revoked() {
        let mut tm = manager();
        assert!(tm.is_valid_at("dev-token", u64::MAX));
        assert!(!tm.revoke("dev-token"));
        assert!(tm.is_valid("dev-token"));

        let info = tm.get_info("dev-token").unwrap();
        assert_eq!(info.expires_at, None);
        assert_eq!(info.metadata.get("default"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn revoke_succeeds_exactly_once() {
        let mut tm = manager();
        let token = tm.issue(None, Metadata::new()).unwrap();
        assert!(tm.revoke(&token.token));
        assert!(!tm.revoke(&token.token));
        assert!(!tm.revoke("never-issued"));
        assert!(!tm.is_valid(&token.token));
    }

    #[test]
    fn rotate_invalidates_old_token() {
        let mut tm = manager();
        let old = tm.issue_at(Some("a".into()), Metadata::new(), T0).unwrap();
        let other = tm.issue_at(Some("b".into()), Metadata::new(), T0).unwrap();

        let new = tm
            .rotate_at(&old.token, Some("a".into()), Metadata::new(), T0 + 10)
            .unwrap();
        assert_ne!(new.token, old.token);
        assert!(tm.is_valid_at(&other.token, T0 + 20));
        assert!(!tm.is_valid_at(&old.token, T0 + 20));
        assert!(tm.is_valid_at(&new.token, T0 + 20));
    }

    #[test]
    fn rotate_rejects_invalid_token() {
        let mut tm = manager();
        let err = tm.rotate("bogus", None, Metadata::new()).unwrap_err();
        assert!(matches!(err, DeckError::Authentication(_)));

        let expired = tm.issue_at(None, Metadata::new(), T0).unwrap();
        assert!(tm
            .rotate_at(&expired.token, None, Metadata::new(), T0 + 61_000)
            .is_err());
    }

    #[test]
    fn rotating_default_token_keeps_it_valid() {
        let mut tm = manager();
        let new = tm.rotate("dev-token", None, Metadata::new()).unwrap();
        assert!(tm.is_valid("dev-token"));
        assert!(tm.is_valid(&new.token));
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let mut tm = TokenManager::new(10, None);
        tm.issue_at(None, Metadata::new(), T0).unwrap();
        let fresh = tm.issue_at(None, Metadata::new(), T0 + 20_000).unwrap();

        assert_eq!(tm.cleanup_at(T0 + 15_000), 1);
        assert_eq!(
            tm.stats_at(T0 + 15_000),
            TokenStats {
                active_count: 1,
                has_default: false
            }
        );
        assert!(tm.is_valid_at(&fresh.token, T0 + 20_000));
    }

    #[test]
    fn requires_auth_tracks_live_tokens() {
        let mut tm = TokenManager::new(10, None);
        assert!(!tm.requires_auth_at(T0));
        tm.issue_at(None, Metadata::new(), T0).unwrap();
        assert!(tm.requires_auth_at(T0));
        assert!(!tm.requires_auth_at(T0 + 11_000));

        assert!(manager().requires_auth());
        assert!(!TokenManager::new(10, Some(String::new())).requires_auth());
    }

    #[test]
    fn empty_token_is_never_valid() {
        let mut tm = manager();
        assert!(!tm.is_valid(""));
    }
}
