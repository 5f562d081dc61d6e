//! One-time pairing codes.
//!
//! A code binds a server identity to whichever device presents it first,
//! within its TTL. Validation is read-only apart from evicting an expired
//! code; only a successful [`PairingManager::finalize`] consumes it.

use deck_core::now_ms;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

/// Default lifetime of a pairing code (5 minutes).
pub const DEFAULT_PAIRING_TTL_SECS: u64 = 300;

/// A pending pairing code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCode {
    pub code: String,
    pub server_id: String,
    /// Milliseconds since the Unix epoch.
    pub expires_at: u64,
    pub fingerprint: Option<String>,
}

/// Issues and redeems pairing codes; keeps the paired-server registry.
#[derive(Debug)]
pub struct PairingManager {
    ttl_ms: u64,
    codes: HashMap<String, PairingCode>,
    /// serverId → device fingerprint ("" when none was supplied).
    paired: HashMap<String, String>,
}

impl PairingManager {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_ms: ttl_secs.saturating_mul(1000),
            codes: HashMap::new(),
            paired: HashMap::new(),
        }
    }

    /// Create a new code bound to `server_id`.
    pub fn generate(&mut self, server_id: &str) -> PairingCode {
        self.generate_at(server_id, now_ms())
    }

    pub fn generate_at(&mut self, server_id: &str, now_ms: u64) -> PairingCode {
        let mut code = generate_code();
        while self.codes.contains_key(&code) {
            code = generate_code();
        }

        let entry = PairingCode {
            code: code.clone(),
            server_id: server_id.to_string(),
            expires_at: now_ms.saturating_add(self.ttl_ms),
            fingerprint: None,
        };
        self.codes.insert(code, entry.clone());
        entry
    }

    /// Whether `code` exists, is unexpired, and is bound to `server_id`.
    pub fn validate(&mut self, code: &str, server_id: &str) -> bool {
        self.validate_at(code, server_id, now_ms())
    }

    pub fn validate_at(&mut self, code: &str, server_id: &str, now_ms: u64) -> bool {
        let Some(entry) = self.codes.get(code) else {
            return false;
        };
        if entry.expires_at < now_ms {
            self.codes.remove(code);
            return false;
        }
        entry.server_id == server_id
    }

    /// Redeem `code`: record the pairing and consume the code.
    ///
    /// Returns `false`, with no side effects, if the code does not validate.
    pub fn finalize(&mut self, code: &str, server_id: &str, fingerprint: Option<&str>) -> bool {
        self.finalize_at(code, server_id, fingerprint, now_ms())
    }

    pub fn finalize_at(
        &mut self,
        code: &str,
        server_id: &str,
        fingerprint: Option<&str>,
        now_ms: u64,
    ) -> bool {
        if !self.validate_at(code, server_id, now_ms) {
            return false;
        }
        self.paired
            .insert(server_id.to_string(), fingerprint.unwrap_or_default().to_string());
        self.codes.remove(code);
        true
    }

    /// Snapshot of the paired-server registry.
    pub fn paired_servers(&self) -> HashMap<String, String> {
        self.paired.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.codes.len()
    }

    /// Drop expired codes. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(now_ms())
    }

    pub fn purge_expired_at(&mut self, now_ms: u64) -> usize {
        let before = self.codes.len();
        self.codes.retain(|_, c| c.expires_at >= now_ms);
        before - self.codes.len()
    }
}

/// Generate an 8-character hex pairing code.
fn generate_code() -> String {
    let bytes: [u8; 4] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    #[test]
    fn generated_code_shape() {
        let mut pm = PairingManager::new(DEFAULT_PAIRING_TTL_SECS);
        let code = pm.generate_at("deck", T0);
        assert_eq!(code.code.len(), 8);
        assert!(code.code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(code.expires_at, T0 + 300_000);
        assert_eq!(code.server_id, "deck");
        assert_eq!(pm.pending_count(), 1);
    }

    #[test]
    fn finalize_succeeds_exactly_once() {
        let mut pm = PairingManager::new(300);
        let code = pm.generate_at("deck", T0).code;

        assert!(pm.finalize_at(&code, "deck", Some("fp-1"), T0 + 1));
        assert!(!pm.finalize_at(&code, "deck", Some("fp-2"), T0 + 2));
        assert_eq!(pm.paired_servers().get("deck").map(String::as_str), Some("fp-1"));
        assert_eq!(pm.pending_count(), 0);
    }

    #[test]
    fn validate_does_not_consume() {
        let mut pm = PairingManager::new(300);
        let code = pm.generate_at("deck", T0).code;

        assert!(pm.validate_at(&code, "deck", T0));
        assert!(pm.validate_at(&code, "deck", T0));
        assert!(pm.finalize_at(&code, "deck", None, T0));
        assert_eq!(pm.paired_servers().get("deck").map(String::as_str), Some(""));
    }

    #[test]
    fn wrong_server_id_is_rejected_without_side_effects() {
        let mut pm = PairingManager::new(300);
        let code = pm.generate_at("deck", T0).code;

        assert!(!pm.finalize_at(&code, "other", Some("fp"), T0));
        assert!(pm.paired_servers().is_empty());
        assert!(pm.validate_at(&code, "deck", T0));
    }

    #[test]
    fn expired_code_is_evicted() {
        let mut pm = PairingManager::new(300);
        let code = pm.generate_at("deck", T0).code;

        assert!(pm.validate_at(&code, "deck", T0 + 300_000));
        assert!(!pm.validate_at(&code, "deck", T0 + 300_001));
        assert_eq!(pm.pending_count(), 0);
        assert!(!pm.finalize_at(&code, "deck", None, T0));
    }

    #[test]
    fn finalize_overwrites_previous_fingerprint() {
        let mut pm = PairingManager::new(300);
        let first = pm.generate_at("deck", T0).code;
        let second = pm.generate_at("deck", T0).code;
        assert!(pm.finalize_at(&first, "deck", Some("old"), T0));
        assert!(pm.finalize_at(&second, "deck", Some("new"), T0));
        assert_eq!(pm.paired_servers()["deck"], "new");
    }

    #[test]
    fn purge_removes_only_expired() {
        let mut pm = PairingManager::new(10);
        pm.generate_at("deck", T0);
        pm.generate_at("deck", T0 + 20_000);
        assert_eq!(pm.purge_expired_at(T0 + 15_000), 1);
        assert_eq!(pm.pending_count(), 1);
    }

    #[test]
    fn unknown_code_is_invalid() {
        let mut pm = PairingManager::new(300);
        assert!(!pm.validate("deadbeef", "deck"));
        assert!(!pm.finalize("deadbeef", "deck", None));
    }
}
