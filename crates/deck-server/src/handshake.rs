//! Connection handshake: credential extraction and client identification.
//!
//! A connecting client presents its bearer token either in an
//! `Authorization: Bearer <token>` header or, for clients that cannot set
//! headers on a WebSocket upgrade, as a `token` query parameter. The header
//! wins when both are present.

use std::net::SocketAddr;

/// Header carrying the client-chosen rate-limit identity.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
/// Query parameter fallback for the bearer token.
pub const TOKEN_QUERY_PARAM: &str = "token";
/// Rate-limit key used when neither a client id nor a remote address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Credentials and identity captured from an upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub authorization: Option<String>,
    pub query_token: Option<String>,
    pub client_id: Option<String>,
}

impl ConnectRequest {
    /// Capture the relevant parts of an HTTP request.
    pub fn from_parts<'a>(
        query: Option<&str>,
        mut header: impl FnMut(&str) -> Option<&'a str>,
    ) -> Self {
        Self {
            authorization: header("authorization").map(str::to_string),
            query_token: query.and_then(|q| query_param(q, TOKEN_QUERY_PARAM)),
            client_id: header(CLIENT_ID_HEADER).map(str::to_string),
        }
    }

    /// The presented token: header first, then query parameter.
    pub fn token(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .map(extract_bearer)
            .filter(|t| !t.is_empty())
            .or(self.query_token.as_deref().filter(|t| !t.is_empty()))
    }

    /// Rate-limit key: client id header, then remote IP, then `"unknown"`.
    pub fn client_key(&self, remote: Option<SocketAddr>) -> String {
        if let Some(id) = self.client_id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        match remote {
            Some(addr) => addr.ip().to_string(),
            None => UNKNOWN_CLIENT.to_string(),
        }
    }
}

/// Strip a case-insensitive `Bearer ` prefix; other values pass through as-is.
pub fn extract_bearer(header: &str) -> &str {
    let header = header.trim();
    match header.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => header[7..].trim(),
        _ => header,
    }
}

/// Look up a percent-decoded query parameter.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| {
            let value = value.replace('+', " ");
            urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or(value)
        })
}

/// Constant-time string comparison for shared secrets.
pub fn secrets_match(given: &str, expected: &str) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    let diff = given
        .as_bytes()
        .iter()
        .zip(expected.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}
