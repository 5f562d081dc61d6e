//! Server configuration: TOML file + CLI overrides.

use crate::auth::DEFAULT_PAIRING_TTL_SECS;
use crate::cache::DEFAULT_CACHE_ENTRIES;
use deck_core::messages::DEFAULT_MAX_MESSAGE_SIZE;
use deck_core::token::DEFAULT_TOKEN_TTL_SECS;
use deck_core::{DeckError, DeckResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub pairing: PairingSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub maintenance: MaintenanceSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to `port + 1`.
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_server_id")]
    pub server_id: String,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            control_port: None,
            max_message_size: default_max_message_size(),
            server_id: default_server_id(),
            cert: None,
            key: None,
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub default_token: Option<String>,
    #[serde(default)]
    pub handshake_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            default_token: None,
            handshake_secret: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// `[rate_limit]` section: policy for inbound gateway messages.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_rate_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_window")]
    pub window_secs: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_secs: default_rate_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairingSection {
    #[serde(default = "default_pairing_ttl")]
    pub ttl_secs: u64,
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_pairing_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceSection {
    #[serde(default = "default_maintenance_interval")]
    pub interval_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4455
}
fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}
fn default_server_id() -> String {
    "deck-server".to_string()
}
fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}
fn default_rate_requests() -> u32 {
    100
}
fn default_rate_window() -> f64 {
    60.0
}
fn default_pairing_ttl() -> u64 {
    DEFAULT_PAIRING_TTL_SECS
}
fn default_cache_entries() -> usize {
    DEFAULT_CACHE_ENTRIES
}
fn default_maintenance_interval() -> u64 {
    60
}

/// Values supplied on the command line or through the environment.
///
/// Each one, when set, replaces the config file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub control_port: Option<u16>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub default_token: Option<String>,
    pub handshake_secret: Option<String>,
    pub max_message_size: Option<usize>,
    pub server_id: Option<String>,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub control_port: u16,
    pub max_message_size: usize,
    pub server_id: String,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub default_token: Option<String>,
    pub handshake_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: f64,
    pub pairing_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub maintenance_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), Overrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file yields the defaults. The result is validated.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> DeckResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| DeckError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self::resolve(file_config, overrides);
        config.validate()?;
        Ok(config)
    }

    fn resolve(file: ConfigFile, cli: Overrides) -> Self {
        let port = cli.port.unwrap_or(file.server.port);
        let control_port = cli
            .control_port
            .or(file.server.control_port)
            .unwrap_or_else(|| port.wrapping_add(1));

        Self {
            host: cli.host.unwrap_or(file.server.host),
            port,
            control_port,
            max_message_size: cli.max_message_size.unwrap_or(file.server.max_message_size),
            server_id: cli.server_id.unwrap_or(file.server.server_id),
            cert_path: cli.cert.or(file.server.cert).map(|s| expand_tilde_str(&s)),
            key_path: cli.key.or(file.server.key).map(|s| expand_tilde_str(&s)),
            default_token: non_empty(cli.default_token.or(file.auth.default_token)),
            handshake_secret: non_empty(cli.handshake_secret.or(file.auth.handshake_secret)),
            token_ttl_secs: file.auth.token_ttl_secs,
            rate_limit_requests: file.rate_limit.requests,
            rate_limit_window_secs: file.rate_limit.window_secs,
            pairing_ttl_secs: file.pairing.ttl_secs,
            cache_max_entries: file.cache.max_entries,
            maintenance_interval_secs: file.maintenance.interval_secs,
        }
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> DeckResult<()> {
        if self.port == 0 {
            return Err(DeckError::Config("port must be non-zero".into()));
        }
        if self.control_port == 0 || self.control_port == self.port {
            return Err(DeckError::Config(format!(
                "control port {} must be non-zero and differ from gateway port {}",
                self.control_port, self.port
            )));
        }
        if self.max_message_size == 0 {
            return Err(DeckError::Config("max_message_size must be positive".into()));
        }
        if self.rate_limit_requests > 0
            && !(self.rate_limit_window_secs.is_finite() && self.rate_limit_window_secs > 0.0)
        {
            return Err(DeckError::Config(
                "rate_limit.window_secs must be positive when requests > 0".into(),
            ));
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(DeckError::Config(
                "cert and key must be configured together".into(),
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(DeckError::Config(
                "maintenance.interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Secret accepted by the handshake endpoint: the configured one, else the default token.
    pub fn effective_handshake_secret(&self) -> Option<&str> {
        self.handshake_secret
            .as_deref()
            .or(self.default_token.as_deref())
    }

    pub fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
