//! deck-server: Control deck session gateway.
//!
//! Accepts authenticated WebSocket control sessions, dispatches their
//! messages to registered actions, and serves the token and pairing
//! endpoints on a separate HTTP control port.

use clap::Parser;
use deck_core::ActionRegistry;
use deck_server::transport::tls;
use deck_server::{DeckServer, Overrides, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// deck-server: control deck session gateway
#[derive(Parser, Debug)]
#[command(name = "deck-server", version, about = "Control deck session gateway")]
struct Cli {
    /// Bind address for both listeners
    #[arg(long, env = "DECK_HOST")]
    host: Option<String>,

    /// WebSocket gateway port
    #[arg(short, long, env = "DECK_PORT")]
    port: Option<u16>,

    /// HTTP control port (defaults to port + 1)
    #[arg(long, env = "DECK_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Non-expiring bootstrap token
    #[arg(long, env = "DECK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Secret exchanged for tokens at /tokens/handshake (defaults to the bootstrap token)
    #[arg(long, env = "DECK_HANDSHAKE_SECRET", hide_env_values = true)]
    handshake_secret: Option<String>,

    /// Maximum inbound message size in bytes
    #[arg(long, env = "DECK_MAX_MESSAGE_SIZE")]
    max_message_size: Option<usize>,

    /// Server identity used for pairing
    #[arg(long, env = "DECK_SERVER_ID")]
    server_id: Option<String>,

    /// TLS certificate (PEM)
    #[arg(long, env = "DECK_TLS_CERT")]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long, env = "DECK_TLS_KEY")]
    key: Option<String>,

    /// Config file path
    #[arg(long, env = "DECK_CONFIG", default_value = "~/.deck/config.toml")]
    config: String,

    /// Generate self-signed certificate for development
    #[arg(long)]
    generate_cert: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting deck-server");

    let (cert, key) = if cli.generate_cert {
        let dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".deck");
        match tls::generate_self_signed_cert(&dir) {
            Ok((c, k)) => {
                info!(cert = %c.display(), key = %k.display(), "generated self-signed certificate");
                (
                    Some(c.to_string_lossy().into_owned()),
                    Some(k.to_string_lossy().into_owned()),
                )
            }
            Err(e) => {
                error!(error = %e, "failed to generate self-signed certificate");
                std::process::exit(1);
            }
        }
    } else {
        (cli.cert, cli.key)
    };

    let overrides = Overrides {
        host: cli.host,
        port: cli.port,
        control_port: cli.control_port,
        cert,
        key,
        default_token: cli.token,
        handshake_secret: cli.handshake_secret,
        max_message_size: cli.max_message_size,
        server_id: cli.server_id,
    };

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = match DeckServer::new(server_config, ActionRegistry::new()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
