//! Server wiring: shared stores, listeners, maintenance and shutdown.

use crate::actions;
use crate::auth::{PairingManager, RateLimiter, WEBSOCKET_SCOPE};
use crate::config::ServerConfig;
use crate::control::{self, ControlPlane, ControlSettings};
use crate::gateway::{Gateway, LiveConnections};
use crate::transport::{tls, websocket};
use deck_core::{generate_token_value, ActionRegistry, DeckResult, TokenManager};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// How long live sessions get to send their close frames on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The control deck server.
pub struct DeckServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    control: Arc<ControlPlane>,
    tls: Option<TlsAcceptor>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl DeckServer {
    /// Create a server instance with `actions` plus the built-in handlers.
    ///
    /// When no default token is configured, one is generated for this run.
    pub fn new(mut config: ServerConfig, mut actions: ActionRegistry) -> DeckResult<Self> {
        if config.default_token.is_none() {
            let token = generate_token_value()?;
            warn!(token = %token, "no default token configured, generated one for this run");
            config.default_token = Some(token);
        }

        let tokens = Arc::new(Mutex::new(TokenManager::new(
            config.token_ttl_secs,
            config.default_token.clone(),
        )));

        let mut limiter = RateLimiter::new();
        limiter.configure(
            WEBSOCKET_SCOPE,
            config.rate_limit_requests,
            config.rate_limit_window_secs,
        );
        let limiter = Arc::new(Mutex::new(limiter));

        let pairing = Arc::new(Mutex::new(PairingManager::new(config.pairing_ttl_secs)));
        let connections = LiveConnections::new();

        let control = Arc::new(ControlPlane::new(
            tokens.clone(),
            limiter.clone(),
            pairing,
            connections.clone(),
            ControlSettings {
                server_id: config.server_id.clone(),
                handshake_secret: config.effective_handshake_secret().map(str::to_string),
                gateway_port: config.port,
                tls: config.tls_enabled(),
                cache_entries: config.cache_max_entries,
            },
        ));

        actions::register_builtins(&mut actions, control.clone());
        let gateway = Arc::new(Gateway::new(
            tokens,
            limiter,
            connections,
            Arc::new(actions),
            config.max_message_size,
        ));

        let tls = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => {
                info!(cert = %cert.display(), "TLS enabled");
                Some(tls::load_acceptor(cert, key)?)
            }
            _ => None,
        };

        Ok(Self {
            config,
            gateway,
            control,
            tls,
            shutdown_tx: broadcast::channel(1).0,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Bind the configured addresses and serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> DeckResult<()> {
        let host = self.config.host.as_str();
        let ws_listener = TcpListener::bind((host, self.config.port)).await?;
        let control_listener = TcpListener::bind((host, self.config.control_port)).await?;
        self.serve(ws_listener, control_listener, shutdown).await
    }

    /// Serve on pre-bound listeners until `shutdown` resolves.
    pub async fn serve(
        self,
        ws_listener: TcpListener,
        control_listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send,
    ) -> DeckResult<()> {
        let ws_addr = ws_listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;

        let mut ws_rx = websocket::start_listener(
            ws_listener,
            self.tls.clone(),
            websocket::ListenerOptions::new(self.config.max_message_size),
        );
        let control_task =
            control::http::start_listener(control_listener, self.tls.clone(), self.control.clone());

        // Periodic sweep of expired tokens, idle rate buckets, pairing codes and cache entries.
        let sweep_control = self.control.clone();
        let interval_secs = self.config.maintenance_interval_secs.max(1);
        let maintenance_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = sweep_control.sweep().await;
                debug!(
                    tokens = report.tokens,
                    rate_buckets = report.rate_buckets,
                    pairing_codes = report.pairing_codes,
                    cache_entries = report.cache_entries,
                    "maintenance sweep"
                );
            }
        });

        info!(
            ws = %ws_addr,
            control = %control_addr,
            tls = self.tls.is_some(),
            server_id = %self.config.server_id,
            "deck-server ready"
        );

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
                Some(conn) = ws_rx.recv() => {
                    let gateway = self.gateway.clone();
                    let shutdown_rx = self.shutdown_tx.subscribe();
                    sessions.spawn(async move {
                        let remote = conn.remote_addr;
                        if let Err(e) = gateway.handle_connection(conn, shutdown_rx).await {
                            warn!(remote = %remote, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Some(_) = sessions.join_next() => {}
                else => {
                    info!("listener closed, shutting down");
                    break;
                }
            }
        }

        // Broadcast shutdown to all connected clients
        info!(sessions = sessions.len(), "closing live sessions");
        let _ = self.shutdown_tx.send(());
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("sessions did not close in time, aborting");
            sessions.abort_all();
        }

        control_task.abort();
        maintenance_task.abort();
        info!("deck-server stopped");
        Ok(())
    }
}
