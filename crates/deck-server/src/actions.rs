//! Built-in action handlers.
//!
//! Real actions (keyboard, audio, OBS, ...) are registered by the embedding
//! application. The server only contributes a couple of introspection
//! handlers so the gateway is usable on its own.

use crate::control::ControlPlane;
use deck_core::{ActionFuture, ActionHandler, ActionRegistry, DeckError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const ECHO_ACTION: &str = "echo";
pub const DIAGNOSTICS_ACTION: &str = "diagnostics";

/// Reports the control plane's diagnostics snapshot.
pub struct DiagnosticsAction {
    control: Arc<ControlPlane>,
}

impl DiagnosticsAction {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}

impl ActionHandler for DiagnosticsAction {
    fn execute(&self, _payload: Value) -> ActionFuture<'_> {
        Box::pin(async move {
            let snapshot = self.control.diagnostics().await;
            Ok(json!({"status": "ok", "result": snapshot}))
        })
    }
}

/// Add the built-in handlers to `actions`, leaving existing registrations alone.
pub fn register_builtins(actions: &mut ActionRegistry, control: Arc<ControlPlane>) {
    if !actions.contains(ECHO_ACTION) {
        actions.register_fn(ECHO_ACTION, |payload| async move {
            Ok::<_, DeckError>(json!({"status": "ok", "result": payload}))
        });
    }
    if !actions.contains(DIAGNOSTICS_ACTION) {
        actions.register(DIAGNOSTICS_ACTION, Arc::new(DiagnosticsAction::new(control)));
    }
    debug!(actions = ?actions.names(), "action registry ready");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{PairingManager, RateLimiter};
    use crate::control::ControlSettings;
    use crate::gateway::LiveConnections;
    use deck_core::TokenManager;
    use tokio::sync::Mutex;

    fn control() -> Arc<ControlPlane> {
        Arc::new(ControlPlane::new(
            Arc::new(Mutex::new(TokenManager::new(60, None))),
            Arc::new(Mutex::new(RateLimiter::new())),
            Arc::new(Mutex::new(PairingManager::new(60))),
            LiveConnections::new(),
            ControlSettings {
                server_id: "deck".into(),
                handshake_secret: None,
                gateway_port: 4455,
                tls: false,
                cache_entries: 4,
            },
        ))
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let mut actions = ActionRegistry::new();
        register_builtins(&mut actions, control());
        assert_eq!(actions.names(), vec!["diagnostics", "echo"]);

        let echo = actions.get(ECHO_ACTION).unwrap();
        let result = echo.execute(json!({"a": 1})).await.unwrap();
        assert_eq!(result, json!({"status": "ok", "result": {"a": 1}}));

        let diag = actions.get(DIAGNOSTICS_ACTION).unwrap();
        let result = diag.execute(Value::Null).await.unwrap();
        assert_eq!(result["result"]["tokens"]["hasDefault"], false);
    }

    #[tokio::test]
    async fn existing_handlers_win() {
        let mut actions = ActionRegistry::new();
        actions.register_fn(ECHO_ACTION, |_| async {
            Ok::<_, DeckError>(json!({"status": "custom"}))
        });
        register_builtins(&mut actions, control());

        let result = actions.get(ECHO_ACTION).unwrap().execute(Value::Null).await.unwrap();
        assert_eq!(result["status"], "custom");
    }
}
