//! Message dispatch: route an inbound message to its action handler and
//! build the acknowledgement envelope.

use deck_core::messages::{ERROR_MISSING_ACTION, ERROR_UNKNOWN_ACTION};
use deck_core::{ActionRegistry, Envelope, InboundMessage};
use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Dispatch `message` and return the envelope to send back.
///
/// Never fails: handler errors and panics become `status = "error"` acks.
pub async fn dispatch(actions: &ActionRegistry, message: InboundMessage) -> Envelope {
    let message_id = message.message_id.clone();

    if message.is_profile_select() {
        return Envelope::profile_select_ack(message_id, message.profile_id);
    }

    let Some(action) = message.action_name() else {
        return Envelope::ack_error(message_id, ERROR_MISSING_ACTION);
    };
    let Some(handler) = actions.get(action) else {
        debug!(action, "unknown action");
        return Envelope::ack_error(message_id, ERROR_UNKNOWN_ACTION);
    };

    let payload = message.payload.clone().unwrap_or(Value::Null);
    // `execute` itself runs inside the guarded future so synchronous panics are caught too.
    let run = async move { handler.execute(payload).await };
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(result)) => Envelope::ack(message_id, result),
        Ok(Err(e)) => {
            error!(action, error = %e, "action failed");
            Envelope::ack_error(message_id, e.to_string())
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(action, error = %reason, "action panicked");
            Envelope::ack_error(message_id, reason)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "action panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{ActionFuture, ActionHandler, DeckError};
    use serde_json::json;
    use std::sync::Arc;

    /// Panics before producing its future.
    struct StrictHandler;

    impl ActionHandler for StrictHandler {
        fn execute(&self, payload: Value) -> ActionFuture<'_> {
            let n = payload["n"].as_u64().expect("payload.n is required");
            Box::pin(async move { Ok(json!({"status": "ok", "result": n})) })
        }
    }

    fn registry() -> ActionRegistry {
        let mut actions = ActionRegistry::new();
        actions.register_fn("noop", |_| async { Ok::<_, DeckError>(json!({"status": "ok"})) });
        actions.register_fn("echo", |payload| async move {
            Ok::<_, DeckError>(json!({"status": "ok", "result": payload}))
        });
        actions.register_fn("fail", |_| async {
            Err::<Value, _>(DeckError::Action("device unavailable".into()))
        });
        actions.register_fn("boom", |_| async {
            if true {
                panic!("handler blew up");
            }
            Ok::<_, DeckError>(Value::Null)
        });
        actions.register("strict", Arc::new(StrictHandler));
        actions.register_fn("eager", |payload: Value| {
            let key = payload["key"].as_str().map(str::to_string).unwrap();
            async move { Ok::<_, DeckError>(json!({"status": "ok", "result": key})) }
        });
        actions
    }

    async fn run(text: &str) -> Value {
        let message = InboundMessage::parse(text).unwrap();
        serde_json::to_value(dispatch(&registry(), message).await).unwrap()
    }

    #[tokio::test]
    async fn unknown_action() {
        assert_eq!(
            run(r#"{"action":"unknown_action","messageId":"m1"}"#).await,
            json!({"type": "ack", "status": "error", "error": "unknown action", "messageId": "m1"})
        );
    }

    #[tokio::test]
    async fn missing_action() {
        let value = run(r#"{"messageId":"m0"}"#).await;
        assert_eq!(value["error"], ERROR_MISSING_ACTION);
        assert_eq!(value["messageId"], "m0");

        let value = run("[1,2]").await;
        assert_eq!(value["error"], ERROR_MISSING_ACTION);
        assert_eq!(value["messageId"], Value::Null);
    }

    #[tokio::test]
    async fn profile_select_bypasses_registry() {
        assert_eq!(
            run(r#"{"kind":"profile:select","profileId":"p1","messageId":"m2","action":"nope"}"#)
                .await,
            json!({"type": "profile:select:ack", "status": "ok", "profileId": "p1", "messageId": "m2"})
        );
    }

    #[tokio::test]
    async fn control_kind_dispatches_by_type() {
        let value = run(r#"{"kind":"control","type":"echo","payload":{"k":1},"messageId":"c"}"#).await;
        assert_eq!(value["status"], "ok");
        assert_eq!(value["type"], "ack");
        assert_eq!(value["result"], json!({"k": 1}));
    }

    #[tokio::test]
    async fn handler_error_is_reported() {
        assert_eq!(
            run(r#"{"action":"fail","messageId":"m4"}"#).await,
            json!({"type": "ack", "status": "error", "error": "device unavailable", "messageId": "m4"})
        );
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let value = run(r#"{"action":"boom","messageId":"m5"}"#).await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "handler blew up");
        assert_eq!(value["messageId"], "m5");
    }

    #[tokio::test]
    async fn synchronous_panic_is_contained() {
        let value = run(r#"{"action":"strict","payload":{},"messageId":"m6"}"#).await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "payload.n is required");
        assert_eq!(value["messageId"], "m6");

        let value = run(r#"{"action":"eager","payload":{},"messageId":"m7"}"#).await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["messageId"], "m7");

        let value = run(r#"{"action":"strict","payload":{"n":3}}"#).await;
        assert_eq!(value["result"], 3);
    }
}
