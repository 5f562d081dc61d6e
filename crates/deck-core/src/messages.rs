//! JSON wire messages exchanged over the control channel.
//!
//! Inbound messages are loosely typed: every field is optional and unknown
//! fields are ignored. Outbound messages are [`Envelope`]s, which always carry
//! `type`, `status` and `messageId`, plus handler-specific fields flattened in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Close code sent when a connection presents a missing or invalid token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code sent when a single inbound message exceeds the size limit.
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
/// Reserved for fatal rate limiting. Never raised: rate limiting is answered inline.
pub const CLOSE_RATE_LIMITED: u16 = 4029;

/// Default per-message size limit (100 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 102_400;

/// Heartbeat request and reply, exchanged as bare text frames.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

pub const TYPE_ACK: &str = "ack";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_PROFILE_SELECT_ACK: &str = "profile:select:ack";

pub const KIND_PROFILE_SELECT: &str = "profile:select";
pub const KIND_CONTROL: &str = "control";

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_NOT_IMPLEMENTED: &str = "not_implemented";

pub const ERROR_UNKNOWN_ACTION: &str = "unknown action";
pub const ERROR_MISSING_ACTION: &str = "missing action";
pub const ERROR_INVALID_JSON: &str = "invalid_json";
pub const ERROR_RATE_LIMITED: &str = "rate_limit_exceeded";

/// An inbound control message.
///
/// Fields are kept as raw JSON values so that a wrongly-typed field degrades
/// to "no action" or "not a broadcast" instead of failing the whole parse.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub action: Option<Value>,
    /// Alternate action field accepted for `kind == "control"`.
    #[serde(default, rename = "type")]
    pub control_type: Option<Value>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub profile_id: Option<Value>,
    #[serde(default)]
    pub broadcast: Option<Value>,
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// Valid JSON that is not an object (an array, a bare string) yields an
    /// empty message, which dispatches as "missing action".
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.is_object() {
            serde_json::from_value(value)
        } else {
            Ok(Self::default())
        }
    }

    /// Handler name for this message, honouring the `control` kind's
    /// fallback to the `type` field.
    pub fn action_name(&self) -> Option<&str> {
        let action = non_empty_str(self.action.as_ref());
        if self.kind() == Some(KIND_CONTROL) {
            action.or(non_empty_str(self.control_type.as_ref()))
        } else {
            action
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_ref().and_then(Value::as_str)
    }

    pub fn is_profile_select(&self) -> bool {
        self.kind() == Some(KIND_PROFILE_SELECT)
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast == Some(Value::Bool(true))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub status: String,
    #[serde(rename = "messageId")]
    pub message_id: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    fn new(msg_type: &str, status: &str, message_id: Option<Value>) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            status: status.to_string(),
            message_id: message_id.unwrap_or(Value::Null),
            fields: Map::new(),
        }
    }

    /// Acknowledge a dispatched action, merging the handler's result.
    ///
    /// Object results are flattened into the envelope; `status` is taken from
    /// the result when present (default `"ok"`), while `type` and `messageId`
    /// always stay under gateway control. Any other value lands under `result`.
    pub fn ack(message_id: Option<Value>, result: Value) -> Self {
        let mut env = Self::new(TYPE_ACK, STATUS_OK, message_id);
        match result {
            Value::Object(mut fields) => {
                if let Some(status) = fields.remove("status") {
                    env.status = match status {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                }
                fields.remove("type");
                fields.remove("messageId");
                env.fields = fields;
            }
            Value::Null => {}
            other => {
                env.fields.insert("result".into(), other);
            }
        }
        env
    }

    /// An `ack` reporting a dispatch failure.
    pub fn ack_error(message_id: Option<Value>, error: impl Into<String>) -> Self {
        Self::new(TYPE_ACK, STATUS_ERROR, message_id).with("error", Value::String(error.into()))
    }

    /// Reply to a `profile:select` message.
    pub fn profile_select_ack(message_id: Option<Value>, profile_id: Option<Value>) -> Self {
        Self::new(TYPE_PROFILE_SELECT_ACK, STATUS_OK, message_id)
            .with("profileId", profile_id.unwrap_or(Value::Null))
    }

    /// Inline reply to a message that could not be parsed.
    pub fn invalid_json() -> Self {
        Self::new(TYPE_ERROR, STATUS_ERROR, None)
            .with("error", Value::String(ERROR_INVALID_JSON.into()))
    }

    /// Inline reply to a rate-limited message.
    pub fn rate_limited(retry_after_secs: f64) -> Self {
        Self::new(TYPE_ERROR, STATUS_ERROR, None)
            .with("error", Value::String(ERROR_RATE_LIMITED.into()))
            .with("retryAfterSeconds", Value::from(retry_after_secs))
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_full_message() {
        let msg = InboundMessage::parse(
            r#"{"kind":"control","action":"audio","payload":{"v":1},"messageId":"m1","broadcast":true}"#,
        )
        .unwrap();
        assert_eq!(msg.action_name(), Some("audio"));
        assert_eq!(msg.payload, Some(json!({"v": 1})));
        assert_eq!(msg.message_id, Some(json!("m1")));
        assert!(msg.is_broadcast());
    }

    #[test]
    fn control_kind_falls_back_to_type() {
        let msg = InboundMessage::parse(r#"{"kind":"control","type":"keyboard"}"#).unwrap();
        assert_eq!(msg.action_name(), Some("keyboard"));

        // Without the control kind, `type` is not an action selector.
        let msg = InboundMessage::parse(r#"{"type":"keyboard"}"#).unwrap();
        assert_eq!(msg.action_name(), None);
    }

    #[test]
    fn non_object_json_has_no_action() {
        let msg = InboundMessage::parse("[1,2,3]").unwrap();
        assert_eq!(msg.action_name(), None);
        assert!(InboundMessage::parse("{not json").is_err());
    }

    #[test]
    fn broadcast_requires_literal_true() {
        assert!(!InboundMessage::parse(r#"{"broadcast":false}"#).unwrap().is_broadcast());
        assert!(!InboundMessage::parse(r#"{"broadcast":"yes"}"#).unwrap().is_broadcast());
        assert!(InboundMessage::parse(r#"{"broadcast":true}"#).unwrap().is_broadcast());
    }

    #[test]
    fn non_string_action_is_ignored() {
        let msg = InboundMessage::parse(r#"{"action":42,"messageId":7}"#).unwrap();
        assert_eq!(msg.action_name(), None);
        assert_eq!(msg.message_id, Some(json!(7)));
    }

    #[test]
    fn ack_merges_result_fields() {
        let env = Envelope::ack(
            Some(json!("m1")),
            json!({"status": "not_implemented", "action": "obs", "type": "spoofed", "messageId": "x"}),
        );
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "ack", "status": "not_implemented", "action": "obs", "messageId": "m1"})
        );
    }

    #[test]
    fn ack_defaults_status_and_wraps_scalars() {
        let env = Envelope::ack(None, json!({"result": 3}));
        assert_eq!(env.status, STATUS_OK);
        assert_eq!(env.message_id, Value::Null);

        let env = Envelope::ack(None, json!([1, 2]));
        assert_eq!(env.field("result"), Some(&json!([1, 2])));
    }

    #[test]
    fn profile_select_ack_shape() {
        let env = Envelope::profile_select_ack(Some(json!("m2")), Some(json!("p1")));
        let value: Value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({"type": "profile:select:ack", "status": "ok", "profileId": "p1", "messageId": "m2"})
        );
    }

    #[test]
    fn rate_limited_reply_carries_retry_after() {
        let value = serde_json::to_value(Envelope::rate_limited(2.5)).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], ERROR_RATE_LIMITED);
        assert_eq!(value["retryAfterSeconds"], 2.5);
    }
}
