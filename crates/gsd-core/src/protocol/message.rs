//! Kernel message envelope and its factory functions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{MessagePayload, MessageType, ProtocolError};

const MAX_ENGINE_NAME_LEN: usize = 64;

/// An immutable envelope routed between engines.
///
/// Built only through [`create_message`], [`create_reply`] or
/// [`KernelMessage::from_json`], all of which validate the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct KernelMessage {
    id: String,
    payload: MessagePayload,
    priority: i8,
    reply_port: Option<String>,
    token_cost: u64,
    sender: String,
    receiver: String,
    timestamp: DateTime<Utc>,
    in_reply_to: Option<String>,
}

impl KernelMessage {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    /// Urgency hint, higher is more urgent. Mailboxes stay FIFO regardless.
    pub fn priority(&self) -> i8 {
        self.priority
    }

    pub fn reply_port(&self) -> Option<&str> {
        self.reply_port.as_deref()
    }

    /// Tokens debited from the sender when the message is sent
    pub fn token_cost(&self) -> u64 {
        self.token_cost
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn in_reply_to(&self) -> Option<&str> {
        self.in_reply_to.as_deref()
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    /// Parse and validate an envelope received as raw JSON.
    pub fn from_json(value: Value) -> Result<Self, ProtocolError> {
        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::try_from(wire)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Options for [`create_message`].
///
/// `payload` carries the message kind; leaving it unset is a validation
/// error, as is an empty sender or receiver.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub payload: Option<MessagePayload>,
    pub sender: String,
    pub receiver: String,
    pub priority: Option<i8>,
    pub reply_port: Option<String>,
    pub token_cost: Option<u64>,
}

impl MessageOptions {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        Self {
            payload: Some(payload),
            sender: sender.into(),
            receiver: receiver.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_reply_port(mut self, port: impl Into<String>) -> Self {
        self.reply_port = Some(port.into());
        self
    }

    pub fn with_token_cost(mut self, cost: u64) -> Self {
        self.token_cost = Some(cost);
        self
    }
}

/// Options for [`create_reply`].
#[derive(Debug, Clone)]
pub struct ReplyOptions {
    pub payload: MessagePayload,
    /// Defaults to the original receiver
    pub sender: Option<String>,
    /// Defaults to the original priority
    pub priority: Option<i8>,
    pub token_cost: u64,
}

impl ReplyOptions {
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            payload,
            sender: None,
            priority: None,
            token_cost: 0,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_token_cost(mut self, cost: u64) -> Self {
        self.token_cost = cost;
        self
    }
}

/// Build a new message with a fresh id and the current timestamp.
pub fn create_message(opts: MessageOptions) -> Result<KernelMessage, ProtocolError> {
    let payload = opts.payload.ok_or(ProtocolError::MissingType)?;
    let message = KernelMessage {
        id: Uuid::new_v4().to_string(),
        payload,
        priority: opts.priority.unwrap_or(0),
        reply_port: opts.reply_port,
        token_cost: opts.token_cost.unwrap_or(0),
        sender: opts.sender,
        receiver: opts.receiver,
        timestamp: Utc::now(),
        in_reply_to: None,
    };
    validate(&message)?;
    Ok(message)
}

/// Build a reply addressed back to the sender of `original`.
///
/// Replies never carry a reply port of their own, so an exchange is a
/// single request/response hop.
pub fn create_reply(
    original: &KernelMessage,
    opts: ReplyOptions,
) -> Result<KernelMessage, ProtocolError> {
    if original.reply_port.is_none() {
        return Err(ProtocolError::MissingReplyPort {
            id: original.id.clone(),
        });
    }

    let message = KernelMessage {
        id: Uuid::new_v4().to_string(),
        payload: opts.payload,
        priority: opts.priority.unwrap_or(original.priority),
        reply_port: None,
        token_cost: opts.token_cost,
        sender: opts.sender.unwrap_or_else(|| original.receiver.clone()),
        receiver: original.sender.clone(),
        timestamp: Utc::now(),
        in_reply_to: Some(original.id.clone()),
    };
    validate(&message)?;
    Ok(message)
}

fn validate(message: &KernelMessage) -> Result<(), ProtocolError> {
    if message.id.is_empty() {
        return Err(ProtocolError::MissingField { field: "id" });
    }
    validate_engine_name("sender", &message.sender)?;
    validate_engine_name("receiver", &message.receiver)?;
    if let Some(port) = &message.reply_port {
        if port.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "replyPort",
                value: port.clone(),
                reason: "must not be blank".into(),
            });
        }
    }
    Ok(())
}

fn validate_engine_name(field: &'static str, name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::MissingField { field });
    }
    let reason = if name.len() > MAX_ENGINE_NAME_LEN {
        Some(format!("longer than {MAX_ENGINE_NAME_LEN} bytes"))
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("contains whitespace or control characters".to_string())
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ProtocolError::InvalidField {
            field,
            value: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Serialized form of [`KernelMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    priority: i8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_port: Option<String>,
    #[serde(default)]
    token_cost: u64,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    receiver: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    payload: Value,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    in_reply_to: Option<String>,
}

impl TryFrom<WireEnvelope> for KernelMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind = MessageType::from_str(&wire.kind)?;
        let mut tagged = serde_json::Map::new();
        tagged.insert("type".into(), Value::String(kind.as_str().to_string()));
        match wire.payload {
            Value::Null if matches!(kind, MessageType::Ping | MessageType::Pong) => {}
            // struct kinds whose fields all default may omit the payload
            Value::Null => {
                tagged.insert("payload".into(), Value::Object(serde_json::Map::new()));
            }
            payload => {
                tagged.insert("payload".into(), payload);
            }
        }
        let payload: MessagePayload = serde_json::from_value(Value::Object(tagged))
            .map_err(|e| ProtocolError::Malformed(format!("{kind} payload: {e}")))?;

        let message = KernelMessage {
            id: wire.id,
            payload,
            priority: wire.priority,
            reply_port: wire.reply_port,
            token_cost: wire.token_cost,
            sender: wire.sender,
            receiver: wire.receiver,
            timestamp: wire.timestamp,
            in_reply_to: wire.in_reply_to,
        };
        validate(&message)?;
        Ok(message)
    }
}

impl From<KernelMessage> for WireEnvelope {
    fn from(message: KernelMessage) -> Self {
        let kind = message.message_type().as_str().to_string();
        let payload = match serde_json::to_value(&message.payload) {
            Ok(Value::Object(mut map)) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self {
            id: message.id,
            kind,
            priority: message.priority,
            reply_port: message.reply_port,
            token_cost: message.token_cost,
            sender: message.sender,
            receiver: message.receiver,
            payload,
            timestamp: message.timestamp,
            in_reply_to: message.in_reply_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn ping(sender: &str, receiver: &str) -> MessageOptions {
        MessageOptions::new(sender, receiver, MessagePayload::Ping)
    }

    #[test]
    fn defaults_priority_and_cost_to_zero() {
        let msg = create_message(ping("router", "planner")).unwrap();
        assert_eq!(msg.priority(), 0);
        assert_eq!(msg.token_cost(), 0);
        assert_eq!(msg.message_type(), MessageType::Ping);
        assert!(msg.reply_port().is_none());
        assert!(!msg.is_reply());
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<String> = (0..500)
            .map(|_| create_message(ping("a", "b")).unwrap().id().to_string())
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn missing_payload_is_missing_type() {
        let opts = MessageOptions {
            sender: "a".into(),
            receiver: "b".into(),
            ..MessageOptions::default()
        };
        assert_eq!(create_message(opts).unwrap_err(), ProtocolError::MissingType);
    }

    #[test]
    fn empty_sender_or_receiver_is_rejected() {
        let err = create_message(ping("", "b")).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField { field: "sender" });

        let err = create_message(ping("a", "")).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField { field: "receiver" });

        let err = create_message(ping("a", "has space")).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField {
                field: "receiver",
                ..
            }
        ));
    }

    #[test]
    fn reply_requires_reply_port() {
        let original = create_message(ping("router", "io")).unwrap();
        let err = create_reply(&original, ReplyOptions::new(MessagePayload::Pong)).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingReplyPort { .. }));
    }

    #[test]
    fn reply_targets_original_sender() {
        let original = create_message(
            ping("router", "io")
                .with_reply_port("router.inbox")
                .with_priority(7),
        )
        .unwrap();
        let reply = create_reply(&original, ReplyOptions::new(MessagePayload::Pong)).unwrap();

        assert_eq!(reply.sender(), "io");
        assert_eq!(reply.receiver(), "router");
        assert_eq!(reply.in_reply_to(), Some(original.id()));
        assert_eq!(reply.priority(), 7);
        assert!(reply.reply_port().is_none());
        assert_ne!(reply.id(), original.id());

        // replies are single-hop
        assert!(create_reply(&reply, ReplyOptions::new(MessagePayload::Ping)).is_err());
    }

    #[test]
    fn wire_format_round_trips_through_validation() {
        let msg = create_message(
            MessageOptions::new(
                "planner",
                "io",
                MessagePayload::IoRead {
                    path: ".planning/STATE.md".into(),
                },
            )
            .with_token_cost(12),
        )
        .unwrap();

        let json = msg.to_json();
        assert_eq!(json["type"], "io-read");
        assert_eq!(json["tokenCost"], 12);
        assert_eq!(json["payload"]["path"], ".planning/STATE.md");

        let parsed = KernelMessage::from_json(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn from_json_rejects_unknown_type() {
        let err = KernelMessage::from_json(json!({
            "id": "m1",
            "type": "teleport",
            "sender": "a",
            "receiver": "b",
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap_err();
        assert_eq!(err, ProtocolError::InvalidType("teleport".into()));
    }

    #[test]
    fn from_json_rejects_missing_receiver() {
        let err = KernelMessage::from_json(json!({
            "id": "m1",
            "type": "ping",
            "sender": "a",
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap_err();
        assert_eq!(err, ProtocolError::MissingField { field: "receiver" });
    }

    #[test]
    fn from_json_accepts_omitted_payload_when_fields_default() {
        let parsed = KernelMessage::from_json(json!({
            "id": "m1",
            "type": "budget-query",
            "sender": "planner",
            "receiver": "router",
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(parsed.payload(), &MessagePayload::BudgetQuery { engine: None });

        let ping = KernelMessage::from_json(json!({
            "id": "m2",
            "type": "ping",
            "sender": "planner",
            "receiver": "router",
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(ping.payload(), &MessagePayload::Ping);
    }

    #[test]
    fn from_json_still_requires_fields_without_defaults() {
        let err = KernelMessage::from_json(json!({
            "id": "m1",
            "type": "io-read",
            "sender": "planner",
            "receiver": "io",
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }
}
