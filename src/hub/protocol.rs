//! Wire envelopes for the realtime socket.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ProjectList,
    ProjectStatus,
    ContainerStats,
    ContainerLogs,
    Subscribe,
    Unsubscribe,
    Error,
}

/// Typed envelope pushed to (and parsed from) connected clients. A message
/// carrying a `project_id` is scoped: it is delivered only to clients whose
/// subscription set matches (or is empty).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageType, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            project_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn scoped(
        kind: MessageType,
        project_id: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            project_id: Some(project_id.into()),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageType::Error, Some(serde_json::Value::String(text.into())))
    }
}

/// Subscribe/unsubscribe payload: either one project id or a list.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub enum SubscriptionPayload {
    One(String),
    Many(Vec<String>),
}

impl SubscriptionPayload {
    pub fn into_ids(self) -> Vec<String> {
        match self {
            SubscriptionPayload::One(id) => vec![id],
            SubscriptionPayload::Many(ids) => ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let message = Message::scoped(
            MessageType::ContainerStats,
            "abc123",
            Some(serde_json::json!({"cpu_percent": 1.5})),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "container_stats");
        assert_eq!(value["project_id"], "abc123");
        assert!(value.get("timestamp").is_some());

        let unscoped = Message::new(MessageType::ProjectList, None);
        let value = serde_json::to_value(&unscoped).unwrap();
        assert!(value.get("project_id").is_none());
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_client_envelope_without_timestamp_parses() {
        let message: Message =
            serde_json::from_str(r#"{"type":"subscribe","payload":"abc123"}"#).unwrap();
        assert_eq!(message.kind, MessageType::Subscribe);
        assert_eq!(message.project_id, None);
    }

    #[test]
    fn test_subscription_payload_forms() {
        let one: SubscriptionPayload = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(one.into_ids(), vec!["abc".to_string()]);

        let many: SubscriptionPayload = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(many.into_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
