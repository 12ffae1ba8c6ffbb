//! Conversation identifiers and records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-issued conversation id. Opaque to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        ConversationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        ConversationId(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        ConversationId(s)
    }
}

/// Conversation as returned by `POST /conversations`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub uuid: ConversationId,
    #[serde(default)]
    pub name: String,
}

/// Body for creating a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    pub name: String,
}

impl Default for NewConversation {
    fn default() -> Self {
        Self {
            name: "New Chat".to_string(),
        }
    }
}

impl NewConversation {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_is_transparent() {
        let id = ConversationId::from("c1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c1\"");
        assert_eq!(id.to_string(), "c1");
    }

    #[test]
    fn test_record_tolerates_extra_fields() {
        let record: ConversationRecord = serde_json::from_str(
            r#"{"uuid":"8f1c","name":"New Chat","user_uuid":"u-1","created_at":"2025-01-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(record.uuid.as_str(), "8f1c");
        assert_eq!(record.name, "New Chat");
    }
}
