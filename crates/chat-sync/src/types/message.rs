//! Chat message as exchanged with the server.

use crate::types::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque message id (`uuid` on the wire).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    /// Fresh client-side id for provisional entries.
    pub fn generate() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message.
///
/// `provisional` is local-only: it marks an optimistic entry that the server
/// has not confirmed yet and is never serialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: MessageId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub chat_id: Option<ConversationId>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(
        default,
        with = "timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub provisional: bool,
}

impl Message {
    pub fn new(
        uuid: impl Into<MessageId>,
        role: Role,
        content: impl Into<String>,
        chat_id: Option<ConversationId>,
    ) -> Self {
        Message {
            uuid: uuid.into(),
            role,
            content: content.into(),
            chat_id,
            in_progress: false,
            created_at: None,
            model: None,
            components: None,
            error: None,
            provisional: false,
        }
    }

    /// Optimistic user message shown before the server confirms the send.
    pub fn provisional(chat_id: Option<ConversationId>, content: impl Into<String>) -> Self {
        let mut message = Message::new(MessageId::generate(), Role::User, content, chat_id);
        message.created_at = Some(Utc::now());
        message.provisional = true;
        message
    }

    #[must_use]
    pub fn with_in_progress(mut self, in_progress: bool) -> Self {
        self.in_progress = in_progress;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        !self.in_progress
    }

    /// An assistant message that is still being produced.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.role == Role::Assistant && self.in_progress
    }
}

/// The backend emits naive ISO timestamps (no offset) as well as RFC 3339.
/// Naive values are taken as UTC; anything unparseable becomes `None`.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_minimal() {
        let msg: Message = serde_json::from_str(
            r#"{"uuid":"a1","role":"assistant","content":"","chat_id":"c1","in_progress":true}"#,
        )
        .unwrap();
        assert_eq!(msg.uuid.as_str(), "a1");
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.is_in_flight());
        assert!(msg.created_at.is_none());
        assert!(!msg.provisional);
    }

    #[test]
    fn test_wire_shape_full_backend_record() {
        let msg: Message = serde_json::from_str(
            r#"{"uuid":"u1","role":"user","content":"Hello","chat_id":"c1",
                "in_progress":false,"created_at":"2025-03-01T10:15:30.123456",
                "model":"gpt-4o","components":"","error":null}"#,
        )
        .unwrap();
        assert!(msg.is_finalized());
        assert_eq!(msg.model.as_deref(), Some("gpt-4o"));
        assert!(msg.error.is_none());
        let ts = msg.created_at.unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-01T10:15:30.123456+00:00");
    }

    #[test]
    fn test_rfc3339_timestamp_with_offset() {
        let ts = timestamp::parse("2025-03-01T12:15:30+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-01T10:15:30+00:00");
        assert!(timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_provisional_flag_not_serialized() {
        let msg = Message::provisional(Some("c1".into()), "hi");
        assert!(msg.provisional);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("provisional").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert!(!back.provisional);
    }
}
