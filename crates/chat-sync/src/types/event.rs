//! Payloads carried by the conversation event stream.

use crate::error::{Result, SyncError};
use crate::protocol::payload_types;
use crate::types::Message;
use serde::{Deserialize, Serialize};

/// Decoded `data:` payload of one stream event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    /// Authoritative, ordered message list for the conversation.
    Snapshot { data: Vec<Message> },
    /// Single message to upsert.
    Message { data: Message },
    /// Keep-alive. Carries no data.
    Heartbeat {
        #[serde(default)]
        timestamp: String,
    },
}

impl StreamPayload {
    /// Decode an event's data field.
    ///
    /// Returns `Ok(None)` for well-formed payloads with an unrecognized
    /// `type`, so newer servers can add event kinds.
    pub fn decode(data: &str) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| SyncError::Payload(format!("invalid JSON: {}", e)))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| SyncError::Payload("missing \"type\" field".to_string()))?;

        if !payload_types::KNOWN.contains(&kind) {
            tracing::debug!("Ignoring stream event of unknown type {:?}", kind);
            return Ok(None);
        }

        let kind = kind.to_string();
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| SyncError::Payload(format!("bad {} event: {}", kind, e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamPayload::Snapshot { .. } => payload_types::SNAPSHOT,
            StreamPayload::Message { .. } => payload_types::MESSAGE,
            StreamPayload::Heartbeat { .. } => payload_types::HEARTBEAT,
        }
    }

    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, StreamPayload::Heartbeat { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_decode_snapshot() {
        let payload = StreamPayload::decode(
            r#"{"type":"snapshot","data":[
                {"uuid":"u1","role":"user","content":"Hello","chat_id":"c1","in_progress":false},
                {"uuid":"a1","role":"assistant","content":"","chat_id":"c1","in_progress":true}]}"#,
        )
        .unwrap()
        .unwrap();
        match payload {
            StreamPayload::Snapshot { data } => {
                assert_eq!(data.len(), 2);
                assert_eq!(data[1].role, Role::Assistant);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message() {
        let payload = StreamPayload::decode(
            r#"{"type":"message","data":{"uuid":"a1","role":"assistant","content":"Real-time response!","chat_id":"c1","in_progress":false}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(payload.kind(), "message");
        assert!(!payload.is_heartbeat());
    }

    #[test]
    fn test_decode_heartbeat() {
        let payload = StreamPayload::decode(
            r#"{"type":"heartbeat","timestamp":"2025-01-01T00:00:25+00:00"}"#,
        )
        .unwrap()
        .unwrap();
        assert!(payload.is_heartbeat());
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let payload = StreamPayload::decode(r#"{"type":"typing","user":"bob"}"#).unwrap();
        assert!(payload.is_none());
    }

    #[test]
    fn test_malformed_payloads_are_payload_errors() {
        let err = StreamPayload::decode("{not json").unwrap_err();
        assert!(err.is_payload_error());

        let err = StreamPayload::decode(r#"{"data":[]}"#).unwrap_err();
        assert!(err.is_payload_error());

        let err = StreamPayload::decode(r#"{"type":"message","data":{"role":"user"}}"#).unwrap_err();
        assert!(err.is_payload_error());
        assert!(err.to_string().contains("message"));
    }
}
