//! Typed JSON bodies on top of raw [`QueueMessage`]s.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::QueueError;
use crate::queue::{DurableQueue, QueueMessage};

/// Serialize a payload into a message body.
pub fn encode<T: Serialize>(payload: &T) -> Result<String, QueueError> {
    serde_json::to_string(payload).map_err(|e| QueueError::Encode(e.to_string()))
}

/// Parse a message body into a payload.
///
/// A body that is not valid JSON or does not match `T` is a poison message.
pub fn decode<T: DeserializeOwned>(msg: &QueueMessage) -> Result<T, QueueError> {
    serde_json::from_str(&msg.body)
        .map_err(|e| QueueError::Parse(format!("Invalid payload in message {}: {}", msg.id, e)))
}

/// Parse a batch of messages, separating successes from failures.
///
/// Returns `(decoded, errors)`. Good messages are never blocked by bad ones,
/// allowing partial batch processing.
pub fn decode_batch<T: DeserializeOwned>(
    messages: Vec<QueueMessage>,
) -> (Vec<(QueueMessage, T)>, Vec<(QueueMessage, QueueError)>) {
    let mut decoded = Vec::with_capacity(messages.len());
    let mut errors = Vec::new();

    for msg in messages {
        match decode(&msg) {
            Ok(payload) => decoded.push((msg, payload)),
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "Failed to parse queue message");
                errors.push((msg, e));
            }
        }
    }

    (decoded, errors)
}

/// Encode and enqueue a payload.
pub async fn publish<T: Serialize + Sync>(
    queue: &dyn DurableQueue,
    payload: &T,
    delay: Duration,
) -> Result<String, QueueError> {
    let body = encode(payload)?;
    queue.send(body, delay).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use powermgmt_core::{PowerAction, PowerActionRequest, ResourceKind, ScanRequest, Scope};

    fn make_msg(id: &str, body: &str) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            body: body.to_string(),
            receipt_handle: "handle-test".to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        }
    }

    #[test]
    fn test_decode_scan_request() {
        let body = r#"{
            "scope": {"kind": "subscription", "id": "sub-1"},
            "tick_at": "2026-03-02T07:05:00Z"
        }"#;
        let req: ScanRequest = decode(&make_msg("m1", body)).unwrap();
        assert_eq!(req.scope, Scope::Subscription("sub-1".into()));
        assert_eq!(req.tick_at, Utc.with_ymd_and_hms(2026, 3, 2, 7, 5, 0).unwrap());
        assert!(req.previous_tick.is_none());
    }

    #[test]
    fn test_decode_action_request_defaults_optional_fields() {
        let body = r#"{
            "resource_id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
            "kind": "VirtualMachine",
            "action": "stop",
            "origin": "schedule",
            "created_at": "2026-03-02T18:00:00Z"
        }"#;
        let req: PowerActionRequest = decode(&make_msg("m2", body)).unwrap();
        assert_eq!(req.kind, ResourceKind::VirtualMachine);
        assert_eq!(req.action, PowerAction::Stop);
        assert_eq!(req.window_id, None);
        assert_eq!(req.reason, None);
    }

    #[test]
    fn test_decode_invalid_json_is_poison() {
        let err = decode::<ScanRequest>(&make_msg("bad", "not json at all")).unwrap_err();
        assert!(err.is_poison());
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_decode_batch_partial_success() {
        let good = encode(&ScanRequest {
            scope: Scope::ManagementGroup("mg".into()),
            tick_at: Utc::now(),
            previous_tick: None,
        })
        .unwrap();
        let messages = vec![
            make_msg("good-1", &good),
            make_msg("bad-1", "invalid json"),
            make_msg("bad-2", r#"{"scope": 42}"#),
            make_msg("good-2", &good),
        ];

        let (decoded, errors) = decode_batch::<ScanRequest>(messages);

        assert_eq!(decoded.len(), 2);
        assert_eq!(errors.len(), 2);
        assert_eq!(decoded[0].0.id, "good-1");
        assert_eq!(errors[1].0.id, "bad-2");
    }
}
