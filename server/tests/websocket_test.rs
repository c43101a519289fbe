//! Unit tests for the WebSocket protocol as seen by a client.

use replimap_engine::{
    ChangeKind, ChangedEntry, DeltaBatch, RecordKey, RecordValue, StringInt, Version,
};
use serde_json::json;

/// Client-side mirror of the envelopes the server sends.
#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Delta { batch: DeltaBatch },
    Pong,
    Error { message: String },
}

/// Client-side mirror of the envelopes the server accepts.
#[derive(serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)]
enum ClientMessage {
    Ack { version: Version },
    Resync,
    Ping,
}

#[cfg(test)]
mod websocket_protocol_tests {
    use super::*;

    #[test]
    fn test_delta_message_deserialization() {
        let json = r#"{
            "type": "delta",
            "batch": {
                "targetVersion": 5,
                "removed": [{"shape": "text", "data": "gone"}],
                "changed": [
                    {
                        "key": {"shape": "text", "data": "player-1"},
                        "value": {"shape": "string_int", "data": {"string_value": "hp", "int_value": 90}},
                        "kind": "updated",
                        "version": 5
                    }
                ]
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();

        match msg {
            ServerMessage::Delta { batch } => {
                assert_eq!(batch.target_version, 5);
                assert!(!batch.full_resync);
                assert_eq!(batch.removed, vec![RecordKey::new("gone")]);
                assert_eq!(batch.changed.len(), 1);
                assert_eq!(batch.changed[0].kind, ChangeKind::Updated);
                assert_eq!(
                    batch.changed[0].value,
                    RecordValue::new(StringInt::new("hp", 90))
                );
            }
            other => panic!("Expected Delta message, got {:?}", other),
        }
    }

    #[test]
    fn test_full_resync_flag() {
        let json = r#"{"type":"delta","batch":{"targetVersion":9,"fullResync":true,"removed":[],"changed":[]}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Delta { batch } if batch.full_resync));
    }

    #[test]
    fn test_pong_and_error_deserialization() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Pong));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"unknown observer: x"}"#).unwrap();
        match msg {
            ServerMessage::Error { message } => assert!(message.contains("unknown observer")),
            other => panic!("Expected Error message, got {:?}", other),
        }
    }

    #[test]
    fn test_client_message_serialization() {
        let json = serde_json::to_value(ClientMessage::Ack { version: 12 }).unwrap();
        assert_eq!(json, json!({"type": "ack", "version": 12}));

        let json = serde_json::to_value(ClientMessage::Resync).unwrap();
        assert_eq!(json, json!({"type": "resync"}));

        let json = serde_json::to_value(ClientMessage::Ping).unwrap();
        assert_eq!(json, json!({"type": "ping"}));
    }

    #[test]
    fn test_batch_matches_engine_encoding() {
        let batch = DeltaBatch {
            target_version: 3,
            full_resync: false,
            removed: vec![],
            changed: vec![ChangedEntry {
                key: RecordKey::new(1i64),
                value: RecordValue::new(true),
                kind: ChangeKind::Added,
                version: 3,
            }],
        };

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(
            json,
            json!({
                "targetVersion": 3,
                "removed": [],
                "changed": [{
                    "key": {"shape": "int", "data": 1},
                    "value": {"shape": "bool", "data": true},
                    "kind": "added",
                    "version": 3
                }]
            })
        );
    }
}
