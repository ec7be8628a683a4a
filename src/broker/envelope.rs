//! Wire format for commands and replies.
//!
//! Both directions are JSON objects. Outgoing commands get a `command_id`
//! injected; replies must echo it back.

use serde_json::Value;
use uuid::Uuid;

use crate::broker::Payload;

/// Field carrying the correlation identifier in both directions.
pub const COMMAND_ID_FIELD: &str = "command_id";

/// Why an inbound frame could not be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Malformed {
    NotJson,
    NotAnObject,
    MissingCommandId,
    InvalidCommandId,
}

/// Build the command envelope for `payload`, overwriting any existing id.
pub fn encode_command(command_id: Uuid, mut payload: Payload) -> String {
    payload.insert(
        COMMAND_ID_FIELD.to_string(),
        Value::String(command_id.to_string()),
    );
    Value::Object(payload).to_string()
}

/// Parse a reply frame into its correlation id and the remaining payload.
pub(crate) fn decode_reply(raw: &str) -> Result<(Uuid, Payload), Malformed> {
    let value: Value = serde_json::from_str(raw).map_err(|_| Malformed::NotJson)?;
    let Value::Object(mut payload) = value else {
        return Err(Malformed::NotAnObject);
    };

    let command_id = match payload.remove(COMMAND_ID_FIELD) {
        Some(Value::String(id)) => Uuid::parse_str(&id).map_err(|_| Malformed::InvalidCommandId)?,
        Some(_) => return Err(Malformed::InvalidCommandId),
        None => return Err(Malformed::MissingCommandId),
    };

    Ok((command_id, payload))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_encode_injects_command_id() {
        let id = Uuid::new_v4();
        let frame = encode_command(
            id,
            object(json!({"action": "read_file", "file_path": "/tmp/x", "line_number": 3})),
        );

        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["command_id"], json!(id.to_string()));
        assert_eq!(parsed["action"], json!("read_file"));
        assert_eq!(parsed["line_number"], json!(3));
    }

    #[test]
    fn test_encode_overwrites_caller_command_id() {
        let id = Uuid::new_v4();
        let frame = encode_command(id, object(json!({"command_id": "spoofed"})));
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["command_id"], json!(id.to_string()));
    }

    #[test]
    fn test_decode_strips_command_id() {
        let id = Uuid::new_v4();
        let raw = json!({"command_id": id.to_string(), "data": {"content": "line3\n"}}).to_string();

        let (decoded, payload) = decode_reply(&raw).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(Value::Object(payload), json!({"data": {"content": "line3\n"}}));
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert_eq!(decode_reply("not json {"), Err(Malformed::NotJson));
        assert_eq!(decode_reply("[1, 2]"), Err(Malformed::NotAnObject));
        assert_eq!(decode_reply(r#"{"data": 1}"#), Err(Malformed::MissingCommandId));
        assert_eq!(
            decode_reply(r#"{"command_id": 42}"#),
            Err(Malformed::InvalidCommandId)
        );
        assert_eq!(
            decode_reply(r#"{"command_id": "agent-1-7"}"#),
            Err(Malformed::InvalidCommandId)
        );
    }
}
