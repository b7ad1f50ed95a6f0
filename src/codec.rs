//! JSON-RPC 2.0 wire codec
//!
//! Encodes typed envelopes to JSON text and decodes inbound text into one
//! of the four envelope variants, validating the envelope along the way.
//! Validation rejects any value missing the `"jsonrpc": "2.0"` marker, any
//! request with a `null` id, and any response carrying both `result` and
//! `error` or neither.
//!
//! Classification mirrors the field-presence rules of JSON-RPC 2.0:
//!
//! - `method` present, `id` present  -> request
//! - `method` present, `id` absent   -> notification
//! - `result` present                -> success response
//! - `error` present                 -> error response
//!
//! Both directions enforce a maximum message size (default 4 MiB):
//! oversized encodes fail with `InvalidRequest`, undecodable input fails
//! with `ParseError`. Output is UTF-8 with no newline inside the JSON, so
//! stream transports can frame by appending a single `\n`.

use crate::error::{McpError, Result};
use crate::types::{
    JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JSONRPC_VERSION,
};

/// Default maximum encoded/decoded message size in bytes (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Encode a message to JSON text, enforcing the default size bound.
pub fn encode(message: &JsonRpcMessage) -> Result<String> {
    encode_with_limit(message, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Encode a message to JSON text, enforcing `limit` bytes.
///
/// # Errors
///
/// Returns [`McpError::MessageTooLarge`] when the encoded form exceeds the
/// limit, or [`McpError::Serialization`] when serialization itself fails.
pub fn encode_with_limit(message: &JsonRpcMessage, limit: usize) -> Result<String> {
    let text = serde_json::to_string(message).map_err(McpError::Serialization)?;
    if text.len() > limit {
        return Err(McpError::MessageTooLarge {
            size: text.len(),
            limit,
        }
        .into());
    }
    Ok(text)
}

/// Decode a single JSON text into a validated envelope, enforcing the
/// default size bound.
pub fn decode(raw: &str) -> Result<JsonRpcMessage> {
    decode_with_limit(raw, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Decode a single JSON text into a validated envelope, enforcing `limit`
/// bytes.
///
/// # Errors
///
/// Returns [`McpError::Parse`] when the input is not valid JSON or exceeds
/// the limit, and [`McpError::InvalidEnvelope`] when the JSON does not form
/// a valid JSON-RPC 2.0 envelope.
pub fn decode_with_limit(raw: &str, limit: usize) -> Result<JsonRpcMessage> {
    if raw.len() > limit {
        return Err(McpError::Parse(format!(
            "message of {} bytes exceeds maximum of {limit} bytes",
            raw.len()
        ))
        .into());
    }
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| McpError::Parse(e.to_string()))?;
    decode_value(value)
}

/// Classify and validate an already-parsed JSON value as an envelope.
pub fn decode_value(value: serde_json::Value) -> Result<JsonRpcMessage> {
    let obj = value
        .as_object()
        .ok_or_else(|| McpError::InvalidEnvelope("message is not a JSON object".to_string()))?;

    match obj.get("jsonrpc").and_then(|v| v.as_str()) {
        Some(JSONRPC_VERSION) => {}
        _ => {
            return Err(
                McpError::InvalidEnvelope("missing or invalid jsonrpc marker".to_string()).into(),
            )
        }
    }

    let has_id = obj.contains_key("id");
    let id_is_null = obj.get("id").map(|v| v.is_null()).unwrap_or(false);
    let has_method = obj.contains_key("method");
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    if has_method {
        if !has_id {
            let notification: JsonRpcNotification =
                serde_json::from_value(value).map_err(McpError::Serialization)?;
            return Ok(JsonRpcMessage::Notification(notification));
        }
        if id_is_null {
            return Err(McpError::InvalidEnvelope("request id must not be null".to_string()).into());
        }
        let request: JsonRpcRequest =
            serde_json::from_value(value).map_err(McpError::Serialization)?;
        return Ok(JsonRpcMessage::Request(request));
    }

    if has_result && has_error {
        return Err(McpError::InvalidEnvelope(
            "response carries both result and error".to_string(),
        )
        .into());
    }
    if !has_result && !has_error {
        return Err(McpError::InvalidEnvelope(
            "message carries neither method, result, nor error".to_string(),
        )
        .into());
    }
    if !has_id || id_is_null {
        return Err(McpError::InvalidEnvelope("response id must not be null".to_string()).into());
    }

    if has_result {
        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(McpError::Serialization)?;
        Ok(JsonRpcMessage::Response(response))
    } else {
        let response: JsonRpcErrorResponse =
            serde_json::from_value(value).map_err(McpError::Serialization)?;
        Ok(JsonRpcMessage::Error(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorData;
    use crate::types::{RequestId, NOTIF_INITIALIZED};

    #[test]
    fn test_round_trip_request() {
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(
            0,
            "initialize",
            Some(serde_json::json!({"protocolVersion": "2024-11-05"})),
        ));
        let encoded = encode(&msg).unwrap();
        assert!(!encoded.contains('\n'));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_round_trip_all_variants() {
        let messages = vec![
            JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None)),
            JsonRpcMessage::Notification(JsonRpcNotification::new(NOTIF_INITIALIZED, None)),
            JsonRpcMessage::Response(JsonRpcResponse::new(
                RequestId::Number(1),
                serde_json::json!({"ok": true}),
            )),
            JsonRpcMessage::Error(JsonRpcErrorResponse::new(
                RequestId::String("r".to_string()),
                ErrorData::new(-32601, "Method not found"),
            )),
        ];
        for msg in messages {
            let decoded = decode(&encode(&msg).unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_rejects_missing_jsonrpc_marker() {
        let result = decode(r#"{"id":1,"method":"ping"}"#);
        let err = result.unwrap_err().downcast::<McpError>().unwrap();
        assert!(matches!(err, McpError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_rejects_wrong_jsonrpc_version() {
        let result = decode(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_null_request_id() {
        let result = decode(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#);
        let err = result.unwrap_err().downcast::<McpError>().unwrap();
        assert!(matches!(err, McpError::InvalidEnvelope(_)));
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_rejects_response_with_result_and_error() {
        let result = decode(r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":0,"message":""}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_response_with_neither_result_nor_error() {
        let result = decode(r#"{"jsonrpc":"2.0","id":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let result = decode("{not json");
        let err = result.unwrap_err().downcast::<McpError>().unwrap();
        assert!(matches!(err, McpError::Parse(_)));
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn test_encode_size_limit_is_invalid_request() {
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(
            0,
            "tools/call",
            Some(serde_json::json!({"blob": "x".repeat(256)})),
        ));
        let err = encode_with_limit(&msg, 64)
            .unwrap_err()
            .downcast::<McpError>()
            .unwrap();
        assert!(matches!(err, McpError::MessageTooLarge { .. }));
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_decode_size_limit_is_parse_error() {
        let raw = format!(
            r#"{{"jsonrpc":"2.0","id":1,"result":{{"blob":"{}"}}}}"#,
            "x".repeat(256)
        );
        let err = decode_with_limit(&raw, 64)
            .unwrap_err()
            .downcast::<McpError>()
            .unwrap();
        assert!(matches!(err, McpError::Parse(_)));
    }

    #[test]
    fn test_string_request_id_echoed_verbatim() {
        let decoded = decode(r#"{"jsonrpc":"2.0","id":"abc-1","method":"ping"}"#).unwrap();
        match decoded {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.id, RequestId::String("abc-1".to_string()));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_survive_in_params() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"t","futureField":7}}"#;
        let decoded = decode(raw).unwrap();
        match decoded {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.params.unwrap()["futureField"], 7);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
