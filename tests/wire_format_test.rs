//! Wire-format tests
//!
//! Validates the codec and read buffer against literal JSON-RPC 2.0
//! exchanges: the initialization handshake, tool calls, and the error
//! taxonomy, byte-for-byte as they appear on a stream transport.

use mcp_runtime::buffer::ReadBuffer;
use mcp_runtime::codec;
use mcp_runtime::error::{ErrorCode, ErrorData};
use mcp_runtime::types::{
    InitializeParams, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};

#[test]
fn test_initialize_request_literal() {
    let raw = r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#;
    let decoded = codec::decode(raw).unwrap();

    let JsonRpcMessage::Request(request) = decoded else {
        panic!("expected request, got {decoded:?}");
    };
    assert_eq!(request.id, RequestId::Number(0));
    assert_eq!(request.method, "initialize");

    let params: InitializeParams = serde_json::from_value(request.params.unwrap()).unwrap();
    assert_eq!(params.protocol_version, "2024-11-05");
    assert_eq!(params.client_info.name, "t");
    assert_eq!(params.client_info.version, "1");
}

#[test]
fn test_initialized_notification_literal() {
    let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
    let decoded = codec::decode(raw).unwrap();
    assert_eq!(decoded.method(), Some("notifications/initialized"));
    assert_eq!(decoded.id(), None);

    // Re-encoding produces the same compact form.
    assert_eq!(codec::encode(&decoded).unwrap(), raw);
}

#[test]
fn test_tool_call_response_literal() {
    let raw = r#"{"jsonrpc":"2.0","id":1,"result":{"content":[{"type":"text","text":"4"}]}}"#;
    let decoded = codec::decode(raw).unwrap();
    let JsonRpcMessage::Response(response) = decoded else {
        panic!("expected response");
    };
    assert_eq!(response.id, RequestId::Number(1));
    assert_eq!(response.result["content"][0]["text"], "4");
}

#[test]
fn test_method_not_found_literal() {
    let raw = r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
    let decoded = codec::decode(raw).unwrap();
    let JsonRpcMessage::Error(error) = decoded else {
        panic!("expected error response");
    };
    assert_eq!(error.error.code, ErrorCode::MethodNotFound.as_i64());
    assert_eq!(error.error.message, "Method not found");
}

#[test]
fn test_encoded_messages_are_single_line() {
    let messages = vec![
        JsonRpcMessage::Request(JsonRpcRequest::new(
            0,
            "tools/call",
            Some(serde_json::json!({
                "name": "calc",
                "arguments": { "expression": "lines\nwith\nbreaks" }
            })),
        )),
        JsonRpcMessage::Notification(JsonRpcNotification::new(
            "notifications/message",
            Some(serde_json::json!({ "level": "info", "data": "a\r\nb" })),
        )),
        JsonRpcMessage::Response(JsonRpcResponse::new(
            RequestId::Number(0),
            serde_json::json!({ "text": "multi\nline" }),
        )),
        JsonRpcMessage::Error(JsonRpcErrorResponse::new(
            RequestId::String("r-1".to_string()),
            ErrorData::new(-32603, "boom\nboom"),
        )),
    ];
    for message in messages {
        let encoded = codec::encode(&message).unwrap();
        assert!(
            !encoded.contains('\n') && !encoded.contains('\r'),
            "encoded JSON must never contain raw newlines: {encoded}"
        );
        assert_eq!(codec::decode(&encoded).unwrap(), message);
    }
}

#[test]
fn test_stream_of_encoded_messages_survives_chunking() {
    let messages: Vec<JsonRpcMessage> = (0..10i64)
        .map(|i| {
            JsonRpcMessage::Request(JsonRpcRequest::new(
                i,
                format!("method/{i}"),
                Some(serde_json::json!({ "index": i })),
            ))
        })
        .collect();

    let stream: String = messages
        .iter()
        .map(|m| format!("{}\n", codec::encode(m).unwrap()))
        .collect();

    // Feed the byte stream in awkward 7-byte chunks.
    let mut buffer = ReadBuffer::new();
    let mut drained = Vec::new();
    for chunk in stream.as_bytes().chunks(7) {
        buffer.append(chunk);
        while let Some(message) = buffer.next_message() {
            drained.push(message);
        }
    }
    assert_eq!(drained, messages);
    assert!(buffer.is_empty());
}

#[test]
fn test_interleaved_garbage_does_not_stall_the_stream() {
    let good = codec::encode(&JsonRpcMessage::Request(JsonRpcRequest::new(
        1, "ping", None,
    )))
    .unwrap();

    let mut buffer = ReadBuffer::new();
    buffer.append(b"garbage that is not json\n");
    buffer.append(b"{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"x\"}\n");
    buffer.append(format!("{good}\n").as_bytes());
    buffer.append(b"{\"jsonrpc\":\"2.0\",\"id\":null,\"method\":\"x\"}\n");

    let first = buffer.next_message().expect("good line should survive");
    assert_eq!(first.method(), Some("ping"));
    assert!(buffer.next_message().is_none());
}

#[test]
fn test_error_code_taxonomy() {
    assert_eq!(ErrorCode::ParseError.as_i64(), -32700);
    assert_eq!(ErrorCode::InvalidRequest.as_i64(), -32600);
    assert_eq!(ErrorCode::MethodNotFound.as_i64(), -32601);
    assert_eq!(ErrorCode::InvalidParams.as_i64(), -32602);
    assert_eq!(ErrorCode::InternalError.as_i64(), -32603);
    assert_eq!(ErrorCode::ConnectionClosed.as_i64(), -32000);
    assert_eq!(ErrorCode::RequestTimeout.as_i64(), -32001);
}
