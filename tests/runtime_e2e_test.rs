//! End-to-end runtime tests
//!
//! Drives a real `Client` and `Server` wired back-to-back over the
//! in-process transport pair: handshake, tool calls, timeouts with
//! cancellation propagation, progress-driven timeout resets, and
//! connection-close draining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcp_runtime::client::{Client, ClientOptions};
use mcp_runtime::error::McpError;
use mcp_runtime::protocol::{ProgressCallback, RequestOptions};
use mcp_runtime::server::{Server, ServerOptions};
use mcp_runtime::transport::inmemory::InMemoryTransport;
use mcp_runtime::types::{
    CallToolResponse, Implementation, Tool, ToolResponseContent, LATEST_PROTOCOL_VERSION,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Build a server exposing a `calc` tool plus a `sleep` tool that only
/// finishes when cancelled (for timeout tests).
fn calc_server() -> (Server, Arc<AtomicUsize>) {
    let cancellations = Arc::new(AtomicUsize::new(0));

    let server = Server::new(
        Implementation::new("calc-server", "1.0.0"),
        ServerOptions::default(),
    );
    server
        .register_tool(
            Tool {
                name: "calc".to_string(),
                description: Some("Evaluate an arithmetic expression".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "expression": { "type": "string" } },
                    "required": ["expression"]
                }),
                output_schema: None,
                annotations: None,
            },
            |arguments, _extra| {
                Box::pin(async move {
                    let expression = arguments
                        .as_ref()
                        .and_then(|a| a.get("expression"))
                        .and_then(|e| e.as_str())
                        .unwrap_or_default();
                    let result = match expression {
                        "2+2" => "4",
                        "6*7" => "42",
                        other => return Err(anyhow::anyhow!("cannot evaluate {other}")),
                    };
                    Ok(CallToolResponse::text(result))
                })
            },
        )
        .unwrap();

    {
        let cancellations = Arc::clone(&cancellations);
        server
            .register_tool(
                Tool {
                    name: "sleep".to_string(),
                    description: Some("Never finishes on its own".to_string()),
                    input_schema: serde_json::json!({ "type": "object" }),
                    output_schema: None,
                    annotations: None,
                },
                move |_arguments, extra| {
                    let cancellations = Arc::clone(&cancellations);
                    Box::pin(async move {
                        extra.cancellation.cancelled().await;
                        cancellations.fetch_add(1, Ordering::SeqCst);
                        Ok(CallToolResponse::text("never delivered"))
                    })
                },
            )
            .unwrap();
    }

    {
        server
            .register_tool(
                Tool {
                    name: "countdown".to_string(),
                    description: Some("Emits progress every 50 ms, then finishes".to_string()),
                    input_schema: serde_json::json!({ "type": "object" }),
                    output_schema: None,
                    annotations: None,
                },
                |_arguments, extra| {
                    Box::pin(async move {
                        for i in 1..=10u32 {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            extra
                                .send_progress(f64::from(i), Some(10.0), None)
                                .await?;
                        }
                        Ok(CallToolResponse::text("done"))
                    })
                },
            )
            .unwrap();
    }

    (server, cancellations)
}

/// Connect a fresh client to `server` over a linked in-memory pair.
async fn connected_client(server: &Server) -> Client {
    let (server_side, client_side) = InMemoryTransport::create_linked_pair();
    server.connect(Arc::new(server_side)).await.unwrap();

    let client = Client::new(
        Implementation::new("test-host", "0.1.0"),
        ClientOptions::default(),
    );
    client.connect(Arc::new(client_side)).await.unwrap();
    client
}

fn text_of(response: &CallToolResponse) -> &str {
    match &response.content[0] {
        ToolResponseContent::Text { text } => text,
        other => panic!("expected text content, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// The initialize handshake negotiates a shared protocol revision and
/// exposes capabilities and server identity to the client.
#[tokio::test]
async fn test_initialization_handshake() {
    let (server, _) = calc_server();
    let client = connected_client(&server).await;

    assert_eq!(
        client.protocol_version().as_deref(),
        Some(LATEST_PROTOCOL_VERSION)
    );
    assert_eq!(client.server_info().unwrap().name, "calc-server");
    assert!(client.server_capabilities().unwrap().tools.is_some());

    // The server saw the initialized notification.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.initialized());
    assert_eq!(server.client_info().unwrap().name, "test-host");
}

/// A tool call round-trips through both facades and the codec.
#[tokio::test]
async fn test_tool_call_success() {
    let (server, _) = calc_server();
    let client = connected_client(&server).await;

    let tools = client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"calc"));

    let response = client
        .call_tool(
            "calc",
            Some(serde_json::json!({ "expression": "2+2" })),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(text_of(&response), "4");
    assert_eq!(response.is_error, None);
}

/// An unbound method is answered with `-32601 Method not found`.
#[tokio::test]
async fn test_method_not_found() {
    let (server, _) = calc_server();
    let client = connected_client(&server).await;

    let result: mcp_runtime::Result<serde_json::Value> = client
        .protocol()
        .request("nonexistent", None, RequestOptions::default())
        .await;
    let error = result.unwrap_err().downcast::<McpError>().unwrap();
    let McpError::Rpc(data) = error else {
        panic!("expected an RPC error, got {error}");
    };
    assert_eq!(data.code, -32601);
    assert_eq!(data.message, "Method not found");
}

/// A timed-out request completes locally with `RequestTimeout` and the
/// peer observes the cancellation.
#[tokio::test]
async fn test_timeout_propagates_cancellation() {
    let (server, cancellations) = calc_server();
    let client = connected_client(&server).await;

    let result = client
        .call_tool(
            "sleep",
            None,
            RequestOptions {
                timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )
        .await;
    let error = result.unwrap_err().downcast::<McpError>().unwrap();
    assert!(matches!(error, McpError::RequestTimeout { .. }));
    assert_eq!(error.code(), -32001);

    // The cancellation notification reaches the handler's token.
    tokio::time::timeout(Duration::from_secs(2), async {
        while cancellations.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server handler never observed the cancellation");
}

/// With reset-on-progress, steady progress keeps a short timeout alive
/// until the response lands.
#[tokio::test]
async fn test_progress_resets_timeout() {
    let (server, _) = calc_server();
    let client = connected_client(&server).await;

    let progress_count = Arc::new(AtomicUsize::new(0));
    let on_progress: ProgressCallback = {
        let progress_count = Arc::clone(&progress_count);
        Arc::new(move |_params| {
            progress_count.fetch_add(1, Ordering::SeqCst);
        })
    };

    let response = client
        .call_tool(
            "countdown",
            None,
            RequestOptions {
                timeout: Some(Duration::from_millis(100)),
                reset_timeout_on_progress: true,
                max_total_timeout: Some(Duration::from_secs(5)),
                on_progress: Some(on_progress),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(text_of(&response), "done");
    assert!(progress_count.load(Ordering::SeqCst) >= 9);
}

/// Closing the connection completes every outstanding waiter with
/// `ConnectionClosed` and refuses further requests.
#[tokio::test]
async fn test_connection_close_drains_waiters() {
    let (server, _) = calc_server();
    let client = Arc::new(connected_client(&server).await);

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call_tool("sleep", None, RequestOptions::default())
                    .await
            })
        })
        .collect();

    // Let all three requests reach the server.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.close().await.unwrap();

    for task in pending {
        let result = task.await.unwrap();
        let error = result.unwrap_err().downcast::<McpError>().unwrap();
        assert!(matches!(error, McpError::ConnectionClosed));
        assert_eq!(error.code(), -32000);
    }

    let result = client
        .call_tool("calc", None, RequestOptions::default())
        .await;
    let error = result.unwrap_err().downcast::<McpError>().unwrap();
    assert!(matches!(error, McpError::ConnectionClosed));
}

/// A failing tool surfaces in-band with `isError`, not as a JSON-RPC
/// fault.
#[tokio::test]
async fn test_tool_failure_is_in_band() {
    let (server, _) = calc_server();
    let client = connected_client(&server).await;

    let response = client
        .call_tool(
            "calc",
            Some(serde_json::json!({ "expression": "ln(-1)" })),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.is_error, Some(true));
    assert!(text_of(&response).contains("ln(-1)"));
}

/// Server-initiated sampling flows backwards through the same machinery.
#[tokio::test]
async fn test_sampling_round_trip() {
    use mcp_runtime::client::SamplingHandler;
    use mcp_runtime::protocol::BoxFuture;
    use mcp_runtime::types::{CreateMessageParams, CreateMessageResult, MessageContent, Role};

    struct FixedSampler;
    impl SamplingHandler for FixedSampler {
        fn create_message<'a>(
            &'a self,
            _params: CreateMessageParams,
        ) -> BoxFuture<'a, mcp_runtime::Result<CreateMessageResult>> {
            Box::pin(async move {
                Ok(CreateMessageResult {
                    role: Role::Assistant,
                    content: MessageContent::Text {
                        text: "it depends".to_string(),
                    },
                    model: "fixed-1".to_string(),
                    stop_reason: Some("endTurn".to_string()),
                })
            })
        }
    }

    let (server, _) = calc_server();
    let (server_side, client_side) = InMemoryTransport::create_linked_pair();
    server.connect(Arc::new(server_side)).await.unwrap();

    let client = Client::new(
        Implementation::new("test-host", "0.1.0"),
        ClientOptions::default(),
    );
    client.set_sampling_handler(Arc::new(FixedSampler)).unwrap();
    client.connect(Arc::new(client_side)).await.unwrap();

    let result = server
        .create_message(
            CreateMessageParams {
                messages: Vec::new(),
                model_preferences: None,
                system_prompt: Some("answer briefly".to_string()),
                include_context: None,
                temperature: None,
                max_tokens: 32,
                stop_sequences: None,
                metadata: None,
            },
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.model, "fixed-1");
    let MessageContent::Text { text } = result.content else {
        panic!("expected text content");
    };
    assert_eq!(text, "it depends");
}

/// Roots are served by the client and listed by the server.
#[tokio::test]
async fn test_roots_round_trip() {
    use mcp_runtime::types::Root;

    let (server, _) = calc_server();
    let (server_side, client_side) = InMemoryTransport::create_linked_pair();
    server.connect(Arc::new(server_side)).await.unwrap();

    let client = Client::new(
        Implementation::new("test-host", "0.1.0"),
        ClientOptions::default(),
    );
    client
        .set_roots(vec![Root {
            uri: "file:///projects/demo".to_string(),
            name: Some("demo".to_string()),
        }])
        .unwrap();
    client.connect(Arc::new(client_side)).await.unwrap();

    let roots = server.list_roots().await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].uri, "file:///projects/demo");
}

/// Concurrent tool calls interleave freely and each response correlates
/// to its own request.
#[tokio::test]
async fn test_concurrent_requests_correlate() {
    let (server, _) = calc_server();
    let client = Arc::new(connected_client(&server).await);

    let (a, b) = tokio::join!(
        {
            let client = Arc::clone(&client);
            async move {
                client
                    .call_tool(
                        "calc",
                        Some(serde_json::json!({ "expression": "2+2" })),
                        RequestOptions::default(),
                    )
                    .await
            }
        },
        {
            let client = Arc::clone(&client);
            async move {
                client
                    .call_tool(
                        "calc",
                        Some(serde_json::json!({ "expression": "6*7" })),
                        RequestOptions::default(),
                    )
                    .await
            }
        },
    );
    assert_eq!(text_of(&a.unwrap()), "4");
    assert_eq!(text_of(&b.unwrap()), "42");
}
