//! mcp-runtime - Model Context Protocol runtime library
//!
//! This library implements the MCP protocol runtime: a bidirectional
//! JSON-RPC 2.0 contract that lets a *client* (typically an AI model
//! host) drive a *server* exposing tools, resources, and prompts, and
//! lets the server request sampling and elicitation from the client.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `types`: JSON-RPC envelopes and the typed MCP message taxonomy
//! - `codec`: envelope validation, encode/decode with size bounds
//! - `buffer`: newline-delimited frame accumulation for stream transports
//! - `transport`: the abstract transport contract and an in-process pair
//! - `uri_template`: RFC 6570 subset for resource templates
//! - `protocol`: correlation, timeouts, cancellation, progress, debounce
//! - `client` / `server`: the two facades over the protocol core
//! - `error`: error types and result aliases
//!
//! The core is a pure library: no persistence, no network code, no
//! global state. Concrete transports (process pipes, HTTP streaming)
//! implement [`transport::Transport`] and plug in from outside.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_runtime::client::{Client, ClientOptions};
//! use mcp_runtime::server::{Server, ServerOptions};
//! use mcp_runtime::transport::inmemory::InMemoryTransport;
//! use mcp_runtime::types::{CallToolResponse, Implementation, Tool};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new(
//!         Implementation::new("calc-server", "1.0.0"),
//!         ServerOptions::default(),
//!     );
//!     server.register_tool(
//!         Tool {
//!             name: "calc".to_string(),
//!             description: Some("Evaluate an arithmetic expression".to_string()),
//!             input_schema: serde_json::json!({ "type": "object" }),
//!             output_schema: None,
//!             annotations: None,
//!         },
//!         |_arguments, _extra| Box::pin(async move { Ok(CallToolResponse::text("4")) }),
//!     )?;
//!
//!     let (server_side, client_side) = InMemoryTransport::create_linked_pair();
//!     server.connect(Arc::new(server_side)).await?;
//!
//!     let client = Client::new(
//!         Implementation::new("example-host", "1.0.0"),
//!         ClientOptions::default(),
//!     );
//!     client.connect(Arc::new(client_side)).await?;
//!
//!     for tool in client.list_tools().await? {
//!         println!("tool: {}", tool.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;
pub mod uri_template;

// Re-export commonly used types
pub use client::{Client, ClientOptions, ElicitationHandler, SamplingHandler};
pub use error::{ErrorCode, ErrorData, McpError, Result};
pub use protocol::{
    Protocol, ProtocolOptions, RequestHandlerExtra, RequestOptions, DEFAULT_REQUEST_TIMEOUT,
};
pub use server::{Server, ServerOptions};
pub use transport::Transport;
pub use types::{Implementation, JsonRpcMessage, RequestId};
