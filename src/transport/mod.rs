//! MCP transport abstraction
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations must satisfy, plus the out-of-band context types that
//! flow alongside messages. A concrete in-process implementation lives in
//! [`inmemory`]; process-pipe and HTTP transports are deliberately outside
//! this crate and plug in through the same trait.
//!
//! # Design
//!
//! A transport is a bidirectional, message-framed channel. The protocol
//! core is the *sole* consumer of a transport: it installs one message
//! callback, one error callback, and one close callback, then calls
//! [`Transport::start`]. Inbound messages arrive already decoded as
//! [`JsonRpcMessage`] envelopes, paired with a [`MessageContext`] carrying
//! whatever out-of-band state the transport attaches (authentication
//! principal, session identifier, per-request HTTP-style metadata). The
//! core forwards that context verbatim into request handlers.
//!
//! Error callbacks report non-fatal conditions (a single malformed frame);
//! only the close callback ends the session, and it fires exactly once.

use std::collections::HashMap;

use crate::error::Result;
use crate::types::{JsonRpcMessage, RequestId};

pub mod inmemory;

/// Callback invoked for each inbound message with its transport context.
pub type MessageCallback = Box<dyn Fn(JsonRpcMessage, MessageContext) + Send + Sync>;

/// Callback invoked for non-fatal transport errors.
pub type ErrorCallback = Box<dyn Fn(anyhow::Error) + Send + Sync>;

/// Callback invoked exactly once when the channel ends for any reason.
pub type CloseCallback = Box<dyn Fn() + Send + Sync>;

/// The authenticated principal a transport attaches to inbound messages.
///
/// Populated by authenticating transports (HTTP bearer tokens and the
/// like); the runtime never interprets it beyond forwarding.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    /// The raw access token presented by the peer.
    pub token: String,
    /// The OAuth client the token was issued to, if known.
    pub client_id: Option<String>,
    /// Scopes granted to the token.
    pub scopes: Vec<String>,
    /// Unix timestamp at which the token expires, if known.
    pub expires_at: Option<u64>,
}

/// Per-request transport metadata (HTTP-style headers and friends).
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Header name/value pairs as observed by the transport.
    pub headers: HashMap<String, String>,
}

/// Out-of-band context delivered with each inbound message.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// Authentication principal, when the transport authenticates peers.
    pub auth_info: Option<AuthInfo>,
    /// Transport-level session identifier, when the transport has one.
    pub session_id: Option<String>,
    /// Per-request transport metadata.
    pub request_info: Option<RequestInfo>,
}

/// Out-of-band options attached to an outbound send.
///
/// `related_request_id` associates a message with the inbound request that
/// caused it. It is never serialized into the JSON payload; transports use
/// it to route the message to the stream the originating request arrived
/// on, and the protocol core uses it to exempt a notification from
/// debouncing.
#[derive(Debug, Clone, Default)]
pub struct TransportSendOptions {
    /// ID of the inbound request this message relates to, if any.
    pub related_request_id: Option<RequestId>,
}

/// Abstraction over MCP transport implementations.
///
/// Implementations must guarantee:
///
/// - `start` activates the channel and fails with
///   [`crate::error::McpError::AlreadyStarted`] on re-entry.
/// - `send` is FIFO: for two sends on the same transport, the first
///   message's bytes fully precede the second's on the wire.
/// - `close` causes the close callback to fire exactly once; it also fires
///   once if the channel ends for any other reason.
/// - The error callback reports non-fatal conditions only; fatal errors
///   additionally trigger the close callback.
///
/// # Examples
///
/// ```no_run
/// use mcp_runtime::transport::Transport;
///
/// // Implementations are created via their own constructors; this trait
/// // is used polymorphically through `Arc<dyn Transport>`.
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Activate the channel.
    ///
    /// Returns once the transport is ready to send and receive. Callbacks
    /// must be installed before calling this; messages that arrive with no
    /// message callback installed may be dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::AlreadyStarted`] if the channel
    /// was already started.
    async fn start(&self) -> Result<()>;

    /// Transmit one logical JSON-RPC message.
    ///
    /// Returns when the message is handed to the transport's output path;
    /// this does not guarantee peer receipt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::Transport`] if the underlying
    /// channel has closed or the write fails.
    async fn send(&self, message: JsonRpcMessage, options: TransportSendOptions) -> Result<()>;

    /// Terminate the channel, firing the close callback exactly once.
    async fn close(&self) -> Result<()>;

    /// Install the sole dispatcher for inbound messages.
    fn on_message(&self, callback: MessageCallback);

    /// Install the handler for non-fatal transport errors.
    fn on_error(&self, callback: ErrorCallback);

    /// Install the handler fired once when the channel ends.
    fn on_close(&self, callback: CloseCallback);

    /// The transport-level session identifier, when the transport has one.
    fn session_id(&self) -> Option<String> {
        None
    }
}
