//! Error types for the MCP runtime
//!
//! This module defines the JSON-RPC error-code taxonomy, the wire-level
//! error object ([`ErrorData`]), and the crate-wide [`McpError`] enum,
//! using `thiserror` for ergonomic error handling.
//!
//! Errors in this crate are values, not control flow: a malformed inbound
//! frame is reported through the transport error callback and dropped, a
//! peer error response is delivered to the waiting caller, and a timeout
//! or cancellation completes the local waiter. Nothing in the core panics
//! on bad input from the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC 2.0 error codes, including the MCP extensions.
///
/// # Examples
///
/// ```
/// use mcp_runtime::error::ErrorCode;
///
/// assert_eq!(ErrorCode::MethodNotFound.as_i64(), -32601);
/// assert_eq!(ErrorCode::from_i64(-32001), Some(ErrorCode::RequestTimeout));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received (`-32700`).
    ParseError,
    /// The JSON sent is not a valid request object (`-32600`).
    InvalidRequest,
    /// The method does not exist or is not available (`-32601`).
    MethodNotFound,
    /// Invalid method parameters (`-32602`).
    InvalidParams,
    /// Internal JSON-RPC error (`-32603`).
    InternalError,
    /// MCP extension: the connection closed with requests in flight (`-32000`).
    ConnectionClosed,
    /// MCP extension: the request did not complete in time (`-32001`).
    RequestTimeout,
}

impl ErrorCode {
    /// The numeric wire value of this code.
    pub fn as_i64(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ConnectionClosed => -32000,
            ErrorCode::RequestTimeout => -32001,
        }
    }

    /// Map a numeric wire value back to a known code, if any.
    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32000 => Some(ErrorCode::ConnectionClosed),
            -32001 => Some(ErrorCode::RequestTimeout),
            _ => None,
        }
    }
}

/// A JSON-RPC 2.0 error object as it appears on the wire.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use mcp_runtime::error::ErrorData;
///
/// let e = ErrorData::new(-32600, "Invalid Request");
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    /// Numeric error code as defined by JSON-RPC 2.0 or the MCP spec.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorData {
    /// Build an error object with no `data` payload.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build a `-32601 Method not found` error, carrying the method in `data`.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: ErrorCode::MethodNotFound.as_i64(),
            message: "Method not found".to_string(),
            data: Some(serde_json::json!({ "method": method })),
        }
    }

    /// Build a `-32602 Invalid params` error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams.as_i64(), message)
    }

    /// Build a `-32603 Internal error`.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError.as_i64(), message)
    }
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Main error type for MCP runtime operations.
///
/// This enum encompasses every failure the runtime itself can produce:
/// transport faults, envelope violations, peer error responses, timeouts,
/// cancellations, capability violations, and registration misuse.
#[derive(Error, Debug)]
pub enum McpError {
    /// The peer returned a JSON-RPC error response.
    #[error("{0}")]
    Rpc(ErrorData),

    /// A request did not complete within its timeout.
    #[error("request timed out after {timeout_ms} ms: {method}")]
    RequestTimeout {
        /// The method of the request that timed out.
        method: String,
        /// The effective timeout in milliseconds.
        timeout_ms: u128,
    },

    /// A request was cancelled before completion.
    #[error("request cancelled: {reason}")]
    RequestCancelled {
        /// Human-readable cancellation reason (also sent to the peer).
        reason: String,
    },

    /// The connection closed with the request still in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// No transport is connected, or the transport rejected the operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// `start()` was called on a transport that is already running.
    #[error("transport already started")]
    AlreadyStarted,

    /// An encoded message exceeded the configured size bound.
    #[error("message of {size} bytes exceeds maximum of {limit} bytes")]
    MessageTooLarge {
        /// The encoded size of the offending message.
        size: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A decoded value is not a valid JSON-RPC 2.0 envelope.
    #[error("invalid message envelope: {0}")]
    InvalidEnvelope(String),

    /// Inbound bytes could not be parsed as JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// The peer negotiated a protocol version this runtime does not support.
    #[error("unsupported protocol version: got {got}, supported {supported:?}")]
    UnsupportedProtocolVersion {
        /// The version string the peer selected.
        got: String,
        /// The versions this runtime accepts.
        supported: Vec<String>,
    },

    /// A method was used that the relevant capability set does not cover.
    #[error("capability violation: {method} requires the `{capability}` capability")]
    Capability {
        /// The offending method.
        method: String,
        /// The capability that would permit it.
        capability: String,
    },

    /// A handler is already registered for this method.
    #[error("a handler is already registered for method {0}")]
    HandlerExists(String),

    /// An operation that requires a completed handshake was attempted early.
    #[error("session not initialized: complete the initialize handshake first")]
    NotInitialized,

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URI-template parsing, expansion, or matching errors.
    #[error("URI template error: {0}")]
    UriTemplate(String),
}

impl McpError {
    /// The JSON-RPC error code this error maps to when sent to a peer.
    pub fn code(&self) -> i64 {
        match self {
            McpError::Rpc(data) => data.code,
            McpError::RequestTimeout { .. } => ErrorCode::RequestTimeout.as_i64(),
            McpError::ConnectionClosed => ErrorCode::ConnectionClosed.as_i64(),
            McpError::MessageTooLarge { .. } | McpError::InvalidEnvelope(_) => {
                ErrorCode::InvalidRequest.as_i64()
            }
            McpError::Parse(_) => ErrorCode::ParseError.as_i64(),
            _ => ErrorCode::InternalError.as_i64(),
        }
    }

    /// Convert this error into a wire error object.
    ///
    /// A [`McpError::Rpc`] passes through unchanged, preserving its `data`
    /// payload; everything else is flattened to code + message.
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            McpError::Rpc(data) => data.clone(),
            other => ErrorData::new(other.code(), other.to_string()),
        }
    }

    /// Build an error from a wire error object, promoting the MCP extension
    /// codes to their dedicated variants so callers can match on them
    /// directly.
    pub fn from_error_data(data: ErrorData) -> Self {
        match ErrorCode::from_i64(data.code) {
            Some(ErrorCode::ConnectionClosed) => McpError::ConnectionClosed,
            _ => McpError::Rpc(data),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = anyhow::Result<T>;
