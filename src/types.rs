//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines every wire type carried by the runtime: the four
//! JSON-RPC envelope variants, request/progress identifiers, the method and
//! notification name constants, the capability sets exchanged at
//! initialization, and the typed MCP message taxonomy (tools, resources,
//! prompts, sampling, elicitation, roots, logging, completion).
//!
//! All types derive `Debug`, `Clone`, `Serialize`, and `Deserialize` unless
//! noted otherwise. Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]` unless the field is already
//! camelCase or a `_meta` override is required. All `Option<>` fields omit
//! their key from JSON when `None` via
//! `#[serde(skip_serializing_if = "Option::is_none")]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::ErrorData;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The most recent supported MCP protocol revision.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Earlier protocol revisions retained for backwards compatibility.
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";
/// The first published protocol revision.
pub const PROTOCOL_VERSION_2024_10_07: &str = "2024-10-07";

/// All protocol versions accepted during negotiation, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    LATEST_PROTOCOL_VERSION,
    PROTOCOL_VERSION_2024_11_05,
    PROTOCOL_VERSION_2024_10_07,
];

/// The JSON-RPC protocol marker; every envelope carries this exact string.
pub const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Keepalive ping; valid in either direction at any time.
pub const METHOD_PING: &str = "ping";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Request a page of available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// List URI templates for parameterized resources.
pub const METHOD_RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// Read the contents of a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Subscribe to live updates for a resource URI.
pub const METHOD_RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// Unsubscribe from a resource URI.
pub const METHOD_RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// Request a page of available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Retrieve a rendered prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// Request argument completions for a prompt or resource template.
pub const METHOD_COMPLETION_COMPLETE: &str = "completion/complete";
/// Set the minimum severity the server should emit log messages at.
pub const METHOD_LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// Server-initiated: ask the client to generate a completion sample.
pub const METHOD_SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
/// Server-initiated: ask the client to collect structured user input.
pub const METHOD_ELICITATION_CREATE: &str = "elicitation/create";
/// Server-initiated: ask the client for its filesystem/URI roots.
pub const METHOD_ROOTS_LIST: &str = "roots/list";

// ---------------------------------------------------------------------------
// Notification constants
// ---------------------------------------------------------------------------

/// Client signals the handshake is complete.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
/// Either side signals that a prior request has been cancelled.
pub const NOTIF_CANCELLED: &str = "notifications/cancelled";
/// Either side reports progress on a long-running request.
pub const NOTIF_PROGRESS: &str = "notifications/progress";
/// Server notifies that the tool list has changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Server notifies that the resource list has changed.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// Server notifies that a subscribed resource's content has been updated.
pub const NOTIF_RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// Server notifies that the prompt list has changed.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// Client notifies that its root list has changed.
pub const NOTIF_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
/// Server emits a log message to the client.
pub const NOTIF_MESSAGE: &str = "notifications/message";

/// The notification methods conventionally eligible for debouncing.
pub const DEFAULT_DEBOUNCED_NOTIFICATIONS: &[&str] = &[
    NOTIF_TOOLS_LIST_CHANGED,
    NOTIF_RESOURCES_LIST_CHANGED,
    NOTIF_PROMPTS_LIST_CHANGED,
];

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A JSON-RPC request correlation identifier: an integer or a string.
///
/// IDs generated by this runtime are always integers (a monotonic sequence
/// starting at 0); inbound IDs from the peer may be either form and are
/// echoed back verbatim in responses.
///
/// # Examples
///
/// ```
/// use mcp_runtime::types::RequestId;
///
/// let id: RequestId = serde_json::from_str("7").unwrap();
/// assert_eq!(id, RequestId::Number(7));
///
/// let id: RequestId = serde_json::from_str("\"abc\"").unwrap();
/// assert_eq!(id.to_string(), "abc");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl RequestId {
    /// The numeric value of this ID, coercing numeric strings.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            RequestId::Number(n) => Some(*n),
            RequestId::String(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// An opaque token correlating progress notifications to a request.
///
/// Tokens minted by this runtime are always the numeric request ID; inbound
/// tokens may be strings and are coerced numerically when possible.
pub type ProgressToken = RequestId;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire envelopes
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object. `id` is never null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier.
    pub id: RequestId,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request envelope.
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// The `_meta` object embedded in this request's params, if any.
    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.params.as_ref().and_then(|p| p.get("_meta"))
    }

    /// The progress token embedded in `params._meta.progressToken`, if any.
    pub fn progress_token(&self) -> Option<ProgressToken> {
        self.meta()
            .and_then(|m| m.get("progressToken"))
            .and_then(|t| serde_json::from_value(t.clone()).ok())
    }
}

/// A JSON-RPC 2.0 notification (a request with no `id`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Optional notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Build a notification envelope.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` of the corresponding request.
    pub id: RequestId,
    /// The result value.
    pub result: serde_json::Value,
}

impl JsonRpcResponse {
    /// Build a success-response envelope.
    pub fn new(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// An error JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` of the corresponding request.
    pub id: RequestId,
    /// The error object.
    pub error: ErrorData,
}

impl JsonRpcErrorResponse {
    /// Build an error-response envelope.
    pub fn new(id: RequestId, error: ErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }
}

/// Any JSON-RPC 2.0 message: one of the four envelope variants.
///
/// Serialization is transparent (the variant's own shape is emitted);
/// deserialization goes through [`crate::codec::decode_value`], which
/// classifies and validates the envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A fire-and-forget notification.
    Notification(JsonRpcNotification),
    /// A successful response.
    Response(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcErrorResponse),
}

impl JsonRpcMessage {
    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// The correlation ID, for everything except notifications.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Response(r) => Some(&r.id),
            JsonRpcMessage::Error(e) => Some(&e.id),
            JsonRpcMessage::Notification(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Core identity types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Semantic version string.
    pub version: String,
}

impl Implementation {
    /// Build an implementation descriptor.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability types
// ---------------------------------------------------------------------------

/// Advertises whether a side emits list-changed notifications for a feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    /// When `true`, the advertising side sends the matching
    /// `notifications/*/list_changed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Advertises the server's resource features.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// When `true`, the server sends `notifications/resources/list_changed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
    /// When `true`, the server accepts `resources/subscribe`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
}

/// The full set of capabilities that a client advertises to a server.
///
/// # Examples
///
/// ```
/// use mcp_runtime::types::ClientCapabilities;
///
/// let caps = ClientCapabilities::default();
/// assert_eq!(serde_json::to_value(&caps).unwrap(), serde_json::json!({}));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// LLM sampling capability (client serves `sampling/createMessage`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
    /// Structured elicitation capability (client serves `elicitation/create`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<serde_json::Value>,
    /// Filesystem/URI root capability (client serves `roots/list`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<ListChangedCapability>,
}

impl ClientCapabilities {
    /// Merge `other` into `self`, field by field.
    ///
    /// Present fields in `other` win; sub-flags merge rather than replace,
    /// so registering `roots` twice never clears `listChanged`.
    pub fn merge(&mut self, other: ClientCapabilities) {
        if other.experimental.is_some() {
            self.experimental = other.experimental;
        }
        if other.sampling.is_some() {
            self.sampling = other.sampling;
        }
        if other.elicitation.is_some() {
            self.elicitation = other.elicitation;
        }
        if let Some(roots) = other.roots {
            let merged = self.roots.get_or_insert_with(Default::default);
            if roots.list_changed.is_some() {
                merged.list_changed = roots.list_changed;
            }
        }
    }
}

/// The full set of capabilities that a server advertises to a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Server supports `logging/setLevel` and `notifications/message`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    /// Server supports `completion/complete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<serde_json::Value>,
    /// Server exposes prompts via `prompts/list` and `prompts/get`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    /// Server exposes resources via `resources/*`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Server exposes tools via `tools/list` and `tools/call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
}

impl ServerCapabilities {
    /// Merge `other` into `self`, field by field, deep for sub-flags.
    pub fn merge(&mut self, other: ServerCapabilities) {
        if other.experimental.is_some() {
            self.experimental = other.experimental;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        if other.completions.is_some() {
            self.completions = other.completions;
        }
        if let Some(prompts) = other.prompts {
            let merged = self.prompts.get_or_insert_with(Default::default);
            if prompts.list_changed.is_some() {
                merged.list_changed = prompts.list_changed;
            }
        }
        if let Some(resources) = other.resources {
            let merged = self.resources.get_or_insert_with(Default::default);
            if resources.list_changed.is_some() {
                merged.list_changed = resources.list_changed;
            }
            if resources.subscribe.is_some() {
                merged.subscribe = resources.subscribe;
            }
        }
        if let Some(tools) = other.tools {
            let merged = self.tools.get_or_insert_with(Default::default);
            if tools.list_changed.is_some() {
                merged.list_changed = tools.list_changed;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Initialize types
// ---------------------------------------------------------------------------

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    pub capabilities: ClientCapabilities,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Response returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    pub capabilities: ServerCapabilities,
    /// Information identifying this server implementation.
    pub server_info: Implementation,
    /// Optional human-readable usage instructions for the model host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Cursor-bearing parameters shared by all `*/list` requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Opaque cursor from a previous response; `None` requests the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// Behavioral hints for tool display and safety classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    /// Display title for UI presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// When `true`, the tool only reads state and never mutates it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    /// When `true`, the tool may make irreversible changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    /// When `true`, repeat calls with the same arguments are side-effect free.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    /// When `true`, the tool may interact with the world beyond the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

/// A tool exposed by an MCP server.
///
/// # Examples
///
/// ```
/// use mcp_runtime::types::Tool;
///
/// let tool = Tool {
///     name: "calc".to_string(),
///     description: Some("Evaluate an arithmetic expression".to_string()),
///     input_schema: serde_json::json!({ "type": "object" }),
///     output_schema: None,
///     annotations: None,
/// };
/// assert_eq!(tool.name, "calc");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique name of the tool within the server.
    pub name: String,
    /// Human-readable description of the tool's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    pub input_schema: serde_json::Value,
    /// JSON Schema describing the tool's structured output, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Behavioral hints for display and safety classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// Tools in this page of results.
    pub tools: Vec<Tool>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// Protocol-level metadata (progress token and friends).
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// A single content item in a tool response.
///
/// Discriminated by the `"type"` field on the wire.
///
/// # Examples
///
/// ```
/// use mcp_runtime::types::ToolResponseContent;
///
/// let c = ToolResponseContent::Text { text: "4".to_string() };
/// let json = serde_json::to_value(&c).unwrap();
/// assert_eq!(json["type"], "text");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResponseContent {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// A base64-encoded audio clip.
    Audio {
        /// Base64-encoded audio bytes.
        data: String,
        /// MIME type of the audio.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
}

/// Response from a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    /// The content items produced by the tool.
    pub content: Vec<ToolResponseContent>,
    /// When `true`, the tool signalled an error condition within its content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured output matching the tool's `outputSchema`, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResponse {
    /// Build a plain-text success response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResponseContent::Text { text: text.into() }],
            is_error: None,
            structured_content: None,
        }
    }

    /// Build a plain-text response flagged as a tool-level error.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResponseContent::Text { text: text.into() }],
            is_error: Some(true),
            structured_content: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resource types
// ---------------------------------------------------------------------------

/// Text-based resource contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    /// Canonical URI that identifies this resource.
    pub uri: String,
    /// MIME type of the text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The text content of the resource.
    pub text: String,
}

/// Binary (blob) resource contents, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    /// Canonical URI that identifies this resource.
    pub uri: String,
    /// MIME type of the binary data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded binary data.
    pub blob: String,
}

/// Either text or binary resource contents.
///
/// Uses `#[serde(untagged)]` so the discriminator is presence of `"text"`
/// vs `"blob"` in the JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceContents {
    /// UTF-8 text resource.
    Text(TextResourceContents),
    /// Binary resource (base64-encoded blob).
    Blob(BlobResourceContents),
}

/// Metadata describing a resource exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Canonical URI for this resource.
    pub uri: String,
    /// Human-readable resource name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A URI template for parameterized resource access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    /// RFC 6570 URI template string.
    pub uri_template: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of resources matched by this template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Response to a `resources/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResponse {
    /// Resources in this page.
    pub resources: Vec<Resource>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Response to a `resources/templates/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResponse {
    /// Resource templates in this page.
    pub resource_templates: Vec<ResourceTemplate>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Response to a `resources/read` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceResponse {
    /// One or more content objects representing the resource's current state.
    pub contents: Vec<ResourceContents>,
}

/// Parameters for `resources/subscribe` and `resources/unsubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSubscriptionParams {
    /// URI of the resource to (un)subscribe to.
    pub uri: String,
}

/// Parameters for `notifications/resources/updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdatedParams {
    /// URI of the resource whose contents changed.
    pub uri: String,
}

// ---------------------------------------------------------------------------
// Prompt types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message from the human user.
    User,
    /// A message from the AI assistant.
    Assistant,
}

/// Content within a prompt or sampling message, discriminated by `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// Image data.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Audio data.
    Audio {
        /// Base64-encoded audio bytes.
        data: String,
        /// MIME type of the audio.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The embedded resource contents.
        resource: ResourceContents,
    },
}

/// A single message in a prompt conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    /// Who authored this message.
    pub role: Role,
    /// The message body.
    pub content: MessageContent,
}

/// Describes a single argument accepted by a prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    /// Argument name (used as a key when calling `prompts/get`).
    pub name: String,
    /// Human-readable description of what this argument controls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When `true`, this argument must be supplied by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Metadata describing a prompt template exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Unique name of this prompt.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument descriptors for this template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// Response to a `prompts/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResponse {
    /// Prompts in this page.
    pub prompts: Vec<Prompt>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptParams {
    /// Name of the prompt to retrieve.
    pub name: String,
    /// Template argument substitutions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// Response to a `prompts/get` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptResponse {
    /// Human-readable description of what this prompt does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The rendered prompt messages ready to send to an LLM.
    pub messages: Vec<PromptMessage>,
}

// ---------------------------------------------------------------------------
// Sampling types
// ---------------------------------------------------------------------------

/// A hint suggesting which model to prefer for a sampling request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHint {
    /// Model name or prefix to prefer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Weighted preferences for model selection in a sampling request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreferences {
    /// Ordered list of model hints from most to least preferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<ModelHint>>,
    /// Priority weight for minimizing cost (0.0-1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_priority: Option<f64>,
    /// Priority weight for minimizing latency (0.0-1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_priority: Option<f64>,
    /// Priority weight for maximizing quality (0.0-1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intelligence_priority: Option<f64>,
}

/// Server-initiated request asking the client to generate a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    /// The conversation history to complete.
    pub messages: Vec<PromptMessage>,
    /// Model selection preferences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<ModelPreferences>,
    /// Optional system prompt to prepend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// What conversational context to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_context: Option<String>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Optional stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Provider-specific metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// The client's response to a `sampling/createMessage` server request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    /// Role of the generated message; always [`Role::Assistant`].
    pub role: Role,
    /// The generated content.
    pub content: MessageContent,
    /// The model that produced this result.
    pub model: String,
    /// Why generation stopped (e.g. `"endTurn"`, `"maxTokens"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Elicitation types
// ---------------------------------------------------------------------------

/// How the user responded to an elicitation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElicitationAction {
    /// User accepted and submitted the elicitation.
    Accept,
    /// User explicitly declined.
    Decline,
    /// User dismissed without choosing.
    Cancel,
}

/// Server-initiated request asking the client to collect structured input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitationCreateParams {
    /// Message shown to the user explaining what is being requested.
    pub message: String,
    /// JSON Schema the submitted content must satisfy.
    pub requested_schema: serde_json::Value,
}

/// The client's response to an `elicitation/create` server request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitationResult {
    /// The user's decision.
    pub action: ElicitationAction,
    /// The submitted content when `action` is `accept`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Roots types
// ---------------------------------------------------------------------------

/// A filesystem/URI scope the server may operate within.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// URI of the root (conventionally a `file://` URI).
    pub uri: String,
    /// Optional human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The client's response to a `roots/list` server request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRootsResponse {
    /// The roots currently exposed by the client.
    pub roots: Vec<Root>,
}

// ---------------------------------------------------------------------------
// Logging types
// ---------------------------------------------------------------------------

/// Syslog-style severity levels for `notifications/message`.
///
/// Ordering follows RFC 5424: `debug` is least severe, `emergency` most.
///
/// # Examples
///
/// ```
/// use mcp_runtime::types::LoggingLevel;
///
/// assert!(LoggingLevel::Error.severity() > LoggingLevel::Info.severity());
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Detailed debugging information.
    Debug,
    /// Normal operational messages.
    Info,
    /// Normal but significant events.
    Notice,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
    /// Action must be taken immediately.
    Alert,
    /// System is unusable.
    Emergency,
}

impl LoggingLevel {
    /// Numeric severity used for threshold comparison.
    pub fn severity(self) -> u8 {
        match self {
            LoggingLevel::Debug => 0,
            LoggingLevel::Info => 1,
            LoggingLevel::Notice => 2,
            LoggingLevel::Warning => 3,
            LoggingLevel::Error => 4,
            LoggingLevel::Critical => 5,
            LoggingLevel::Alert => 6,
            LoggingLevel::Emergency => 7,
        }
    }
}

/// Parameters for `logging/setLevel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLevelParams {
    /// Minimum severity the server should emit.
    pub level: LoggingLevel,
}

/// Parameters for `notifications/message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingMessageParams {
    /// Severity of this message.
    pub level: LoggingLevel,
    /// Optional name of the logger that produced the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary JSON payload to log.
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Completion types
// ---------------------------------------------------------------------------

/// What a `completion/complete` request is completing against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CompletionReference {
    /// Completing an argument of a prompt template.
    #[serde(rename = "ref/prompt")]
    Prompt {
        /// The prompt name.
        name: String,
    },
    /// Completing a variable of a resource URI template.
    #[serde(rename = "ref/resource")]
    Resource {
        /// The resource URI template.
        uri: String,
    },
}

/// The argument being completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionArgument {
    /// Name of the argument or template variable.
    pub name: String,
    /// The partial value typed so far.
    pub value: String,
}

/// Parameters for `completion/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteParams {
    /// What is being completed.
    #[serde(rename = "ref")]
    pub reference: CompletionReference,
    /// The argument and its partial value.
    pub argument: CompletionArgument,
}

/// The completion values returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// Candidate values, best first (at most 100).
    pub values: Vec<String>,
    /// Total number of candidates available, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Whether more candidates exist beyond `values`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Response to a `completion/complete` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    /// The completion candidates.
    pub completion: Completion,
}

// ---------------------------------------------------------------------------
// Progress and cancellation notification params
// ---------------------------------------------------------------------------

/// Parameters for `notifications/progress`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token correlating this notification to the originating request.
    pub progress_token: ProgressToken,
    /// Monotonically increasing progress value.
    pub progress: f64,
    /// Total work expected, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Optional human-readable status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parameters for `notifications/cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// ID of the request being abandoned, in the sender's ID space.
    pub request_id: RequestId,
    /// Optional human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_serde_round_trip() {
        let n: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(n, RequestId::Number(42));
        assert_eq!(serde_json::to_string(&n).unwrap(), "42");

        let s: RequestId = serde_json::from_str("\"req-1\"").unwrap();
        assert_eq!(s, RequestId::String("req-1".to_string()));
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"req-1\"");
    }

    #[test]
    fn test_request_id_numeric_coercion() {
        assert_eq!(RequestId::Number(5).as_number(), Some(5));
        assert_eq!(RequestId::String("5".to_string()).as_number(), Some(5));
        assert_eq!(RequestId::String("abc".to_string()).as_number(), None);
    }

    #[test]
    fn test_request_envelope_omits_absent_params() {
        let req = JsonRpcRequest::new(0, "ping", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 0);
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_progress_token_extraction_from_meta() {
        let req = JsonRpcRequest::new(
            3,
            "tools/call",
            Some(serde_json::json!({
                "name": "calc",
                "_meta": { "progressToken": 3 }
            })),
        );
        assert_eq!(req.progress_token(), Some(RequestId::Number(3)));

        let bare = JsonRpcRequest::new(4, "tools/call", Some(serde_json::json!({"name": "calc"})));
        assert_eq!(bare.progress_token(), None);
    }

    #[test]
    fn test_message_accessors() {
        let req = JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None));
        assert_eq!(req.method(), Some("ping"));
        assert_eq!(req.id(), Some(&RequestId::Number(1)));

        let notif =
            JsonRpcMessage::Notification(JsonRpcNotification::new(NOTIF_INITIALIZED, None));
        assert_eq!(notif.method(), Some(NOTIF_INITIALIZED));
        assert_eq!(notif.id(), None);
    }

    #[test]
    fn test_client_capabilities_merge_preserves_subflags() {
        let mut caps = ClientCapabilities {
            roots: Some(ListChangedCapability {
                list_changed: Some(true),
            }),
            ..Default::default()
        };
        caps.merge(ClientCapabilities {
            sampling: Some(serde_json::json!({})),
            roots: Some(ListChangedCapability { list_changed: None }),
            ..Default::default()
        });
        assert!(caps.sampling.is_some());
        assert_eq!(caps.roots.unwrap().list_changed, Some(true));
    }

    #[test]
    fn test_server_capabilities_merge_is_deep() {
        let mut caps = ServerCapabilities {
            resources: Some(ResourcesCapability {
                list_changed: Some(true),
                subscribe: None,
            }),
            ..Default::default()
        };
        caps.merge(ServerCapabilities {
            resources: Some(ResourcesCapability {
                list_changed: None,
                subscribe: Some(true),
            }),
            tools: Some(ListChangedCapability {
                list_changed: Some(true),
            }),
            ..Default::default()
        });
        let resources = caps.resources.unwrap();
        assert_eq!(resources.list_changed, Some(true));
        assert_eq!(resources.subscribe, Some(true));
        assert!(caps.tools.is_some());
    }

    #[test]
    fn test_tool_content_wire_tagging() {
        let c = ToolResponseContent::Image {
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["mimeType"], "image/png");

        let back: ToolResponseContent = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_resource_contents_untagged_discrimination() {
        let text: ResourceContents = serde_json::from_value(serde_json::json!({
            "uri": "file:///a.txt",
            "text": "hello"
        }))
        .unwrap();
        assert!(matches!(text, ResourceContents::Text(_)));

        let blob: ResourceContents = serde_json::from_value(serde_json::json!({
            "uri": "file:///a.bin",
            "blob": "aGk="
        }))
        .unwrap();
        assert!(matches!(blob, ResourceContents::Blob(_)));
    }

    #[test]
    fn test_logging_level_ordering_and_wire_form() {
        assert!(LoggingLevel::Emergency.severity() > LoggingLevel::Alert.severity());
        assert!(LoggingLevel::Warning.severity() > LoggingLevel::Notice.severity());
        assert_eq!(
            serde_json::to_string(&LoggingLevel::Warning).unwrap(),
            "\"warning\""
        );
    }

    #[test]
    fn test_completion_reference_wire_tagging() {
        let r = CompletionReference::Prompt {
            name: "greet".to_string(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "ref/prompt");

        let back: CompletionReference = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_cancelled_params_camel_case() {
        let p = CancelledParams {
            request_id: RequestId::Number(2),
            reason: Some("timeout".to_string()),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["requestId"], 2);
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn test_initialize_round_trip_matches_wire_shape() {
        let raw = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "t", "version": "1" }
        });
        let params: InitializeParams = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(params.protocol_version, "2024-11-05");
        assert_eq!(serde_json::to_value(&params).unwrap(), raw);
    }
}
