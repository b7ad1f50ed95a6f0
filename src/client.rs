//! MCP client facade
//!
//! [`Client`] wraps a [`Protocol`] with the client side of the MCP
//! contract: the `initialize` / `notifications/initialized` handshake with
//! protocol-version checking, typed convenience operations for every
//! client-to-server method (with automatic `nextCursor` pagination on the
//! `*/list` family), and registration of handlers for the server-initiated
//! requests a client can serve (`sampling/createMessage`,
//! `elicitation/create`, `roots/list`).
//!
//! # Handshake
//!
//! [`Client::connect`] attaches the transport, sends `initialize`
//! offering [`LATEST_PROTOCOL_VERSION`], verifies the server's chosen
//! revision is in [`SUPPORTED_PROTOCOL_VERSIONS`], records the negotiated
//! session, and fires `notifications/initialized`. Apart from `ping`,
//! every operation fails with [`McpError::NotInitialized`] until the
//! handshake completes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{ErrorData, McpError, Result};
use crate::protocol::{
    BoxFuture, CapabilityGate, NotificationOptions, Protocol, ProtocolOptions, RequestOptions,
};
use crate::transport::Transport;
use crate::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, CompleteParams, CompleteResponse,
    CreateMessageParams, CreateMessageResult, ElicitationCreateParams, ElicitationResult,
    GetPromptParams, GetPromptResponse, Implementation, InitializeParams, InitializeResponse,
    ListChangedCapability, ListPromptsResponse, ListResourceTemplatesResponse,
    ListResourcesResponse, ListRootsResponse, ListToolsResponse, LoggingLevel, PaginatedParams,
    Prompt, ReadResourceParams, ReadResourceResponse, Resource, ResourceContents,
    ResourceSubscriptionParams, ResourceTemplate, Root, ServerCapabilities, SetLevelParams, Tool,
    LATEST_PROTOCOL_VERSION, METHOD_COMPLETION_COMPLETE, METHOD_ELICITATION_CREATE,
    METHOD_INITIALIZE, METHOD_LOGGING_SET_LEVEL, METHOD_PING, METHOD_PROMPTS_GET,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_RESOURCES_SUBSCRIBE, METHOD_RESOURCES_TEMPLATES_LIST, METHOD_RESOURCES_UNSUBSCRIBE,
    METHOD_ROOTS_LIST, METHOD_SAMPLING_CREATE_MESSAGE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    NOTIF_INITIALIZED, NOTIF_ROOTS_LIST_CHANGED, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Callback invoked when the server sends a `sampling/createMessage`
/// request.
///
/// Implementors should use the host LLM to generate a completion and
/// return the result. The future must be produced from `&self` because
/// the handler is stored in an `Arc` and called from dispatch tasks.
pub trait SamplingHandler: Send + Sync {
    /// Generate a completion for a server-initiated sampling request.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying provider fails; it is reported
    /// to the server as an internal error.
    fn create_message<'a>(
        &'a self,
        params: CreateMessageParams,
    ) -> BoxFuture<'a, Result<CreateMessageResult>>;
}

/// Callback invoked when the server sends an `elicitation/create` request.
///
/// Implementors should present the elicitation to the user (form,
/// terminal prompt, URL redirect) and return the user's decision.
pub trait ElicitationHandler: Send + Sync {
    /// Collect structured user input for a server-initiated elicitation.
    ///
    /// # Errors
    ///
    /// Returns an error if the interaction fails; it is reported to the
    /// server as an internal error.
    fn create_elicitation<'a>(
        &'a self,
        params: ElicitationCreateParams,
    ) -> BoxFuture<'a, Result<ElicitationResult>>;
}

/// Construction options for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Capabilities advertised in the `initialize` request. Merged with
    /// whatever handler registrations imply before the handshake.
    pub capabilities: ClientCapabilities,
    /// Protocol-core options.
    pub protocol: ProtocolOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            capabilities: ClientCapabilities::default(),
            protocol: ProtocolOptions {
                enforce_strict_capabilities: false,
                debounced_notification_methods: vec![NOTIF_ROOTS_LIST_CHANGED.to_string()],
            },
        }
    }
}

/// The negotiated server side of a session.
#[derive(Debug, Clone)]
struct ServerSession {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: Implementation,
    instructions: Option<String>,
}

/// Gate mapping client-side methods onto the negotiated capability sets.
struct ClientGate {
    session: Arc<Mutex<Option<ServerSession>>>,
    own: Arc<Mutex<ClientCapabilities>>,
}

impl ClientGate {
    fn deny(method: &str, capability: &str) -> Result<()> {
        Err(McpError::Capability {
            method: method.to_string(),
            capability: capability.to_string(),
        }
        .into())
    }
}

impl CapabilityGate for ClientGate {
    fn check_request(&self, method: &str) -> Result<()> {
        if matches!(method, METHOD_INITIALIZE | METHOD_PING) {
            return Ok(());
        }
        let session = self.session.lock().expect("session slot");
        let none = ServerCapabilities::default();
        let caps = session
            .as_ref()
            .map(|session| &session.capabilities)
            .unwrap_or(&none);
        match method {
            m if m.starts_with("tools/") => {
                if caps.tools.is_none() {
                    return Self::deny(method, "tools");
                }
            }
            METHOD_RESOURCES_SUBSCRIBE | METHOD_RESOURCES_UNSUBSCRIBE => {
                match caps.resources.as_ref() {
                    Some(resources) if resources.subscribe == Some(true) => {}
                    _ => return Self::deny(method, "resources.subscribe"),
                }
            }
            m if m.starts_with("resources/") => {
                if caps.resources.is_none() {
                    return Self::deny(method, "resources");
                }
            }
            m if m.starts_with("prompts/") => {
                if caps.prompts.is_none() {
                    return Self::deny(method, "prompts");
                }
            }
            METHOD_COMPLETION_COMPLETE => {
                if caps.completions.is_none() {
                    return Self::deny(method, "completions");
                }
            }
            METHOD_LOGGING_SET_LEVEL => {
                if caps.logging.is_none() {
                    return Self::deny(method, "logging");
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_notification(&self, method: &str) -> Result<()> {
        if method == NOTIF_ROOTS_LIST_CHANGED {
            let own = self.own.lock().expect("capabilities slot");
            match own.roots.as_ref() {
                Some(roots) if roots.list_changed == Some(true) => {}
                _ => return Self::deny(method, "roots.listChanged"),
            }
        }
        Ok(())
    }

    fn check_handler(&self, method: &str) -> Result<()> {
        let own = self.own.lock().expect("capabilities slot");
        match method {
            METHOD_SAMPLING_CREATE_MESSAGE if own.sampling.is_none() => {
                Self::deny(method, "sampling")
            }
            METHOD_ELICITATION_CREATE if own.elicitation.is_none() => {
                Self::deny(method, "elicitation")
            }
            METHOD_ROOTS_LIST if own.roots.is_none() => Self::deny(method, "roots"),
            _ => Ok(()),
        }
    }
}

/// An MCP client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mcp_runtime::client::{Client, ClientOptions};
/// use mcp_runtime::transport::inmemory::InMemoryTransport;
/// use mcp_runtime::types::Implementation;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (transport, _server_side) = InMemoryTransport::create_linked_pair();
/// let client = Client::new(
///     Implementation::new("example-host", "1.0.0"),
///     ClientOptions::default(),
/// );
/// client.connect(Arc::new(transport)).await?;
/// let tools = client.list_tools().await?;
/// # let _ = tools;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    protocol: Protocol,
    client_info: Implementation,
    capabilities: Arc<Mutex<ClientCapabilities>>,
    session: Arc<Mutex<Option<ServerSession>>>,
    roots: Arc<Mutex<Vec<Root>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_info", &self.client_info)
            .field("initialized", &self.session.lock().expect("session slot").is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a disconnected client.
    pub fn new(client_info: Implementation, options: ClientOptions) -> Self {
        let protocol = Protocol::new(options.protocol);
        let capabilities = Arc::new(Mutex::new(options.capabilities));
        let session = Arc::new(Mutex::new(None));

        protocol.set_capability_gate(Arc::new(ClientGate {
            session: Arc::clone(&session),
            own: Arc::clone(&capabilities),
        }));
        protocol
            .set_request_handler(METHOD_PING, |_request, _extra| {
                Box::pin(async move { Ok(serde_json::json!({})) })
            })
            .expect("ping handler installs on a fresh protocol");

        Self {
            protocol,
            client_info,
            capabilities,
            session,
            roots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The underlying protocol instance.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Merge additional capabilities into the advertised set.
    ///
    /// # Errors
    ///
    /// Fails once a transport is connected; capabilities are fixed at
    /// handshake time.
    pub fn register_capabilities(&self, capabilities: ClientCapabilities) -> Result<()> {
        if self.protocol.is_connected() {
            return Err(McpError::Transport(
                "cannot register capabilities after connect".to_string(),
            )
            .into());
        }
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(capabilities);
        Ok(())
    }

    /// Attach a transport and run the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::UnsupportedProtocolVersion`] when the server
    /// selects a revision outside [`SUPPORTED_PROTOCOL_VERSIONS`]; the
    /// transport is closed before the error is returned.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.protocol.connect(transport).await?;

        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.lock().expect("capabilities slot").clone(),
            client_info: self.client_info.clone(),
        };
        let response: InitializeResponse = match self
            .protocol
            .request(
                METHOD_INITIALIZE,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await
        {
            Ok(response) => response,
            Err(error) => {
                let _ = self.protocol.close().await;
                return Err(error);
            }
        };

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            let _ = self.protocol.close().await;
            return Err(McpError::UnsupportedProtocolVersion {
                got: response.protocol_version,
                supported: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|v| v.to_string())
                    .collect(),
            }
            .into());
        }

        *self.session.lock().expect("session slot") = Some(ServerSession {
            protocol_version: response.protocol_version,
            capabilities: response.capabilities,
            server_info: response.server_info,
            instructions: response.instructions,
        });

        self.protocol
            .notification(NOTIF_INITIALIZED, None, NotificationOptions::default())
            .await?;
        Ok(())
    }

    /// Close the session.
    pub async fn close(&self) -> Result<()> {
        self.protocol.close().await
    }

    /// The server's negotiated capabilities, once initialized.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.capabilities.clone())
    }

    /// The server's implementation info, once initialized.
    pub fn server_info(&self) -> Option<Implementation> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.server_info.clone())
    }

    /// The negotiated protocol revision, once initialized.
    pub fn protocol_version(&self) -> Option<String> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    /// The server's usage instructions, when it provided any.
    pub fn instructions(&self) -> Option<String> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .and_then(|s| s.instructions.clone())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.session.lock().expect("session slot").is_none() {
            return Err(McpError::NotInitialized.into());
        }
        Ok(())
    }

    /// Send a `ping` and verify the server responds. Valid at any time.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .protocol
            .request(METHOD_PING, None, RequestOptions::default())
            .await?;
        Ok(())
    }

    /// List all tools, following `nextCursor` pagination to the end.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response: ListToolsResponse = self
                .protocol
                .request(
                    METHOD_TOOLS_LIST,
                    Some(serde_json::to_value(PaginatedParams { cursor })?),
                    RequestOptions::default(),
                )
                .await?;
            tools.extend(response.tools);
            match response.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Invoke a named tool.
    ///
    /// `options` carries the per-request timeout, progress callback, and
    /// cancellation handle; pass `RequestOptions::default()` otherwise.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<CallToolResponse> {
        self.ensure_initialized()?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
            meta: None,
        };
        self.protocol
            .request(
                METHOD_TOOLS_CALL,
                Some(serde_json::to_value(params)?),
                options,
            )
            .await
    }

    /// List all resources, following pagination to the end.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_initialized()?;
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response: ListResourcesResponse = self
                .protocol
                .request(
                    METHOD_RESOURCES_LIST,
                    Some(serde_json::to_value(PaginatedParams { cursor })?),
                    RequestOptions::default(),
                )
                .await?;
            resources.extend(response.resources);
            match response.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(resources)
    }

    /// List all resource templates, following pagination to the end.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        self.ensure_initialized()?;
        let mut templates = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response: ListResourceTemplatesResponse = self
                .protocol
                .request(
                    METHOD_RESOURCES_TEMPLATES_LIST,
                    Some(serde_json::to_value(PaginatedParams { cursor })?),
                    RequestOptions::default(),
                )
                .await?;
            templates.extend(response.resource_templates);
            match response.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(templates)
    }

    /// Read the contents of a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.ensure_initialized()?;
        let response: ReadResourceResponse = self
            .protocol
            .request(
                METHOD_RESOURCES_READ,
                Some(serde_json::to_value(ReadResourceParams {
                    uri: uri.to_string(),
                })?),
                RequestOptions::default(),
            )
            .await?;
        Ok(response.contents)
    }

    /// Subscribe to update notifications for a resource URI.
    pub async fn subscribe_resource(&self, uri: &str) -> Result<()> {
        self.ensure_initialized()?;
        let _: serde_json::Value = self
            .protocol
            .request(
                METHOD_RESOURCES_SUBSCRIBE,
                Some(serde_json::to_value(ResourceSubscriptionParams {
                    uri: uri.to_string(),
                })?),
                RequestOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Cancel a resource subscription.
    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<()> {
        self.ensure_initialized()?;
        let _: serde_json::Value = self
            .protocol
            .request(
                METHOD_RESOURCES_UNSUBSCRIBE,
                Some(serde_json::to_value(ResourceSubscriptionParams {
                    uri: uri.to_string(),
                })?),
                RequestOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// List all prompts, following pagination to the end.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_initialized()?;
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response: ListPromptsResponse = self
                .protocol
                .request(
                    METHOD_PROMPTS_LIST,
                    Some(serde_json::to_value(PaginatedParams { cursor })?),
                    RequestOptions::default(),
                )
                .await?;
            prompts.extend(response.prompts);
            match response.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(prompts)
    }

    /// Retrieve a rendered prompt by name, substituting template arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        self.ensure_initialized()?;
        self.protocol
            .request(
                METHOD_PROMPTS_GET,
                Some(serde_json::to_value(GetPromptParams {
                    name: name.to_string(),
                    arguments,
                })?),
                RequestOptions::default(),
            )
            .await
    }

    /// Request argument completions for a prompt or resource template.
    pub async fn complete(&self, params: CompleteParams) -> Result<CompleteResponse> {
        self.ensure_initialized()?;
        self.protocol
            .request(
                METHOD_COMPLETION_COMPLETE,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await
    }

    /// Set the minimum severity the server should emit log messages at.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        self.ensure_initialized()?;
        let _: serde_json::Value = self
            .protocol
            .request(
                METHOD_LOGGING_SET_LEVEL,
                Some(serde_json::to_value(SetLevelParams { level })?),
                RequestOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Register a handler for `sampling/createMessage` server requests.
    ///
    /// Advertises the `sampling` capability when it is not declared yet;
    /// call before [`Client::connect`] so the handshake reflects it.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::HandlerExists`] if a sampling handler is
    /// already registered.
    pub fn set_sampling_handler(&self, handler: Arc<dyn SamplingHandler>) -> Result<()> {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ClientCapabilities {
                sampling: Some(serde_json::json!({})),
                ..Default::default()
            });
        self.protocol
            .set_request_handler(METHOD_SAMPLING_CREATE_MESSAGE, move |request, _extra| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let params: CreateMessageParams = parse_params(request.params)?;
                    let result = handler.create_message(params).await?;
                    Ok(serde_json::to_value(result)?)
                })
            })
    }

    /// Register a handler for `elicitation/create` server requests.
    ///
    /// Advertises the `elicitation` capability when it is not declared
    /// yet; call before [`Client::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`McpError::HandlerExists`] if an elicitation handler is
    /// already registered.
    pub fn set_elicitation_handler(&self, handler: Arc<dyn ElicitationHandler>) -> Result<()> {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ClientCapabilities {
                elicitation: Some(serde_json::json!({})),
                ..Default::default()
            });
        self.protocol
            .set_request_handler(METHOD_ELICITATION_CREATE, move |request, _extra| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let params: ElicitationCreateParams = parse_params(request.params)?;
                    let result = handler.create_elicitation(params).await?;
                    Ok(serde_json::to_value(result)?)
                })
            })
    }

    /// Replace the set of roots served to `roots/list`.
    ///
    /// Advertises `roots.listChanged` and installs the `roots/list`
    /// handler on first use. When connected, emits a (debounced)
    /// `notifications/roots/list_changed`.
    pub fn set_roots(&self, roots: Vec<Root>) -> Result<()> {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ClientCapabilities {
                roots: Some(ListChangedCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            });

        *self.roots.lock().expect("roots slot") = roots;
        let store = Arc::clone(&self.roots);
        let registration = self
            .protocol
            .set_request_handler(METHOD_ROOTS_LIST, move |_request, _extra| {
                let store = Arc::clone(&store);
                Box::pin(async move {
                    let roots = store.lock().expect("roots slot").clone();
                    Ok(serde_json::to_value(ListRootsResponse { roots })?)
                })
            });
        if let Err(error) = registration {
            // Re-registration just replaces the served set.
            match error.downcast::<McpError>() {
                Ok(McpError::HandlerExists(_)) => {}
                Ok(other) => return Err(other.into()),
                Err(other) => return Err(other),
            }
        }

        if self.protocol.is_connected() {
            let protocol = self.protocol.clone_shared();
            tokio::spawn(async move {
                if let Err(error) = protocol
                    .notification(NOTIF_ROOTS_LIST_CHANGED, None, NotificationOptions::default())
                    .await
                {
                    tracing::debug!("roots list_changed not sent: {error:#}");
                }
            });
        }
        Ok(())
    }
}

/// Deserialize request params, mapping failures to `InvalidParams`.
fn parse_params<T: serde::de::DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T> {
    let params = params.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(params).map_err(|error| {
        anyhow::Error::new(McpError::Rpc(ErrorData::invalid_params(format!(
            "Invalid params: {error}"
        ))))
    })
}
