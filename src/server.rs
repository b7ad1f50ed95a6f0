//! MCP server facade
//!
//! [`Server`] wraps a [`Protocol`] with the server side of the MCP
//! contract. User code registers tools, resources, resource templates,
//! prompts, and an optional completion callback; the facade installs the
//! matching protocol handlers on first registration, advertises the
//! implied capabilities, serves the handshake, and emits (debounced)
//! `*/list_changed` notifications when registrations change after
//! connect.
//!
//! Server-initiated traffic flows through the same protocol core in
//! reverse: [`Server::create_message`] (sampling), [`Server::elicit`],
//! and [`Server::list_roots`] issue requests to the connected client,
//! gated on the client's negotiated capabilities in strict mode.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorData, McpError, Result};
use crate::protocol::{
    BoxFuture, CapabilityGate, NotificationOptions, Protocol, ProtocolOptions, RequestHandlerExtra,
    RequestOptions,
};
use crate::transport::Transport;
use crate::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, CompleteParams, CompleteResponse,
    CreateMessageParams, CreateMessageResult, ElicitationCreateParams, ElicitationResult,
    GetPromptParams, GetPromptResponse, Implementation, InitializeParams, InitializeResponse,
    ListChangedCapability, ListPromptsResponse, ListResourceTemplatesResponse,
    ListResourcesResponse, ListRootsResponse, ListToolsResponse, LoggingLevel,
    LoggingMessageParams, Prompt, ReadResourceParams, ReadResourceResponse, Resource,
    ResourceSubscriptionParams, ResourceTemplate, ResourceUpdatedParams, ResourcesCapability,
    Root, ServerCapabilities, SetLevelParams, Tool, DEFAULT_DEBOUNCED_NOTIFICATIONS,
    LATEST_PROTOCOL_VERSION,
    METHOD_COMPLETION_COMPLETE, METHOD_ELICITATION_CREATE, METHOD_INITIALIZE,
    METHOD_LOGGING_SET_LEVEL, METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_RESOURCES_SUBSCRIBE,
    METHOD_RESOURCES_TEMPLATES_LIST, METHOD_RESOURCES_UNSUBSCRIBE, METHOD_ROOTS_LIST,
    METHOD_SAMPLING_CREATE_MESSAGE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, NOTIF_INITIALIZED,
    NOTIF_MESSAGE, NOTIF_PROMPTS_LIST_CHANGED, NOTIF_RESOURCES_LIST_CHANGED,
    NOTIF_RESOURCES_UPDATED, NOTIF_TOOLS_LIST_CHANGED, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::uri_template::{UriTemplate, VarValue};

/// Handler invoked for `tools/call` on a registered tool.
pub type ToolHandler = Arc<
    dyn Fn(Option<serde_json::Value>, RequestHandlerExtra) -> BoxFuture<'static, Result<CallToolResponse>>
        + Send
        + Sync,
>;

/// Handler invoked for `resources/read` on an exact registered URI.
pub type ResourceReadHandler = Arc<
    dyn Fn(String, RequestHandlerExtra) -> BoxFuture<'static, Result<ReadResourceResponse>>
        + Send
        + Sync,
>;

/// Handler invoked for `resources/read` on a template match; receives the
/// concrete URI and the extracted template variables.
pub type TemplateReadHandler = Arc<
    dyn Fn(
            String,
            HashMap<String, VarValue>,
            RequestHandlerExtra,
        ) -> BoxFuture<'static, Result<ReadResourceResponse>>
        + Send
        + Sync,
>;

/// Handler invoked for `prompts/get` on a registered prompt.
pub type PromptHandler = Arc<
    dyn Fn(
            Option<HashMap<String, String>>,
            RequestHandlerExtra,
        ) -> BoxFuture<'static, Result<GetPromptResponse>>
        + Send
        + Sync,
>;

/// Handler invoked for `completion/complete`.
pub type CompletionHandler = Arc<
    dyn Fn(CompleteParams, RequestHandlerExtra) -> BoxFuture<'static, Result<CompleteResponse>>
        + Send
        + Sync,
>;

/// Construction options for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Capabilities advertised beyond those implied by registrations
    /// (declare `logging` or `resources.subscribe` here).
    pub capabilities: ServerCapabilities,
    /// Usage instructions returned from the handshake.
    pub instructions: Option<String>,
    /// Protocol-core options.
    pub protocol: ProtocolOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            capabilities: ServerCapabilities::default(),
            instructions: None,
            protocol: ProtocolOptions {
                enforce_strict_capabilities: false,
                debounced_notification_methods: DEFAULT_DEBOUNCED_NOTIFICATIONS
                    .iter()
                    .map(|method| method.to_string())
                    .collect(),
            },
        }
    }
}

/// The negotiated client side of a session.
#[derive(Debug, Clone)]
struct ClientSession {
    protocol_version: String,
    capabilities: ClientCapabilities,
    client_info: Implementation,
    initialized: bool,
}

/// Gate mapping server-side methods onto the negotiated capability sets.
struct ServerGate {
    session: Arc<Mutex<Option<ClientSession>>>,
    own: Arc<Mutex<ServerCapabilities>>,
}

impl ServerGate {
    fn deny(method: &str, capability: &str) -> Result<()> {
        Err(McpError::Capability {
            method: method.to_string(),
            capability: capability.to_string(),
        }
        .into())
    }
}

impl CapabilityGate for ServerGate {
    fn check_request(&self, method: &str) -> Result<()> {
        if method == METHOD_PING {
            return Ok(());
        }
        let session = self.session.lock().expect("session slot");
        let none = ClientCapabilities::default();
        let caps = session
            .as_ref()
            .map(|session| &session.capabilities)
            .unwrap_or(&none);
        match method {
            METHOD_SAMPLING_CREATE_MESSAGE if caps.sampling.is_none() => {
                Self::deny(method, "sampling")
            }
            METHOD_ELICITATION_CREATE if caps.elicitation.is_none() => {
                Self::deny(method, "elicitation")
            }
            METHOD_ROOTS_LIST if caps.roots.is_none() => Self::deny(method, "roots"),
            _ => Ok(()),
        }
    }

    fn check_notification(&self, method: &str) -> Result<()> {
        let own = self.own.lock().expect("capabilities slot");
        match method {
            NOTIF_MESSAGE if own.logging.is_none() => Self::deny(method, "logging"),
            NOTIF_TOOLS_LIST_CHANGED => match own.tools.as_ref() {
                Some(tools) if tools.list_changed == Some(true) => Ok(()),
                _ => Self::deny(method, "tools.listChanged"),
            },
            NOTIF_PROMPTS_LIST_CHANGED => match own.prompts.as_ref() {
                Some(prompts) if prompts.list_changed == Some(true) => Ok(()),
                _ => Self::deny(method, "prompts.listChanged"),
            },
            NOTIF_RESOURCES_LIST_CHANGED => match own.resources.as_ref() {
                Some(resources) if resources.list_changed == Some(true) => Ok(()),
                _ => Self::deny(method, "resources.listChanged"),
            },
            NOTIF_RESOURCES_UPDATED => match own.resources.as_ref() {
                Some(resources) if resources.subscribe == Some(true) => Ok(()),
                _ => Self::deny(method, "resources.subscribe"),
            },
            _ => Ok(()),
        }
    }

    fn check_handler(&self, method: &str) -> Result<()> {
        if matches!(method, METHOD_INITIALIZE | METHOD_PING) {
            return Ok(());
        }
        let own = self.own.lock().expect("capabilities slot");
        match method {
            m if m.starts_with("tools/") && own.tools.is_none() => Self::deny(method, "tools"),
            m if m.starts_with("resources/") && own.resources.is_none() => {
                Self::deny(method, "resources")
            }
            m if m.starts_with("prompts/") && own.prompts.is_none() => {
                Self::deny(method, "prompts")
            }
            METHOD_COMPLETION_COMPLETE if own.completions.is_none() => {
                Self::deny(method, "completions")
            }
            METHOD_LOGGING_SET_LEVEL if own.logging.is_none() => Self::deny(method, "logging"),
            _ => Ok(()),
        }
    }
}

struct RegisteredTool {
    tool: Tool,
    handler: ToolHandler,
}

struct RegisteredResource {
    resource: Resource,
    read: ResourceReadHandler,
}

struct RegisteredResourceTemplate {
    template: ResourceTemplate,
    compiled: Arc<UriTemplate>,
    read: TemplateReadHandler,
}

struct RegisteredPrompt {
    prompt: Prompt,
    handler: PromptHandler,
}

/// An MCP server.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mcp_runtime::server::{Server, ServerOptions};
/// use mcp_runtime::transport::inmemory::InMemoryTransport;
/// use mcp_runtime::types::{CallToolResponse, Implementation, Tool};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let server = Server::new(
///     Implementation::new("calc-server", "1.0.0"),
///     ServerOptions::default(),
/// );
/// server.register_tool(
///     Tool {
///         name: "calc".to_string(),
///         description: Some("Evaluate an arithmetic expression".to_string()),
///         input_schema: serde_json::json!({ "type": "object" }),
///         output_schema: None,
///         annotations: None,
///     },
///     |_arguments, _extra| Box::pin(async move { Ok(CallToolResponse::text("4")) }),
/// )?;
///
/// let (transport, _client_side) = InMemoryTransport::create_linked_pair();
/// server.connect(Arc::new(transport)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    protocol: Protocol,
    server_info: Implementation,
    instructions: Option<String>,
    capabilities: Arc<Mutex<ServerCapabilities>>,
    session: Arc<Mutex<Option<ClientSession>>>,
    tools: Arc<Mutex<BTreeMap<String, RegisteredTool>>>,
    resources: Arc<Mutex<BTreeMap<String, RegisteredResource>>>,
    resource_templates: Arc<Mutex<Vec<RegisteredResourceTemplate>>>,
    prompts: Arc<Mutex<BTreeMap<String, RegisteredPrompt>>>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    logging_level: Arc<Mutex<Option<LoggingLevel>>>,
    tools_routed: AtomicBool,
    resources_routed: AtomicBool,
    prompts_routed: AtomicBool,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("server_info", &self.server_info)
            .field("tools", &self.tools.lock().expect("tools").len())
            .field("resources", &self.resources.lock().expect("resources").len())
            .field("prompts", &self.prompts.lock().expect("prompts").len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a disconnected server.
    ///
    /// Installs the `initialize`, `notifications/initialized`, and `ping`
    /// handlers; everything else appears as registrations are made.
    pub fn new(server_info: Implementation, options: ServerOptions) -> Self {
        let protocol = Protocol::new(options.protocol);
        let capabilities = Arc::new(Mutex::new(options.capabilities));
        let session: Arc<Mutex<Option<ClientSession>>> = Arc::new(Mutex::new(None));

        protocol.set_capability_gate(Arc::new(ServerGate {
            session: Arc::clone(&session),
            own: Arc::clone(&capabilities),
        }));

        let server = Self {
            protocol,
            server_info,
            instructions: options.instructions,
            capabilities,
            session,
            tools: Arc::new(Mutex::new(BTreeMap::new())),
            resources: Arc::new(Mutex::new(BTreeMap::new())),
            resource_templates: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(BTreeMap::new())),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            logging_level: Arc::new(Mutex::new(None)),
            tools_routed: AtomicBool::new(false),
            resources_routed: AtomicBool::new(false),
            prompts_routed: AtomicBool::new(false),
        };
        server.install_lifecycle_handlers();
        server.install_logging_handler();
        server
    }

    /// The underlying protocol instance.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Attach a transport and start serving.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.protocol.connect(transport).await
    }

    /// Close the session.
    pub async fn close(&self) -> Result<()> {
        self.protocol.close().await
    }

    /// The client's negotiated capabilities, once the handshake ran.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.capabilities.clone())
    }

    /// The client's implementation info, once the handshake ran.
    pub fn client_info(&self) -> Option<Implementation> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.client_info.clone())
    }

    /// The protocol revision negotiated with the client, once the
    /// handshake ran.
    pub fn protocol_version(&self) -> Option<String> {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    /// Whether the client has confirmed the handshake with
    /// `notifications/initialized`.
    pub fn initialized(&self) -> bool {
        self.session
            .lock()
            .expect("session slot")
            .as_ref()
            .map(|s| s.initialized)
            .unwrap_or(false)
    }

    /// Merge additional capabilities into the advertised set.
    ///
    /// # Errors
    ///
    /// Fails once a transport is connected; capabilities are fixed at
    /// handshake time.
    pub fn register_capabilities(&self, capabilities: ServerCapabilities) -> Result<()> {
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

    // -- registration surfaces ---------------------------------------------

    /// Register a tool and its call handler.
    ///
    /// Advertises `tools.listChanged`, installs the `tools/list` and
    /// `tools/call` routes on first use, and emits a debounced
    /// `notifications/tools/list_changed` when already connected.
    ///
    /// # Errors
    ///
    /// Fails when a tool with the same name is already registered.
    pub fn register_tool<F>(&self, tool: Tool, handler: F) -> Result<()>
    where
        F: Fn(Option<serde_json::Value>, RequestHandlerExtra) -> BoxFuture<'static, Result<CallToolResponse>>
            + Send
            + Sync
            + 'static,
    {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ServerCapabilities {
                tools: Some(ListChangedCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            });

        {
            let mut tools = self.tools.lock().expect("tools");
            if tools.contains_key(&tool.name) {
                return Err(anyhow::anyhow!("tool {} is already registered", tool.name));
            }
            tools.insert(
                tool.name.clone(),
                RegisteredTool {
                    tool,
                    handler: Arc::new(handler),
                },
            );
        }
        self.ensure_tool_routes()?;
        self.notify_if_connected(NOTIF_TOOLS_LIST_CHANGED);
        Ok(())
    }

    /// Register a fixed-URI resource and its reader.
    ///
    /// Advertises `resources.listChanged`, installs the resource routes
    /// on first use, and emits a debounced list-changed notification when
    /// already connected.
    pub fn register_resource<F>(&self, resource: Resource, read: F) -> Result<()>
    where
        F: Fn(String, RequestHandlerExtra) -> BoxFuture<'static, Result<ReadResourceResponse>>
            + Send
            + Sync
            + 'static,
    {
        self.merge_resource_capability();
        {
            let mut resources = self.resources.lock().expect("resources");
            if resources.contains_key(&resource.uri) {
                return Err(anyhow::anyhow!(
                    "resource {} is already registered",
                    resource.uri
                ));
            }
            resources.insert(
                resource.uri.clone(),
                RegisteredResource {
                    resource,
                    read: Arc::new(read),
                },
            );
        }
        self.ensure_resource_routes()?;
        self.notify_if_connected(NOTIF_RESOURCES_LIST_CHANGED);
        Ok(())
    }

    /// Register a parameterized resource by RFC 6570 template.
    ///
    /// `resources/read` falls back to template matching when no exact URI
    /// matches; the reader receives the extracted variables.
    ///
    /// # Errors
    ///
    /// Fails when the template does not parse.
    pub fn register_resource_template<F>(&self, template: ResourceTemplate, read: F) -> Result<()>
    where
        F: Fn(
                String,
                HashMap<String, VarValue>,
                RequestHandlerExtra,
            ) -> BoxFuture<'static, Result<ReadResourceResponse>>
            + Send
            + Sync
            + 'static,
    {
        let compiled = Arc::new(UriTemplate::parse(&template.uri_template)?);
        self.merge_resource_capability();
        self.resource_templates
            .lock()
            .expect("resource templates")
            .push(RegisteredResourceTemplate {
                template,
                compiled,
                read: Arc::new(read),
            });
        self.ensure_resource_routes()?;
        self.notify_if_connected(NOTIF_RESOURCES_LIST_CHANGED);
        Ok(())
    }

    /// Register a prompt template and its renderer.
    pub fn register_prompt<F>(&self, prompt: Prompt, handler: F) -> Result<()>
    where
        F: Fn(
                Option<HashMap<String, String>>,
                RequestHandlerExtra,
            ) -> BoxFuture<'static, Result<GetPromptResponse>>
            + Send
            + Sync
            + 'static,
    {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ServerCapabilities {
                prompts: Some(ListChangedCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            });
        {
            let mut prompts = self.prompts.lock().expect("prompts");
            if prompts.contains_key(&prompt.name) {
                return Err(anyhow::anyhow!(
                    "prompt {} is already registered",
                    prompt.name
                ));
            }
            prompts.insert(
                prompt.name.clone(),
                RegisteredPrompt {
                    prompt,
                    handler: Arc::new(handler),
                },
            );
        }
        self.ensure_prompt_routes()?;
        self.notify_if_connected(NOTIF_PROMPTS_LIST_CHANGED);
        Ok(())
    }

    /// Install the `completion/complete` route.
    ///
    /// Advertises the `completions` capability. The handler owns the
    /// completion semantics; the facade only moves envelopes.
    pub fn set_completion_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(CompleteParams, RequestHandlerExtra) -> BoxFuture<'static, Result<CompleteResponse>>
            + Send
            + Sync
            + 'static,
    {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ServerCapabilities {
                completions: Some(serde_json::json!({})),
                ..Default::default()
            });
        let handler: CompletionHandler = Arc::new(handler);
        self.protocol
            .set_request_handler(METHOD_COMPLETION_COMPLETE, move |request, extra| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let params: CompleteParams = parse_params(request.params)?;
                    let response = handler(params, extra).await?;
                    Ok(serde_json::to_value(response)?)
                })
            })
    }

    // -- notifications toward the client -----------------------------------

    /// Emit a (debounced) `notifications/tools/list_changed`.
    pub async fn send_tool_list_changed(&self) -> Result<()> {
        self.protocol
            .notification(NOTIF_TOOLS_LIST_CHANGED, None, NotificationOptions::default())
            .await
    }

    /// Emit a (debounced) `notifications/resources/list_changed`.
    pub async fn send_resource_list_changed(&self) -> Result<()> {
        self.protocol
            .notification(
                NOTIF_RESOURCES_LIST_CHANGED,
                None,
                NotificationOptions::default(),
            )
            .await
    }

    /// Emit a (debounced) `notifications/prompts/list_changed`.
    pub async fn send_prompt_list_changed(&self) -> Result<()> {
        self.protocol
            .notification(
                NOTIF_PROMPTS_LIST_CHANGED,
                None,
                NotificationOptions::default(),
            )
            .await
    }

    /// Notify the client that a subscribed resource changed.
    ///
    /// No-ops for URIs nobody subscribed to.
    pub async fn notify_resource_updated(&self, uri: &str) -> Result<()> {
        if !self
            .subscriptions
            .lock()
            .expect("subscriptions")
            .contains(uri)
        {
            return Ok(());
        }
        self.protocol
            .notification(
                NOTIF_RESOURCES_UPDATED,
                Some(serde_json::to_value(ResourceUpdatedParams {
                    uri: uri.to_string(),
                })?),
                NotificationOptions::default(),
            )
            .await
    }

    /// Emit a `notifications/message` log message.
    ///
    /// Messages below the threshold set via `logging/setLevel` are
    /// dropped silently.
    pub async fn send_logging_message(&self, params: LoggingMessageParams) -> Result<()> {
        let threshold = *self.logging_level.lock().expect("logging level");
        if let Some(threshold) = threshold {
            if params.level.severity() < threshold.severity() {
                return Ok(());
            }
        }
        self.protocol
            .notification(
                NOTIF_MESSAGE,
                Some(serde_json::to_value(params)?),
                NotificationOptions::default(),
            )
            .await
    }

    // -- server-initiated requests -----------------------------------------

    /// Send a `ping` and verify the client responds.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .protocol
            .request(METHOD_PING, None, RequestOptions::default())
            .await?;
        Ok(())
    }

    /// Ask the client to generate an LLM completion.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
        options: RequestOptions,
    ) -> Result<CreateMessageResult> {
        self.protocol
            .request(
                METHOD_SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(params)?),
                options,
            )
            .await
    }

    /// Ask the client to collect structured user input.
    pub async fn elicit(&self, params: ElicitationCreateParams) -> Result<ElicitationResult> {
        self.protocol
            .request(
                METHOD_ELICITATION_CREATE,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await
    }

    /// Ask the client for its current roots.
    pub async fn list_roots(&self) -> Result<Vec<Root>> {
        let response: ListRootsResponse = self
            .protocol
            .request(METHOD_ROOTS_LIST, None, RequestOptions::default())
            .await?;
        Ok(response.roots)
    }

    // -- internals ---------------------------------------------------------

    fn install_lifecycle_handlers(&self) {
        let session = Arc::clone(&self.session);
        let capabilities = Arc::clone(&self.capabilities);
        let server_info = self.server_info.clone();
        let instructions = self.instructions.clone();
        self.protocol
            .set_request_handler(METHOD_INITIALIZE, move |request, _extra| {
                let session = Arc::clone(&session);
                let capabilities = Arc::clone(&capabilities);
                let server_info = server_info.clone();
                let instructions = instructions.clone();
                Box::pin(async move {
                    let params: InitializeParams = parse_params(request.params)?;
                    // Echo a supported requested revision; otherwise offer
                    // our latest and let the client decide.
                    let version = if SUPPORTED_PROTOCOL_VERSIONS
                        .contains(&params.protocol_version.as_str())
                    {
                        params.protocol_version.clone()
                    } else {
                        LATEST_PROTOCOL_VERSION.to_string()
                    };
                    *session.lock().expect("session slot") = Some(ClientSession {
                        protocol_version: version.clone(),
                        capabilities: params.capabilities,
                        client_info: params.client_info,
                        initialized: false,
                    });
                    let response = InitializeResponse {
                        protocol_version: version,
                        capabilities: capabilities.lock().expect("capabilities slot").clone(),
                        server_info,
                        instructions,
                    };
                    Ok(serde_json::to_value(response)?)
                })
            })
            .expect("initialize handler installs on a fresh protocol");

        let session = Arc::clone(&self.session);
        self.protocol
            .set_notification_handler(NOTIF_INITIALIZED, move |_notification| {
                let session = Arc::clone(&session);
                Box::pin(async move {
                    if let Some(session) = session.lock().expect("session slot").as_mut() {
                        session.initialized = true;
                    }
                    Ok(())
                })
            })
            .expect("initialized handler installs on a fresh protocol");

        self.protocol
            .set_request_handler(METHOD_PING, |_request, _extra| {
                Box::pin(async move { Ok(serde_json::json!({})) })
            })
            .expect("ping handler installs on a fresh protocol");
    }

    /// Install `logging/setLevel` when the `logging` capability is
    /// declared up front.
    fn install_logging_handler(&self) {
        if self
            .capabilities
            .lock()
            .expect("capabilities slot")
            .logging
            .is_none()
        {
            return;
        }
        let level_store = Arc::clone(&self.logging_level);
        self.protocol
            .set_request_handler(METHOD_LOGGING_SET_LEVEL, move |request, _extra| {
                let level_store = Arc::clone(&level_store);
                Box::pin(async move {
                    let params: SetLevelParams = parse_params(request.params)?;
                    *level_store.lock().expect("logging level") = Some(params.level);
                    Ok(serde_json::json!({}))
                })
            })
            .expect("logging handler installs on a fresh protocol");
    }

    fn merge_resource_capability(&self) {
        self.capabilities
            .lock()
            .expect("capabilities slot")
            .merge(ServerCapabilities {
                resources: Some(ResourcesCapability {
                    list_changed: Some(true),
                    subscribe: None,
                }),
                ..Default::default()
            });
    }

    fn ensure_tool_routes(&self) -> Result<()> {
        if self.tools_routed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let tools = Arc::clone(&self.tools);
        self.protocol
            .set_request_handler(METHOD_TOOLS_LIST, move |_request, _extra| {
                let tools = Arc::clone(&tools);
                Box::pin(async move {
                    let listing: Vec<Tool> = tools
                        .lock()
                        .expect("tools")
                        .values()
                        .map(|t| t.tool.clone())
                        .collect();
                    Ok(serde_json::to_value(ListToolsResponse {
                        tools: listing,
                        next_cursor: None,
                    })?)
                })
            })?;

        let tools = Arc::clone(&self.tools);
        self.protocol
            .set_request_handler(METHOD_TOOLS_CALL, move |request, extra| {
                let tools = Arc::clone(&tools);
                Box::pin(async move {
                    let params: CallToolParams = parse_params(request.params)?;
                    let handler = tools
                        .lock()
                        .expect("tools")
                        .get(&params.name)
                        .map(|t| Arc::clone(&t.handler));
                    let Some(handler) = handler else {
                        return Err(McpError::Rpc(ErrorData::invalid_params(format!(
                            "Tool {} not found",
                            params.name
                        )))
                        .into());
                    };
                    match handler(params.arguments, extra).await {
                        Ok(response) => Ok(serde_json::to_value(response)?),
                        Err(error) => match error.downcast::<McpError>() {
                            // Protocol-level failures stay JSON-RPC errors.
                            Ok(mcp) => Err(mcp.into()),
                            // Tool failures surface in-band.
                            Err(other) => Ok(serde_json::to_value(
                                CallToolResponse::error_text(other.to_string()),
                            )?),
                        },
                    }
                })
            })?;
        Ok(())
    }

    fn ensure_resource_routes(&self) -> Result<()> {
        if self.resources_routed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let resources = Arc::clone(&self.resources);
        self.protocol
            .set_request_handler(METHOD_RESOURCES_LIST, move |_request, _extra| {
                let resources = Arc::clone(&resources);
                Box::pin(async move {
                    let listing: Vec<Resource> = resources
                        .lock()
                        .expect("resources")
                        .values()
                        .map(|r| r.resource.clone())
                        .collect();
                    Ok(serde_json::to_value(ListResourcesResponse {
                        resources: listing,
                        next_cursor: None,
                    })?)
                })
            })?;

        let templates = Arc::clone(&self.resource_templates);
        self.protocol
            .set_request_handler(METHOD_RESOURCES_TEMPLATES_LIST, move |_request, _extra| {
                let templates = Arc::clone(&templates);
                Box::pin(async move {
                    let listing: Vec<ResourceTemplate> = templates
                        .lock()
                        .expect("resource templates")
                        .iter()
                        .map(|t| t.template.clone())
                        .collect();
                    Ok(serde_json::to_value(ListResourceTemplatesResponse {
                        resource_templates: listing,
                        next_cursor: None,
                    })?)
                })
            })?;

        let resources = Arc::clone(&self.resources);
        let templates = Arc::clone(&self.resource_templates);
        self.protocol
            .set_request_handler(METHOD_RESOURCES_READ, move |request, extra| {
                let resources = Arc::clone(&resources);
                let templates = Arc::clone(&templates);
                Box::pin(async move {
                    let params: ReadResourceParams = parse_params(request.params)?;

                    let exact = resources
                        .lock()
                        .expect("resources")
                        .get(&params.uri)
                        .map(|r| Arc::clone(&r.read));
                    if let Some(read) = exact {
                        let response = read(params.uri, extra).await?;
                        return Ok(serde_json::to_value(response)?);
                    }

                    let matched = {
                        let templates = templates.lock().expect("resource templates");
                        templates.iter().find_map(|t| {
                            t.compiled
                                .match_uri(&params.uri)
                                .map(|vars| (Arc::clone(&t.read), vars))
                        })
                    };
                    if let Some((read, vars)) = matched {
                        let response = read(params.uri, vars, extra).await?;
                        return Ok(serde_json::to_value(response)?);
                    }

                    Err(McpError::Rpc(ErrorData::invalid_params(format!(
                        "Resource {} not found",
                        params.uri
                    )))
                    .into())
                })
            })?;

        // Subscriptions route only when the capability was declared.
        let subscribable = self
            .capabilities
            .lock()
            .expect("capabilities slot")
            .resources
            .as_ref()
            .map(|r| r.subscribe == Some(true))
            .unwrap_or(false);
        if subscribable {
            let subscriptions = Arc::clone(&self.subscriptions);
            self.protocol
                .set_request_handler(METHOD_RESOURCES_SUBSCRIBE, move |request, _extra| {
                    let subscriptions = Arc::clone(&subscriptions);
                    Box::pin(async move {
                        let params: ResourceSubscriptionParams = parse_params(request.params)?;
                        subscriptions
                            .lock()
                            .expect("subscriptions")
                            .insert(params.uri);
                        Ok(serde_json::json!({}))
                    })
                })?;

            let subscriptions = Arc::clone(&self.subscriptions);
            self.protocol
                .set_request_handler(METHOD_RESOURCES_UNSUBSCRIBE, move |request, _extra| {
                    let subscriptions = Arc::clone(&subscriptions);
                    Box::pin(async move {
                        let params: ResourceSubscriptionParams = parse_params(request.params)?;
                        subscriptions
                            .lock()
                            .expect("subscriptions")
                            .remove(&params.uri);
                        Ok(serde_json::json!({}))
                    })
                })?;
        }
        Ok(())
    }

    fn ensure_prompt_routes(&self) -> Result<()> {
        if self.prompts_routed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let prompts = Arc::clone(&self.prompts);
        self.protocol
            .set_request_handler(METHOD_PROMPTS_LIST, move |_request, _extra| {
                let prompts = Arc::clone(&prompts);
                Box::pin(async move {
                    let listing: Vec<Prompt> = prompts
                        .lock()
                        .expect("prompts")
                        .values()
                        .map(|p| p.prompt.clone())
                        .collect();
                    Ok(serde_json::to_value(ListPromptsResponse {
                        prompts: listing,
                        next_cursor: None,
                    })?)
                })
            })?;

        let prompts = Arc::clone(&self.prompts);
        self.protocol
            .set_request_handler(METHOD_PROMPTS_GET, move |request, extra| {
                let prompts = Arc::clone(&prompts);
                Box::pin(async move {
                    let params: GetPromptParams = parse_params(request.params)?;
                    let handler = prompts
                        .lock()
                        .expect("prompts")
                        .get(&params.name)
                        .map(|p| Arc::clone(&p.handler));
                    let Some(handler) = handler else {
                        return Err(McpError::Rpc(ErrorData::invalid_params(format!(
                            "Prompt {} not found",
                            params.name
                        )))
                        .into());
                    };
                    let response = handler(params.arguments, extra).await?;
                    Ok(serde_json::to_value(response)?)
                })
            })?;
        Ok(())
    }

    /// Fire a debounced list-changed notification when connected.
    fn notify_if_connected(&self, method: &'static str) {
        if !self.protocol.is_connected() {
            return;
        }
        let protocol = self.protocol.clone_shared();
        tokio::spawn(async move {
            if let Err(error) = protocol
                .notification(method, None, NotificationOptions::default())
                .await
            {
                tracing::debug!("{method} not sent: {error:#}");
            }
        });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::inmemory::InMemoryTransport;
    use crate::transport::TransportSendOptions;
    use crate::types::{
        JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, ResourceContents,
        TextResourceContents,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Connect a server to one side of a pair; drive the other side raw.
    async fn wired_server(
        server: &Server,
    ) -> (
        Arc<InMemoryTransport>,
        mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) {
        let (server_side, client_side) = InMemoryTransport::create_linked_pair();
        let client_side = Arc::new(client_side);
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        client_side.on_message(Box::new(move |message, _ctx| {
            let _ = seen_tx.send(message);
        }));
        client_side.start().await.unwrap();
        server.connect(Arc::new(server_side)).await.unwrap();
        (client_side, seen_rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<JsonRpcMessage>) -> JsonRpcMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for server message")
            .expect("channel closed")
    }

    async fn roundtrip(
        client: &Arc<InMemoryTransport>,
        rx: &mut mpsc::UnboundedReceiver<JsonRpcMessage>,
        id: i64,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        let request = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params));
        client
            .send(request, TransportSendOptions::default())
            .await
            .unwrap();
        recv(rx).await
    }

    async fn initialize(
        client: &Arc<InMemoryTransport>,
        rx: &mut mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> serde_json::Value {
        let response = roundtrip(
            client,
            rx,
            0,
            METHOD_INITIALIZE,
            Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "t", "version": "1" }
            })),
        )
        .await;
        let JsonRpcMessage::Response(response) = response else {
            panic!("expected initialize response, got {response:?}");
        };
        let initialized =
            JsonRpcMessage::Notification(JsonRpcNotification::new(NOTIF_INITIALIZED, None));
        client
            .send(initialized, TransportSendOptions::default())
            .await
            .unwrap();
        response.result
    }

    fn calc_server() -> Server {
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
                        "properties": { "expression": { "type": "string" } }
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
                            .unwrap_or_default()
                            .to_string();
                        // Just enough arithmetic for the tests.
                        let result = match expression.as_str() {
                            "2+2" => "4",
                            "1+1" => "2",
                            _ => return Err(anyhow::anyhow!("cannot evaluate {expression}")),
                        };
                        Ok(CallToolResponse::text(result))
                    })
                },
            )
            .unwrap();
        server
    }

    #[tokio::test]
    async fn test_initialize_echoes_supported_requested_version() {
        let server = calc_server();
        let (client, mut rx) = wired_server(&server).await;

        let result = initialize(&client, &mut rx).await;
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "calc-server");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.initialized());
        assert_eq!(server.client_info().unwrap().name, "t");
    }

    #[tokio::test]
    async fn test_initialize_with_unknown_version_offers_latest() {
        let server = calc_server();
        let (client, mut rx) = wired_server(&server).await;

        let response = roundtrip(
            &client,
            &mut rx,
            0,
            METHOD_INITIALIZE,
            Some(serde_json::json!({
                "protocolVersion": "1999-01-01",
                "capabilities": {},
                "clientInfo": { "name": "t", "version": "1" }
            })),
        )
        .await;
        let JsonRpcMessage::Response(response) = response else {
            panic!("expected response");
        };
        assert_eq!(response.result["protocolVersion"], LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_tools_list_and_call() {
        let server = calc_server();
        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let listing = roundtrip(&client, &mut rx, 1, METHOD_TOOLS_LIST, None).await;
        let JsonRpcMessage::Response(listing) = listing else {
            panic!("expected tools/list response");
        };
        assert_eq!(listing.result["tools"][0]["name"], "calc");

        let call = roundtrip(
            &client,
            &mut rx,
            2,
            METHOD_TOOLS_CALL,
            Some(serde_json::json!({
                "name": "calc",
                "arguments": { "expression": "2+2" }
            })),
        )
        .await;
        let JsonRpcMessage::Response(call) = call else {
            panic!("expected tools/call response");
        };
        assert_eq!(
            call.result,
            serde_json::json!({ "content": [{ "type": "text", "text": "4" }] })
        );
    }

    #[tokio::test]
    async fn test_tool_failure_folds_into_is_error() {
        let server = calc_server();
        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let call = roundtrip(
            &client,
            &mut rx,
            2,
            METHOD_TOOLS_CALL,
            Some(serde_json::json!({
                "name": "calc",
                "arguments": { "expression": "nope" }
            })),
        )
        .await;
        let JsonRpcMessage::Response(call) = call else {
            panic!("expected in-band tool error, not a JSON-RPC error");
        };
        assert_eq!(call.result["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let server = calc_server();
        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let call = roundtrip(
            &client,
            &mut rx,
            2,
            METHOD_TOOLS_CALL,
            Some(serde_json::json!({ "name": "missing" })),
        )
        .await;
        let JsonRpcMessage::Error(error) = call else {
            panic!("expected error response");
        };
        assert_eq!(error.error.code, -32602);
    }

    #[tokio::test]
    async fn test_resources_exact_and_template_read() {
        let server = Server::new(
            Implementation::new("res-server", "1.0.0"),
            ServerOptions::default(),
        );
        server
            .register_resource(
                Resource {
                    uri: "memo://greeting".to_string(),
                    name: "greeting".to_string(),
                    description: None,
                    mime_type: Some("text/plain".to_string()),
                },
                |uri, _extra| {
                    Box::pin(async move {
                        Ok(ReadResourceResponse {
                            contents: vec![ResourceContents::Text(TextResourceContents {
                                uri,
                                mime_type: Some("text/plain".to_string()),
                                text: "hello".to_string(),
                            })],
                        })
                    })
                },
            )
            .unwrap();
        server
            .register_resource_template(
                ResourceTemplate {
                    uri_template: "memo://notes/{id}".to_string(),
                    name: "note".to_string(),
                    description: None,
                    mime_type: Some("text/plain".to_string()),
                },
                |uri, vars, _extra| {
                    Box::pin(async move {
                        let VarValue::Scalar(id) = vars["id"].clone() else {
                            return Err(anyhow::anyhow!("expected scalar id"));
                        };
                        Ok(ReadResourceResponse {
                            contents: vec![ResourceContents::Text(TextResourceContents {
                                uri,
                                mime_type: Some("text/plain".to_string()),
                                text: format!("note {id}"),
                            })],
                        })
                    })
                },
            )
            .unwrap();

        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let exact = roundtrip(
            &client,
            &mut rx,
            1,
            METHOD_RESOURCES_READ,
            Some(serde_json::json!({ "uri": "memo://greeting" })),
        )
        .await;
        let JsonRpcMessage::Response(exact) = exact else {
            panic!("expected read response");
        };
        assert_eq!(exact.result["contents"][0]["text"], "hello");

        let templated = roundtrip(
            &client,
            &mut rx,
            2,
            METHOD_RESOURCES_READ,
            Some(serde_json::json!({ "uri": "memo://notes/42" })),
        )
        .await;
        let JsonRpcMessage::Response(templated) = templated else {
            panic!("expected templated read response");
        };
        assert_eq!(templated.result["contents"][0]["text"], "note 42");

        let missing = roundtrip(
            &client,
            &mut rx,
            3,
            METHOD_RESOURCES_READ,
            Some(serde_json::json!({ "uri": "memo://nope" })),
        )
        .await;
        let JsonRpcMessage::Error(missing) = missing else {
            panic!("expected error for unknown resource");
        };
        assert_eq!(missing.error.code, -32602);

        let templates = roundtrip(&client, &mut rx, 4, METHOD_RESOURCES_TEMPLATES_LIST, None).await;
        let JsonRpcMessage::Response(templates) = templates else {
            panic!("expected templates listing");
        };
        assert_eq!(
            templates.result["resourceTemplates"][0]["uriTemplate"],
            "memo://notes/{id}"
        );
    }

    #[tokio::test]
    async fn test_subscriptions_gate_updated_notifications() {
        let server = Server::new(
            Implementation::new("res-server", "1.0.0"),
            ServerOptions {
                capabilities: ServerCapabilities {
                    resources: Some(ResourcesCapability {
                        list_changed: Some(true),
                        subscribe: Some(true),
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        server
            .register_resource(
                Resource {
                    uri: "memo://a".to_string(),
                    name: "a".to_string(),
                    description: None,
                    mime_type: None,
                },
                |uri, _extra| {
                    Box::pin(async move {
                        Ok(ReadResourceResponse {
                            contents: vec![ResourceContents::Text(TextResourceContents {
                                uri,
                                mime_type: None,
                                text: String::new(),
                            })],
                        })
                    })
                },
            )
            .unwrap();

        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        // Not subscribed yet: no notification goes out.
        server.notify_resource_updated("memo://a").await.unwrap();
        let silent = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(silent.is_err());

        let subscribed = roundtrip(
            &client,
            &mut rx,
            1,
            METHOD_RESOURCES_SUBSCRIBE,
            Some(serde_json::json!({ "uri": "memo://a" })),
        )
        .await;
        assert!(matches!(subscribed, JsonRpcMessage::Response(_)));

        server.notify_resource_updated("memo://a").await.unwrap();
        let update = recv(&mut rx).await;
        assert_eq!(update.method(), Some(NOTIF_RESOURCES_UPDATED));

        let unsubscribed = roundtrip(
            &client,
            &mut rx,
            2,
            METHOD_RESOURCES_UNSUBSCRIBE,
            Some(serde_json::json!({ "uri": "memo://a" })),
        )
        .await;
        assert!(matches!(unsubscribed, JsonRpcMessage::Response(_)));

        server.notify_resource_updated("memo://a").await.unwrap();
        let silent = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(silent.is_err());
    }

    #[tokio::test]
    async fn test_prompts_get_renders_registered_prompt() {
        let server = Server::new(
            Implementation::new("prompt-server", "1.0.0"),
            ServerOptions::default(),
        );
        server
            .register_prompt(
                Prompt {
                    name: "greet".to_string(),
                    description: Some("Say hello".to_string()),
                    arguments: None,
                },
                |arguments, _extra| {
                    Box::pin(async move {
                        let name = arguments
                            .and_then(|a| a.get("name").cloned())
                            .unwrap_or_else(|| "world".to_string());
                        Ok(GetPromptResponse {
                            description: None,
                            messages: vec![crate::types::PromptMessage {
                                role: crate::types::Role::User,
                                content: crate::types::MessageContent::Text {
                                    text: format!("Hello, {name}!"),
                                },
                            }],
                        })
                    })
                },
            )
            .unwrap();

        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let response = roundtrip(
            &client,
            &mut rx,
            1,
            METHOD_PROMPTS_GET,
            Some(serde_json::json!({
                "name": "greet",
                "arguments": { "name": "Ada" }
            })),
        )
        .await;
        let JsonRpcMessage::Response(response) = response else {
            panic!("expected prompts/get response");
        };
        assert_eq!(
            response.result["messages"][0]["content"]["text"],
            "Hello, Ada!"
        );
    }

    #[tokio::test]
    async fn test_logging_level_filters_messages() {
        let server = Server::new(
            Implementation::new("log-server", "1.0.0"),
            ServerOptions {
                capabilities: ServerCapabilities {
                    logging: Some(serde_json::json!({})),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let set = roundtrip(
            &client,
            &mut rx,
            1,
            METHOD_LOGGING_SET_LEVEL,
            Some(serde_json::json!({ "level": "warning" })),
        )
        .await;
        assert!(matches!(set, JsonRpcMessage::Response(_)));

        server
            .send_logging_message(LoggingMessageParams {
                level: LoggingLevel::Debug,
                logger: None,
                data: serde_json::json!("too quiet"),
            })
            .await
            .unwrap();
        let silent = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(silent.is_err(), "debug must be filtered at warning level");

        server
            .send_logging_message(LoggingMessageParams {
                level: LoggingLevel::Error,
                logger: Some("core".to_string()),
                data: serde_json::json!("loud"),
            })
            .await
            .unwrap();
        let message = recv(&mut rx).await;
        assert_eq!(message.method(), Some(NOTIF_MESSAGE));
    }

    #[tokio::test]
    async fn test_registration_after_connect_emits_list_changed() {
        let server = calc_server();
        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        server
            .register_tool(
                Tool {
                    name: "extra".to_string(),
                    description: None,
                    input_schema: serde_json::json!({}),
                    output_schema: None,
                    annotations: None,
                },
                |_arguments, _extra| {
                    Box::pin(async move { Ok(CallToolResponse::text("ok")) })
                },
            )
            .unwrap();

        let notification = recv(&mut rx).await;
        assert_eq!(notification.method(), Some(NOTIF_TOOLS_LIST_CHANGED));
    }

    #[tokio::test]
    async fn test_duplicate_tool_registration_fails() {
        let server = calc_server();
        let error = server
            .register_tool(
                Tool {
                    name: "calc".to_string(),
                    description: None,
                    input_schema: serde_json::json!({}),
                    output_schema: None,
                    annotations: None,
                },
                |_arguments, _extra| Box::pin(async move { Ok(CallToolResponse::text("")) }),
            )
            .unwrap_err();
        assert!(error.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn test_completion_handler_routes() {
        let server = Server::new(
            Implementation::new("comp-server", "1.0.0"),
            ServerOptions::default(),
        );
        server
            .set_completion_handler(|params, _extra| {
                Box::pin(async move {
                    assert_eq!(params.argument.name, "id");
                    Ok(CompleteResponse {
                        completion: crate::types::Completion {
                            values: vec!["1".to_string(), "10".to_string()],
                            total: Some(2),
                            has_more: Some(false),
                        },
                    })
                })
            })
            .unwrap();

        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let response = roundtrip(
            &client,
            &mut rx,
            1,
            METHOD_COMPLETION_COMPLETE,
            Some(serde_json::json!({
                "ref": { "type": "ref/resource", "uri": "memo://notes/{id}" },
                "argument": { "name": "id", "value": "1" }
            })),
        )
        .await;
        let JsonRpcMessage::Response(response) = response else {
            panic!("expected completion response");
        };
        assert_eq!(response.result["completion"]["values"][0], "1");
    }

    #[tokio::test]
    async fn test_strict_server_blocks_sampling_without_client_capability() {
        let server = Server::new(
            Implementation::new("strict-server", "1.0.0"),
            ServerOptions {
                protocol: ProtocolOptions {
                    enforce_strict_capabilities: true,
                    debounced_notification_methods: Vec::new(),
                },
                ..Default::default()
            },
        );
        let (client, mut rx) = wired_server(&server).await;
        initialize(&client, &mut rx).await;

        let result = server
            .create_message(
                CreateMessageParams {
                    messages: Vec::new(),
                    model_preferences: None,
                    system_prompt: None,
                    include_context: None,
                    temperature: None,
                    max_tokens: 8,
                    stop_sequences: None,
                    metadata: None,
                },
                RequestOptions::default(),
            )
            .await;
        let error = result.unwrap_err().downcast::<McpError>().unwrap();
        assert!(matches!(error, McpError::Capability { .. }));
    }
}
