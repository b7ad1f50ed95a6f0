//! Transport-agnostic MCP protocol core
//!
//! [`Protocol`] implements the request/response machinery shared by the
//! client and server facades: correlation of outgoing requests by
//! monotonic ID, dispatch of inbound requests and notifications to
//! registered handlers, per-request timeouts with optional
//! reset-on-progress, cancellation in both directions, progress routing,
//! debounced notifications, composable request-handler wrappers, and an
//! optional capability gate supplied by the facade.
//!
//! # Design
//!
//! - A `Protocol` is a bundle of `Arc`'d state; [`Protocol::clone_shared`]
//!   produces an aliasing handle, which is how the dispatch tasks, handler
//!   extras, and facades all operate on the same in-flight tables.
//! - All protocol-owned mutable state sits behind `std::sync::Mutex` and
//!   is never held across an await point; handler futures are cloned out
//!   of the registry before being driven.
//! - The three in-flight table entries for an outgoing request (response
//!   slot, progress callback, timeout state) live behind a single lock and
//!   are inserted and removed together, so a request can never half-leak.
//! - Inbound requests each get a [`CancellationToken`] recorded under the
//!   inbound ID; `notifications/cancelled` triggers it, and a handler that
//!   completes after cancellation has its result discarded.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorData, McpError, Result};
use crate::transport::{AuthInfo, MessageContext, RequestInfo, Transport, TransportSendOptions};
use crate::types::{
    CancelledParams, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ProgressParams, ProgressToken, RequestId, NOTIF_CANCELLED, NOTIF_PROGRESS,
};

/// Default timeout applied to every request when the caller does not
/// specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A request handler: receives the raw request envelope plus the
/// per-request [`RequestHandlerExtra`], and returns the raw result value.
pub type RequestHandler = Arc<
    dyn Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
        + Send
        + Sync,
>;

/// A notification handler: receives the raw notification envelope.
pub type NotificationHandler =
    Arc<dyn Fn(JsonRpcNotification) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A decorator applied to request handlers at registration time.
pub type RequestHandlerWrapper = Box<dyn Fn(RequestHandler) -> RequestHandler + Send + Sync>;

/// A progress callback registered alongside an outgoing request.
pub type ProgressCallback = Arc<dyn Fn(ProgressParams) + Send + Sync>;

/// Capability checks installed by the client/server facade.
///
/// `check_request` and `check_notification` gate *outgoing* traffic
/// against the peer's negotiated capabilities and are consulted only in
/// strict mode; `check_handler` gates handler registration against the
/// local advertised capabilities and is consulted unconditionally.
pub trait CapabilityGate: Send + Sync {
    /// May we send a request with this method to the peer?
    fn check_request(&self, method: &str) -> Result<()>;
    /// May we send a notification with this method to the peer?
    fn check_notification(&self, method: &str) -> Result<()>;
    /// May we serve this method, given our own advertised capabilities?
    fn check_handler(&self, method: &str) -> Result<()>;
}

/// Construction options for a [`Protocol`].
#[derive(Debug, Clone, Default)]
pub struct ProtocolOptions {
    /// When `true`, outgoing requests and notifications are checked
    /// against the peer's negotiated capabilities before touching the
    /// transport.
    pub enforce_strict_capabilities: bool,
    /// Notification methods eligible for debouncing (conventionally the
    /// `*/list_changed` family).
    pub debounced_notification_methods: Vec<String>,
}

/// Per-request options for [`Protocol::request`].
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Timeout for this request; [`DEFAULT_REQUEST_TIMEOUT`] when `None`.
    pub timeout: Option<Duration>,
    /// When `true`, each progress notification restarts the timeout timer.
    pub reset_timeout_on_progress: bool,
    /// Absolute ceiling from send time, bounding timer resets.
    pub max_total_timeout: Option<Duration>,
    /// Callback invoked for each progress notification for this request.
    /// Registering one injects `params._meta.progressToken`.
    pub on_progress: Option<ProgressCallback>,
    /// Cancellation handle; triggering it abandons the request and sends
    /// `notifications/cancelled` to the peer.
    pub cancellation: Option<CancellationToken>,
    /// Inbound request this request is being made on behalf of.
    pub related_request_id: Option<RequestId>,
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("reset_timeout_on_progress", &self.reset_timeout_on_progress)
            .field("max_total_timeout", &self.max_total_timeout)
            .field("has_on_progress", &self.on_progress.is_some())
            .field("related_request_id", &self.related_request_id)
            .finish()
    }
}

/// Per-notification options for [`Protocol::notification`].
#[derive(Debug, Clone, Default)]
pub struct NotificationOptions {
    /// Inbound request this notification is attributed to. Presence makes
    /// the notification ineligible for debouncing.
    pub related_request_id: Option<RequestId>,
}

/// Per-request context handed to every request handler.
///
/// Carries the cancellation token the handler should observe, the inbound
/// request's identity and `_meta`, any transport-attached context, and a
/// peer handle for sending related notifications and requests that inherit
/// this request's ID as their `related_request_id`.
pub struct RequestHandlerExtra {
    /// Token triggered when the peer cancels this request.
    pub cancellation: CancellationToken,
    /// The inbound request ID (the peer's ID space).
    pub request_id: RequestId,
    /// The `_meta` object from the request params, if any.
    pub meta: Option<serde_json::Value>,
    /// Authentication principal attached by the transport.
    pub auth_info: Option<AuthInfo>,
    /// Transport-level session identifier.
    pub session_id: Option<String>,
    /// Per-request transport metadata.
    pub request_info: Option<RequestInfo>,
    peer: Protocol,
}

impl std::fmt::Debug for RequestHandlerExtra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandlerExtra")
            .field("request_id", &self.request_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Clone for RequestHandlerExtra {
    fn clone(&self) -> Self {
        Self {
            cancellation: self.cancellation.clone(),
            request_id: self.request_id.clone(),
            meta: self.meta.clone(),
            auth_info: self.auth_info.clone(),
            session_id: self.session_id.clone(),
            request_info: self.request_info.clone(),
            peer: self.peer.clone_shared(),
        }
    }
}

impl RequestHandlerExtra {
    /// Send a notification attributed to this request.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.peer
            .notification(
                method,
                params,
                NotificationOptions {
                    related_request_id: Some(self.request_id.clone()),
                },
            )
            .await
    }

    /// Send a request to the peer, inheriting this request's ID as the
    /// `related_request_id` unless the caller overrides it.
    pub async fn send_request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        mut options: RequestOptions,
    ) -> Result<R> {
        if options.related_request_id.is_none() {
            options.related_request_id = Some(self.request_id.clone());
        }
        self.peer.request(method, params, options).await
    }

    /// The progress token the requester embedded, if any.
    pub fn progress_token(&self) -> Option<ProgressToken> {
        self.meta
            .as_ref()
            .and_then(|m| m.get("progressToken"))
            .and_then(|t| serde_json::from_value(t.clone()).ok())
    }

    /// Emit a progress notification for this request.
    ///
    /// No-ops when the requester did not embed a progress token.
    pub async fn send_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<()> {
        let Some(token) = self.progress_token() else {
            return Ok(());
        };
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        };
        self.send_notification(NOTIF_PROGRESS, Some(serde_json::to_value(params)?))
            .await
    }
}

/// Timeout bookkeeping for one outgoing request.
struct TimeoutState {
    started_at: Instant,
    timeout: Duration,
    max_total_timeout: Option<Duration>,
    reset_on_progress: bool,
    deadline_tx: watch::Sender<Instant>,
}

/// The three in-flight tables, inserted/removed together under one lock.
#[derive(Default)]
struct InFlight {
    response_handlers:
        HashMap<i64, oneshot::Sender<std::result::Result<serde_json::Value, ErrorData>>>,
    progress_handlers: HashMap<i64, ProgressCallback>,
    timeouts: HashMap<i64, TimeoutState>,
}

/// Callback slots observable from synchronous contexts.
#[derive(Default)]
struct LifecycleCallbacks {
    on_close: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    on_error: Mutex<Option<Box<dyn Fn(&anyhow::Error) + Send + Sync>>>,
}

/// The MCP protocol core.
///
/// Create one with [`Protocol::new`], register handlers, then
/// [`Protocol::connect`] it to a transport. Both facades embed a
/// `Protocol`; advanced callers can drive one directly.
pub struct Protocol {
    options: Arc<ProtocolOptions>,
    transport: Arc<Mutex<Option<Arc<dyn Transport>>>>,
    next_id: Arc<AtomicI64>,
    in_flight: Arc<Mutex<InFlight>>,
    inbound_cancellations: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
    pending_debounced: Arc<Mutex<HashSet<String>>>,
    request_handlers: Arc<Mutex<HashMap<String, RequestHandler>>>,
    notification_handlers: Arc<Mutex<HashMap<String, NotificationHandler>>>,
    fallback_request_handler: Arc<Mutex<Option<RequestHandler>>>,
    fallback_notification_handler: Arc<Mutex<Option<NotificationHandler>>>,
    wrappers: Arc<Mutex<Vec<RequestHandlerWrapper>>>,
    gate: Arc<Mutex<Option<Arc<dyn CapabilityGate>>>>,
    callbacks: Arc<LifecycleCallbacks>,
    close_fired: Arc<AtomicBool>,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("connected", &self.transport.lock().expect("transport slot").is_some())
            .finish_non_exhaustive()
    }
}

impl Protocol {
    /// Create a disconnected protocol instance.
    pub fn new(options: ProtocolOptions) -> Self {
        Self {
            options: Arc::new(options),
            transport: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicI64::new(0)),
            in_flight: Arc::new(Mutex::new(InFlight::default())),
            inbound_cancellations: Arc::new(Mutex::new(HashMap::new())),
            pending_debounced: Arc::new(Mutex::new(HashSet::new())),
            request_handlers: Arc::new(Mutex::new(HashMap::new())),
            notification_handlers: Arc::new(Mutex::new(HashMap::new())),
            fallback_request_handler: Arc::new(Mutex::new(None)),
            fallback_notification_handler: Arc::new(Mutex::new(None)),
            wrappers: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Mutex::new(None)),
            callbacks: Arc::new(LifecycleCallbacks::default()),
            close_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a handle sharing all internal state with `self`.
    ///
    /// The returned instance aliases the same in-flight tables, handler
    /// registry, transport slot, and ID counter; this is how dispatch
    /// tasks and handler extras operate on the originating protocol.
    pub fn clone_shared(&self) -> Self {
        Self {
            options: Arc::clone(&self.options),
            transport: Arc::clone(&self.transport),
            next_id: Arc::clone(&self.next_id),
            in_flight: Arc::clone(&self.in_flight),
            inbound_cancellations: Arc::clone(&self.inbound_cancellations),
            pending_debounced: Arc::clone(&self.pending_debounced),
            request_handlers: Arc::clone(&self.request_handlers),
            notification_handlers: Arc::clone(&self.notification_handlers),
            fallback_request_handler: Arc::clone(&self.fallback_request_handler),
            fallback_notification_handler: Arc::clone(&self.fallback_notification_handler),
            wrappers: Arc::clone(&self.wrappers),
            gate: Arc::clone(&self.gate),
            callbacks: Arc::clone(&self.callbacks),
            close_fired: Arc::clone(&self.close_fired),
        }
    }

    /// Install the callback fired once when the session ends.
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.callbacks.on_close.lock().expect("close slot") = Some(Box::new(callback));
    }

    /// Install the callback for non-fatal errors (bad frames, failed
    /// replies). Without one, errors are logged at `warn`.
    pub fn on_error(&self, callback: impl Fn(&anyhow::Error) + Send + Sync + 'static) {
        *self.callbacks.on_error.lock().expect("error slot") = Some(Box::new(callback));
    }

    /// Install the facade's capability gate.
    pub fn set_capability_gate(&self, gate: Arc<dyn CapabilityGate>) {
        *self.gate.lock().expect("gate slot") = Some(gate);
    }

    /// Whether a transport is currently attached.
    pub fn is_connected(&self) -> bool {
        self.transport.lock().expect("transport slot").is_some()
    }

    /// Attach a transport and start it.
    ///
    /// Installs this protocol as the transport's sole dispatcher, then
    /// calls [`Transport::start`].
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if already connected, or whatever
    /// the transport's `start` reports.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        {
            let mut slot = self.transport.lock().expect("transport slot");
            if slot.is_some() {
                return Err(McpError::Transport("already connected".to_string()).into());
            }
            *slot = Some(Arc::clone(&transport));
        }

        let me = self.clone_shared();
        transport.on_close(Box::new(move || {
            let me = me.clone_shared();
            tokio::spawn(async move {
                me.handle_close().await;
            });
        }));

        let me = self.clone_shared();
        transport.on_error(Box::new(move |error| {
            me.report_error(&error);
        }));

        let me = self.clone_shared();
        transport.on_message(Box::new(move |message, context| {
            let me = me.clone_shared();
            tokio::spawn(async move {
                me.dispatch_message(message, context).await;
            });
        }));

        transport.start().await
    }

    /// Detach and close the transport, draining all in-flight state.
    ///
    /// Every outstanding waiter completes with
    /// [`McpError::ConnectionClosed`], every inbound cancellation token is
    /// triggered, and the close callback fires exactly once.
    pub async fn close(&self) -> Result<()> {
        let transport = self.transport.lock().expect("transport slot").clone();
        if let Some(transport) = transport {
            transport.close().await?;
        }
        self.handle_close().await;
        Ok(())
    }

    /// Send a request and await its raw result value.
    ///
    /// This is the untyped core of [`Protocol::request`]; see there for
    /// the full contract.
    pub async fn request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value> {
        if self.options.enforce_strict_capabilities {
            if let Some(gate) = self.gate.lock().expect("gate slot").clone() {
                gate.check_request(method)?;
            }
        }
        let transport = self.transport()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timeout = options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let mut params = params;
        if options.on_progress.is_some() {
            let params = params.get_or_insert_with(|| serde_json::json!({}));
            let object = params.as_object_mut().ok_or_else(|| {
                McpError::InvalidEnvelope("params must be an object to carry _meta".to_string())
            })?;
            object
                .entry("_meta")
                .or_insert_with(|| serde_json::json!({}))
                .as_object_mut()
                .ok_or_else(|| {
                    McpError::InvalidEnvelope("params._meta must be an object".to_string())
                })?
                .insert("progressToken".to_string(), serde_json::json!(id));
        }

        // Insert all three table entries atomically before sending, so a
        // response can never arrive before we are ready for it.
        let (tx, mut rx) = oneshot::channel();
        let started_at = Instant::now();
        let hard_cap = options.max_total_timeout.map(|max| started_at + max);
        let initial_deadline = cap_deadline(started_at + timeout, hard_cap);
        let (deadline_tx, mut deadline_rx) = watch::channel(initial_deadline);
        {
            let mut tables = self.in_flight.lock().expect("in-flight tables");
            tables.response_handlers.insert(id, tx);
            if let Some(on_progress) = options.on_progress.clone() {
                tables.progress_handlers.insert(id, on_progress);
            }
            tables.timeouts.insert(
                id,
                TimeoutState {
                    started_at,
                    timeout,
                    max_total_timeout: options.max_total_timeout,
                    reset_on_progress: options.reset_timeout_on_progress,
                    deadline_tx,
                },
            );
        }

        let message = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params));
        let send_options = TransportSendOptions {
            related_request_id: options.related_request_id.clone(),
        };
        if let Err(error) = transport.send(message, send_options).await {
            self.remove_in_flight(id);
            return Err(error);
        }

        let cancellation = options.cancellation.clone().unwrap_or_default();
        let mut cancel_pending = true;
        let mut deadline_live = true;

        loop {
            let deadline = *deadline_rx.borrow_and_update();
            tokio::select! {
                outcome = &mut rx => {
                    return match outcome {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(error)) => Err(McpError::from_error_data(error).into()),
                        Err(_) => Err(McpError::ConnectionClosed.into()),
                    };
                }
                _ = cancellation.cancelled(), if cancel_pending => {
                    cancel_pending = false;
                    if self.remove_in_flight(id) {
                        let reason = "cancelled by requester";
                        self.send_cancelled(&transport, id, reason).await;
                        return Err(McpError::RequestCancelled { reason: reason.to_string() }.into());
                    }
                    // Lost the race against a response; pick it up above.
                }
                changed = deadline_rx.changed(), if deadline_live => {
                    if changed.is_err() {
                        deadline_live = false;
                    }
                }
                _ = tokio::time::sleep_until(deadline), if deadline_live => {
                    if self.remove_in_flight(id) {
                        self.send_cancelled(&transport, id, "timeout").await;
                        return Err(McpError::RequestTimeout {
                            method: method.to_string(),
                            timeout_ms: timeout.as_millis(),
                        }
                        .into());
                    }
                    deadline_live = false;
                }
            }
        }
    }

    /// Send a request and await its typed result.
    ///
    /// Exactly one of the following resolves this call: a success
    /// response, an error response, a timeout, a cancellation, or
    /// connection close. Unknown fields in the result are tolerated; a
    /// result that cannot be decoded at all is logged and surfaced as a
    /// serialization error.
    pub async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<R> {
        let value = self.request_value(method, params, options).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Ok(typed),
            Err(error) => {
                tracing::warn!("result for {method} does not match the expected shape: {error}");
                Err(McpError::Serialization(error).into())
            }
        }
    }

    /// Send a fire-and-forget notification.
    ///
    /// A parameterless, unrelated notification whose method is configured
    /// in [`ProtocolOptions::debounced_notification_methods`] is
    /// coalesced: at most one per method is actually transmitted per
    /// event-loop turn.
    pub async fn notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: NotificationOptions,
    ) -> Result<()> {
        if self.options.enforce_strict_capabilities {
            if let Some(gate) = self.gate.lock().expect("gate slot").clone() {
                gate.check_notification(method)?;
            }
        }

        let debounced = params.is_none()
            && options.related_request_id.is_none()
            && self
                .options
                .debounced_notification_methods
                .iter()
                .any(|m| m == method);
        if !debounced {
            return self
                .send_notification_now(method, params, options.related_request_id)
                .await;
        }

        {
            let mut pending = self.pending_debounced.lock().expect("debounce set");
            if !pending.insert(method.to_string()) {
                // One is already queued for this method; drop this one.
                return Ok(());
            }
        }

        let me = self.clone_shared();
        let method = method.to_string();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            me.pending_debounced
                .lock()
                .expect("debounce set")
                .remove(&method);
            if !me.is_connected() {
                return;
            }
            if let Err(error) = me.send_notification_now(&method, None, None).await {
                tracing::debug!("debounced notification {method} not sent: {error:#}");
            }
        });
        Ok(())
    }

    /// Bind a request handler to a method.
    ///
    /// Wrappers installed before this call are applied around the
    /// handler, first-installed innermost.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::HandlerExists`] if the method is already
    /// bound, or a capability violation from the facade's gate.
    pub fn set_request_handler<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        if let Some(gate) = self.gate.lock().expect("gate slot").clone() {
            gate.check_handler(method)?;
        }
        let mut handlers = self.request_handlers.lock().expect("request handlers");
        if handlers.contains_key(method) {
            return Err(McpError::HandlerExists(method.to_string()).into());
        }
        let mut handler: RequestHandler = Arc::new(handler);
        for wrapper in self.wrappers.lock().expect("wrappers").iter() {
            handler = wrapper(handler);
        }
        handlers.insert(method.to_string(), handler);
        Ok(())
    }

    /// Remove a request handler, making the method re-registrable.
    pub fn remove_request_handler(&self, method: &str) {
        self.request_handlers
            .lock()
            .expect("request handlers")
            .remove(method);
    }

    /// Bind a notification handler to a method.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::HandlerExists`] if the method is already bound.
    pub fn set_notification_handler<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcNotification) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .notification_handlers
            .lock()
            .expect("notification handlers");
        if handlers.contains_key(method) {
            return Err(McpError::HandlerExists(method.to_string()).into());
        }
        handlers.insert(method.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Remove a notification handler.
    pub fn remove_notification_handler(&self, method: &str) {
        self.notification_handlers
            .lock()
            .expect("notification handlers")
            .remove(method);
    }

    /// Install the catch-all for requests with no bound handler.
    pub fn set_fallback_request_handler<F>(&self, handler: F)
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        *self
            .fallback_request_handler
            .lock()
            .expect("fallback request handler") = Some(Arc::new(handler));
    }

    /// Install the catch-all for notifications with no bound handler.
    pub fn set_fallback_notification_handler<F>(&self, handler: F)
    where
        F: Fn(JsonRpcNotification) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        *self
            .fallback_notification_handler
            .lock()
            .expect("fallback notification handler") = Some(Arc::new(handler));
    }

    /// Install a wrapper applied to request handlers registered after
    /// this call. Successive wrappers compose, first-installed innermost.
    pub fn add_request_wrapper(&self, wrapper: RequestHandlerWrapper) {
        self.wrappers.lock().expect("wrappers").push(wrapper);
    }

    // -- internals ---------------------------------------------------------

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .lock()
            .expect("transport slot")
            .clone()
            .ok_or_else(|| anyhow::Error::new(McpError::ConnectionClosed))
    }

    fn report_error(&self, error: &anyhow::Error) {
        let guard = self.callbacks.on_error.lock().expect("error slot");
        match guard.as_ref() {
            Some(callback) => callback(error),
            None => tracing::warn!("protocol error: {error:#}"),
        }
    }

    /// Remove all three table entries for `id`; `true` when the request
    /// was still in flight.
    fn remove_in_flight(&self, id: i64) -> bool {
        let mut tables = self.in_flight.lock().expect("in-flight tables");
        let present = tables.response_handlers.remove(&id).is_some();
        tables.progress_handlers.remove(&id);
        tables.timeouts.remove(&id);
        present
    }

    async fn send_cancelled(&self, transport: &Arc<dyn Transport>, id: i64, reason: &str) {
        let params = CancelledParams {
            request_id: RequestId::Number(id),
            reason: Some(reason.to_string()),
        };
        let params = match serde_json::to_value(&params) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("failed to encode cancellation for request {id}: {error}");
                return;
            }
        };
        let message =
            JsonRpcMessage::Notification(JsonRpcNotification::new(NOTIF_CANCELLED, Some(params)));
        if let Err(error) = transport
            .send(message, TransportSendOptions::default())
            .await
        {
            tracing::debug!("failed to send cancellation for request {id}: {error:#}");
        }
    }

    async fn send_notification_now(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        related_request_id: Option<RequestId>,
    ) -> Result<()> {
        let transport = self.transport()?;
        let message = JsonRpcMessage::Notification(JsonRpcNotification::new(method, params));
        transport
            .send(message, TransportSendOptions { related_request_id })
            .await
    }

    /// Tear down the session: drain waiters, cancel inbound work, fire
    /// `on_close` once. Idempotent.
    async fn handle_close(&self) {
        let _ = self.transport.lock().expect("transport slot").take();

        let slots = {
            let mut tables = self.in_flight.lock().expect("in-flight tables");
            tables.progress_handlers.clear();
            tables.timeouts.clear();
            std::mem::take(&mut tables.response_handlers)
        };
        for (_, slot) in slots {
            let _ = slot.send(Err(ErrorData::new(
                McpError::ConnectionClosed.code(),
                "Connection closed",
            )));
        }

        let tokens = std::mem::take(
            &mut *self
                .inbound_cancellations
                .lock()
                .expect("inbound cancellations"),
        );
        for (_, token) in tokens {
            token.cancel();
        }

        self.pending_debounced.lock().expect("debounce set").clear();

        if !self.close_fired.swap(true, Ordering::SeqCst) {
            if let Some(callback) = self.callbacks.on_close.lock().expect("close slot").as_ref() {
                callback();
            }
        }
    }

    /// Classify and dispatch one inbound message.
    async fn dispatch_message(&self, message: JsonRpcMessage, context: MessageContext) {
        match message {
            JsonRpcMessage::Response(JsonRpcResponse { id, result, .. }) => {
                self.handle_response(id, Ok(result));
            }
            JsonRpcMessage::Error(JsonRpcErrorResponse { id, error, .. }) => {
                self.handle_response(id, Err(error));
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
            }
            JsonRpcMessage::Request(request) => {
                self.handle_request(request, context).await;
            }
        }
    }

    /// Resolve the waiter for a response, removing all table entries.
    fn handle_response(
        &self,
        id: RequestId,
        outcome: std::result::Result<serde_json::Value, ErrorData>,
    ) {
        let Some(numeric) = id.as_number() else {
            tracing::warn!("response with non-numeric id {id}; ignoring");
            return;
        };
        let slot = {
            let mut tables = self.in_flight.lock().expect("in-flight tables");
            tables.progress_handlers.remove(&numeric);
            tables.timeouts.remove(&numeric);
            tables.response_handlers.remove(&numeric)
        };
        match slot {
            // The waiter may have timed out concurrently; that is fine.
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::debug!("response for unknown request id {id}; ignoring"),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            NOTIF_CANCELLED => {
                self.handle_cancelled_notification(notification);
                return;
            }
            NOTIF_PROGRESS => {
                self.handle_progress_notification(notification);
                return;
            }
            _ => {}
        }

        let handler = {
            let handlers = self
                .notification_handlers
                .lock()
                .expect("notification handlers");
            handlers.get(&notification.method).cloned()
        }
        .or_else(|| {
            self.fallback_notification_handler
                .lock()
                .expect("fallback notification handler")
                .clone()
        });

        match handler {
            Some(handler) => {
                if let Err(error) = handler(notification).await {
                    self.report_error(&error);
                }
            }
            None => {
                tracing::debug!("no handler for notification {}; ignoring", notification.method)
            }
        }
    }

    /// Trigger the cancellation token for an inbound request. Unknown IDs
    /// are a no-op by contract.
    fn handle_cancelled_notification(&self, notification: JsonRpcNotification) {
        let params: CancelledParams = match notification
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                tracing::debug!("malformed cancellation notification; ignoring");
                return;
            }
        };
        let token = self
            .inbound_cancellations
            .lock()
            .expect("inbound cancellations")
            .get(&params.request_id)
            .cloned();
        match token {
            Some(token) => {
                tracing::debug!(
                    "peer cancelled request {} ({})",
                    params.request_id,
                    params.reason.as_deref().unwrap_or("no reason")
                );
                token.cancel();
            }
            None => tracing::debug!(
                "cancellation for unknown request {}; ignoring",
                params.request_id
            ),
        }
    }

    /// Route a progress notification to its callback and reset the
    /// timeout timer when the request opted in.
    fn handle_progress_notification(&self, notification: JsonRpcNotification) {
        let params: ProgressParams = match notification
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                tracing::debug!("malformed progress notification; ignoring");
                return;
            }
        };
        let Some(id) = params.progress_token.as_number() else {
            tracing::debug!(
                "progress token {} is not numeric; ignoring",
                params.progress_token
            );
            return;
        };

        let callback = {
            let tables = self.in_flight.lock().expect("in-flight tables");
            if let Some(state) = tables.timeouts.get(&id) {
                if state.reset_on_progress {
                    let now = Instant::now();
                    let hard_cap = state.max_total_timeout.map(|max| state.started_at + max);
                    let _ = state
                        .deadline_tx
                        .send(cap_deadline(now + state.timeout, hard_cap));
                }
            }
            tables.progress_handlers.get(&id).cloned()
        };
        match callback {
            Some(callback) => callback(params),
            None => tracing::debug!("progress for request {id} with no callback; ignoring"),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, context: MessageContext) {
        let handler = {
            let handlers = self.request_handlers.lock().expect("request handlers");
            handlers.get(&request.method).cloned()
        }
        .or_else(|| {
            self.fallback_request_handler
                .lock()
                .expect("fallback request handler")
                .clone()
        });

        let Some(handler) = handler else {
            self.send_reply(
                request.id.clone(),
                Err(ErrorData::method_not_found(&request.method)),
            )
            .await;
            return;
        };

        let token = CancellationToken::new();
        self.inbound_cancellations
            .lock()
            .expect("inbound cancellations")
            .insert(request.id.clone(), token.clone());

        let extra = RequestHandlerExtra {
            cancellation: token.clone(),
            request_id: request.id.clone(),
            meta: request.meta().cloned(),
            auth_info: context.auth_info,
            session_id: context.session_id,
            request_info: context.request_info,
            peer: self.clone_shared(),
        };

        let id = request.id.clone();
        let result = handler(request, extra).await;

        self.inbound_cancellations
            .lock()
            .expect("inbound cancellations")
            .remove(&id);

        if token.is_cancelled() {
            // The peer abandoned this request; nothing to reply to.
            tracing::debug!("discarding result of cancelled request {id}");
            return;
        }

        let outcome = match result {
            Ok(value) => Ok(value),
            Err(error) => Err(match error.downcast::<McpError>() {
                Ok(mcp) => mcp.to_error_data(),
                Err(other) => ErrorData::internal_error(other.to_string()),
            }),
        };
        self.send_reply(id, outcome).await;
    }

    async fn send_reply(
        &self,
        id: RequestId,
        outcome: std::result::Result<serde_json::Value, ErrorData>,
    ) {
        let transport = match self.transport() {
            Ok(transport) => transport,
            Err(_) => {
                tracing::debug!("connection closed before replying to request {id}");
                return;
            }
        };
        let message = match outcome {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(id.clone(), result)),
            Err(error) => JsonRpcMessage::Error(JsonRpcErrorResponse::new(id.clone(), error)),
        };
        let options = TransportSendOptions {
            related_request_id: Some(id),
        };
        if let Err(error) = transport.send(message, options).await {
            self.report_error(&error);
        }
    }
}

/// Clamp a deadline to the absolute ceiling, when one exists.
fn cap_deadline(deadline: Instant, hard_cap: Option<Instant>) -> Instant {
    match hard_cap {
        Some(cap) if cap < deadline => cap,
        _ => deadline,
    }
}
