//! In-process transport pair
//!
//! [`InMemoryTransport::create_linked_pair`] returns two transports wired
//! back-to-back over unbounded channels: whatever one side sends, the
//! other side's message callback receives, in FIFO order. Closing either
//! side fires both close callbacks exactly once.
//!
//! This is the transport used by the test suite and by in-process
//! embeddings that run a client and a server inside one executable. It is
//! not a network transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{McpError, Result};
use crate::transport::{
    CloseCallback, ErrorCallback, MessageCallback, MessageContext, Transport, TransportSendOptions,
};
use crate::types::JsonRpcMessage;

/// One event on the inter-transport channel.
#[derive(Debug)]
enum PeerEvent {
    /// A message from the peer.
    Message(JsonRpcMessage),
    /// The peer closed its side.
    Closed,
}

/// Callback slots shared with the pump task.
#[derive(Default)]
struct Callbacks {
    message: Mutex<Option<MessageCallback>>,
    error: Mutex<Option<ErrorCallback>>,
    close: Mutex<Option<CloseCallback>>,
}

/// One half of an in-process transport pair.
///
/// # Examples
///
/// ```
/// use mcp_runtime::transport::inmemory::InMemoryTransport;
/// use mcp_runtime::transport::{Transport, TransportSendOptions};
/// use mcp_runtime::types::{JsonRpcMessage, JsonRpcNotification};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (left, right) = InMemoryTransport::create_linked_pair();
/// right.on_message(Box::new(|message, _ctx| {
///     assert_eq!(message.method(), Some("ping"));
/// }));
/// left.start().await?;
/// right.start().await?;
///
/// let ping = JsonRpcMessage::Notification(JsonRpcNotification::new("ping", None));
/// left.send(ping, TransportSendOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct InMemoryTransport {
    /// Sender toward the peer transport.
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    /// Receiver from the peer; taken by the pump task at `start`.
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    /// Callback slots, shared with the pump task.
    callbacks: Arc<Callbacks>,
    /// Whether `start` has run.
    started: AtomicBool,
    /// Whether this side has closed (locally or via the peer).
    closed: Arc<AtomicBool>,
    /// Guard ensuring the close callback fires exactly once.
    close_fired: Arc<AtomicBool>,
    /// Optional session identifier surfaced through the trait.
    session_id: Option<String>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl InMemoryTransport {
    /// Create two transports wired back-to-back.
    ///
    /// Messages sent before the receiving side has started are buffered
    /// and delivered once it starts.
    pub fn create_linked_pair() -> (InMemoryTransport, InMemoryTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::from_channels(a_tx, b_rx), Self::from_channels(b_tx, a_rx))
    }

    /// As [`create_linked_pair`](Self::create_linked_pair), tagging both
    /// sides with a shared session identifier.
    pub fn create_linked_pair_with_session(
        session_id: impl Into<String>,
    ) -> (InMemoryTransport, InMemoryTransport) {
        let session_id = session_id.into();
        let (mut left, mut right) = Self::create_linked_pair();
        left.session_id = Some(session_id.clone());
        right.session_id = Some(session_id);
        (left, right)
    }

    fn from_channels(
        peer_tx: mpsc::UnboundedSender<PeerEvent>,
        inbound_rx: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Self {
        Self {
            peer_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            callbacks: Arc::new(Callbacks::default()),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            close_fired: Arc::new(AtomicBool::new(false)),
            session_id: None,
        }
    }

    /// Fire the close callback if it has not fired yet.
    fn fire_close(callbacks: &Callbacks, close_fired: &AtomicBool) {
        if close_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = callbacks.close.lock().expect("close slot poisoned").as_ref() {
            cb();
        }
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::AlreadyStarted.into());
        }
        let mut rx = self
            .inbound_rx
            .lock()
            .expect("inbound slot poisoned")
            .take()
            .ok_or_else(|| McpError::Transport("inbound channel already taken".to_string()))?;

        let callbacks = Arc::clone(&self.callbacks);
        let closed = Arc::clone(&self.closed);
        let close_fired = Arc::clone(&self.close_fired);
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            loop {
                let event = rx.recv().await;
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Some(PeerEvent::Message(message)) => {
                        let guard = callbacks.message.lock().expect("message slot poisoned");
                        if let Some(cb) = guard.as_ref() {
                            let context = MessageContext {
                                session_id: session_id.clone(),
                                ..Default::default()
                            };
                            cb(message, context);
                        } else {
                            tracing::debug!("in-memory transport: dropping message with no dispatcher");
                        }
                    }
                    // Peer closed explicitly, or dropped its sender.
                    Some(PeerEvent::Closed) | None => {
                        closed.store(true, Ordering::SeqCst);
                        Self::fire_close(&callbacks, &close_fired);
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage, _options: TransportSendOptions) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Transport("transport is closed".to_string()).into());
        }
        self.peer_tx
            .send(PeerEvent::Message(message))
            .map_err(|_| McpError::Transport("peer transport dropped".to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Best effort: the peer may already be gone.
        let _ = self.peer_tx.send(PeerEvent::Closed);
        Self::fire_close(&self.callbacks, &self.close_fired);
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) {
        *self.callbacks.message.lock().expect("message slot poisoned") = Some(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        *self.callbacks.error.lock().expect("error slot poisoned") = Some(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        *self.callbacks.close.lock().expect("close slot poisoned") = Some(callback);
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }
}
