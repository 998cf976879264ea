//! Cross-context call transport.
//!
//! Execution contexts (tokio tasks here; workers or processes elsewhere)
//! are connected pairwise by a symmetric message channel. Either side can
//! invoke named methods on the other side's singleton and await the result;
//! replies are matched to calls through a correlation table keyed by call
//! id, so any number of calls may be in flight and replies may arrive in
//! any order. From the caller's point of view a remote invocation is an
//! ordinary suspending call.
//!
//! There is no built-in timeout: a call whose reply never arrives suspends
//! forever and its table entry leaks harmlessly. Callers that need a bound
//! race the call against their own timer and discard the late reply.

use {
    parking_lot::Mutex,
    serde_json::Value,
    std::{
        collections::HashMap,
        future::Future,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    },
    tokio::sync::{mpsc, oneshot},
    tracing::trace,
    veiled_protocol::rpc::{CallId, Message, RpcError},
};

/// One side of a bidirectional message channel between two contexts.
pub struct Endpoint {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

/// A connected pair of endpoints, one per context.
#[must_use]
pub fn pair() -> (Endpoint, Endpoint) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    (
        Endpoint { tx: tx_a, rx: rx_b },
        Endpoint { tx: tx_b, rx: rx_a },
    )
}

/// Incoming invocation, as dispatched to a context's [`Handler`].
#[derive(Debug)]
pub struct IncomingCall {
    pub method: String,
    pub args: Vec<Value>,
    pub is_static: bool,
}

/// The callable surface a context exposes to its peer.
///
/// Each role declares a closed method set and resolves calls against it;
/// anything else is [`RpcError::NoSuchMethod`]. All failures travel back as
/// error replies, never as a broken channel.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, call: IncomingCall) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

impl<H: Handler> Handler for Arc<H> {
    fn handle(&self, call: IncomingCall) -> impl Future<Output = Result<Value, RpcError>> + Send {
        (**self).handle(call)
    }
}

type Pending = Arc<Mutex<HashMap<CallId, oneshot::Sender<Result<Value, RpcError>>>>>;

/// Caller handle onto the peer context. Cheap to clone; all clones share
/// one correlation table and id counter.
#[derive(Clone)]
pub struct Peer {
    tx: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
}

impl Peer {
    /// Invokes an instance method on the peer's singleton.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_inner(method, args, false).await
    }

    /// Invokes a static (class-level) method on the peer's singleton type.
    pub async fn call_static(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_inner(method, args, true).await
    }

    async fn call_inner(
        &self,
        method: &str,
        args: Vec<Value>,
        is_static: bool,
    ) -> Result<Value, RpcError> {
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);
        let sent = self.tx.send(Message::Call {
            id,
            method_name: method.into(),
            args,
            is_static,
        });
        if sent.is_err() {
            self.pending.lock().remove(&id);
            return Err(RpcError::ChannelClosed);
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ChannelClosed),
        }
    }

    /// Number of calls still waiting for a reply. Diagnostic only.
    #[must_use]
    pub fn outstanding_calls(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Connects a context to its endpoint: spawns the message loop that serves
/// incoming calls through `handler` and routes replies back to this
/// context's own pending calls. Returns the caller handle for the opposite
/// direction.
pub fn spawn<H: Handler>(endpoint: Endpoint, handler: H) -> Peer {
    let Endpoint { tx, mut rx } = endpoint;
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let peer = Peer {
        tx: tx.clone(),
        pending: pending.clone(),
        next_id: Arc::new(AtomicU64::new(0)),
    };
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Call {
                    id,
                    method_name,
                    args,
                    is_static,
                } => {
                    // Each invocation runs as its own task so a slow call
                    // never blocks reply routing for this context.
                    let handler = handler.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let result = handler
                            .handle(IncomingCall {
                                method: method_name,
                                args,
                                is_static,
                            })
                            .await;
                        // Send failure means the peer context is gone;
                        // nobody is left to care about this reply.
                        let _ = tx.send(Message::reply(id, result));
                    });
                }
                Message::Reply {
                    id,
                    ok,
                    value,
                    error_message,
                } => {
                    let Some(reply_tx) = pending.lock().remove(&id) else {
                        trace!(%id, "dropping reply with no pending call");
                        continue;
                    };
                    let result = if ok {
                        Ok(value.unwrap_or(Value::Null))
                    } else {
                        Err(RpcError::Remote(error_message.unwrap_or_default()))
                    };
                    // The caller may have stopped waiting; resolving a call
                    // nobody awaits is a no-op.
                    let _ = reply_tx.send(result);
                }
            }
        }
        // Peer endpoint dropped: fail everything still outstanding.
        let mut pending = pending.lock();
        for (_, reply_tx) in pending.drain() {
            let _ = reply_tx.send(Err(RpcError::ChannelClosed));
        }
    });
    peer
}
