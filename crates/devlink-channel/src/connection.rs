use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use devlink_frame::{EventName, Frame, FrameConfig, WireCodec};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ChannelError, Result};
use crate::payload::EventPayload;

/// JSON object member used for request/response correlation.
///
/// A caller embeds a fresh token under this key; the responder echoes it in
/// the reply event. This is the sole correlation mechanism — there is no
/// framing-level request id.
pub const CORRELATION_FIELD: &str = "token";

/// Identifies one registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handler invoked for every frame of a registered event.
///
/// Handlers run synchronously on the connection's event task and must not
/// block; offload slow work to another task.
pub type EventHandler = Box<dyn FnMut(&mut HandlerCtx<'_>, &EventPayload) + Send + 'static>;

/// Context passed to handlers: the connection's belongings map and a handle
/// for sending replies.
pub struct HandlerCtx<'a> {
    channel: &'a EventChannel,
    belongings: &'a mut HashMap<String, Value>,
}

impl HandlerCtx<'_> {
    /// Handle to the channel this event arrived on.
    pub fn channel(&self) -> &EventChannel {
        self.channel
    }

    /// Read a connection-scoped belonging.
    pub fn belonging(&self, key: &str) -> Option<&Value> {
        self.belongings.get(key)
    }

    /// Attach a connection-scoped belonging (e.g. client identity after
    /// authentication). Visible to every later handler invocation.
    pub fn set_belonging(&mut self, key: impl Into<String>, value: Value) {
        self.belongings.insert(key.into(), value);
    }
}

/// Configuration for a spawned connection.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Frame codec limits.
    pub frame: FrameConfig,
}

/// A pending one-shot wait registered via [`EventChannel::once`].
#[derive(Debug)]
pub struct OnceListener {
    rx: oneshot::Receiver<EventPayload>,
}

impl OnceListener {
    /// Wait for the correlated reply.
    ///
    /// Fails with [`ChannelError::Closed`] if the connection is destroyed
    /// before the reply arrives.
    pub async fn recv(self) -> Result<EventPayload> {
        self.rx.await.map_err(|_| ChannelError::Closed)
    }
}

enum Op {
    On {
        event: EventName,
        id: HandlerId,
        handler: EventHandler,
    },
    Off {
        event: EventName,
        id: Option<HandlerId>,
    },
    Once {
        event: EventName,
        token: String,
        reply: oneshot::Sender<EventPayload>,
    },
    DropOnce {
        event: EventName,
        token: String,
    },
    Send {
        frame: Frame,
    },
    BelongingSet {
        key: String,
        value: Value,
    },
    BelongingGet {
        key: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    Close,
}

/// Cloneable handle to one connection's event task.
///
/// All operations are serviced by that task in submission order. Once the
/// connection is destroyed (peer close, I/O error, or explicit
/// [`close`](Self::close)), every operation fails with
/// [`ChannelError::Closed`].
#[derive(Clone)]
pub struct EventChannel {
    ops: mpsc::UnboundedSender<Op>,
    next_handler_id: Arc<AtomicU64>,
    closed: CancellationToken,
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl EventChannel {
    fn submit(&self, op: Op) -> Result<()> {
        self.ops.send(op).map_err(|_| ChannelError::Closed)
    }

    /// Register a handler for `event`. Handlers for one event run in
    /// registration order.
    pub fn on<F>(&self, event: EventName, handler: F) -> Result<HandlerId>
    where
        F: FnMut(&mut HandlerCtx<'_>, &EventPayload) + Send + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.submit(Op::On {
            event,
            id,
            handler: Box::new(handler),
        })?;
        Ok(id)
    }

    /// Remove one handler by id, or every handler for the event when `id` is
    /// `None`.
    pub fn off(&self, event: EventName, id: Option<HandlerId>) -> Result<()> {
        self.submit(Op::Off { event, id })
    }

    /// Register a one-shot wait keyed by `(event, token)`.
    ///
    /// The next JSON payload on `event` whose [`CORRELATION_FIELD`] equals
    /// `token` resolves the listener and deregisters it; no other handler
    /// sees that frame.
    pub fn once(&self, event: EventName, token: impl Into<String>) -> Result<OnceListener> {
        let (tx, rx) = oneshot::channel();
        self.submit(Op::Once {
            event,
            token: token.into(),
            reply: tx,
        })?;
        Ok(OnceListener { rx })
    }

    /// Send one frame.
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.submit(Op::Send { frame })
    }

    /// Send a JSON value as an encoded frame on `event`.
    pub fn send_json(&self, event: EventName, value: &Value) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(Frame::encoded(event, payload))
    }

    /// Send raw bytes as a binary frame on `event`.
    pub fn send_binary(&self, event: EventName, payload: impl Into<Bytes>) -> Result<()> {
        self.send(Frame::binary(event, payload))
    }

    /// Send a correlated request and wait for the reply.
    ///
    /// A fresh token is embedded in `body` under [`CORRELATION_FIELD`]; the
    /// responder must echo it. With a timeout, expiry deregisters the wait
    /// and fails with [`ChannelError::Timeout`].
    pub async fn request(
        &self,
        event: EventName,
        mut body: serde_json::Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<EventPayload> {
        let token = uuid::Uuid::new_v4().to_string();
        body.insert(CORRELATION_FIELD.to_owned(), Value::String(token.clone()));

        let listener = self.once(event.clone(), token.clone())?;
        self.send_json(event.clone(), &Value::Object(body))?;

        match timeout {
            None => listener.recv().await,
            Some(limit) => match tokio::time::timeout(limit, listener.recv()).await {
                Ok(reply) => reply,
                Err(_) => {
                    let _ = self.submit(Op::DropOnce { event, token });
                    Err(ChannelError::Timeout(limit))
                }
            },
        }
    }

    /// Reply to a correlated request, echoing its token.
    pub fn respond(
        &self,
        event: EventName,
        token: &str,
        mut body: serde_json::Map<String, Value>,
    ) -> Result<()> {
        body.insert(
            CORRELATION_FIELD.to_owned(),
            Value::String(token.to_owned()),
        );
        self.send_json(event, &Value::Object(body))
    }

    /// Attach a connection-scoped belonging.
    pub fn set_belonging(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.submit(Op::BelongingSet {
            key: key.into(),
            value,
        })
    }

    /// Read a connection-scoped belonging.
    pub async fn belonging(&self, key: &str) -> Result<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Op::BelongingGet {
            key: key.to_owned(),
            reply: tx,
        })?;
        rx.await.map_err(|_| ChannelError::Closed)
    }

    /// Destroy the connection. Listeners are removed, belongings cleared and
    /// pending correlated waits failed with [`ChannelError::Closed`].
    /// Closing an already-destroyed connection is a no-op.
    pub fn close(&self) {
        let _ = self.submit(Op::Close);
    }

    /// Token cancelled when the connection is destroyed, whatever the cause.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether the connection has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// One accepted or established connection.
pub struct Connection;

impl Connection {
    /// Spawn the event task for `io` and return its handle.
    pub fn spawn<T>(io: T) -> EventChannel
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn_with_config(io, ChannelConfig::default())
    }

    /// Spawn with explicit configuration.
    pub fn spawn_with_config<T>(io: T, config: ChannelConfig) -> EventChannel
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let handle = EventChannel {
            ops: ops_tx,
            next_handler_id: Arc::new(AtomicU64::new(1)),
            closed: CancellationToken::new(),
        };

        let task = ConnectionTask {
            framed: Framed::new(io, WireCodec::with_config(config.frame)),
            ops_rx,
            handle: handle.clone(),
            handlers: HashMap::new(),
            once: HashMap::new(),
            belongings: HashMap::new(),
        };
        tokio::spawn(task.run());

        handle
    }
}

struct ConnectionTask<T> {
    framed: Framed<T, WireCodec>,
    ops_rx: mpsc::UnboundedReceiver<Op>,
    handle: EventChannel,
    handlers: HashMap<EventName, Vec<(HandlerId, EventHandler)>>,
    once: HashMap<(EventName, String), oneshot::Sender<EventPayload>>,
    belongings: HashMap<String, Value>,
}

impl<T> ConnectionTask<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                inbound = self.framed.next() => match inbound {
                    Some(Ok(frame)) => self.dispatch(frame),
                    Some(Err(err)) => {
                        warn!(error = %err, "connection failed");
                        break;
                    }
                    None => {
                        debug!("connection closed by peer");
                        break;
                    }
                },
                op = self.ops_rx.recv() => {
                    // `None` cannot happen while the task holds its own
                    // handle; treat it as shutdown all the same.
                    let Some(op) = op else { break };
                    if !self.handle_op(op).await {
                        break;
                    }
                }
            }
        }
        self.destroy();
    }

    /// Apply one operation. Returns `false` when the connection must shut
    /// down.
    async fn handle_op(&mut self, op: Op) -> bool {
        match op {
            Op::Send { frame } => {
                trace!(event = %frame.event, len = frame.payload.len(), "send frame");
                if let Err(err) = self.framed.send(frame).await {
                    warn!(error = %err, "frame write failed");
                    return false;
                }
            }
            Op::Close => return false,
            Op::On { event, id, handler } => {
                self.handlers.entry(event).or_default().push((id, handler));
            }
            Op::Off { event, id } => match id {
                Some(id) => {
                    if let Some(list) = self.handlers.get_mut(&event) {
                        list.retain(|(registered, _)| *registered != id);
                        if list.is_empty() {
                            self.handlers.remove(&event);
                        }
                    }
                }
                None => {
                    self.handlers.remove(&event);
                }
            },
            Op::Once {
                event,
                token,
                reply,
            } => {
                self.once.insert((event, token), reply);
            }
            Op::DropOnce { event, token } => {
                self.once.remove(&(event, token));
            }
            Op::BelongingSet { key, value } => {
                self.belongings.insert(key, value);
            }
            Op::BelongingGet { key, reply } => {
                let _ = reply.send(self.belongings.get(&key).cloned());
            }
        }
        true
    }

    fn dispatch(&mut self, frame: Frame) {
        let Self {
            handlers,
            once,
            belongings,
            handle,
            ..
        } = self;

        let payload = EventPayload::decode(frame.kind, frame.payload);

        if let Some(token) = payload.correlation_token() {
            let key = (frame.event.clone(), token.to_owned());
            if let Some(reply) = once.remove(&key) {
                let _ = reply.send(payload);
                return;
            }
        }

        let Some(list) = handlers.get_mut(&frame.event) else {
            trace!(event = %frame.event, "no listeners for event");
            return;
        };

        let mut ctx = HandlerCtx {
            channel: handle,
            belongings,
        };
        for (_, handler) in list.iter_mut() {
            handler(&mut ctx, &payload);
        }
    }

    /// Runs exactly once, at the end of the task. Dropping the pending
    /// one-shots fails their listeners with `Closed`.
    fn destroy(&mut self) {
        self.handlers.clear();
        self.once.clear();
        self.belongings.clear();
        self.handle.closed.cancel();
        debug!("connection destroyed");
    }
}
