use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use devlink_channel::{ChannelError, EventChannel, EventPayload};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::control::{decode_chunk, send_control, stream_event, ChunkEncoding, StreamControl};
use crate::error::{MuxError, Result};
use crate::state::{MuxState, StreamState};
use crate::stream::MuxStream;

/// Multiplexes flow-controlled duplex streams over one event channel.
///
/// Binding registers a handler for the `stream` event; control messages are
/// applied on the connection's event task, so stream state transitions are
/// serialized with every other handler on that connection. When the channel
/// closes, every live stream is individually force-closed with
/// [`MuxError::StreamAborted`] delivered to its consumers.
pub struct StreamMux {
    inner: Arc<MuxInner>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MuxStream>>,
}

pub(crate) struct MuxInner {
    pub(crate) channel: EventChannel,
    state: Mutex<MuxState>,
}

impl MuxInner {
    pub(crate) fn state(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().expect("mux state lock poisoned")
    }
}

impl StreamMux {
    /// Bind a multiplexer to `channel`.
    pub fn bind(channel: &EventChannel) -> Result<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(MuxInner {
            channel: channel.clone(),
            state: Mutex::new(MuxState {
                streams: HashMap::new(),
                incoming: Some(incoming_tx),
                closed: false,
            }),
        });

        let handler_inner = Arc::clone(&inner);
        channel.on(stream_event(), move |_, payload| {
            apply_control(&handler_inner, payload);
        })?;

        // Transport loss tears every live stream down, with the abort error
        // delivered to each consumer, before multiplexer state is released.
        let close_inner = Arc::clone(&inner);
        let close_signal = channel.close_signal();
        tokio::spawn(async move {
            close_signal.cancelled().await;
            abort_all(&close_inner, "connection aborted");
        });

        Ok(Self {
            inner,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
        })
    }

    /// Open a new stream and announce it to the peer.
    pub fn create_stream(&self) -> Result<MuxStream> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = self.inner.state();
            if state.closed {
                return Err(MuxError::Channel(ChannelError::Closed));
            }
            state.streams.insert(id.clone(), StreamState::new());
        }
        send_control(&self.inner.channel, &StreamControl::Connect { id: id.clone() })?;
        debug!(stream = %id, "stream created");
        Ok(MuxStream::new(id, Arc::clone(&self.inner)))
    }

    /// Wait for the next stream announced by the peer.
    ///
    /// Returns `None` once the connection has closed and every queued
    /// announcement has been drained.
    pub async fn accept(&self) -> Option<MuxStream> {
        self.incoming_rx.lock().await.recv().await
    }
}

fn apply_control(inner: &Arc<MuxInner>, payload: &EventPayload) {
    let control = match StreamControl::from_payload(payload) {
        Ok(control) => control,
        Err(err) => {
            warn!(error = %err, "ignoring malformed stream control");
            return;
        }
    };

    match control {
        StreamControl::Connect { id } => on_connect(inner, id),
        StreamControl::Read { id, size } => on_read(inner, id, size),
        StreamControl::Write {
            id,
            chunk,
            encoding,
        } => on_write(inner, id, chunk, encoding),
        StreamControl::WriteAck { id, error } => on_write_ack(inner, id, error),
        StreamControl::End { id } => on_end(inner, id),
        StreamControl::Error { id, message } => on_error(inner, id, message),
    }
}

fn on_connect(inner: &Arc<MuxInner>, id: String) {
    let (incoming, stream) = {
        let mut state = inner.state();
        if state.closed {
            return;
        }
        if state.streams.contains_key(&id) {
            warn!(stream = %id, "peer announced an already-known stream id");
            return;
        }
        state.streams.insert(id.clone(), StreamState::new());
        let incoming = state.incoming.clone();
        (incoming, MuxStream::new(id, Arc::clone(inner)))
    };
    // Outside the lock: a failed send drops `stream`, whose Drop re-locks.
    if let Some(incoming) = incoming {
        let _ = incoming.send(stream);
    }
}

fn on_read(inner: &Arc<MuxInner>, id: String, _size: u64) {
    // Pacing is ack-clocked; a pull request only wakes an idle stream that
    // has queued writes. It never grants a second in-flight write.
    let mut state = inner.state();
    if let Some(stream) = state.streams.get_mut(&id) {
        stream.dispatch_next(&inner.channel, &id);
    }
}

fn on_write(inner: &Arc<MuxInner>, id: String, chunk: String, encoding: ChunkEncoding) {
    let ack_error = match decode_chunk(&chunk, encoding) {
        Err(err) => Some(err.to_string()),
        Ok(bytes) => {
            let mut state = inner.state();
            match state.streams.get_mut(&id) {
                None => Some("unknown stream".to_owned()),
                Some(stream) if stream.aborted.is_some() => Some("stream aborted".to_owned()),
                Some(stream) => {
                    match stream.pending_reads.pop_front() {
                        Some(waiter) => {
                            let _ = waiter.send(Ok(Some(bytes)));
                        }
                        None => stream.buffered.push_back(bytes),
                    }
                    None
                }
            }
        }
    };

    let _ = send_control(
        &inner.channel,
        &StreamControl::WriteAck {
            id,
            error: ack_error,
        },
    );
}

fn on_write_ack(inner: &Arc<MuxInner>, id: String, error: Option<String>) {
    let mut state = inner.state();
    let Some(stream) = state.streams.get_mut(&id) else {
        return;
    };
    let Some(head) = stream.pending_writes.pop_front() else {
        warn!(stream = %id, "acknowledgement with no write in flight");
        return;
    };
    stream.in_flight = false;
    let _ = head.done.send(match error {
        None => Ok(()),
        Some(message) => Err(MuxError::WriteFailed(message)),
    });
    stream.dispatch_next(&inner.channel, &id);
}

fn on_end(inner: &Arc<MuxInner>, id: String) {
    let mut state = inner.state();
    let Some(stream) = state.streams.get_mut(&id) else {
        return;
    };
    stream.readable_open = false;
    // Buffered chunks still drain through read(); only the waiters that can
    // never be satisfied observe end-of-stream now.
    for waiter in stream.pending_reads.drain(..) {
        let _ = waiter.send(Ok(None));
    }
}

fn on_error(inner: &Arc<MuxInner>, id: String, message: String) {
    let mut state = inner.state();
    if let Some(stream) = state.streams.get_mut(&id) {
        debug!(stream = %id, %message, "peer destroyed stream");
        stream.fail_all(&message);
    }
}

fn abort_all(inner: &Arc<MuxInner>, message: &str) {
    let mut state = inner.state();
    state.closed = true;
    state.incoming = None;
    for (id, stream) in state.streams.iter_mut() {
        debug!(stream = %id, "force-closing stream on transport loss");
        stream.fail_all(message);
    }
}
