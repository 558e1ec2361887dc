use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use devlink_channel::EventChannel;
use tokio::sync::{mpsc, oneshot};

use crate::control::{encode_chunk, send_control, StreamControl};
use crate::error::MuxError;
use crate::stream::MuxStream;

pub(crate) type ReadWaiter = oneshot::Sender<Result<Option<Bytes>, MuxError>>;

pub(crate) struct PendingWrite {
    pub chunk: Bytes,
    pub done: oneshot::Sender<Result<(), MuxError>>,
}

/// Per-stream bookkeeping, mirrored independently on each side.
///
/// Directions close independently: `writable_open` tracks the local half
/// (`Open → HalfClosedLocal` once the end-of-stream control is sent),
/// `readable_open` the remote half. A stream with both directions closed, or
/// with `aborted` set, is terminal.
pub(crate) struct StreamState {
    pub readable_open: bool,
    pub writable_open: bool,
    /// Local finish requested; the end-of-stream control is deferred behind
    /// queued writes.
    pub finish_requested: bool,
    /// A write has been dispatched and its acknowledgement is outstanding.
    /// Never more than one per stream.
    pub in_flight: bool,
    /// Terminal error, set by a peer error control or transport loss.
    pub aborted: Option<String>,
    /// Chunks that arrived with no read pending.
    pub buffered: VecDeque<Bytes>,
    /// Local pull requests waiting for data.
    pub pending_reads: VecDeque<ReadWaiter>,
    /// Local writes not yet acknowledged; the head is the in-flight one.
    pub pending_writes: VecDeque<PendingWrite>,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            readable_open: true,
            writable_open: true,
            finish_requested: false,
            in_flight: false,
            aborted: None,
            buffered: VecDeque::new(),
            pending_reads: VecDeque::new(),
            pending_writes: VecDeque::new(),
        }
    }

    /// Dispatch the next queued write — or the deferred end-of-stream — if
    /// the ack clock allows it. At most one write leaves unacknowledged.
    pub fn dispatch_next(&mut self, channel: &EventChannel, id: &str) {
        if self.in_flight || !self.writable_open {
            return;
        }
        if let Some(head) = self.pending_writes.front() {
            self.in_flight = true;
            let (chunk, encoding) = encode_chunk(&head.chunk);
            let _ = send_control(
                channel,
                &StreamControl::Write {
                    id: id.to_owned(),
                    chunk,
                    encoding,
                },
            );
        } else if self.finish_requested {
            self.writable_open = false;
            let _ = send_control(channel, &StreamControl::End { id: id.to_owned() });
        }
    }

    /// Destroy this half: fail every pending consumer with `StreamAborted`
    /// and mark the state terminal. Idempotent.
    pub fn fail_all(&mut self, message: &str) {
        for waiter in self.pending_reads.drain(..) {
            let _ = waiter.send(Err(MuxError::StreamAborted(message.to_owned())));
        }
        for write in self.pending_writes.drain(..) {
            let _ = write.done.send(Err(MuxError::StreamAborted(message.to_owned())));
        }
        self.buffered.clear();
        self.readable_open = false;
        self.writable_open = false;
        self.in_flight = false;
        if self.aborted.is_none() {
            self.aborted = Some(message.to_owned());
        }
    }
}

pub(crate) struct MuxState {
    pub streams: HashMap<String, StreamState>,
    /// Queue of peer-announced streams; `None` once the mux is closed.
    pub incoming: Option<mpsc::UnboundedSender<MuxStream>>,
    pub closed: bool,
}
