use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::trace;

use crate::control::{send_control, StreamControl};
use crate::error::{MuxError, Result};
use crate::mux::MuxInner;
use crate::state::PendingWrite;

/// One flow-controlled duplex byte stream.
///
/// Created locally via [`crate::StreamMux::create_stream`] or mirrored from a
/// peer announcement via [`crate::StreamMux::accept`]. The stream stays owned
/// by its multiplexer; this handle is the consumer view. Dropping the handle
/// releases the stream's state — its id is never reused.
pub struct MuxStream {
    id: String,
    inner: Arc<MuxInner>,
}

impl std::fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxStream").field("id", &self.id).finish()
    }
}

impl MuxStream {
    pub(crate) fn new(id: String, inner: Arc<MuxInner>) -> Self {
        Self { id, inner }
    }

    /// The stream id, unique within this multiplexer for its lifetime.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one chunk, resolving when the peer acknowledges it.
    ///
    /// Writes queue in FIFO order and at most one is in flight at a time:
    /// the next queued chunk is dispatched only by the acknowledgement of the
    /// previous one.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        let rx = {
            let mut state = self.inner.state();
            let stream = state
                .streams
                .get_mut(&self.id)
                .ok_or(MuxError::StreamClosed)?;
            if let Some(message) = &stream.aborted {
                return Err(MuxError::StreamAborted(message.clone()));
            }
            if stream.finish_requested || !stream.writable_open {
                return Err(MuxError::StreamClosed);
            }

            let (tx, rx) = oneshot::channel();
            stream.pending_writes.push_back(PendingWrite {
                chunk: chunk.into(),
                done: tx,
            });
            stream.dispatch_next(&self.inner.channel, &self.id);
            rx
        };

        rx.await
            .map_err(|_| MuxError::StreamAborted("connection aborted".to_owned()))?
    }

    /// Read the next chunk.
    ///
    /// Returns buffered data immediately when available; otherwise registers
    /// a pull request, asks the peer for up to `size` more bytes, and waits.
    /// `Ok(None)` is end-of-stream.
    pub async fn read(&self, size: usize) -> Result<Option<Bytes>> {
        let rx = {
            let mut state = self.inner.state();
            let Some(stream) = state.streams.get_mut(&self.id) else {
                return Ok(None);
            };
            if let Some(chunk) = stream.buffered.pop_front() {
                return Ok(Some(chunk));
            }
            if let Some(message) = &stream.aborted {
                return Err(MuxError::StreamAborted(message.clone()));
            }
            if !stream.readable_open {
                return Ok(None);
            }

            let (tx, rx) = oneshot::channel();
            stream.pending_reads.push_back(tx);
            rx
        };

        // Pull request goes out after the waiter is registered so the
        // answering chunk always finds it.
        let _ = send_control(
            &self.inner.channel,
            &StreamControl::Read {
                id: self.id.clone(),
                size: size as u64,
            },
        );

        rx.await
            .map_err(|_| MuxError::StreamAborted("connection aborted".to_owned()))?
    }

    /// Finish the writable half: no further writes are accepted, and the
    /// end-of-stream control is sent once every queued write has been
    /// acknowledged. Idempotent.
    pub fn finish(&self) -> Result<()> {
        let mut state = self.inner.state();
        let Some(stream) = state.streams.get_mut(&self.id) else {
            return Ok(());
        };
        if stream.aborted.is_some() || !stream.writable_open {
            return Ok(());
        }
        stream.finish_requested = true;
        stream.dispatch_next(&self.inner.channel, &self.id);
        trace!(stream = %self.id, "stream finish requested");
        Ok(())
    }

    /// Destroy the stream with an error: the peer is told, and every local
    /// consumer currently reading or writing observes `StreamAborted`.
    pub fn abort(&self, message: &str) {
        let _ = send_control(
            &self.inner.channel,
            &StreamControl::Error {
                id: self.id.clone(),
                message: message.to_owned(),
            },
        );
        let mut state = self.inner.state();
        if let Some(stream) = state.streams.get_mut(&self.id) {
            stream.fail_all(message);
        }
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        state.streams.remove(&self.id);
    }
}
