//! Transport and command-serialization engine for driving a single-instance
//! desktop build tool.
//!
//! devlink multiplexes named events over one byte-stream connection, layers
//! flow-controlled duplex streams on top for large payloads, and serializes
//! cancellable command execution against the external tool — including the
//! file-watch completion signal for results that arrive on disk.
//!
//! # Crate Structure
//!
//! - [`frame`] — Fixed-width event-name message framing
//! - [`channel`] — Named-event dispatch and request/response correlation
//! - [`mux`] — Flow-controlled duplex streams over one channel
//! - [`runner`] — Cancellation registry, completion watcher, command queue

pub mod logging;

/// Re-export frame types.
pub mod frame {
    pub use devlink_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use devlink_channel::*;
}

/// Re-export stream multiplexer types.
pub mod mux {
    pub use devlink_mux::*;
}

/// Re-export command runner types.
pub mod runner {
    pub use devlink_runner::*;
}
