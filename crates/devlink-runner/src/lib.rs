//! Serialized, cancellable command execution for a single-instance external
//! tool.
//!
//! The tool only processes one command at a time, so submissions go through
//! a strict FIFO [`CommandQueue`]: a unit is admitted only after the previous
//! one has fully settled. A unit typically spawns the tool as a child process
//! and watches a result file the tool writes, both under one cancellation
//! token — timing out or cancelling the unit takes the process and the watch
//! down together, and never touches sibling queue entries.

pub mod cancel;
pub mod error;
pub mod queue;
pub mod tool;
pub mod watcher;

pub use cancel::{CancelRegistry, CancelToken, UnitCtx};
pub use error::{Result, RunnerError};
pub use queue::{run_tool, CommandQueue, SubmittedCommand, UnitResult};
pub use tool::{ProcessRunner, ToolRunner};
pub use watcher::await_result_file;
