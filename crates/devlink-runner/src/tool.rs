use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

/// The external build tool, consumed only as "invoke and observe the exit".
///
/// The queue does not interpret tool semantics beyond success or failure;
/// results arrive separately through the watched result file. Implementors
/// must stop the work promptly when `cancel` fires and return
/// [`RunnerError::Cancelled`].
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn invoke(&self, args: &[String], cancel: &CancellationToken) -> Result<()>;
}

/// Runs the tool as a child process.
///
/// A non-zero exit surfaces as [`RunnerError::ProcessExitNonZero`];
/// cancellation kills the child and waits for it to be reaped.
pub struct ProcessRunner {
    program: PathBuf,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn invoke(&self, args: &[String], cancel: &CancellationToken) -> Result<()> {
        debug!(program = %self.program.display(), ?args, "spawning tool");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    let code = status.code().unwrap_or(-1);
                    warn!(program = %self.program.display(), code, "tool exited non-zero");
                    Err(RunnerError::ProcessExitNonZero { code })
                }
            }
            _ = cancel.cancelled() => {
                debug!(program = %self.program.display(), "killing tool on cancellation");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(RunnerError::Cancelled)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_owned(), script.to_owned()]
    }

    #[tokio::test]
    async fn successful_exit() {
        let runner = ProcessRunner::new("sh");
        let cancel = CancellationToken::new();
        runner.invoke(&sh("exit 0"), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_is_surfaced() {
        let runner = ProcessRunner::new("sh");
        let cancel = CancellationToken::new();
        let err = runner.invoke(&sh("exit 3"), &cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::ProcessExitNonZero { code: 3 }));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let runner = ProcessRunner::new("sleep");
        let cancel = CancellationToken::new();

        let killer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let err = runner
            .invoke(&["30".to_owned()], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        killer.await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let runner = ProcessRunner::new("/definitely/not/a/tool");
        let cancel = CancellationToken::new();
        let err = runner.invoke(&[], &cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Io(_)));
    }
}
