use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cancel::{CancelRegistry, CancelToken, UnitCtx};
use crate::error::{Result, RunnerError};
use crate::tool::ToolRunner;
use crate::watcher::await_result_file;

/// What one queue unit produces: the tool's JSON result, or a typed failure.
pub type UnitResult = Result<serde_json::Value>;

type UnitFuture = Pin<Box<dyn Future<Output = UnitResult> + Send>>;
type UnitFn = Box<dyn FnOnce(UnitCtx) -> UnitFuture + Send>;

struct QueueEntry {
    ctx: UnitCtx,
    unit: UnitFn,
    done: oneshot::Sender<UnitResult>,
}

/// Handle to a submitted unit: its cancellation token and its settlement.
#[derive(Debug)]
pub struct SubmittedCommand {
    token: CancelToken,
    rx: oneshot::Receiver<UnitResult>,
}

impl SubmittedCommand {
    /// Token under which this unit can be cancelled while in flight.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Wait for the unit to settle.
    pub async fn wait(self) -> UnitResult {
        self.rx.await.map_err(|_| RunnerError::Cancelled)?
    }
}

/// Serializes units of work against the single-instance external tool.
///
/// One worker loop owns admission: the next entry starts only as the
/// continuation of the previous entry's settlement, so units run strictly
/// one-at-a-time in FIFO submission order. A unit's failure settles that
/// unit alone — the queue keeps draining.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
    registry: CancelRegistry,
}

impl CommandQueue {
    /// Create the queue and its worker, owning `registry` for the lifetime
    /// of the queue.
    pub fn new(registry: CancelRegistry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx));
        Self { tx, registry }
    }

    /// The registry this queue registers its units in; cancel a unit by
    /// token through it.
    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Submit a unit of work.
    ///
    /// The unit is admitted once every earlier submission has settled. Its
    /// [`UnitCtx`] is already registered: cancelling the returned token
    /// before admission settles the unit with [`RunnerError::Cancelled`]
    /// without running it, and cancelling mid-run fires the shared signal
    /// the unit's process and watcher listen on.
    pub fn submit<F, Fut>(&self, unit: F) -> SubmittedCommand
    where
        F: FnOnce(UnitCtx) -> Fut + Send + 'static,
        Fut: Future<Output = UnitResult> + Send + 'static,
    {
        let ctx = UnitCtx::register(&self.registry);
        let token = ctx.token().clone();
        let (done_tx, done_rx) = oneshot::channel();

        let entry = QueueEntry {
            ctx,
            unit: Box::new(move |ctx| Box::pin(unit(ctx))),
            done: done_tx,
        };
        if let Err(mpsc::error::SendError(entry)) = self.tx.send(entry) {
            // Worker gone (queue dropped mid-submit); settle immediately.
            entry.ctx.release();
            let _ = entry.done.send(Err(RunnerError::Cancelled));
        }

        SubmittedCommand { token, rx: done_rx }
    }
}

async fn worker(mut rx: mpsc::UnboundedReceiver<QueueEntry>) {
    while let Some(QueueEntry { ctx, unit, done }) = rx.recv().await {
        let result = if ctx.cancel_signal().is_cancelled() {
            debug!(token = %ctx.token(), "unit cancelled while queued");
            Err(RunnerError::Cancelled)
        } else {
            debug!(token = %ctx.token(), "unit admitted");
            unit(ctx.clone()).await
        };
        // Natural settlement releases the token before the caller observes
        // the result, so a stale timer cannot cancel a finished unit.
        ctx.release();
        if let Err(ref err) = result {
            warn!(token = %ctx.token(), error = %err, "unit failed");
        }
        let _ = done.send(result);
    }
}

/// The composed tool unit: spawn the tool and watch its result file, both
/// under the unit's one cancellation token.
///
/// The unit succeeds only when **both** the process exit and the watched
/// payload arrive. If either side fails, the other is cancelled through the
/// shared token and the first real failure is what propagates. The watched
/// contents must parse as JSON; anything else is
/// [`RunnerError::MalformedResult`].
pub async fn run_tool(
    ctx: &UnitCtx,
    runner: &dyn ToolRunner,
    args: &[String],
    result_path: &Path,
    timeout: Duration,
) -> UnitResult {
    // The watch precondition: the result file exists, empty, before the tool
    // is asked to write it.
    tokio::fs::write(result_path, b"").await?;

    let cancel = ctx.cancel_signal();
    let invoke = async {
        let outcome = runner.invoke(args, cancel).await;
        if outcome.is_err() {
            cancel.cancel();
        }
        outcome
    };
    let watch = async {
        let outcome = await_result_file(result_path, ctx, timeout).await;
        if outcome.is_err() {
            cancel.cancel();
        }
        outcome
    };

    let (invoked, watched) = tokio::join!(invoke, watch);
    let payload = match (invoked, watched) {
        (Ok(()), Ok(payload)) => payload,
        (invoked, watched) => return Err(primary_failure(invoked.err(), watched.err())),
    };

    serde_json::from_slice(&payload)
        .map_err(|err| RunnerError::MalformedResult(err.to_string()))
}

/// Prefer the failure that caused the cascade over the `Cancelled` it
/// induced on the sibling leg.
fn primary_failure(invoked: Option<RunnerError>, watched: Option<RunnerError>) -> RunnerError {
    let mut errors = [invoked, watched].into_iter().flatten();
    let first = errors
        .next()
        .unwrap_or(RunnerError::Cancelled);
    if matches!(first, RunnerError::Cancelled) {
        errors
            .find(|err| !matches!(err, RunnerError::Cancelled))
            .unwrap_or(first)
    } else {
        first
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn units_run_in_fifo_order_one_at_a_time() {
        let queue = CommandQueue::new(CancelRegistry::new());
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let second_started = Arc::new(AtomicBool::new(false));

        let first = queue.submit(move |_| async move {
            gate_rx.await.unwrap();
            Ok(json!({"unit": 1}))
        });

        let started = Arc::clone(&second_started);
        let second = queue.submit(move |_| async move {
            started.store(true, Ordering::SeqCst);
            Ok(json!({"unit": 2}))
        });

        // The second unit must not begin while the first is unsettled.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second_started.load(Ordering::SeqCst));

        gate_tx.send(()).unwrap();
        assert_eq!(first.wait().await.unwrap()["unit"], 1);
        assert_eq!(second.wait().await.unwrap()["unit"], 2);
        assert!(second_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn a_failing_unit_does_not_block_the_next() {
        let queue = CommandQueue::new(CancelRegistry::new());

        let failing = queue.submit(|_| async {
            Err(RunnerError::MalformedResult("not json".into()))
        });
        let following = queue.submit(|_| async { Ok(json!({"ok": true})) });

        assert!(matches!(
            failing.wait().await.unwrap_err(),
            RunnerError::MalformedResult(_)
        ));
        assert_eq!(following.wait().await.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn cancelling_a_queued_unit_skips_it() {
        let queue = CommandQueue::new(CancelRegistry::new());
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let blocker = queue.submit(move |_| async move {
            gate_rx.await.unwrap();
            Ok(json!(null))
        });

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let doomed = queue.submit(move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(json!(null))
        });

        assert!(queue.registry().cancel(doomed.token()));
        gate_tx.send(()).unwrap();

        blocker.wait().await.unwrap();
        assert!(matches!(
            doomed.wait().await.unwrap_err(),
            RunnerError::Cancelled
        ));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelling_a_running_unit_fires_its_signal() {
        let queue = CommandQueue::new(CancelRegistry::new());

        let running = queue.submit(|ctx| async move {
            ctx.cancel_signal().cancelled().await;
            Err(RunnerError::Cancelled)
        });

        // Let the unit get admitted before cancelling it.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.registry().cancel(running.token()));

        assert!(matches!(
            running.wait().await.unwrap_err(),
            RunnerError::Cancelled
        ));
    }

    #[tokio::test]
    async fn settlement_releases_the_token() {
        let queue = CommandQueue::new(CancelRegistry::new());

        let unit = queue.submit(|_| async { Ok(json!(1)) });
        let token = unit.token().clone();
        unit.wait().await.unwrap();

        // Cancelling after natural completion is a no-op.
        assert!(!queue.registry().cancel(&token));
    }

    #[test]
    fn primary_failure_prefers_the_real_error() {
        let picked = primary_failure(
            Some(RunnerError::Cancelled),
            Some(RunnerError::Timeout(Duration::from_millis(5))),
        );
        assert!(matches!(picked, RunnerError::Timeout(_)));

        let picked = primary_failure(
            Some(RunnerError::ProcessExitNonZero { code: 2 }),
            Some(RunnerError::Cancelled),
        );
        assert!(matches!(picked, RunnerError::ProcessExitNonZero { code: 2 }));

        let picked = primary_failure(Some(RunnerError::Cancelled), Some(RunnerError::Cancelled));
        assert!(matches!(picked, RunnerError::Cancelled));
    }
}
