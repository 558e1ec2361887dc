use std::path::Path;
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::cancel::UnitCtx;
use crate::error::{Result, RunnerError};

/// Wait for an externally-written result to land at `path`.
///
/// `path` must already exist — the caller creates it empty and instructs the
/// tool to write there — otherwise this fails immediately with
/// [`RunnerError::NotFound`]. The call resolves with the file's full
/// contents on the first observed change, and races three other outcomes:
///
/// - the timer: on expiry the registry's cancel path for the unit's token is
///   invoked (taking sibling work under the same token down too) and the
///   call fails with [`RunnerError::Timeout`];
/// - explicit cancellation through the token: [`RunnerError::Cancelled`];
/// - deletion of the target: [`RunnerError::NotFound`] rather than a hang.
///
/// The OS watch handle is released exactly once on every path out.
pub async fn await_result_file(path: &Path, ctx: &UnitCtx, timeout: Duration) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(RunnerError::NotFound(path.to_owned()));
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut watch = notify::recommended_watcher(move |event| {
        // The notify callback runs on its own thread; forwarding into an
        // unbounded channel keeps it non-blocking.
        let _ = events_tx.send(event);
    })?;
    if let Err(err) = watch.watch(path, RecursiveMode::NonRecursive) {
        // The target can disappear between the existence check and watch
        // registration (e.g. the tool already deleted it).
        return Err(match err.kind {
            notify::ErrorKind::PathNotFound => RunnerError::NotFound(path.to_owned()),
            _ => RunnerError::Watch(err),
        });
    }
    debug!(path = %path.display(), ?timeout, "watching for result");

    // The tool may also have written before the watch registered; a
    // non-empty target is a change that was already missed.
    match tokio::fs::read(path).await {
        Ok(contents) if !contents.is_empty() => {
            drop(watch);
            return Ok(contents);
        }
        _ => {}
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            _ = ctx.cancel_signal().cancelled() => break Err(RunnerError::Cancelled),
            _ = &mut deadline => break Err(RunnerError::Timeout(timeout)),
            event = events_rx.recv() => match event {
                Some(Ok(event)) => match event.kind {
                    EventKind::Access(_) => continue,
                    EventKind::Remove(_) => break Err(RunnerError::NotFound(path.to_owned())),
                    _ => {
                        trace!(path = %path.display(), kind = ?event.kind, "result changed");
                        match tokio::fs::read(path).await {
                            // A truncate-before-write shows up as a change
                            // with nothing in it yet; the payload is next.
                            Ok(contents) if contents.is_empty() => continue,
                            Ok(contents) => break Ok(contents),
                            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                                break Err(RunnerError::NotFound(path.to_owned()))
                            }
                            Err(err) => break Err(err.into()),
                        }
                    }
                },
                Some(Err(err)) => break Err(err.into()),
                None => break Err(RunnerError::Io(std::io::Error::other(
                    "watch event channel closed",
                ))),
            },
        }
    };

    // Close the watch before cancelling siblings so the handle is never left
    // open past the call, whatever the outcome.
    drop(watch);

    if matches!(outcome, Err(RunnerError::Timeout(_))) {
        ctx.registry().cancel(ctx.token());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::cancel::CancelRegistry;

    use super::*;

    fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn missing_path_fails_immediately() {
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        let err = await_result_file(
            Path::new("/definitely/not/here.json"),
            &ctx,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolves_with_contents_on_change() {
        let (_dir, path) = scratch();
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tokio::fs::write(&path, br#"{"status":"done"}"#).await.unwrap();
            })
        };

        let contents = await_result_file(&path, &ctx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(contents, br#"{"status":"done"}"#);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn untouched_path_times_out_and_releases_token() {
        let (_dir, path) = scratch();
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        let started = Instant::now();
        let err = await_result_file(&path, &ctx, Duration::from_millis(50))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, RunnerError::Timeout(_)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
        // The timeout went through the registry's cancel path, so the token
        // is gone and the shared signal fired.
        assert!(ctx.cancel_signal().is_cancelled());
        assert!(!registry.cancel(ctx.token()));
    }

    #[tokio::test]
    async fn explicit_cancel_rejects_pending_watch() {
        let (_dir, path) = scratch();
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        let canceller = {
            let registry = registry.clone();
            let token = ctx.token().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert!(registry.cancel(&token));
            })
        };

        let err = await_result_file(&path, &ctx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn deleted_target_fails_instead_of_hanging() {
        let (_dir, path) = scratch();
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        let remover = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tokio::fs::remove_file(&path).await.unwrap();
            })
        };

        let err = await_result_file(&path, &ctx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
        remover.await.unwrap();
    }
}
