use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Opaque handle correlating an in-flight operation to its cancel action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelToken(String);

impl CancelToken {
    /// Mint a fresh token.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a caller-supplied identifier (e.g. one received over the wire).
    pub fn from_id(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The token's identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Tracks in-flight cancellable operations: token → cancel callback.
///
/// An explicit object owned by whichever component needs cancellation (one
/// per command queue) and passed around by cloning the handle — never
/// process-global state. A callback is removed exactly once, by
/// [`cancel`](Self::cancel) or [`release`](Self::release); both are no-ops
/// on a token that is unknown or already removed.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<CancelToken, CancelFn>>>,
}

impl fmt::Debug for CancelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().map(|map| map.len()).unwrap_or(0);
        f.debug_struct("CancelRegistry").field("len", &len).finish()
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the cancel action for `token`.
    pub fn register(&self, token: CancelToken, cancel: impl FnOnce() + Send + 'static) {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        map.insert(token, Box::new(cancel));
    }

    /// Invoke and remove the cancel action for `token`.
    ///
    /// Returns `false` — without error — when the token is unknown or was
    /// already cancelled/released.
    pub fn cancel(&self, token: &CancelToken) -> bool {
        let callback = {
            let mut map = self.inner.lock().expect("cancel registry lock poisoned");
            map.remove(token)
        };
        match callback {
            Some(callback) => {
                trace!(%token, "cancelling operation");
                callback();
                true
            }
            None => false,
        }
    }

    /// Remove the registration without invoking it. Called by the operation
    /// itself on natural settlement, so a stale timer can never cancel an
    /// already-finished operation.
    pub fn release(&self, token: &CancelToken) -> bool {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        map.remove(token).is_some()
    }
}

/// Cancellation context shared by everything one queue unit does.
///
/// The registry maps the unit's [`CancelToken`] to cancelling the inner
/// [`CancellationToken`]; the spawned process and the completion watch both
/// listen on that one signal, so cancellation is scoped to exactly this
/// operation.
#[derive(Clone)]
pub struct UnitCtx {
    token: CancelToken,
    cancel: CancellationToken,
    registry: CancelRegistry,
}

impl fmt::Debug for UnitCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitCtx")
            .field("token", &self.token)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl UnitCtx {
    /// Mint a token, register it in `registry`, and return the context.
    pub fn register(registry: &CancelRegistry) -> Self {
        let token = CancelToken::new();
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        registry.register(token.clone(), move || trip.cancel());
        Self {
            token,
            cancel,
            registry: registry.clone(),
        }
    }

    /// The unit's cancellation token in the registry.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// The signal every part of the unit listens on.
    pub fn cancel_signal(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The registry this unit is registered in.
    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Release the registration on natural settlement.
    pub fn release(&self) {
        self.registry.release(&self.token);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn cancel_invokes_callback_once() {
        let registry = CancelRegistry::new();
        let token = CancelToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        registry.register(token.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.cancel(&token));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Double cancel is a no-op, not an error.
        assert!(!registry.cancel(&token));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_after_release_is_noop() {
        let registry = CancelRegistry::new();
        let token = CancelToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        registry.register(token.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.release(&token));
        assert!(!registry.cancel(&token));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_token_is_noop() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel(&CancelToken::new()));
        assert!(!registry.release(&CancelToken::from_id("nope")));
    }

    #[test]
    fn tokens_are_independent() {
        let registry = CancelRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let token_a = CancelToken::new();
        let token_b = CancelToken::new();
        for token in [&token_a, &token_b] {
            let counter = Arc::clone(&calls);
            registry.register(token.clone(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(registry.cancel(&token_a));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.release(&token_b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unit_ctx_cancel_flows_through_registry() {
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        assert!(!ctx.cancel_signal().is_cancelled());
        assert!(registry.cancel(ctx.token()));
        assert!(ctx.cancel_signal().is_cancelled());
    }

    #[test]
    fn unit_ctx_release_prevents_late_cancel() {
        let registry = CancelRegistry::new();
        let ctx = UnitCtx::register(&registry);

        ctx.release();
        assert!(!registry.cancel(ctx.token()));
        assert!(!ctx.cancel_signal().is_cancelled());
    }
}
