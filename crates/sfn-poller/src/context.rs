//! Cancellable polling context
//!
//! Every task registered with an [`ActivityPoller`](crate::ActivityPoller)
//! shares one [`CancellableContext`]. It fires when either the parent token
//! supplied to `begin_polling` is cancelled or [`CancellableContext::cancel`]
//! is called explicitly. Cancellation is monotonic.

use tokio_util::sync::CancellationToken;

/// Cancellation signal derived from a parent token
///
/// Cloning is cheap and every clone observes the same cancellation state.
///
/// # Example
///
/// ```
/// use sfn_poller::CancellableContext;
/// use tokio_util::sync::CancellationToken;
///
/// let parent = CancellationToken::new();
/// let ctx = CancellableContext::new(&parent);
///
/// ctx.cancel();
/// assert!(ctx.is_cancelled());
/// assert!(!parent.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellableContext {
    token: CancellationToken,
}

impl CancellableContext {
    /// Create a context that is cancelled when `parent` is cancelled
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    /// Create a context with no parent; only [`cancel`](Self::cancel) fires it
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a context that fires with this one but can also be cancelled on its own
    pub fn child(&self) -> Self {
        Self::new(&self.token)
    }

    /// Cancel this context and all contexts derived from it
    ///
    /// Idempotent and safe to call from any number of tasks.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking cancellation check
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The underlying token, for `select!` against other futures
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
