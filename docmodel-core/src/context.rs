//! Cancellation context passed to every store-facing operation.

use futures::future::{Either, select};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A cancellation signal handed down through every call that reaches a store backend.
///
/// Cloning a `Context` shares the same signal. [`Context::child`] derives a context that is
/// cancelled together with its parent but can also be cancelled on its own, which is how
/// concurrent fetches abort their siblings without touching the caller's context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// Creates a fresh, uncancelled context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Returns a context cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token() }
    }

    /// Signals cancellation to this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns [`DocumentStoreError::Cancelled`] once the context has been cancelled.
    pub fn check(&self) -> DocumentStoreResult<()> {
        if self.token.is_cancelled() {
            return Err(DocumentStoreError::Cancelled);
        }

        Ok(())
    }

    /// Drives `fut` to completion unless the context is cancelled first.
    pub async fn guard<F, T>(&self, fut: F) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        self.check()?;

        let cancelled = std::pin::pin!(self.token.cancelled());
        let fut = std::pin::pin!(fut);

        match select(fut, cancelled).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => Err(DocumentStoreError::Cancelled),
        }
    }

    /// Returns the underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_follows_parent() {
        let parent = Context::new();
        let child = parent.child();

        assert!(child.check().is_ok());
        parent.cancel();
        assert_eq!(child.check(), Err(DocumentStoreError::Cancelled));
    }

    #[test]
    fn child_cancel_leaves_parent_alone() {
        let parent = Context::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn guard_short_circuits_when_cancelled() {
        let ctx = Context::new();
        ctx.cancel();

        let result = ctx
            .guard(async { Ok::<_, DocumentStoreError>(1) })
            .await;

        assert_eq!(result, Err(DocumentStoreError::Cancelled));
    }

    #[tokio::test]
    async fn guard_passes_result_through() {
        let ctx = Context::new();
        let result = ctx
            .guard(async { Ok::<_, DocumentStoreError>(7) })
            .await;

        assert_eq!(result, Ok(7));
    }
}
