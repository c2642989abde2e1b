use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DriverError;

/// Cancellation signal attached to a driver operation.
///
/// A context fires when any of its tokens is cancelled or when its deadline
/// passes. [`Context::background`] never fires.
#[derive(Debug, Clone, Default)]
pub struct Context {
    tokens: Vec<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that can never fire.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context fired by calling [`Context::cancel`] on it or on any clone.
    #[must_use]
    pub fn cancellable() -> Self {
        Self {
            tokens: vec![CancellationToken::new()],
            deadline: None,
        }
    }

    /// A cancellable context that also fires once `timeout` has elapsed.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::cancellable().deadline_at(Instant::now() + timeout)
    }

    /// Copy of this context whose deadline is the earlier of its own and `deadline`.
    #[must_use]
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Copy of this context that additionally fires when `token` is cancelled.
    #[must_use]
    pub(crate) fn linked(&self, token: CancellationToken) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        Self {
            tokens,
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fire the context. Has no effect on a background context.
    pub fn cancel(&self) {
        if let Some(token) = self.tokens.first() {
            token.cancel();
        }
    }

    /// Whether this context is able to fire at all.
    #[must_use]
    pub fn can_fire(&self) -> bool {
        !self.tokens.is_empty() || self.deadline.is_some()
    }

    /// The error describing why the context fired, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<DriverError> {
        if self.tokens.iter().any(CancellationToken::is_cancelled) {
            return Some(DriverError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DriverError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context fires and return the matching error.
    ///
    /// Never completes for a context that cannot fire.
    pub async fn done(&self) -> DriverError {
        let cancelled = async {
            if self.tokens.is_empty() {
                std::future::pending::<()>().await;
            }
            let waits = self
                .tokens
                .iter()
                .map(|token| Box::pin(token.cancelled()));
            futures_util::future::select_all(waits).await;
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = cancelled => DriverError::Canceled,
            () = expired => DriverError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_fires() {
        let ctx = Context::background();
        assert!(!ctx.can_fire());
        assert!(ctx.err().is_none());
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn cancel_is_visible_to_clones() {
        let ctx = Context::cancellable();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(matches!(clone.err(), Some(DriverError::Canceled)));
        assert!(matches!(clone.done().await, DriverError::Canceled));
    }

    #[tokio::test]
    async fn deadline_reports_deadline_exceeded() {
        let ctx = Context::with_timeout(Duration::from_millis(10));
        assert!(ctx.err().is_none());
        assert!(matches!(ctx.done().await, DriverError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(DriverError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn linked_token_fires_the_derived_context_only() {
        let ctx = Context::cancellable();
        let extra = CancellationToken::new();
        let linked = ctx.linked(extra.clone());
        extra.cancel();
        assert!(matches!(linked.err(), Some(DriverError::Canceled)));
        assert!(ctx.err().is_none());
    }
}
