//! Cooperative cancellation.
//!
//! [`Cancelable`] is the one capability an owner of in-flight work needs.
//! [`CancelToken`] is a non-owning, type-erased handle to a promise: it never
//! keeps the promise alive, and cancelling through it is a no-op once the
//! promise settled or was freed.

use std::fmt;
use std::sync::Weak;

pub use tokio_util::sync::CancellationToken;

/// Request best-effort cancellation. Idempotent; no effect once terminal.
pub trait Cancelable {
    fn cancel(&self);
}

pub(crate) trait CancelTarget: Send + Sync {
    /// Returns whether this request won the transition.
    fn request_cancel(&self) -> bool;
    fn is_terminal(&self) -> bool;
}

#[derive(Clone)]
pub struct CancelToken {
    target: Weak<dyn CancelTarget>,
}

impl CancelToken {
    pub(crate) fn new(target: Weak<dyn CancelTarget>) -> Self {
        Self { target }
    }

    /// Cancel the promise; returns `true` only if this call moved it to Canceled.
    pub fn try_cancel(&self) -> bool {
        self.target
            .upgrade()
            .is_some_and(|target| target.request_cancel())
    }

    /// Whether the promise still exists and is Pending.
    pub fn is_live(&self) -> bool {
        self.target
            .upgrade()
            .is_some_and(|target| !target.is_terminal())
    }
}

impl Cancelable for CancelToken {
    fn cancel(&self) {
        self.try_cancel();
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("live", &self.is_live())
            .finish()
    }
}

impl Cancelable for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self);
    }
}

impl<C: Cancelable + ?Sized> Cancelable for std::sync::Arc<C> {
    fn cancel(&self) {
        (**self).cancel();
    }
}

impl<C: Cancelable + ?Sized> Cancelable for Box<C> {
    fn cancel(&self) {
        (**self).cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckMode;
    use crate::promise::{PromiseState, deferred_with};

    #[test]
    fn token_cancels_pending_promise_once() {
        let (_resolver, promise) = deferred_with::<u32>(CheckMode::Silent);
        let token = promise.cancel_token();
        assert!(token.is_live());
        assert!(token.try_cancel());
        assert!(!token.try_cancel());
        assert!(!token.is_live());
        assert_eq!(promise.state(), PromiseState::Canceled);
    }

    #[test]
    fn token_does_not_keep_promise_alive() {
        let token = {
            let (_resolver, promise) = deferred_with::<u32>(CheckMode::Silent);
            promise.cancel_token()
        };
        assert!(!token.is_live());
        assert!(!token.try_cancel());
    }

    #[test]
    fn token_is_noop_after_resolve() {
        let (resolver, promise) = deferred_with::<u32>(CheckMode::Silent);
        let token = promise.cancel_token();
        resolver.resolve(1);
        token.cancel();
        assert_eq!(promise.state(), PromiseState::Resolved);
    }

    #[test]
    fn heterogeneous_cancelables() {
        let (_r1, p1) = deferred_with::<u32>(CheckMode::Silent);
        let (_r2, p2) = deferred_with::<String>(CheckMode::Silent);
        let external = CancellationToken::new();

        let owners: Vec<Box<dyn Cancelable>> = vec![
            Box::new(p1.clone()),
            Box::new(p2.cancel_token()),
            Box::new(external.clone()),
        ];
        for owner in &owners {
            owner.cancel();
            owner.cancel();
        }

        assert_eq!(p1.state(), PromiseState::Canceled);
        assert_eq!(p2.state(), PromiseState::Canceled);
        assert!(external.is_cancelled());
    }
}
