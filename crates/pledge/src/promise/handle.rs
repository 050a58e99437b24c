//! Producer and consumer handles.
//!
//! A [`Resolver`] settles the promise; a [`Promise`] observes it. Both keep
//! the node alive. Settlement is single-assignment: the first of
//! resolve/reject/cancel to take the node's lock wins and every later attempt
//! is a no-op.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::cancel::{CancelToken, Cancelable};
use crate::config::{self, CheckMode};
use crate::error::{Rejection, UsageError};
use crate::promise::node::{Node, NodeRef};
use crate::promise::state::{Outcome, PromiseState};

/// Consumer handle. Clones observe the same promise.
pub struct Promise<T: Send + Sync + 'static> {
    node: NodeRef<T>,
}

/// Producer handle.
///
/// Dropping a resolver while its promise is still Pending cancels the
/// promise, so consumers are never left waiting on an abandoned producer.
pub struct Resolver<T: Send + Sync + 'static> {
    node: NodeRef<T>,
}

/// New pending promise using the process-wide check mode.
pub fn deferred<T: Send + Sync + 'static>() -> (Resolver<T>, Promise<T>) {
    deferred_with(config::current().checks)
}

/// New pending promise with an explicit check mode.
pub fn deferred_with<T: Send + Sync + 'static>(checks: CheckMode) -> (Resolver<T>, Promise<T>) {
    pair(NodeRef::new(Arc::new(Node::unpooled(checks))))
}

pub(crate) fn pair<T: Send + Sync + 'static>(node: NodeRef<T>) -> (Resolver<T>, Promise<T>) {
    let promise = Promise { node: node.clone() };
    (Resolver { node }, promise)
}

pub fn resolved<T: Send + Sync + 'static>(value: T) -> Promise<T> {
    let (resolver, promise) = deferred();
    resolver.resolve(value);
    promise
}

pub fn rejected<T: Send + Sync + 'static>(error: impl Into<Rejection>) -> Promise<T> {
    let (resolver, promise) = deferred();
    resolver.reject(error);
    promise
}

pub fn canceled<T: Send + Sync + 'static>() -> Promise<T> {
    let (resolver, promise) = deferred();
    resolver.cancel();
    promise
}

fn cancel_token_for<T: Send + Sync + 'static>(node: &NodeRef<T>) -> CancelToken {
    let weak: Weak<Node<T>> = Arc::downgrade(node.arc());
    CancelToken::new(weak)
}

impl<T: Send + Sync + 'static> Resolver<T> {
    pub fn resolve(&self, value: T) {
        let result = self.node.settle(Outcome::Resolved(value));
        self.check_settle("resolve", result);
    }

    pub fn reject(&self, error: impl Into<Rejection>) {
        let result = self.node.settle(Outcome::Rejected(error.into()));
        self.check_settle("reject", result);
    }

    pub fn try_resolve(&self, value: T) -> bool {
        self.node.settle(Outcome::Resolved(value)).is_ok()
    }

    pub fn try_reject(&self, error: impl Into<Rejection>) -> bool {
        self.node.settle(Outcome::Rejected(error.into())).is_ok()
    }

    pub fn try_cancel(&self) -> bool {
        self.node.settle(Outcome::Canceled).is_ok()
    }

    /// Adopt another outcome (cloning the value).
    pub fn try_settle_from(&self, outcome: &Outcome<T>) -> bool
    where
        T: Clone,
    {
        self.node.settle(outcome.clone()).is_ok()
    }

    pub fn cancel(&self) {
        self.try_cancel();
    }

    pub fn state(&self) -> PromiseState {
        self.node.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Another consumer handle for the same promise.
    pub fn promise(&self) -> Promise<T> {
        Promise {
            node: self.node.clone(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        cancel_token_for(&self.node)
    }

    /// Losing to a cancellation is a normal race. Losing to another
    /// resolve/reject means two producers settled the same promise.
    fn check_settle(&self, op: &str, result: Result<(), PromiseState>) {
        match result {
            Ok(()) => {}
            Err(PromiseState::Canceled) => {
                tracing::trace!(op, "Settle lost to cancellation");
            }
            Err(state) => {
                UsageError::assertion(format!("{op} on a promise that is already {state}"))
                    .raise(self.node.checks());
            }
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.node.settle(Outcome::Canceled).is_ok() {
            tracing::debug!("Resolver dropped while pending - promise canceled");
        }
    }
}

impl<T: Send + Sync + 'static> Cancelable for Resolver<T> {
    fn cancel(&self) {
        self.try_cancel();
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    pub fn state(&self) -> PromiseState {
        self.node.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The terminal outcome, if settled.
    pub fn outcome(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.node.outcome().cloned()
    }

    /// Inspect the terminal outcome in place without cloning.
    pub fn peek<R>(&self, f: impl FnOnce(Option<&Outcome<T>>) -> R) -> R {
        f(self.node.outcome())
    }

    pub fn cancel(&self) {
        self.try_cancel();
    }

    pub fn try_cancel(&self) -> bool {
        self.node.settle(Outcome::Canceled).is_ok()
    }

    pub fn cancel_token(&self) -> CancelToken {
        cancel_token_for(&self.node)
    }

    /// Whether both handles observe the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.node.ptr_eq(&other.node)
    }

    /// Run `f` with the final outcome, now if already settled.
    pub fn on_settled<F>(&self, f: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.node.subscribe(Box::new(f));
    }

    /// Map the value. Rejection and cancellation pass through untouched.
    pub fn then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&T) -> R + Send + 'static,
    {
        let (resolver, promise) = deferred_with(self.node.checks());
        self.on_settled(move |outcome| match outcome {
            Outcome::Resolved(value) => {
                if !resolver.is_terminal() {
                    resolver.try_resolve(f(value));
                }
            }
            Outcome::Rejected(error) => {
                resolver.try_reject(error.clone());
            }
            Outcome::Canceled => {
                resolver.try_cancel();
            }
        });
        promise
    }

    /// Chain onto the promise returned by `f`.
    ///
    /// Cancelling the returned promise also cancels the inner one.
    pub fn and_then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> Promise<R> + Send + 'static,
    {
        let (resolver, promise) = deferred_with(self.node.checks());
        let downstream = promise.clone();
        self.on_settled(move |outcome| match outcome {
            Outcome::Resolved(value) => {
                if resolver.is_terminal() {
                    return;
                }
                let inner = f(value);
                let inner_token = inner.cancel_token();
                downstream.on_settled(move |o| {
                    if o.is_canceled() {
                        inner_token.cancel();
                    }
                });
                inner.on_settled(move |o| {
                    resolver.try_settle_from(o);
                });
            }
            Outcome::Rejected(error) => {
                resolver.try_reject(error.clone());
            }
            Outcome::Canceled => {
                resolver.try_cancel();
            }
        });
        promise
    }

    /// Recover from a rejection with a replacement value.
    pub fn catch<F>(&self, f: F) -> Promise<T>
    where
        T: Clone,
        F: FnOnce(&Rejection) -> T + Send + 'static,
    {
        let (resolver, promise) = deferred_with(self.node.checks());
        self.on_settled(move |outcome| match outcome {
            Outcome::Rejected(error) => {
                if !resolver.is_terminal() {
                    resolver.try_resolve(f(error));
                }
            }
            other => {
                resolver.try_settle_from(other);
            }
        });
        promise
    }

    /// Run `f` on any outcome, then pass the outcome through.
    pub fn finally<F>(&self, f: F) -> Promise<T>
    where
        T: Clone,
        F: FnOnce() + Send + 'static,
    {
        let (resolver, promise) = deferred_with(self.node.checks());
        self.on_settled(move |outcome| {
            f();
            resolver.try_settle_from(outcome);
        });
        promise
    }

    /// Wait for the outcome from async code. Works on any executor.
    pub fn wait(&self) -> impl Future<Output = Outcome<T>> + Send + use<T>
    where
        T: Clone,
    {
        let (tx, rx) = futures::channel::oneshot::channel();
        self.on_settled(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        async move { rx.await.unwrap_or(Outcome::Canceled) }
    }

    pub(crate) fn checks(&self) -> CheckMode {
        self.node.checks()
    }
}

impl<T: Send + Sync + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Cancelable for Promise<T> {
    fn cancel(&self) {
        self.try_cancel();
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Promise<T> {
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'static, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}
