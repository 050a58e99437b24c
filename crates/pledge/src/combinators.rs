//! Promises whose outcome depends on several children.
//!
//! Each combinator registers exactly one continuation per child. Once the
//! combinator settles, for whatever reason (including being canceled by its
//! own consumer), every child that is still Pending is canceled.
//!
//! - [`all`]: resolves with every value in input order; the first rejection or
//!   cancellation of any child decides instead.
//! - [`race`]: adopts the first child outcome of any kind.
//! - [`any`]: adopts the first success; if every child fails, adopts the last
//!   rejection seen, or Canceled when none rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cancel::{CancelToken, Cancelable};
use crate::config::{self, CheckMode};
use crate::error::{Rejection, UsageError};
use crate::promise::{Outcome, Promise, Resolver, deferred_with};
use crate::spin::SpinLock;

pub fn all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let children: Vec<Promise<T>> = promises.into_iter().collect();
    let (resolver, promise) = deferred_with(mode_of(&children));
    if children.is_empty() {
        resolver.resolve(Vec::new());
        return promise;
    }

    cancel_children_when_settled(&promise, &children);

    let collected = Arc::new(Collected {
        resolver,
        values: SpinLock::new(vec![None; children.len()]),
        remaining: AtomicUsize::new(children.len()),
    });

    for (index, child) in children.iter().enumerate() {
        let collected = Arc::clone(&collected);
        child.on_settled(move |outcome| match outcome {
            Outcome::Resolved(value) => collected.store(index, value.clone()),
            Outcome::Rejected(error) => {
                collected.resolver.try_reject(error.clone());
            }
            Outcome::Canceled => {
                collected.resolver.try_cancel();
            }
        });
    }

    promise
}

pub fn race<T, I>(promises: I) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let children: Vec<Promise<T>> = promises.into_iter().collect();
    if children.is_empty() {
        return empty_input("race", config::current().checks);
    }

    let (resolver, promise) = deferred_with(mode_of(&children));
    cancel_children_when_settled(&promise, &children);

    let resolver = Arc::new(resolver);
    for child in &children {
        let resolver = Arc::clone(&resolver);
        child.on_settled(move |outcome| {
            resolver.try_settle_from(outcome);
        });
    }

    promise
}

pub fn any<T, I>(promises: I) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let children: Vec<Promise<T>> = promises.into_iter().collect();
    if children.is_empty() {
        return empty_input("any", config::current().checks);
    }

    let (resolver, promise) = deferred_with(mode_of(&children));
    cancel_children_when_settled(&promise, &children);

    let failures = Arc::new(Failures {
        resolver,
        last_rejection: SpinLock::new(None),
        remaining: AtomicUsize::new(children.len()),
    });

    for child in &children {
        let failures = Arc::clone(&failures);
        child.on_settled(move |outcome| match outcome {
            Outcome::Resolved(value) => {
                failures.resolver.try_resolve(value.clone());
            }
            Outcome::Rejected(error) => failures.record(Some(error.clone())),
            Outcome::Canceled => failures.record(None),
        });
    }

    promise
}

struct Collected<T: Send + Sync + 'static> {
    resolver: Resolver<Vec<T>>,
    values: SpinLock<Vec<Option<T>>>,
    remaining: AtomicUsize,
}

impl<T: Send + Sync + 'static> Collected<T> {
    fn store(&self, index: usize, value: T) {
        self.values.lock()[index] = Some(value);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let values = std::mem::take(&mut *self.values.lock());
            self.resolver.try_resolve(values.into_iter().flatten().collect());
        }
    }
}

struct Failures<T: Send + Sync + 'static> {
    resolver: Resolver<T>,
    last_rejection: SpinLock<Option<Rejection>>,
    remaining: AtomicUsize,
}

impl<T: Send + Sync + 'static> Failures<T> {
    fn record(&self, rejection: Option<Rejection>) {
        if let Some(rejection) = rejection {
            *self.last_rejection.lock() = Some(rejection);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let last = self.last_rejection.lock().take();
            match last {
                Some(rejection) => self.resolver.try_reject(rejection),
                None => self.resolver.try_cancel(),
            };
        }
    }
}

fn mode_of<T: Send + Sync + 'static>(children: &[Promise<T>]) -> CheckMode {
    children
        .first()
        .map(Promise::checks)
        .unwrap_or_else(|| config::current().checks)
}

fn cancel_children_when_settled<T, R>(parent: &Promise<R>, children: &[Promise<T>])
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let tokens: Vec<CancelToken> = children.iter().map(Promise::cancel_token).collect();
    parent.on_settled(move |_| {
        for token in &tokens {
            token.cancel();
        }
    });
}

fn empty_input<T: Send + Sync + 'static>(name: &str, checks: CheckMode) -> Promise<T> {
    let message = format!("{name} needs at least one promise");
    if checks == CheckMode::Fatal {
        UsageError::invalid_argument(message.clone()).raise(checks);
    }
    tracing::debug!(combinator = name, "Empty input, rejecting");
    let (resolver, promise) = deferred_with(checks);
    resolver.reject(Rejection::new(UsageError::invalid_argument(message)));
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::PromiseState;

    fn silent<T: Send + Sync + 'static>() -> (Resolver<T>, Promise<T>) {
        deferred_with(CheckMode::Silent)
    }

    #[test]
    fn all_keeps_input_order() {
        let (r1, p1) = silent::<u32>();
        let (r2, p2) = silent::<u32>();
        let (r3, p3) = silent::<u32>();
        let combined = all([p1, p2, p3]);

        r3.resolve(3);
        r1.resolve(1);
        assert_eq!(combined.state(), PromiseState::Pending);
        r2.resolve(2);

        assert_eq!(
            combined.outcome().and_then(Outcome::into_value),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn all_adopts_rejection_and_cancels_siblings() {
        let (r1, p1) = silent::<u32>();
        let (_r2, p2) = silent::<u32>();
        let combined = all([p1, p2.clone()]);

        r1.reject(Rejection::msg("texture decode failed"));

        assert_eq!(combined.state(), PromiseState::Rejected);
        assert_eq!(p2.state(), PromiseState::Canceled);
        assert_eq!(
            combined.peek(|o| o.and_then(Outcome::rejection).map(ToString::to_string)),
            Some("texture decode failed".to_string())
        );
    }

    #[test]
    fn all_adopts_child_cancellation() {
        let (r1, p1) = silent::<u32>();
        let (r2, p2) = silent::<u32>();
        let combined = all([p1, p2]);
        r2.resolve(2);
        r1.cancel();
        assert_eq!(combined.state(), PromiseState::Canceled);
    }

    #[test]
    fn all_of_nothing_resolves_empty() {
        let combined = all(Vec::<Promise<u32>>::new());
        assert_eq!(
            combined.outcome().and_then(Outcome::into_value),
            Some(Vec::new())
        );
    }

    #[test]
    fn canceling_combinator_cancels_pending_children() {
        let (r1, p1) = silent::<u32>();
        let (_r2, p2) = silent::<u32>();
        let combined = all([p1.clone(), p2.clone()]);
        r1.resolve(1);

        combined.cancel();

        assert_eq!(p1.state(), PromiseState::Resolved);
        assert_eq!(p2.state(), PromiseState::Canceled);
    }

    #[test]
    fn race_takes_first_outcome_of_any_kind() {
        let (r1, p1) = silent::<&'static str>();
        let (r2, p2) = silent::<&'static str>();
        let winner = race([p1.clone(), p2.clone()]);

        r2.reject(Rejection::msg("cdn unreachable"));
        r1.resolve("cache");

        assert_eq!(winner.state(), PromiseState::Rejected);
        assert_eq!(p1.state(), PromiseState::Canceled);
    }

    #[test]
    fn race_resolves_with_first_value() {
        let (r1, p1) = silent::<u32>();
        let (_r2, p2) = silent::<u32>();
        let winner = race([p1, p2.clone()]);
        r1.resolve(10);
        assert_eq!(winner.outcome().and_then(Outcome::into_value), Some(10));
        assert_eq!(p2.state(), PromiseState::Canceled);
    }

    #[test]
    fn any_skips_failures() {
        let (r1, p1) = silent::<u32>();
        let (r2, p2) = silent::<u32>();
        let (_r3, p3) = silent::<u32>();
        let first_ok = any([p1, p2, p3.clone()]);

        r1.reject(Rejection::msg("mirror a"));
        assert_eq!(first_ok.state(), PromiseState::Pending);
        r2.resolve(7);

        assert_eq!(first_ok.outcome().and_then(Outcome::into_value), Some(7));
        assert_eq!(p3.state(), PromiseState::Canceled);
    }

    #[test]
    fn any_rejects_with_last_failure() {
        let (r1, p1) = silent::<u32>();
        let (r2, p2) = silent::<u32>();
        let (r3, p3) = silent::<u32>();
        let first_ok = any([p1, p2, p3]);

        r1.reject(Rejection::msg("mirror a"));
        r2.cancel();
        r3.reject(Rejection::msg("mirror c"));

        assert_eq!(
            first_ok.peek(|o| o.and_then(Outcome::rejection).map(ToString::to_string)),
            Some("mirror c".to_string())
        );
    }

    #[test]
    fn any_cancels_when_every_child_canceled() {
        let (r1, p1) = silent::<u32>();
        let (r2, p2) = silent::<u32>();
        let first_ok = any([p1, p2]);
        r1.cancel();
        r2.cancel();
        assert_eq!(first_ok.state(), PromiseState::Canceled);
    }

    #[test]
    #[should_panic(expected = "invalid argument: race needs at least one promise")]
    fn empty_race_is_fatal_in_fatal_mode() {
        empty_input::<u32>("race", CheckMode::Fatal);
    }

    #[test]
    fn empty_any_rejects_in_silent_mode() {
        let first_ok = empty_input::<u32>("any", CheckMode::Silent);
        assert_eq!(first_ok.state(), PromiseState::Rejected);
        let invalid = first_ok.peek(|o| {
            o.and_then(Outcome::rejection)
                .and_then(|e| e.downcast_ref::<UsageError>())
                .map(|e| matches!(e, UsageError::InvalidArgument { .. }))
        });
        assert_eq!(invalid, Some(true));
    }

    #[test]
    fn empty_race_follows_process_check_mode() {
        let outcome = std::panic::catch_unwind(|| race(Vec::<Promise<u32>>::new()).state());
        match config::current().checks {
            CheckMode::Fatal => assert!(outcome.is_err()),
            CheckMode::Silent => assert_eq!(outcome.ok(), Some(PromiseState::Rejected)),
        }
    }

    #[test]
    fn all_under_concurrent_producers() {
        for _ in 0..100 {
            let pairs: Vec<_> = (0..8).map(|_| silent::<usize>()).collect();
            let combined = all(pairs.iter().map(|(_, p)| p.clone()));
            std::thread::scope(|s| {
                for (i, (resolver, _)) in pairs.iter().enumerate() {
                    s.spawn(move || resolver.resolve(i));
                }
            });
            assert_eq!(
                combined.outcome().and_then(Outcome::into_value),
                Some((0..8).collect::<Vec<_>>())
            );
        }
    }
}
