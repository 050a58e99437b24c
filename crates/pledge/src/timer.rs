//! Timer-backed promises.
//!
//! The promise core has no notion of time; timeouts are composed by racing a
//! promise against [`delay`]. Timers run on the ambient tokio runtime.

use std::time::Duration;

use crate::combinators::race;
use crate::error::{Rejection, TimerError};
use crate::promise::{Outcome, Promise, deferred, rejected};

/// Resolves after `duration`. Canceling the promise aborts the timer task.
///
/// Outside a tokio runtime the promise is rejected with
/// [`TimerError::NoRuntime`].
pub fn delay(duration: Duration) -> Promise<()> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return rejected(Rejection::new(TimerError::NoRuntime));
    };

    let (resolver, promise) = deferred();
    let task = runtime.spawn(async move {
        tokio::time::sleep(duration).await;
        resolver.try_resolve(());
    });

    let abort = task.abort_handle();
    promise.on_settled(move |outcome| {
        if outcome.is_canceled() {
            tracing::trace!(?duration, "Timer canceled, aborting task");
            abort.abort();
        }
    });
    promise
}

/// Adopt `promise`'s outcome unless `duration` passes first, in which case
/// the result is rejected with [`TimerError::TimedOut`] and `promise` is
/// canceled.
pub fn with_timeout<T>(promise: &Promise<T>, duration: Duration) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    let timer = delay(duration);
    let timer_token = timer.cancel_token();

    let (resolver, deadline) = deferred::<T>();
    timer.on_settled(move |outcome| match outcome {
        Outcome::Resolved(()) => {
            resolver.try_reject(Rejection::new(TimerError::TimedOut(duration)));
        }
        Outcome::Rejected(error) => {
            resolver.try_reject(error.clone());
        }
        Outcome::Canceled => {
            resolver.try_cancel();
        }
    });
    deadline.on_settled(move |outcome| {
        if outcome.is_canceled() {
            timer_token.try_cancel();
        }
    });

    race([promise.clone(), deadline])
}
