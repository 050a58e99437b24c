//! pledge: cancelable single-assignment promises with pooled nodes.
//!
//! A producer settles a promise exactly once, from any thread; consumers
//! register continuations that run exactly once with the final outcome.
//! Nodes can be recycled through a [`PromisePool`] to keep allocation off the
//! hot path of a frame loop.

pub mod cancel;
pub mod combinators;
pub mod config;
pub mod error;
pub mod pool;
pub mod promise;
pub mod spin;
pub mod telemetry;
pub mod timer;

pub use cancel::{CancelToken, Cancelable, CancellationToken};
pub use combinators::{all, any, race};
pub use config::{CheckMode, RuntimeConfig};
pub use error::{PoolError, Rejection, TimerError, UsageError};
pub use pool::{Pool, Recyclable};
pub use promise::{
    Outcome, Promise, PromisePool, PromiseState, Resolver, canceled, deferred, deferred_with,
    rejected, resolved,
};
pub use spin::{SpinGuard, SpinLock};
pub use timer::{delay, with_timeout};
