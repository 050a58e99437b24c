//! Single-assignment promises with cooperative cancellation.
//!
//! State machine: `Pending` → one of `Resolved`, `Rejected`, `Canceled`.
//! The terminal states are mutually exclusive and final:
//! - `Resolver::resolve`/`reject` after settlement is a no-op (or a fatal
//!   usage error in `CheckMode::Fatal` unless the promise lost to a cancel)
//! - `cancel` after settlement is always a no-op
//! - continuations registered after settlement run immediately

mod handle;
mod node;
mod pooled;
mod state;

pub use handle::{Promise, Resolver, canceled, deferred, deferred_with, rejected, resolved};
pub use pooled::PromisePool;
pub use state::{Outcome, PromiseState};
