//! The shared promise node and its single-assignment transition.
//!
//! The spin lock guards the state and the continuation list as one unit.
//! The outcome is written into a `OnceLock` inside the same critical section
//! that flips the state, so any reader that observes a terminal state can read
//! the outcome without the lock. Continuations always run after the lock is
//! released.

use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::ops::Deref;
use std::sync::{Arc, OnceLock, Weak};

use crate::cancel::CancelTarget;
use crate::config::CheckMode;
use crate::pool::Pool;
use crate::promise::state::{Outcome, PromiseState};
use crate::spin::SpinLock;

pub(crate) type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;
pub(crate) type NodePool<T> = Pool<Arc<Node<T>>>;

struct Cell<T> {
    state: PromiseState,
    continuations: Vec<Continuation<T>>,
}

pub(crate) struct Node<T> {
    cell: SpinLock<Cell<T>>,
    outcome: OnceLock<Outcome<T>>,
    checks: CheckMode,
    /// Pool this node returns to once the last handle is gone.
    home: Weak<NodePool<T>>,
}

impl<T: Send + Sync + 'static> Node<T> {
    pub(crate) fn new(checks: CheckMode, spin_limit: u32, home: Weak<NodePool<T>>) -> Self {
        Self {
            cell: SpinLock::with_spin_limit(
                Cell {
                    state: PromiseState::Pending,
                    continuations: Vec::new(),
                },
                spin_limit,
            ),
            outcome: OnceLock::new(),
            checks,
            home,
        }
    }

    pub(crate) fn unpooled(checks: CheckMode) -> Self {
        Self::new(checks, crate::spin::DEFAULT_SPIN_LIMIT, Weak::new())
    }

    pub(crate) fn checks(&self) -> CheckMode {
        self.checks
    }

    pub(crate) fn state(&self) -> PromiseState {
        self.cell.lock().state
    }

    pub(crate) fn outcome(&self) -> Option<&Outcome<T>> {
        self.outcome.get()
    }

    /// Commit a terminal outcome. On loss returns the state that won.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> Result<(), PromiseState> {
        let continuations = {
            let mut cell = self.cell.lock();
            if cell.state.is_terminal() {
                return Err(cell.state);
            }
            let state = outcome.state();
            let stored = self.outcome.set(outcome).is_ok();
            debug_assert!(stored, "pending node already carried an outcome");
            cell.state = state;
            std::mem::take(&mut cell.continuations)
        };

        if let Some(outcome) = self.outcome.get() {
            self.dispatch(continuations, outcome);
        }
        Ok(())
    }

    /// Run every continuation even if some panic. The first panic is
    /// re-raised afterwards in `Fatal` mode.
    fn dispatch(&self, continuations: Vec<Continuation<T>>, outcome: &Outcome<T>) {
        let mut first_panic = None;
        for continuation in continuations {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation(outcome))) {
                tracing::error!(state = %outcome.state(), "Promise continuation panicked");
                first_panic.get_or_insert(payload);
            }
        }

        if let Some(payload) = first_panic
            && self.checks == CheckMode::Fatal
            && !std::thread::panicking()
        {
            panic::resume_unwind(payload);
        }
    }

    /// Register a continuation, or run it now if the node already settled.
    pub(crate) fn subscribe(&self, continuation: Continuation<T>) {
        {
            let mut cell = self.cell.lock();
            if !cell.state.is_terminal() {
                cell.continuations.push(continuation);
                return;
            }
        }

        if let Some(outcome) = self.outcome.get() {
            continuation(outcome);
        }
    }

    /// Scrub back to Pending for reuse. Requires exclusive access.
    pub(crate) fn reset(&mut self) {
        self.outcome.take();
        let cell = self.cell.get_mut();
        cell.state = PromiseState::Pending;
        cell.continuations.clear();
    }
}

impl<T: Send + Sync + 'static> CancelTarget for Node<T> {
    fn request_cancel(&self) -> bool {
        self.settle(Outcome::Canceled).is_ok()
    }

    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Counted reference to a node; the last one hands the node back to its pool.
pub(crate) struct NodeRef<T: Send + Sync + 'static> {
    node: ManuallyDrop<Arc<Node<T>>>,
}

impl<T: Send + Sync + 'static> NodeRef<T> {
    pub(crate) fn new(node: Arc<Node<T>>) -> Self {
        Self {
            node: ManuallyDrop::new(node),
        }
    }

    pub(crate) fn arc(&self) -> &Arc<Node<T>> {
        &self.node
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl<T: Send + Sync + 'static> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.node))
    }
}

impl<T: Send + Sync + 'static> Deref for NodeRef<T> {
    type Target = Node<T>;

    fn deref(&self) -> &Node<T> {
        &self.node
    }
}

impl<T: Send + Sync + 'static> Drop for NodeRef<T> {
    fn drop(&mut self) {
        // SAFETY: `node` is taken exactly once, here, and never touched again.
        let mut node = unsafe { ManuallyDrop::take(&mut self.node) };

        let Some(pool) = node.home.upgrade() else {
            return;
        };
        // Unique strong and no weak references: nobody else can observe the
        // node, so it is safe to reset and reuse. Anything else just frees it.
        if Arc::get_mut(&mut node).is_some() {
            pool.recover(node);
        }
    }
}
