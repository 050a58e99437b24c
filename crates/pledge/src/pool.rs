//! Free-list of reusable instances.
//!
//! `get` pops an idle instance or builds a new one with the factory;
//! `recover` scrubs an instance with the reset hook and makes it idle again.
//! Recovering an instance that is already idle (or being recovered) is a
//! no-op, which guards against double-return bugs.
//!
//! Hooks always run outside the idle-set lock.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::RuntimeConfig;
use crate::error::PoolError;
use crate::spin::SpinLock;

type Factory<T> = Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>;
type RecoverHook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Identity of the allocation behind a pooled value.
///
/// Two values with the same identity are the same instance; the pool uses it
/// to refuse duplicate recovery. `None` means the value has no distinct
/// allocation (a boxed zero-sized type) and is never treated as a duplicate.
pub trait Recyclable {
    fn identity(&self) -> Option<usize>;
}

impl<T: ?Sized> Recyclable for Arc<T> {
    fn identity(&self) -> Option<usize> {
        Some(Arc::as_ptr(self).cast::<()>() as usize)
    }
}

impl<T: ?Sized> Recyclable for Box<T> {
    fn identity(&self) -> Option<usize> {
        // Every zero-sized box points at the same dangling address.
        if std::mem::size_of_val(&**self) == 0 {
            return None;
        }
        Some((&**self as *const T).cast::<()>() as usize)
    }
}

struct IdleSet<T> {
    items: Vec<T>,
    /// Identities of idle items plus items whose reset hook is running.
    members: HashSet<usize>,
    /// Items whose reset hook is running.
    recovering: usize,
}

pub struct Pool<T> {
    idle: SpinLock<IdleSet<T>>,
    on_create: Factory<T>,
    on_recover: Option<RecoverHook<T>>,
    capacity: usize,
    created: AtomicUsize,
}

impl<T: Recyclable> Pool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::build(Box::new(factory), usize::MAX, crate::spin::DEFAULT_SPIN_LIMIT)
    }

    /// Pool sized and tuned from the runtime configuration.
    pub fn with_config<F>(config: &RuntimeConfig, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::build(Box::new(factory), config.pool_capacity, config.spin_limit)
    }

    fn build(on_create: Factory<T>, capacity: usize, spin_limit: u32) -> Self {
        Self {
            idle: SpinLock::with_spin_limit(
                IdleSet {
                    items: Vec::new(),
                    members: HashSet::new(),
                    recovering: 0,
                },
                spin_limit,
            ),
            on_create,
            on_recover: None,
            capacity,
            created: AtomicUsize::new(0),
        }
    }

    /// Reset hook run before an instance re-enters the idle set.
    pub fn with_recover<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) + Send + Sync + 'static,
    {
        self.on_recover = Some(Box::new(hook));
        self
    }

    /// Upper bound on idle instances; extra recovered instances are dropped.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn get(&self) -> Result<T, PoolError> {
        let popped = {
            let mut idle = self.idle.lock();
            let item = idle.items.pop();
            if let Some(id) = item.as_ref().and_then(Recyclable::identity) {
                idle.members.remove(&id);
            }
            item
        };

        if let Some(item) = popped {
            return Ok(item);
        }

        let item = (self.on_create)().map_err(|source| PoolError::Construction { source })?;
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(created = total, "Pool constructed new instance");
        Ok(item)
    }

    /// Return an instance to the idle set.
    ///
    /// Returns `false` when the instance was already idle or the pool is full.
    pub fn recover(&self, mut item: T) -> bool {
        let id = item.identity();

        {
            let mut idle = self.idle.lock();
            if id.is_some_and(|id| idle.members.contains(&id)) {
                drop(idle);
                tracing::debug!(instance = ?id, "Duplicate recover ignored");
                return false;
            }
            if idle.items.len() + idle.recovering >= self.capacity {
                return false;
            }
            if let Some(id) = id {
                idle.members.insert(id);
            }
            idle.recovering += 1;
        }

        if let Some(hook) = &self.on_recover {
            hook(&mut item);
        }

        let mut idle = self.idle.lock();
        idle.recovering -= 1;
        idle.items.push(item);
        true
    }

    /// Drop every idle instance. Checked-out instances are unaffected.
    pub fn clear(&self) {
        let drained = {
            let mut idle = self.idle.lock();
            let drained = std::mem::take(&mut idle.items);
            // Instances mid-recovery keep their membership.
            for id in drained.iter().filter_map(Recyclable::identity) {
                idle.members.remove(&id);
            }
            drained
        };
        drop(drained);
    }

    pub fn is_empty(&self) -> bool {
        self.idle.lock().items.is_empty()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().items.len()
    }

    /// Instances built by the factory over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity)
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
