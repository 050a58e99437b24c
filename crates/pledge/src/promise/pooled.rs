//! Recycling of promise nodes.
//!
//! A `PromisePool` is created when a subsystem starts and dropped when it
//! shuts down. Nodes remember their pool weakly: once the last handle to a
//! settled node is gone the node is reset to Pending and made idle again.
//! Nodes outliving their pool are simply freed.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::config::{CheckMode, RuntimeConfig};
use crate::error::PoolError;
use crate::pool::Pool;
use crate::promise::handle::{Promise, Resolver, pair};
use crate::promise::node::{Node, NodePool, NodeRef};

pub struct PromisePool<T: Send + Sync + 'static> {
    nodes: Arc<NodePool<T>>,
    checks: CheckMode,
}

impl<T: Send + Sync + 'static> PromisePool<T> {
    pub fn new(config: &RuntimeConfig) -> Self {
        let checks = config.checks;
        let spin_limit = config.spin_limit;

        let nodes = Arc::new_cyclic(|home: &Weak<NodePool<T>>| {
            let home = home.clone();
            Pool::with_config(config, move || {
                Ok(Arc::new(Node::new(checks, spin_limit, home.clone())))
            })
            .with_recover(|node: &mut Arc<Node<T>>| {
                if let Some(node) = Arc::get_mut(node) {
                    node.reset();
                }
            })
        });

        Self { nodes, checks }
    }

    /// Pool configured from the process-wide settings.
    pub fn from_current() -> Self {
        Self::new(crate::config::current())
    }

    /// A pending promise backed by a recycled node when one is idle.
    pub fn deferred(&self) -> Result<(Resolver<T>, Promise<T>), PoolError> {
        let node = self.nodes.get()?;
        Ok(pair(NodeRef::new(node)))
    }

    /// Fill the idle set with `count` fresh nodes.
    pub fn prewarm(&self, count: usize) -> Result<(), PoolError> {
        let nodes = (0..count)
            .map(|_| self.nodes.get())
            .collect::<Result<Vec<_>, _>>()?;
        for node in nodes {
            self.nodes.recover(node);
        }
        Ok(())
    }

    pub fn checks(&self) -> CheckMode {
        self.checks
    }

    pub fn idle_len(&self) -> usize {
        self.nodes.idle_len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes allocated over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.nodes.created()
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for PromisePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromisePool")
            .field("checks", &self.checks)
            .field("idle", &self.idle_len())
            .field("created", &self.created())
            .finish()
    }
}
