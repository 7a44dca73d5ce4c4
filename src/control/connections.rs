//! Control connection limits.
//!
//! Bounds the number of control connections served at once with RAII guards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_connections: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { max_connections: 4 }
    }
}

/// Atomic count of active control connections.
#[derive(Debug)]
pub struct ConnectionPool {
    active: AtomicUsize,
    config: ConnectionConfig,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            active: AtomicUsize::new(0),
            config,
        }
    }

    fn acquire_slot(&self) -> bool {
        loop {
            let current = self.active.load(Ordering::Relaxed);
            if current >= self.config.max_connections {
                return false;
            }
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Try to take a slot. `None` when the limit is reached.
    pub fn try_acquire(&self) -> Option<ConnectionGuard<'_>> {
        self.acquire_slot().then_some(ConnectionGuard { pool: self })
    }

    /// Like [`try_acquire`](Self::try_acquire), for guards moved into spawned tasks.
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<OwnedConnectionGuard> {
        self.acquire_slot().then(|| OwnedConnectionGuard {
            pool: Arc::clone(self),
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Releases its slot on drop.
pub struct ConnectionGuard<'a> {
    pool: &'a ConnectionPool,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

pub struct OwnedConnectionGuard {
    pool: Arc<ConnectionPool>,
}

impl Drop for OwnedConnectionGuard {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced() {
        let pool = ConnectionPool::new(ConnectionConfig { max_connections: 1 });
        let g = pool.try_acquire();
        assert!(g.is_some());
        assert!(pool.try_acquire().is_none());
        drop(g);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_owned_guard_releases() {
        let pool = Arc::new(ConnectionPool::new(ConnectionConfig { max_connections: 2 }));
        let g1 = pool.try_acquire_owned();
        let g2 = pool.try_acquire_owned();
        assert!(g1.is_some() && g2.is_some());
        assert_eq!(pool.active_count(), 2);
        assert!(pool.try_acquire_owned().is_none());
        drop(g1);
        assert_eq!(pool.active_count(), 1);
    }
}
