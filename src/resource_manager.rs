//! Per-(cluster, priority) resource limits (spec.md §4.6/§5): atomic
//! connection/pending/request/retry counters checked against
//! runtime-overridable maxes, shared across the worker pool.
//!
//! Generalized from a per-endpoint `Rc<RefCell<_>>`-confined-to-one-worker
//! counter style (`connect_attempts`/`connect_failures`/...) into
//! `AtomicUsize`-backed counters per spec.md §5's "resource manager: atomic
//! counters ... safe for any worker to increment".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Overflow {
    Connections,
    PendingRequests,
    Requests,
    Retries,
}

#[derive(Clone, Copy, Debug)]
pub struct ResourceLimits {
    pub max_connections: usize,
    pub max_pending_requests: usize,
    pub max_requests: usize,
    pub max_retries: usize,
}

impl Default for ResourceLimits {
    fn default() -> ResourceLimits {
        ResourceLimits {
            max_connections: 1024,
            max_pending_requests: 1024,
            max_requests: 1024,
            max_retries: 3,
        }
    }
}

#[derive(Default)]
struct Counter {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Counter {
    fn new(max: usize) -> Counter {
        Counter { current: AtomicUsize::new(0), max: AtomicUsize::new(max) }
    }

    fn set_max(&self, max: usize) {
        self.max.store(max, Ordering::Relaxed);
    }

    /// Claims one unit of capacity iff doing so would not exceed the
    /// current max. The compare-exchange loop makes the
    /// "read current, check against max, commit" sequence atomic across
    /// concurrent callers on different workers.
    fn try_acquire(&self) -> bool {
        let max = self.max.load(Ordering::Relaxed);
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= max {
                return false;
            }
            if self.current.compare_and_swap(current, current + 1, Ordering::AcqRel) == current {
                return true;
            }
        }
    }

    fn release(&self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }
}

/// Connections/pending-requests/requests/retries counters for one
/// (cluster, priority) tier. Cheap to clone: internally `Arc`-shared so
/// every worker holding a handle observes the same counts.
#[derive(Clone)]
pub struct ResourceManager(Arc<Inner>);

struct Inner {
    connections: Counter,
    pending_requests: Counter,
    requests: Counter,
    retries: Counter,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits) -> ResourceManager {
        ResourceManager(Arc::new(Inner {
            connections: Counter::new(limits.max_connections),
            pending_requests: Counter::new(limits.max_pending_requests),
            requests: Counter::new(limits.max_requests),
            retries: Counter::new(limits.max_retries),
        }))
    }

    pub fn update_limits(&self, limits: ResourceLimits) {
        self.0.connections.set_max(limits.max_connections);
        self.0.pending_requests.set_max(limits.max_pending_requests);
        self.0.requests.set_max(limits.max_requests);
        self.0.retries.set_max(limits.max_retries);
    }

    pub fn try_acquire_connection(&self) -> Result<(), Overflow> {
        if self.0.connections.try_acquire() {
            Ok(())
        } else {
            Err(Overflow::Connections)
        }
    }

    pub fn release_connection(&self) {
        self.0.connections.release();
    }

    pub fn try_acquire_pending_request(&self) -> Result<(), Overflow> {
        if self.0.pending_requests.try_acquire() {
            Ok(())
        } else {
            Err(Overflow::PendingRequests)
        }
    }

    pub fn release_pending_request(&self) {
        self.0.pending_requests.release();
    }

    pub fn try_acquire_request(&self) -> Result<(), Overflow> {
        if self.0.requests.try_acquire() {
            Ok(())
        } else {
            Err(Overflow::Requests)
        }
    }

    pub fn release_request(&self) {
        self.0.requests.release();
    }

    pub fn try_acquire_retry(&self) -> Result<(), Overflow> {
        if self.0.retries.try_acquire() {
            Ok(())
        } else {
            Err(Overflow::Retries)
        }
    }

    pub fn release_retry(&self) {
        self.0.retries.release();
    }

    pub fn connections(&self) -> usize {
        self.0.connections.current()
    }

    pub fn max_connections(&self) -> usize {
        self.0.connections.max()
    }
}

#[cfg(test)]
mod tests {
    use super::{Overflow, ResourceLimits, ResourceManager};

    #[test]
    fn denies_past_max_connections() {
        let rm = ResourceManager::new(ResourceLimits { max_connections: 2, ..ResourceLimits::default() });
        assert!(rm.try_acquire_connection().is_ok());
        assert!(rm.try_acquire_connection().is_ok());
        assert_eq!(rm.try_acquire_connection(), Err(Overflow::Connections));
        rm.release_connection();
        assert!(rm.try_acquire_connection().is_ok());
    }

    #[test]
    fn shared_handle_observes_same_count() {
        let rm = ResourceManager::new(ResourceLimits { max_connections: 1, ..ResourceLimits::default() });
        let other = rm.clone();
        assert!(rm.try_acquire_connection().is_ok());
        assert_eq!(other.try_acquire_connection(), Err(Overflow::Connections));
    }

    #[test]
    fn update_limits_takes_effect_immediately() {
        let rm = ResourceManager::new(ResourceLimits { max_connections: 1, ..ResourceLimits::default() });
        rm.try_acquire_connection().unwrap();
        rm.update_limits(ResourceLimits { max_connections: 2, ..ResourceLimits::default() });
        assert!(rm.try_acquire_connection().is_ok());
    }
}
