//! `PrioritySet`: an ordered, monotonically-growing vector of `HostSet`s
//! (spec.md §3/§4.2).

use super::{Host, HostSet};
use locality::Locality;

/// `(priority, hosts_added, hosts_removed)`, delivered to observers in
/// priority order per spec.md §4.2.
pub struct MembershipDelta {
    pub priority: u32,
    pub hosts_added: Vec<Host>,
    pub hosts_removed: Vec<Host>,
}

pub type Observer = Box<FnMut(&MembershipDelta)>;

/// Ordered priority tiers of upstream hosts for one cluster.
///
/// Grows on demand and never shrinks (spec.md §3: "grows monotonically
/// ... to avoid observer invalidation"), mirroring the append-only
/// `Vec`-of-endpoints idiom an `available`/`retired` endpoint pool uses,
/// generalized here into priority-indexed slots.
#[derive(Default)]
pub struct PrioritySet {
    host_sets: Vec<HostSet>,
    observers: Vec<Observer>,
}

impl PrioritySet {
    pub fn new() -> PrioritySet {
        PrioritySet {
            host_sets: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn host_sets(&self) -> &[HostSet] {
        &self.host_sets
    }

    pub fn host_set(&self, priority: u32) -> Option<&HostSet> {
        self.host_sets.get(priority as usize)
    }

    /// Grows the vector to contain `priority`, if needed. Emits no
    /// notification for the growth alone (spec.md §4.2).
    pub fn get_or_create(&mut self, priority: u32) -> &mut HostSet {
        let idx = priority as usize;
        if idx >= self.host_sets.len() {
            self.host_sets.resize_with_default(idx + 1);
        }
        &mut self.host_sets[idx]
    }

    pub fn register_observer(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    /// Atomically swaps in a freshly rebuilt `HostSet` for `priority` and
    /// notifies every observer, in registration order, with the computed
    /// delta. Per spec.md §4.2 "Observer list is append-only within a run;
    /// observers receive every delta in priority order" — callers are
    /// expected to invoke `update` for priorities in ascending order within
    /// one membership update.
    pub fn update(
        &mut self,
        priority: u32,
        hosts: Vec<Host>,
        locality_weights: Vec<(Locality, u32)>,
        local_locality: Option<&Locality>,
        added: Vec<Host>,
        removed: Vec<Host>,
    ) {
        self.get_or_create(priority)
            .rebuild(hosts, locality_weights, local_locality);

        let delta = MembershipDelta {
            priority,
            hosts_added: added,
            hosts_removed: removed,
        };
        for observer in &mut self.observers {
            observer(&delta);
        }
    }

    pub fn choose_locality(&mut self, priority: u32) -> Option<usize> {
        self.host_sets.get_mut(priority as usize)?.choose_locality()
    }
}

trait ResizeWithDefault<T> {
    fn resize_with_default(&mut self, new_len: usize);
}
impl<T: Default> ResizeWithDefault<T> for Vec<T> {
    fn resize_with_default(&mut self, new_len: usize) {
        while self.len() < new_len {
            self.push(T::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PrioritySet;
    use host::Host;
    use locality::Locality;
    use metadata::Metadata;
    use std::cell::RefCell;
    use std::net::SocketAddr;
    use std::rc::Rc;

    fn host(addr: &str) -> Host {
        Host::new(addr.parse::<SocketAddr>().unwrap(), String::new(), Locality::empty(), Metadata::new(), 1)
    }

    #[test]
    fn grows_without_truncating_existing_priorities() {
        let mut ps = PrioritySet::new();
        ps.get_or_create(0);
        ps.get_or_create(3);
        assert_eq!(ps.host_sets().len(), 4);
    }

    #[test]
    fn update_notifies_observers_with_delta() {
        let mut ps = PrioritySet::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        ps.register_observer(Box::new(move |delta| {
            seen2.borrow_mut().push((delta.priority, delta.hosts_added.len(), delta.hosts_removed.len()));
        }));

        let a = host("10.0.0.1:80");
        let b = host("10.0.0.2:80");
        ps.update(0, vec![a.clone(), b.clone()], vec![(Locality::empty(), 1)], None, vec![a, b], vec![]);

        assert_eq!(*seen.borrow(), vec![(0, 2, 0)]);
        assert_eq!(ps.host_set(0).unwrap().hosts().len(), 2);
    }
}
