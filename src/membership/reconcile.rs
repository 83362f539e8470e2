//! Host reconciliation algorithm (spec.md §4.3).

use host::Host;
use locality::Locality;
use metadata::Metadata;
use std::collections::HashMap;
use std::net::SocketAddr;

/// One incoming endpoint before it's reconciled against existing `Host`s.
pub struct NewHost {
    pub address: SocketAddr,
    pub hostname: String,
    pub locality: Locality,
    pub metadata: Metadata,
    pub weight: u32,
}

pub struct Reconciliation {
    pub merged: Vec<Host>,
    pub added: Vec<Host>,
    pub removed: Vec<Host>,
}

/// Reconciles `new_hosts` against `current_hosts` by address equality,
/// per spec.md §4.3:
///
/// 1. index `current_hosts` by address;
/// 2. for each incoming host, reuse the existing `Host` (updating its
///    mutable attributes) if present, else create one and record it as
///    added;
/// 3. whatever's left in the index is removed;
/// 4. `merged` preserves the order of `new_hosts`.
pub fn reconcile(new_hosts: Vec<NewHost>, current_hosts: &[Host]) -> Reconciliation {
    let mut by_addr: HashMap<SocketAddr, Host> = current_hosts
        .iter()
        .map(|h| (h.address(), h.clone()))
        .collect();

    let mut merged = Vec::with_capacity(new_hosts.len());
    let mut added = Vec::new();

    for nh in new_hosts {
        match by_addr.remove(&nh.address) {
            Some(existing) => {
                existing.set_weight(nh.weight);
                existing.set_locality(nh.locality);
                existing.set_metadata(nh.metadata);
                existing.mark_used();
                merged.push(existing);
            }
            None => {
                let host = Host::new(nh.address, nh.hostname, nh.locality, nh.metadata, nh.weight);
                merged.push(host.clone());
                added.push(host);
            }
        }
    }

    let removed: Vec<Host> = by_addr.into_iter().map(|(_, h)| h).collect();

    Reconciliation { merged, added, removed }
}

#[cfg(test)]
mod tests {
    use super::{reconcile, NewHost};
    use host::Host;
    use locality::Locality;
    use metadata::Metadata;

    fn existing(addr: &str, weight: u32) -> Host {
        Host::new(addr.parse().unwrap(), String::new(), Locality::empty(), Metadata::new(), weight)
    }

    fn new_host(addr: &str) -> NewHost {
        NewHost {
            address: addr.parse().unwrap(),
            hostname: String::new(),
            locality: Locality::empty(),
            metadata: Metadata::new(),
            weight: 5,
        }
    }

    #[test]
    fn scenario_one_initial_and_delta() {
        let h1 = new_host("10.0.0.1:80");
        let h2 = new_host("10.0.0.2:80");
        let r1 = reconcile(vec![h1, h2], &[]);
        assert_eq!(r1.added.len(), 2);
        assert_eq!(r1.removed.len(), 0);
        assert_eq!(r1.merged.len(), 2);

        let h2b = new_host("10.0.0.2:80");
        let h3 = new_host("10.0.0.3:80");
        let r2 = reconcile(vec![h2b, h3], &r1.merged);

        assert_eq!(r2.added.iter().map(|h| h.address()).collect::<Vec<_>>(), vec!["10.0.0.3:80".parse().unwrap()]);
        assert_eq!(r2.removed.iter().map(|h| h.address()).collect::<Vec<_>>(), vec!["10.0.0.1:80".parse().unwrap()]);

        // Preserved host keeps identity: flagging the pre-delta handle is
        // visible through the post-delta handle, since both are clones of
        // the same underlying Host.
        let preserved_before = r1.merged.iter().find(|h| h.address() == "10.0.0.2:80".parse().unwrap()).unwrap();
        preserved_before.set_health_flag(::host::HealthFlags::FAILED_OUTLIER_CHECK);
        let preserved_after = r2.merged.iter().find(|h| h.address() == "10.0.0.2:80".parse().unwrap()).unwrap();
        assert!(!preserved_after.is_healthy());
    }

    #[test]
    fn preserves_flags_and_weight_pointer_identity() {
        let existing_host = existing("10.0.0.2:80", 7);
        existing_host.set_health_flag(::host::HealthFlags::FAILED_OUTLIER_CHECK);
        let current = vec![existing_host.clone()];

        let r = reconcile(vec![new_host("10.0.0.2:80")], &current);
        assert_eq!(r.merged.len(), 1);
        // Same underlying Host: health flags carried through reuse.
        assert!(!r.merged[0].is_healthy());
    }
}
