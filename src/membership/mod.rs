//! The Membership Engine (spec.md §4.1): consumes an endpoint-discovery
//! stream for one cluster and drives a [`PrioritySet`] via delta
//! computation.
//!
//! Grounded on `balancer::manager::Managing` — a `Future` that polls a
//! `Resolve` stream and folds updates into an `Endpoints` pool — and on
//! `resolver::namerd` for the discovery transport shape (see
//! [`discovery`]). The staging-by-priority / per-priority delta /
//! subscription-errors-don't-clear-membership rules come straight from
//! spec.md §4.1.

pub mod assignment;
pub mod discovery;
mod reconcile;

use self::assignment::{validate, ClusterLoadAssignment, HealthStatus, LocalityLbEndpoints};
use self::reconcile::{reconcile, NewHost};
use cluster_name::ClusterName;
use futures::{Async, Poll, Stream};
use host::{HealthFlags, Host, PrioritySet};
use locality::Locality;
use std::collections::HashMap;

#[derive(Default)]
pub struct Stats {
    pub updates: u64,
    pub empty_updates: u64,
    pub no_rebuild_updates: u64,
    pub validation_failures: u64,
    pub subscription_errors: u64,
}

/// Drives one cluster's [`PrioritySet`] from a stream of
/// `ClusterLoadAssignment`s.
pub struct MembershipEngine<S> {
    cluster: ClusterName,
    is_local_cluster: bool,
    local_locality: Option<Locality>,
    source: S,
    priorities: PrioritySet,
    // Per-priority locality-weight map from the last applied update, used
    // to detect "locality weights changed with no address delta" per
    // spec.md §4.1.
    last_locality_weights: HashMap<u32, Vec<(Locality, u32)>>,
    stats: Stats,
}

impl<S> MembershipEngine<S>
where
    S: Stream<Item = Result<ClusterLoadAssignment, discovery::DiscoveryError>, Error = ()>,
{
    pub fn new(cluster: ClusterName, is_local_cluster: bool, source: S) -> MembershipEngine<S> {
        MembershipEngine {
            cluster,
            is_local_cluster,
            local_locality: None,
            source,
            priorities: PrioritySet::new(),
            last_locality_weights: HashMap::new(),
            stats: Stats::default(),
        }
    }

    pub fn set_local_locality(&mut self, locality: Locality) {
        self.local_locality = Some(locality);
    }

    pub fn priorities(&self) -> &PrioritySet {
        &self.priorities
    }

    pub fn priorities_mut(&mut self) -> &mut PrioritySet {
        &mut self.priorities
    }

    pub fn register_observer(&mut self, observer: ::host::Observer) {
        self.priorities.register_observer(observer);
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Polls the discovery source and applies at most one update per call
    /// (the caller's event-loop tick drives repeated polling). Returns
    /// `Ok(true)` if an update was applied, `Ok(false)` if the source had
    /// nothing ready, `Err` only for a fatal (non-subscription) condition —
    /// per spec.md §4.1/§7, subscription errors never propagate as `Err`;
    /// they complete initialization with current state instead.
    pub fn poll_once(&mut self) -> Poll<bool, ()> {
        match self.source.poll()? {
            Async::NotReady => Ok(Async::NotReady),
            Async::Ready(None) => Ok(Async::Ready(false)),
            Async::Ready(Some(Err(e))) => {
                warn!("{}: subscription error, completing with current state: {}", self.cluster, e);
                self.stats.subscription_errors += 1;
                Ok(Async::Ready(true))
            }
            Async::Ready(Some(Ok(assignment))) => {
                if let Err(e) = validate(&assignment, self.cluster.as_str()) {
                    self.stats.validation_failures += 1;
                    error!("{}: rejecting malformed update: {}", self.cluster, e);
                    return Ok(Async::Ready(true));
                }
                self.apply(assignment)?;
                Ok(Async::Ready(true))
            }
        }
    }

    fn apply(&mut self, assignment: ClusterLoadAssignment) -> Result<(), ()> {
        self.stats.updates += 1;

        if assignment.endpoints.is_empty() {
            debug!("{}: empty update", self.cluster);
            self.stats.empty_updates += 1;
            return Ok(());
        }

        // Stage per-priority (new_hosts, health statuses, locality_weights)
        // honoring input order for both host and locality-bucket ordering,
        // and merging repeated `priority` entries (spec.md §9 open
        // question: uniqueness across LocalityLbEndpoints entries at one
        // priority is not enforced; the observed/implemented behavior
        // merges them).
        let mut staged: Vec<(u32, Vec<NewHost>, Vec<HealthStatus>, Vec<(Locality, u32)>)> = Vec::new();
        for group in &assignment.endpoints {
            if self.is_local_cluster && group.priority > 0 {
                error!("{}: local cluster rejects non-zero priority {}", self.cluster, group.priority);
                self.stats.validation_failures += 1;
                return Ok(());
            }
            let weight = group.load_balancing_weight.unwrap_or(1);
            let (new_hosts, statuses) = to_new_hosts(group);
            match staged.iter_mut().find(|&&mut (p, _, _, _)| p == group.priority) {
                Some(&mut (_, ref mut hosts, ref mut hs, ref mut weights)) => {
                    hosts.extend(new_hosts);
                    hs.extend(statuses);
                    weights.push((group.locality.clone(), weight));
                }
                None => staged.push((group.priority, new_hosts, statuses, vec![(group.locality.clone(), weight)])),
            }
        }

        // Any priority present in current state but absent from this
        // update is emptied (spec.md §4.1).
        let mut touched: Vec<u32> = staged.iter().map(|&(p, _, _, _)| p).collect();
        let existing_priorities = self.priorities.host_sets().len() as u32;
        for p in 0..existing_priorities {
            if !touched.contains(&p) && self.priorities.host_set(p).map(|hs| !hs.hosts().is_empty()).unwrap_or(false) {
                staged.push((p, Vec::new(), Vec::new(), Vec::new()));
                touched.push(p);
            }
        }
        staged.sort_by_key(|&(p, _, _, _)| p);

        for (priority, new_hosts, statuses, locality_weights) in staged {
            let current: Vec<Host> = self
                .priorities
                .host_set(priority)
                .map(|hs| hs.hosts().to_vec())
                .unwrap_or_default();

            let weights_changed = self.last_locality_weights.get(&priority).map(|w| *w != locality_weights).unwrap_or(!locality_weights.is_empty());

            let r = reconcile(new_hosts, &current);
            let no_address_delta = r.added.is_empty() && r.removed.is_empty();

            if no_address_delta && !weights_changed {
                self.stats.no_rebuild_updates += 1;
                continue;
            }

            for (host, status) in r.merged.iter().zip(statuses.iter()) {
                match health_flag_for(*status) {
                    Some(flag) => host.set_health_flag(flag),
                    None => host.clear_health_flag(HealthFlags::FAILED_EDS_HEALTH),
                }
            }

            self.last_locality_weights.insert(priority, locality_weights.clone());
            self.priorities.update(priority, r.merged, locality_weights, self.local_locality.as_ref(), r.added, r.removed);
        }

        Ok(())
    }
}

fn to_new_hosts(group: &LocalityLbEndpoints) -> (Vec<NewHost>, Vec<HealthStatus>) {
    let mut hosts = Vec::with_capacity(group.lb_endpoints.len());
    let mut statuses = Vec::with_capacity(group.lb_endpoints.len());
    for ep in &group.lb_endpoints {
        let addr = match ep.endpoint.address.socket_address.to_socket_addr() {
            Ok(a) => a,
            Err(e) => {
                error!("skipping endpoint: {}", e);
                continue;
            }
        };
        hosts.push(NewHost {
            address: addr,
            hostname: String::new(),
            locality: group.locality.clone(),
            metadata: ep.metadata.clone().into(),
            weight: group.load_balancing_weight.unwrap_or(1),
        });
        statuses.push(ep.health_status);
    }
    (hosts, statuses)
}

/// Maps wire health status to the engine's health-flag representation,
/// applied to freshly merged hosts after reconciliation.
pub fn health_flag_for(status: HealthStatus) -> Option<HealthFlags> {
    match status {
        HealthStatus::Unhealthy => Some(HealthFlags::FAILED_EDS_HEALTH),
        HealthStatus::Healthy | HealthStatus::Unknown | HealthStatus::Draining => None,
    }
}

#[cfg(test)]
mod tests {
    use super::assignment::{Address, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints, SocketAddress};
    use super::discovery::TestFeed;
    use super::MembershipEngine;
    use cluster_name::ClusterName;
    use futures::{Async, Stream};
    use locality::Locality;
    use std::collections::HashMap;

    fn assignment(cluster: &str, endpoints: Vec<(&str, u16)>, priority: u32) -> ClusterLoadAssignment {
        ClusterLoadAssignment {
            cluster_name: cluster.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                locality: Locality::empty(),
                priority,
                load_balancing_weight: None,
                lb_endpoints: endpoints
                    .into_iter()
                    .map(|(ip, port)| LbEndpoint {
                        endpoint: Endpoint {
                            address: Address {
                                socket_address: SocketAddress { address: ip.to_string(), port_value: port },
                            },
                        },
                        metadata: HashMap::new(),
                        health_status: Default::default(),
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn scenario_one_membership_delta() {
        let mut feed = TestFeed::new();
        feed.push(assignment("c", vec![("10.0.0.1", 80), ("10.0.0.2", 80)], 0));
        feed.push(assignment("c", vec![("10.0.0.2", 80), ("10.0.0.3", 80)], 0));

        let mut engine = MembershipEngine::new(ClusterName::from("c"), false, feed);

        assert_eq!(engine.poll_once().unwrap(), Async::Ready(true));
        let hs = engine.priorities().host_set(0).unwrap();
        assert_eq!(hs.hosts().len(), 2);

        assert_eq!(engine.poll_once().unwrap(), Async::Ready(true));
        let hs = engine.priorities().host_set(0).unwrap();
        let addrs: Vec<_> = hs.hosts().iter().map(|h| h.address().to_string()).collect();
        assert_eq!(addrs, vec!["10.0.0.2:80", "10.0.0.3:80"]);
    }

    #[test]
    fn rejects_nonzero_priority_for_local_cluster() {
        let mut feed = TestFeed::new();
        feed.push(assignment("c", vec![("10.0.0.1", 80)], 1));
        let mut engine = MembershipEngine::new(ClusterName::from("c"), true, feed);
        assert_eq!(engine.poll_once().unwrap(), Async::Ready(true));
        assert_eq!(engine.stats().validation_failures, 1);
        assert!(engine.priorities().host_sets().is_empty() || engine.priorities().host_set(1).is_none());
    }

    #[test]
    fn empty_update_does_not_clear_hosts() {
        let mut feed = TestFeed::new();
        feed.push(assignment("c", vec![("10.0.0.1", 80)], 0));
        feed.push(ClusterLoadAssignment { cluster_name: "c".to_string(), endpoints: vec![] });
        let mut engine = MembershipEngine::new(ClusterName::from("c"), false, feed);
        engine.poll_once().unwrap();
        assert_eq!(engine.priorities().host_set(0).unwrap().hosts().len(), 1);
        engine.poll_once().unwrap();
        assert_eq!(engine.stats().empty_updates, 1);
        assert_eq!(engine.priorities().host_set(0).unwrap().hosts().len(), 1);
    }

    #[test]
    fn subscription_error_completes_without_clearing() {
        use super::discovery::DiscoveryError;
        use std::io;

        let mut feed = TestFeed::new();
        feed.push(assignment("c", vec![("10.0.0.1", 80)], 0));
        feed.push_error(DiscoveryError::Io(io::Error::new(io::ErrorKind::Other, "boom")));
        let mut engine = MembershipEngine::new(ClusterName::from("c"), false, feed);
        engine.poll_once().unwrap();
        engine.poll_once().unwrap();
        assert_eq!(engine.stats().subscription_errors, 1);
        assert_eq!(engine.priorities().host_set(0).unwrap().hosts().len(), 1);
    }
}
