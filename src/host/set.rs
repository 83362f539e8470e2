//! `HostSet`: the hosts at one priority tier (spec.md §3/§4.2).

use super::scheduler::LocalityScheduler;
use super::Host;
use locality::Locality;

/// The hosts known at a single priority level.
///
/// Grounded on `balancer::manager::Endpoints` (`available`/`retired` maps
/// keyed by address) generalized into the ordered, locality-partitioned
/// shape spec.md §3 requires: `hosts`/`healthy_hosts` stay index-aligned
/// with `hosts_per_locality`/`healthy_hosts_per_locality`/
/// `locality_weights`, and a `LocalityScheduler` is rebuilt from the
/// effective per-locality weight whenever the set changes.
#[derive(Default)]
pub struct HostSet {
    hosts: Vec<Host>,
    healthy_hosts: Vec<Host>,
    localities: Vec<Locality>,
    hosts_per_locality: Vec<Vec<Host>>,
    healthy_hosts_per_locality: Vec<Vec<Host>>,
    locality_weights: Vec<u32>,
    scheduler: LocalityScheduler,
}

impl HostSet {
    pub fn empty() -> HostSet {
        HostSet {
            hosts: Vec::new(),
            healthy_hosts: Vec::new(),
            localities: Vec::new(),
            hosts_per_locality: Vec::new(),
            healthy_hosts_per_locality: Vec::new(),
            locality_weights: Vec::new(),
            scheduler: LocalityScheduler::new(&[]),
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn healthy_hosts(&self) -> &[Host] {
        &self.healthy_hosts
    }

    pub fn localities(&self) -> &[Locality] {
        &self.localities
    }

    pub fn hosts_per_locality(&self) -> &[Vec<Host>] {
        &self.hosts_per_locality
    }

    pub fn healthy_hosts_per_locality(&self) -> &[Vec<Host>] {
        &self.healthy_hosts_per_locality
    }

    pub fn locality_weights(&self) -> &[u32] {
        &self.locality_weights
    }

    /// Rebuilds the partitioned views and locality scheduler from a flat,
    /// already-ordered host list (ordering is preserved verbatim per
    /// spec.md §4.1 "host ordering inside a priority follows input order").
    ///
    /// `locality_of` maps each host to the locality bucket it belongs to;
    /// bucket order follows first-appearance order, with `local_locality`
    /// (if `Some` and present in the input) forced to bucket 0 per spec.md
    /// §4.1.
    pub fn rebuild(
        &mut self,
        hosts: Vec<Host>,
        locality_weights: Vec<(Locality, u32)>,
        local_locality: Option<&Locality>,
    ) {
        let mut localities: Vec<Locality> = Vec::new();
        let mut weights: Vec<u32> = Vec::new();
        for &(ref loc, w) in &locality_weights {
            localities.push(loc.clone());
            weights.push(w);
        }
        if let Some(local) = local_locality {
            if let Some(pos) = localities.iter().position(|l| l == local) {
                if pos != 0 {
                    localities.swap(0, pos);
                    weights.swap(0, pos);
                }
            }
        }

        let mut hosts_per_locality: Vec<Vec<Host>> = vec![Vec::new(); localities.len()];
        let mut healthy_per_locality: Vec<Vec<Host>> = vec![Vec::new(); localities.len()];
        let mut healthy_hosts = Vec::with_capacity(hosts.len());

        for host in &hosts {
            let loc = host.locality();
            let idx = localities.iter().position(|l| *l == loc);
            if host.is_healthy() {
                healthy_hosts.push(host.clone());
            }
            if let Some(idx) = idx {
                hosts_per_locality[idx].push(host.clone());
                if host.is_healthy() {
                    healthy_per_locality[idx].push(host.clone());
                }
            }
        }

        let effective: Vec<f64> = (0..localities.len())
            .map(|i| {
                let total = hosts_per_locality[i].len();
                if total == 0 {
                    0.0
                } else {
                    let healthy = healthy_per_locality[i].len();
                    f64::from(weights[i]) * (healthy as f64) / (total as f64)
                }
            })
            .collect();

        self.hosts = hosts;
        self.healthy_hosts = healthy_hosts;
        self.localities = localities;
        self.hosts_per_locality = hosts_per_locality;
        self.healthy_hosts_per_locality = healthy_per_locality;
        self.locality_weights = weights;
        self.scheduler = LocalityScheduler::new(&effective);
    }

    /// Chooses a locality index via the weighted scheduler, or `None` if
    /// total effective weight is zero (caller falls back to flat selection
    /// per spec.md §4.1).
    pub fn choose_locality(&mut self) -> Option<usize> {
        self.scheduler.pick()
    }
}

#[cfg(test)]
mod tests {
    use super::HostSet;
    use host::Host;
    use locality::Locality;
    use metadata::Metadata;
    use std::net::SocketAddr;

    fn host(addr: &str, loc: Locality) -> Host {
        let h = Host::new(addr.parse::<SocketAddr>().unwrap(), String::new(), loc, Metadata::new(), 1);
        h
    }

    #[test]
    fn healthy_subset_excludes_flagged_hosts() {
        let mut set = HostSet::empty();
        let a = host("10.0.0.1:80", Locality::empty());
        let b = host("10.0.0.2:80", Locality::empty());
        b.set_health_flag(::host::HealthFlags::FAILED_ACTIVE_HC);
        set.rebuild(vec![a.clone(), b.clone()], vec![(Locality::empty(), 1)], None);
        assert_eq!(set.healthy_hosts().len(), 1);
        assert_eq!(set.healthy_hosts()[0].address(), a.address());
    }

    #[test]
    fn local_locality_is_bucket_zero() {
        let mut set = HostSet::empty();
        let east = Locality::new("us", "east", "");
        let west = Locality::new("us", "west", "");
        let a = host("10.0.0.1:80", east.clone());
        let b = host("10.0.0.2:80", west.clone());
        set.rebuild(
            vec![a, b],
            vec![(east.clone(), 1), (west.clone(), 1)],
            Some(&west),
        );
        assert_eq!(set.localities()[0], west);
    }

    #[test]
    fn zero_effective_weight_never_selected() {
        let mut set = HostSet::empty();
        let a = host("10.0.0.1:80", Locality::new("a", "", ""));
        set.rebuild(vec![a], vec![(Locality::new("a", "", ""), 0)], None);
        assert_eq!(set.choose_locality(), None);
    }
}
