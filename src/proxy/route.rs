//! Route matching (spec.md §4.4 "Routing"): destination/source IP-CIDR and
//! port-range predicates, first-match-wins.
//!
//! No CIDR crate appears anywhere in the retrieved pack, so the matcher
//! below is hand-rolled arithmetic over `IpAddr` rather than reaching for
//! an unavailable dependency — this is routing logic, not the ambient
//! logging/config/serde stack the "never fall back to stdlib" rule is
//! aimed at.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

#[derive(Clone, Debug)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Result<Cidr, String> {
        let mut parts = s.splitn(2, '/');
        let addr_part = parts.next().ok_or_else(|| format!("empty CIDR: {:?}", s))?;
        let addr: IpAddr = addr_part.parse().map_err(|e| format!("invalid address in CIDR {:?}: {}", s, e))?;
        let max_len = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|e| format!("invalid prefix length in CIDR {:?}: {}", s, e))?,
            None => max_len,
        };
        if prefix_len > max_len {
            return Err(format!("prefix length {} exceeds {} for {:?}", prefix_len, max_len, s));
        }
        Ok(Cidr { network: addr, prefix_len })
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), &IpAddr::V4(addr)) => mask_eq_v4(net, addr, self.prefix_len),
            (IpAddr::V6(net), &IpAddr::V6(addr)) => mask_eq_v6(net, addr, self.prefix_len),
            _ => false,
        }
    }
}

fn mask_eq_v4(a: Ipv4Addr, b: Ipv4Addr, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let mask = !0u32 << (32 - prefix_len as u32);
    u32::from(a) & mask == u32::from(b) & mask
}

fn mask_eq_v6(a: Ipv6Addr, b: Ipv6Addr, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let mask = !0u128 << (128 - prefix_len as u32);
    u128::from(a) & mask == u128::from(b) & mask
}

/// An inclusive integer port range, parsed from comma-separated
/// `"a-b,c-d,e"` per spec.md §4.4.
#[derive(Clone, Debug)]
pub struct PortRanges(Vec<(u16, u16)>);

impl PortRanges {
    pub fn parse(s: &str) -> Result<PortRanges, String> {
        let mut ranges = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(dash) = part.find('-') {
                let (lo, hi) = part.split_at(dash);
                let hi = &hi[1..];
                let lo: u16 = lo.parse().map_err(|e| format!("invalid port range {:?}: {}", part, e))?;
                let hi: u16 = hi.parse().map_err(|e| format!("invalid port range {:?}: {}", part, e))?;
                if lo > hi {
                    return Err(format!("invalid port range {:?}: start exceeds end", part));
                }
                ranges.push((lo, hi));
            } else {
                let p: u16 = part.parse().map_err(|e| format!("invalid port {:?}: {}", part, e))?;
                ranges.push((p, p));
            }
        }
        Ok(PortRanges(ranges))
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.iter().any(|&(lo, hi)| port >= lo && port <= hi)
    }
}

/// A compiled route predicate: every populated field must match; an empty
/// list/range means "unconstrained" (matches anything) per spec.md §4.4.
#[derive(Clone, Debug, Default)]
pub struct RouteMatch {
    destination_ips: Vec<Cidr>,
    destination_ports: Option<PortRanges>,
    source_ips: Vec<Cidr>,
    source_ports: Option<PortRanges>,
}

impl RouteMatch {
    pub fn compile(destination_ip_list: &[String], destination_ports: Option<&str>, source_ip_list: &[String], source_ports: Option<&str>) -> Result<RouteMatch, String> {
        let destination_ips = destination_ip_list.iter().map(|s| Cidr::parse(s)).collect::<Result<Vec<_>, _>>()?;
        let source_ips = source_ip_list.iter().map(|s| Cidr::parse(s)).collect::<Result<Vec<_>, _>>()?;
        let destination_ports = destination_ports.map(PortRanges::parse).transpose()?;
        let source_ports = source_ports.map(PortRanges::parse).transpose()?;
        Ok(RouteMatch { destination_ips, destination_ports, source_ips, source_ports })
    }

    pub fn matches(&self, destination: &SocketAddr, source: &SocketAddr) -> bool {
        if !self.destination_ips.is_empty() && !self.destination_ips.iter().any(|c| c.contains(&destination.ip())) {
            return false;
        }
        if let Some(ref ranges) = self.destination_ports {
            if !ranges.contains(destination.port()) {
                return false;
            }
        }
        if !self.source_ips.is_empty() && !self.source_ips.iter().any(|c| c.contains(&source.ip())) {
            return false;
        }
        if let Some(ref ranges) = self.source_ports {
            if !ranges.contains(source.port()) {
                return false;
            }
        }
        true
    }
}

/// A compiled route table: first match wins, in declaration order.
pub struct RouteTable(Vec<(RouteMatch, String)>);

impl RouteTable {
    pub fn new(routes: Vec<(RouteMatch, String)>) -> RouteTable {
        RouteTable(routes)
    }

    /// Returns the destination cluster for the first matching rule, or
    /// `None` — the caller closes downstream with `StopIteration` per
    /// spec.md §4.4.
    pub fn route(&self, destination: &SocketAddr, source: &SocketAddr) -> Option<&str> {
        self.0.iter().find(|&&(ref m, _)| m.matches(destination, source)).map(|&(_, ref cluster)| cluster.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Cidr, PortRanges, RouteMatch, RouteTable};

    #[test]
    fn cidr_contains_matches_prefix() {
        let c = Cidr::parse("10.0.0.0/24").unwrap();
        assert!(c.contains(&"10.0.0.5".parse().unwrap()));
        assert!(!c.contains(&"10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn cidr_host_route_requires_exact_match() {
        let c = Cidr::parse("10.0.0.5").unwrap();
        assert!(c.contains(&"10.0.0.5".parse().unwrap()));
        assert!(!c.contains(&"10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn port_ranges_parse_mixed_list() {
        let r = PortRanges::parse("80,443,8000-8100").unwrap();
        assert!(r.contains(80));
        assert!(r.contains(8050));
        assert!(!r.contains(8101));
        assert!(!r.contains(22));
    }

    #[test]
    fn first_match_wins_in_declaration_order() {
        let narrow = RouteMatch::compile(&["10.0.0.1".to_string()], None, &[], None).unwrap();
        let wide = RouteMatch::compile(&["10.0.0.0/8".to_string()], None, &[], None).unwrap();
        let table = RouteTable::new(vec![(wide, "wide".to_string()), (narrow, "narrow".to_string())]);
        let dst = "10.0.0.1:80".parse().unwrap();
        let src = "192.168.0.1:9000".parse().unwrap();
        assert_eq!(table.route(&dst, &src), Some("wide"));
    }

    #[test]
    fn no_match_returns_none() {
        let m = RouteMatch::compile(&["10.0.0.0/24".to_string()], None, &[], None).unwrap();
        let table = RouteTable::new(vec![(m, "backend".to_string())]);
        let dst = "192.168.0.1:80".parse().unwrap();
        let src = "10.0.0.1:9000".parse().unwrap();
        assert_eq!(table.route(&dst, &src), None);
    }
}
