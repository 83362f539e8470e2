//! Named stats surface (spec.md §6) on top of `tacho`, the way
//! `balancer::manager`/`server::mod` scope a `tacho::Scope` per endpoint
//! and stash the individual `Counter`/`Gauge` handles on a struct field.
//!
//! One [`ClusterStats`] is built per proxied cluster via
//! [`root`]/[`ClusterStats::new`], `prefixed` with the cluster's
//! `stat_prefix` the same way `server::mod::Unbound::new` prefixes its
//! scope with `"srv"`.

use tacho;

/// Builds the process-wide metrics root and its `Reporter`, exactly
/// mirroring `tacho::new()`'s `(Scope, Reporter)` pair; the `Reporter`
/// half is handed to [`admin::Admin`] so `/metrics` can render the latest
/// snapshot.
pub fn root() -> (tacho::Scope, tacho::Reporter) {
    tacho::new()
}

/// Renders the reporter's current snapshot as Prometheus exposition text,
/// for `admin`'s `/metrics` endpoint.
pub fn render_prometheus(reporter: &tacho::Reporter) -> String {
    tacho::prometheus::string(&reporter.peek()).unwrap_or_default()
}

/// Per-cluster counters from spec.md §6's stats surface. Field names match
/// the spec's metric names so nothing is lost translating between the two.
pub struct ClusterStats {
    pub upstream_cx_total: tacho::Counter,
    pub upstream_cx_connect_fail: tacho::Counter,
    pub upstream_cx_connect_timeout: tacho::Counter,
    pub upstream_cx_connect_attempts_exceeded: tacho::Counter,
    pub upstream_cx_overflow: tacho::Counter,
    pub upstream_cx_no_successful_host: tacho::Counter,
    pub upstream_flush_total: tacho::Counter,
    pub upstream_flush_active: tacho::Gauge,
    pub idle_timeout: tacho::Counter,
    pub downstream_cx_total: tacho::Counter,
    pub downstream_cx_no_route: tacho::Counter,
    pub membership_healthy: tacho::Gauge,
    pub update_empty: tacho::Counter,
    pub update_no_rebuild: tacho::Counter,
}

impl ClusterStats {
    /// `stat_prefix` is sanitized the way the source does: `':'` becomes
    /// `'_'` since Prometheus label/metric syntax disallows it (spec.md §9
    /// design note — the source's exact sanitizer completeness is left
    /// unspecified; this crate sanitizes only the one character the source
    /// is observed to, per DESIGN.md's open-question decision).
    pub fn new(root: &tacho::Scope, stat_prefix: &str) -> ClusterStats {
        let scope = root.clone().prefixed(sanitize(stat_prefix));
        ClusterStats {
            upstream_cx_total: scope.counter("upstream_cx_total".into()),
            upstream_cx_connect_fail: scope.counter("upstream_cx_connect_fail".into()),
            upstream_cx_connect_timeout: scope.counter("upstream_cx_connect_timeout".into()),
            upstream_cx_connect_attempts_exceeded: scope.counter("upstream_cx_connect_attempts_exceeded".into()),
            upstream_cx_overflow: scope.counter("upstream_cx_overflow".into()),
            upstream_cx_no_successful_host: scope.counter("upstream_cx_no_successful_host".into()),
            upstream_flush_total: scope.counter("upstream_flush_total".into()),
            upstream_flush_active: scope.gauge("upstream_flush_active".into()),
            idle_timeout: scope.counter("idle_timeout".into()),
            downstream_cx_total: scope.counter("downstream_cx_total".into()),
            downstream_cx_no_route: scope.counter("downstream_cx_no_route".into()),
            membership_healthy: scope.gauge("membership_healthy".into()),
            update_empty: scope.counter("update_empty".into()),
            update_no_rebuild: scope.counter("update_no_rebuild".into()),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::sanitize;

    #[test]
    fn sanitize_replaces_colons_only() {
        assert_eq!(sanitize("ingress:east-1"), "ingress_east-1");
        assert_eq!(sanitize("ingress.east-1"), "ingress.east-1");
    }
}
