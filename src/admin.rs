//! The admin HTTP surface (spec.md §6 "Admin interface"): `GET /metrics`
//! renders the latest Prometheus snapshot, `GET /clusters` reports each
//! configured cluster's membership health and connection-resource usage,
//! `POST /shutdown` starts a graceful drain. Grounded directly on the
//! `hyper::server::Service` shape a lightweight sidecar admin endpoint
//! uses: no routing crate, just a match on `(method, path)`.
//!
//! Runs on its own OS thread rather than sharing the proxies' reactor (see
//! `app::run`), so its shared state is `Arc`/`Mutex`-based rather than the
//! `Rc`/`RefCell` the rest of this crate uses — this is the one surface
//! that has to cross a thread boundary.

use futures::{future, Future};
use hyper::header::ContentLength;
use hyper::server::{Request, Response, Service};
use hyper::{self, Get, Post, StatusCode};
use serde_json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use app::Closer;

/// One cluster's point-in-time health, published by `app::run`'s periodic
/// stats tick alongside the Prometheus snapshot. Surfaces the
/// `membership_healthy` gauge `stats::ClusterStats` already tracks, plus
/// the resource manager's live connection count, as structured JSON
/// instead of only Prometheus exposition text.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterSnapshot {
    pub name: String,
    pub healthy_hosts: usize,
    pub connections: usize,
    pub max_connections: usize,
}

#[derive(Clone)]
pub struct Admin {
    prometheus: Arc<Mutex<String>>,
    clusters: Arc<Mutex<Vec<ClusterSnapshot>>>,
    closer: Arc<Mutex<Option<Closer>>>,
    grace: Duration,
}

impl Admin {
    pub fn new(prometheus: Arc<Mutex<String>>, clusters: Arc<Mutex<Vec<ClusterSnapshot>>>, closer: Closer, grace: Duration) -> Admin {
        Admin { prometheus, clusters, closer: Arc::new(Mutex::new(Some(closer))), grace }
    }
}

impl Service for Admin {
    type Request = Request;
    type Response = Response;
    type Error = hyper::Error;
    type Future = Box<Future<Item = Response, Error = hyper::Error>>;

    fn call(&self, req: Request) -> Self::Future {
        match (req.method(), req.path()) {
            (&Get, "/metrics") => {
                let body = self.prometheus.lock().unwrap().clone();
                let rsp = Response::new().with_status(StatusCode::Ok).with_header(ContentLength(body.len() as u64)).with_body(body);
                Box::new(future::ok(rsp))
            }
            (&Get, "/clusters") => {
                let snapshot = self.clusters.lock().unwrap().clone();
                let body = serde_json::to_string(&snapshot).unwrap_or_else(|_| "[]".to_string());
                let rsp = Response::new().with_status(StatusCode::Ok).with_header(ContentLength(body.len() as u64)).with_body(body);
                Box::new(future::ok(rsp))
            }
            (&Post, "/shutdown") => {
                if let Some(closer) = self.closer.lock().unwrap().take() {
                    info!("shutting down via admin API");
                    if closer.send(Instant::now() + self.grace).is_err() {
                        debug!("closer not being waited upon");
                    }
                }
                Box::new(future::ok(Response::new().with_status(StatusCode::Ok)))
            }
            _ => Box::new(future::ok(Response::new().with_status(StatusCode::NotFound))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Admin, ClusterSnapshot};
    use futures::sync::oneshot;
    use futures::Future;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn admin_with(prometheus: &str, clusters: Vec<ClusterSnapshot>) -> (Admin, oneshot::Receiver<::std::time::Instant>) {
        let (tx, rx) = oneshot::channel();
        let admin = Admin::new(
            Arc::new(Mutex::new(prometheus.to_string())),
            Arc::new(Mutex::new(clusters)),
            tx,
            Duration::from_secs(1),
        );
        (admin, rx)
    }

    #[test]
    fn holds_the_latest_prometheus_and_cluster_snapshots() {
        let snapshot =
            vec![ClusterSnapshot { name: "web".into(), healthy_hosts: 2, connections: 1, max_connections: 1024 }];
        let (admin, _rx) = admin_with("upstream_cx_total 3\n", snapshot.clone());
        assert_eq!(*admin.prometheus.lock().unwrap(), "upstream_cx_total 3\n");
        assert_eq!(admin.clusters.lock().unwrap().len(), 1);
        assert_eq!(admin.clusters.lock().unwrap()[0].name, "web");
    }

    #[test]
    fn cluster_snapshot_serializes_with_the_field_names_the_admin_api_promises() {
        let snapshot =
            vec![ClusterSnapshot { name: "web".into(), healthy_hosts: 2, connections: 1, max_connections: 1024 }];
        let body = ::serde_json::to_string(&snapshot).unwrap();
        assert!(body.contains("\"name\":\"web\""));
        assert!(body.contains("\"healthy_hosts\":2"));
        assert!(body.contains("\"connections\":1"));
        assert!(body.contains("\"max_connections\":1024"));
    }

    #[test]
    fn taking_the_closer_twice_only_sends_once() {
        let (admin, rx) = admin_with("", Vec::new());
        {
            let closer = admin.closer.lock().unwrap().take();
            assert!(closer.is_some());
            closer.unwrap().send(::std::time::Instant::now() + Duration::from_secs(5)).unwrap();
        }
        assert!(admin.closer.lock().unwrap().take().is_none());
        assert!(rx.wait().is_ok());
    }
}
