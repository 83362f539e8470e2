//! Process wiring (spec.md §6 "Running the process"): turns an `AppConfig`
//! into running proxies plus an admin HTTP surface.
//!
//! Grounded on `main.rs`'s split between "build everything up front" and
//! "run it across two threads": one `tokio_core::reactor::Core` on this
//! thread drives every proxy's listener and membership-poll loop, while
//! the admin surface gets its own dedicated OS thread, spawned with
//! `thread::Builder::new()` exactly the way `main.rs` spawns its own
//! admin thread rather than sharing a reactor with the proxy work.
//! Unlike `main.rs`, there's no separate `Loader`/`Runner`/`Running`
//! staged-handle-injection ceremony here: a single reactor has no need to
//! defer `Handle` injection across build stages, so `run` just takes the
//! config and wires everything against one `Handle` directly.

use futures::sync::oneshot;
use futures::{future, Async, Future, Poll, Stream};
use hyper::server::Http;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio_core::net::{Incoming, TcpListener, TcpStream};
use tokio_core::reactor::{Core, Handle};
use tokio_io::AsyncRead;
use tokio_timer::Timer;

use admin::{Admin, ClusterSnapshot};
use buffer::Buffer;
use cluster_name::ClusterName;
use config::{AppConfig, DestinationConfig, ProxyConfig};
use host::Host;
use membership::discovery::Polled;
use membership::MembershipEngine;
use proxy::connector::{pick_host, ConnectAttempt, ConnectError};
use proxy::duplex::{Duplex, HalfDuplex};
use proxy::route::RouteTable;
use proxy::{ProxyFilter, ResponseFlag};
use resource_manager::{ResourceLimits, ResourceManager};
use stats::{self, ClusterStats};
use tacho;

/// Sent to the receiver the admin `/shutdown` handler holds; the value is
/// the deadline by which a graceful drain should finish.
pub type Closer = oneshot::Sender<Instant>;

/// This wiring layer only ever asks for priority 0 when picking a host for
/// a live connection; `host`/`membership` remain fully general over
/// priority tiers, but traffic-splitting across tiers at the connection
/// level is out of scope here.
const PRIORITY: u32 = 0;

struct Cluster {
    name: ClusterName,
    engine: Rc<RefCell<MembershipEngine<Polled>>>,
    resources: ResourceManager,
    stats: Rc<ClusterStats>,
    connect_timeout: Duration,
    max_connect_attempts: u32,
}

enum Destination {
    Fixed(String),
    Routed(RouteTable),
}

struct ProxyRuntime {
    proxy_stats: Rc<ClusterStats>,
    clusters: HashMap<String, Rc<Cluster>>,
    destination: Destination,
    idle_timeout: Option<Duration>,
    buffer_size: usize,
}

impl ProxyRuntime {
    fn route(&self, destination: &SocketAddr, source: &SocketAddr) -> Option<&Rc<Cluster>> {
        let name = match self.destination {
            Destination::Fixed(ref name) => Some(name.as_str()),
            Destination::Routed(ref table) => table.route(destination, source),
        };
        name.and_then(|n| self.clusters.get(n))
    }
}

fn resource_limits(cfg: &ProxyConfig) -> ResourceLimits {
    match cfg.resource_limits {
        None => ResourceLimits::default(),
        Some(ref r) => {
            let defaults = ResourceLimits::default();
            ResourceLimits {
                max_connections: r.max_connections.unwrap_or(defaults.max_connections),
                max_pending_requests: r.max_pending_requests.unwrap_or(defaults.max_pending_requests),
                max_requests: r.max_requests.unwrap_or(defaults.max_requests),
                max_retries: r.max_retries.unwrap_or(defaults.max_retries),
            }
        }
    }
}

/// Distinct upstream cluster names a proxy config needs discovery for: one
/// for a fixed destination, or the deduplicated set named across its route
/// table (spec.md §4.4 "Routing").
fn cluster_names(destination: &DestinationConfig) -> Vec<String> {
    match *destination {
        DestinationConfig::Cluster { ref cluster } => vec![cluster.clone()],
        DestinationConfig::Routes { ref routes } => {
            let mut names = Vec::new();
            for route in routes {
                if !names.contains(&route.cluster) {
                    names.push(route.cluster.clone());
                }
            }
            names
        }
    }
}

fn build_cluster(name: &str, cfg: &ProxyConfig, handle: &Handle, timer: &Timer, stats_root: &tacho::Scope) -> Rc<Cluster> {
    let source = Polled::new(&cfg.discovery.base_url, name, Duration::from_millis(cfg.discovery.poll_interval_ms), handle, timer);
    let is_local = cfg.discovery.is_local_cluster;
    let engine = MembershipEngine::new(ClusterName::from(name), is_local, source);
    let cluster_stats = ClusterStats::new(stats_root, &format!("{}.{}", cfg.stat_prefix, name));
    Rc::new(Cluster {
        name: ClusterName::from(name),
        engine: Rc::new(RefCell::new(engine)),
        resources: ResourceManager::new(resource_limits(cfg)),
        stats: Rc::new(cluster_stats),
        connect_timeout: cfg.connect_timeout(),
        max_connect_attempts: cfg.max_connect_attempts,
    })
}

fn build_runtime(cfg: &ProxyConfig, handle: &Handle, timer: &Timer, stats_root: &tacho::Scope, buffer_size: usize) -> io::Result<Rc<ProxyRuntime>> {
    let names = cluster_names(&cfg.destination);
    let mut clusters = HashMap::new();
    for name in &names {
        clusters.insert(name.clone(), build_cluster(name, cfg, handle, timer, stats_root));
    }

    let destination = match cfg.destination {
        DestinationConfig::Cluster { ref cluster } => Destination::Fixed(cluster.clone()),
        DestinationConfig::Routes { ref routes } => {
            let mut compiled = Vec::with_capacity(routes.len());
            for route in routes {
                let (m, cluster) = route.compile().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}", e)))?;
                compiled.push((m, cluster));
            }
            Destination::Routed(RouteTable::new(compiled))
        }
    };

    let proxy_stats = Rc::new(ClusterStats::new(stats_root, &cfg.stat_prefix));
    Ok(Rc::new(ProxyRuntime { proxy_stats, clusters, destination, idle_timeout: cfg.idle_timeout(), buffer_size }))
}

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// The outcome of picking a host and connecting to it, with retries spent
/// internally against the owning cluster's `max_connect_attempts`. Every
/// variant hands the downstream socket back to the caller — `Connecting`
/// owns it for the duration of the attempt purely to watch for a remote
/// close, never to proxy through it.
enum Connected {
    Ok(TcpStream, TcpStream, Buffer),
    Refused(TcpStream, ResponseFlag),
    /// Downstream hung up (or errored) before an upstream connection was
    /// established; nothing to proxy or log a response flag for.
    DownstreamGone,
}

enum ConnectingState {
    Picking,
    Attempting(ConnectAttempt),
    Done,
}

/// Drives [`ProxyFilter`]'s connect/retry bookkeeping against real
/// sockets: picks a host, attempts a bounded connect, and on failure
/// either retries (within budget) or gives up with the response flag the
/// filter decides on (spec.md §4.4 "Connecting"). Also watches the
/// downstream socket for a remote close while the attempt is in flight
/// (spec.md's "Any" state row applies to `Connecting` too), buffering any
/// bytes the client sends early so they aren't lost once piping starts.
struct Connecting {
    cluster: Rc<Cluster>,
    handle: Handle,
    timer: Timer,
    filter: ProxyFilter,
    state: ConnectingState,
    pending_host: Option<Host>,
    downstream: Option<TcpStream>,
    primed: Buffer,
    resource_acquired: bool,
}

impl Connecting {
    fn new(cluster: Rc<Cluster>, handle: Handle, timer: Timer, downstream: TcpStream) -> Connecting {
        let mut filter = ProxyFilter::new(cluster.max_connect_attempts);
        filter.on_downstream_connected();
        Connecting {
            cluster,
            handle,
            timer,
            filter,
            state: ConnectingState::Picking,
            pending_host: None,
            downstream: Some(downstream),
            primed: Buffer::new(),
            resource_acquired: false,
        }
    }

    /// Non-blocking check for downstream EOF or error, stashing any bytes
    /// read (a client that starts sending before the connect finishes)
    /// into `self.primed` instead of discarding them. Returns `true` once
    /// the downstream side is gone.
    fn poll_downstream_gone(&mut self) -> bool {
        let down = self.downstream.as_mut().expect("downstream polled after being taken");
        let mut scratch = [0u8; 2048];
        loop {
            match down.read(&mut scratch) {
                Ok(0) => return true,
                Ok(n) => self.primed.append(&scratch[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(_) => return true,
            }
        }
    }

    fn take_downstream(&mut self) -> TcpStream {
        self.downstream.take().expect("downstream taken twice")
    }
}

impl Future for Connecting {
    type Item = Connected;
    type Error = ();

    fn poll(&mut self) -> Poll<Connected, ()> {
        loop {
            if self.poll_downstream_gone() {
                if self.resource_acquired {
                    self.cluster.resources.release_connection();
                }
                self.filter.on_downstream_remote_close();
                return Ok(Async::Ready(Connected::DownstreamGone));
            }
            match mem::replace(&mut self.state, ConnectingState::Done) {
                ConnectingState::Picking => {
                    let host = {
                        let mut engine = self.cluster.engine.borrow_mut();
                        pick_host(engine.priorities_mut(), PRIORITY)
                    };
                    let host = match host {
                        Some(h) => h,
                        None => {
                            self.filter.on_no_healthy_host();
                            self.cluster.stats.upstream_cx_no_successful_host.incr(1);
                            let down = self.take_downstream();
                            return Ok(Async::Ready(Connected::Refused(down, ResponseFlag::NoHealthyHost)));
                        }
                    };
                    if self.cluster.resources.try_acquire_connection().is_err() {
                        self.filter.on_connect_overflow();
                        self.cluster.stats.upstream_cx_overflow.incr(1);
                        let down = self.take_downstream();
                        return Ok(Async::Ready(Connected::Refused(down, ResponseFlag::Overflow)));
                    }
                    self.resource_acquired = true;
                    self.cluster.stats.upstream_cx_total.incr(1);
                    let attempt = ConnectAttempt::new(&host.address(), &self.handle, &self.timer, self.cluster.connect_timeout);
                    self.pending_host = Some(host);
                    self.state = ConnectingState::Attempting(attempt);
                }
                ConnectingState::Attempting(mut attempt) => match attempt.poll() {
                    Ok(Async::NotReady) => {
                        self.state = ConnectingState::Attempting(attempt);
                        return Ok(Async::NotReady);
                    }
                    Ok(Async::Ready(stream)) => {
                        if let Some(host) = self.pending_host.take() {
                            host.record_connect_success();
                        }
                        self.filter.on_upstream_connected();
                        let down = self.take_downstream();
                        let primed = mem::replace(&mut self.primed, Buffer::new());
                        return Ok(Async::Ready(Connected::Ok(down, stream, primed)));
                    }
                    Err(e) => {
                        self.cluster.resources.release_connection();
                        self.resource_acquired = false;
                        let timed_out = match e {
                            ConnectError::TimedOut => true,
                            ConnectError::Io(_) => false,
                        };
                        if let Some(host) = self.pending_host.take() {
                            host.record_connect_failure();
                        }
                        self.cluster.stats.upstream_cx_connect_fail.incr(1);
                        if timed_out {
                            self.cluster.stats.upstream_cx_connect_timeout.incr(1);
                            self.filter.on_connect_timeout();
                        } else {
                            self.filter.on_upstream_closed_while_connecting();
                        }
                        if self.filter.is_closed() {
                            self.cluster.stats.upstream_cx_connect_attempts_exceeded.incr(1);
                            let down = self.take_downstream();
                            return Ok(Async::Ready(Connected::Refused(down, ResponseFlag::UpstreamFailure)));
                        }
                        self.state = ConnectingState::Picking;
                    }
                },
                ConnectingState::Done => panic!("polled Connecting after completion"),
            }
        }
    }
}

/// Accept loop for one proxy's listen addresses (spec.md §4.4 "Routing" +
/// "Connecting" + "Piping"), grounded on `server::mod::Bound::poll`'s
/// accept/connect/duplex chain — reduced to plain TCP (no TLS branch) and
/// routed through [`ProxyRuntime`] instead of a single static balancer.
struct Listener {
    incoming: Incoming,
    handle: Handle,
    timer: Timer,
    runtime: Rc<ProxyRuntime>,
}

impl Future for Listener {
    type Item = ();
    type Error = io::Error;

    fn poll(&mut self) -> Poll<(), io::Error> {
        loop {
            match self.incoming.poll()? {
                Async::NotReady => return Ok(Async::NotReady),
                Async::Ready(None) => return Ok(Async::Ready(())),
                Async::Ready(Some((down_tcp, peer_addr))) => {
                    let local_addr = down_tcp.local_addr().unwrap_or(peer_addr);
                    let cluster = match self.runtime.route(&local_addr, &peer_addr) {
                        Some(c) => c.clone(),
                        None => {
                            self.runtime.proxy_stats.downstream_cx_no_route.incr(1);
                            continue;
                        }
                    };
                    self.runtime.proxy_stats.downstream_cx_total.incr(1);

                    let handle = self.handle.clone();
                    let timer = self.timer.clone();
                    let idle_timeout = self.runtime.idle_timeout;
                    let buffer_size = self.runtime.buffer_size;
                    let proxy_stats = self.runtime.proxy_stats.clone();

                    let work = Connecting::new(cluster.clone(), handle.clone(), timer.clone(), down_tcp).then(
                        move |res| -> Box<Future<Item = (), Error = ()>> {
                            match res {
                                Ok(Connected::Ok(down_tcp, up_tcp, primed)) => {
                                    let (down_r, down_w) = down_tcp.split();
                                    let (up_r, up_w) = up_tcp.split();
                                    let up_half =
                                        HalfDuplex::new(down_r, up_w).with_chunk_size(buffer_size).with_primed_input(primed);
                                    let down_half = HalfDuplex::new(up_r, down_w).with_chunk_size(buffer_size);
                                    let duplex = Duplex::new(up_half, down_half);
                                    let bounded: Box<Future<Item = (usize, usize), Error = io::Error>> = match idle_timeout {
                                        Some(t) => Box::new(timer.timeout(duplex, t)),
                                        None => Box::new(duplex),
                                    };
                                    let proxy_stats = proxy_stats.clone();
                                    Box::new(bounded.then(move |ret| {
                                        if ret.is_err() {
                                            proxy_stats.idle_timeout.incr(1);
                                        }
                                        cluster.resources.release_connection();
                                        Ok(())
                                    }))
                                }
                                Ok(Connected::Refused(down_tcp, _flag)) => {
                                    // downstream is simply dropped; the response flag
                                    // exists for access-log purposes a caller without a
                                    // log pipeline here has no use for yet.
                                    drop(down_tcp);
                                    Box::new(future::ok(()))
                                }
                                Ok(Connected::DownstreamGone) => Box::new(future::ok(())),
                                Err(()) => Box::new(future::ok(())),
                            }
                        },
                    );
                    self.handle.spawn(work);
                }
            }
        }
    }
}

/// Polls one cluster's membership engine to completion every reactor
/// tick, updating its healthy-host gauge after every applied update — the
/// same "drive a background future forever" shape `main.rs`'s `Running`
/// uses for its own per-cluster balancer updater.
struct MembershipDriver {
    cluster: Rc<Cluster>,
    last_healthy: i64,
}

impl Future for MembershipDriver {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        loop {
            match self.cluster.engine.borrow_mut().poll_once()? {
                Async::NotReady => return Ok(Async::NotReady),
                Async::Ready(false) => return Ok(Async::Ready(())),
                Async::Ready(true) => {
                    let healthy = self
                        .cluster
                        .engine
                        .borrow()
                        .priorities()
                        .host_set(PRIORITY)
                        .map(|hs| hs.healthy_hosts().len() as i64)
                        .unwrap_or(0);
                    let delta = healthy - self.last_healthy;
                    if delta > 0 {
                        self.cluster.stats.membership_healthy.incr(delta as usize);
                    } else if delta < 0 {
                        self.cluster.stats.membership_healthy.decr((-delta) as usize);
                    }
                    self.last_healthy = healthy;
                }
            }
        }
    }
}

/// Builds and runs every configured proxy plus the admin surface, and
/// blocks until a `/shutdown` request's grace period elapses (or forever,
/// absent an admin config to request one).
pub fn run(config: AppConfig) -> io::Result<()> {
    let mut core = Core::new()?;
    let handle = core.handle();
    let timer = Timer::default();
    let (stats_root, reporter) = stats::root();

    let buffer_size = config.buffer_size_bytes.unwrap_or(DEFAULT_BUFFER_SIZE);

    let mut runtimes = Vec::new();
    for proxy_cfg in &config.proxies {
        let runtime = build_runtime(proxy_cfg, &handle, &timer, &stats_root, buffer_size)?;
        for cluster in runtime.clusters.values() {
            handle.spawn(MembershipDriver { cluster: cluster.clone(), last_healthy: 0 });
        }
        for server in &proxy_cfg.servers {
            let listener = TcpListener::bind(&server.addr, &handle)?;
            handle.spawn(
                Listener { incoming: listener.incoming(), handle: handle.clone(), timer: timer.clone(), runtime: runtime.clone() }
                    .then(|_| Ok(())),
            );
        }
        runtimes.push(runtime);
    }

    let (closer_tx, closer_rx) = oneshot::channel::<Instant>();

    if let Some(ref admin_cfg) = config.admin {
        let prometheus = Arc::new(Mutex::new(String::new()));
        let clusters_state = Arc::new(Mutex::new(Vec::new()));
        let admin = Admin::new(prometheus.clone(), clusters_state.clone(), closer_tx, Duration::from_secs(5));
        let addr = admin_cfg.addr;

        // Cheap to hold across ticks: each `Rc<Cluster>` is a clone of the
        // same handle the listeners and `MembershipDriver`s already share.
        let all_clusters: Vec<Rc<Cluster>> = runtimes.iter().flat_map(|rt| rt.clusters.values().cloned()).collect();

        let refresh_prometheus = prometheus.clone();
        let refresh = timer
            .interval(Duration::from_secs(1))
            .map_err(|_| ())
            .for_each(move |_| {
                let body = stats::render_prometheus(&reporter);
                *refresh_prometheus.lock().unwrap() = body;

                let snapshot: Vec<ClusterSnapshot> = all_clusters
                    .iter()
                    .map(|cluster| {
                        let healthy = cluster
                            .engine
                            .borrow()
                            .priorities()
                            .host_set(PRIORITY)
                            .map(|hs| hs.healthy_hosts().len())
                            .unwrap_or(0);
                        ClusterSnapshot {
                            name: cluster.name.as_str().to_string(),
                            healthy_hosts: healthy,
                            connections: cluster.resources.connections(),
                            max_connections: cluster.resources.max_connections(),
                        }
                    })
                    .collect();
                *clusters_state.lock().unwrap() = snapshot;
                Ok(())
            });
        handle.spawn(refresh);

        thread::Builder::new()
            .name("admin".into())
            .spawn(move || {
                let server = Http::new().bind(&addr, move || Ok(admin.clone())).expect("could not bind admin listener");
                if let Err(e) = server.run() {
                    error!("admin server error: {}", e);
                }
            })
            .expect("could not spawn admin thread");
    }

    let shutdown = closer_rx.then(move |res| -> Box<Future<Item = (), Error = ()>> {
        match res {
            Ok(deadline) => {
                let wait = deadline.checked_duration_since(Instant::now()).unwrap_or_else(|| Duration::from_secs(0));
                Box::new(timer.sleep(wait).then(|_| Ok(())))
            }
            Err(_) => Box::new(future::empty()),
        }
    });

    core.run(shutdown).map_err(|_| io::Error::new(io::ErrorKind::Other, "shutdown wait failed"))
}
