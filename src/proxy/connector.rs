//! Upstream connect-with-retry (spec.md §4.4 "Connecting").
//!
//! [`ConnectAttempt`] is a single bounded connect: a `TcpStreamNew`-driven
//! state machine reduced to the plain-TCP case, since nothing in this
//! deployment needs a TLS branch. The deadline timer follows the
//! `timer.sleep(..)` pattern a connection-pool endpoint uses to back off a
//! retry. [`pick_host`] is spec.md §4.2's host-selection half, using a
//! power-of-two-choices tie-break adapted from "least loaded" to "fewest
//! consecutive connect failures" since `Host` tracks failures rather than
//! an active-connection count.

use futures::{Async, Future, Poll};
use rand::{self, Rng};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_core::net::{TcpStream, TcpStreamNew};
use tokio_core::reactor::Handle;
use tokio_timer::{Sleep, Timer, TimerError};

use host::{Host, PrioritySet};

/// Chooses a host to connect to at `priority`: picks a locality via the
/// weighted scheduler, then within it, two-random-choices on
/// `consecutive_failures`. Falls back to the flat healthy-host list when
/// every locality has zero effective weight (spec.md §4.1).
pub fn pick_host(priorities: &mut PrioritySet, priority: u32) -> Option<Host> {
    let locality_idx = priorities.choose_locality(priority);
    let host_set = priorities.host_set(priority)?;
    let pool: &[Host] = match locality_idx {
        Some(idx) => host_set.healthy_hosts_per_locality().get(idx).map(|v| v.as_slice()).unwrap_or(&[]),
        None => host_set.healthy_hosts(),
    };
    pick_from(pool)
}

fn pick_from(pool: &[Host]) -> Option<Host> {
    match pool.len() {
        0 => None,
        1 => Some(pool[0].clone()),
        2 => Some(least_failures(&pool[0], &pool[1]).clone()),
        n => {
            let mut rng = rand::thread_rng();
            let i0 = rng.gen_range(0, n);
            let mut i1 = rng.gen_range(0, n);
            while i1 == i0 {
                i1 = rng.gen_range(0, n);
            }
            Some(least_failures(&pool[i0], &pool[i1]).clone())
        }
    }
}

fn least_failures<'a>(a: &'a Host, b: &'a Host) -> &'a Host {
    if a.consecutive_failures() <= b.consecutive_failures() {
        a
    } else {
        b
    }
}

#[derive(Debug)]
pub enum ConnectError {
    Io(io::Error),
    TimedOut,
}

impl From<TimerError> for ConnectError {
    fn from(_: TimerError) -> ConnectError {
        ConnectError::TimedOut
    }
}

/// One TCP connect attempt, bounded by `connect_timeout`. Resolves to an
/// error rather than hanging forever: spec.md §4.4 treats a deadline
/// expiry identically to a refused/reset connect for retry purposes.
pub struct ConnectAttempt {
    connect: TcpStreamNew,
    deadline: Sleep,
}

impl ConnectAttempt {
    pub fn new(addr: &SocketAddr, handle: &Handle, timer: &Timer, connect_timeout: Duration) -> ConnectAttempt {
        ConnectAttempt {
            connect: TcpStream::connect(addr, handle),
            deadline: timer.sleep(connect_timeout),
        }
    }
}

impl Future for ConnectAttempt {
    type Item = TcpStream;
    type Error = ConnectError;

    fn poll(&mut self) -> Poll<TcpStream, ConnectError> {
        if let Async::Ready(stream) = self.connect.poll().map_err(ConnectError::Io)? {
            return Ok(Async::Ready(stream));
        }
        match self.deadline.poll()? {
            Async::Ready(()) => Err(ConnectError::TimedOut),
            Async::NotReady => Ok(Async::NotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pick_from;
    use host::Host;
    use locality::Locality;
    use metadata::Metadata;
    use std::net::SocketAddr;

    fn host(addr: &str) -> Host {
        Host::new(addr.parse::<SocketAddr>().unwrap(), String::new(), Locality::empty(), Metadata::new(), 1)
    }

    #[test]
    fn empty_pool_picks_nothing() {
        assert!(pick_from(&[]).is_none());
    }

    #[test]
    fn single_host_pool_always_wins() {
        let h = host("10.0.0.1:80");
        assert_eq!(pick_from(&[h.clone()]).unwrap(), h);
    }

    #[test]
    fn prefers_host_with_fewer_consecutive_failures() {
        let a = host("10.0.0.1:80");
        let b = host("10.0.0.2:80");
        b.record_connect_failure();
        b.record_connect_failure();
        let picked = pick_from(&[a.clone(), b]).unwrap();
        assert_eq!(picked, a);
    }
}
