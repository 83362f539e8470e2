//! Discovery transport: a `Stream` of `ClusterLoadAssignment`s for one
//! cluster (spec.md §4.1 "Inputs").
//!
//! `Polled` is a concrete transport in the same shape as a polling
//! namerd-style resolver: a `Stream` backed by an HTTP client and a
//! `tokio_timer::Interval`, with JSON parsed out of the response body,
//! generalized to an arbitrary `/resolve/<cluster>`-shaped endpoint
//! returning the `ClusterLoadAssignment` wire shape from spec.md §6.
//! `TestFeed` is an in-memory stand-in used by the engine's own tests and
//! the integration tests, the same way a mock namerd HTTP surface stubs out
//! a resolver's tests.

use super::assignment::ClusterLoadAssignment;
use futures::{Async, Poll, Stream};
use hyper::client::{Connect as HyperConnect, HttpConnector};
use hyper::{Client, StatusCode};
use serde_json;
use std::collections::VecDeque;
use std::rc::Rc;
use std::{fmt, io};
use tokio_core::reactor::Handle;
use tokio_timer::{Interval, Timer};
use url::Url;

#[derive(Debug)]
pub enum DiscoveryError {
    Io(io::Error),
    UnexpectedStatus(StatusCode),
    Serde(serde_json::Error),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DiscoveryError::Io(ref e) => write!(f, "discovery transport error: {}", e),
            DiscoveryError::UnexpectedStatus(ref s) => write!(f, "discovery endpoint returned {}", s),
            DiscoveryError::Serde(ref e) => write!(f, "discovery response parse error: {}", e),
        }
    }
}
impl ::std::error::Error for DiscoveryError {
    fn description(&self) -> &str {
        "discovery transport error"
    }
}

/// An in-memory discovery stream for tests: each `push`ed assignment is
/// yielded once, in order, then the stream reports `NotReady` forever
/// (mirroring a long-lived subscription that simply hasn't seen another
/// update yet).
#[derive(Default)]
pub struct TestFeed {
    pending: VecDeque<Result<ClusterLoadAssignment, DiscoveryError>>,
}

impl TestFeed {
    pub fn new() -> TestFeed {
        TestFeed { pending: VecDeque::new() }
    }

    pub fn push(&mut self, assignment: ClusterLoadAssignment) {
        self.pending.push_back(Ok(assignment));
    }

    pub fn push_error(&mut self, err: DiscoveryError) {
        self.pending.push_back(Err(err));
    }
}

impl Stream for TestFeed {
    type Item = Result<ClusterLoadAssignment, DiscoveryError>;
    type Error = ();

    fn poll(&mut self) -> Poll<Option<Self::Item>, ()> {
        match self.pending.pop_front() {
            Some(item) => Ok(Async::Ready(Some(item))),
            None => Ok(Async::NotReady),
        }
    }
}

/// Polls an EDS-shaped HTTP/JSON endpoint on an interval, the way
/// `resolver::namerd::Addrs` polls namerd. Yields `Ok` on a well formed
/// response, `Err` on transport/parse failure — per spec.md §4.1,
/// subscription errors must not clear membership, so the engine maps
/// `Err` to "complete initialization with current state" rather than
/// treating it as fatal.
pub struct Polled {
    client: Rc<Client<HttpConnector>>,
    url: Url,
    interval: Interval,
    state: State,
}

enum State {
    Waiting,
    Requesting(Box<::futures::Future<Item = ClusterLoadAssignment, Error = DiscoveryError>>),
}

impl Polled {
    pub fn new(base_url: &str, cluster: &str, period: ::std::time::Duration, reactor: &Handle, timer: &Timer) -> Polled {
        let url = Url::parse(&format!("{}/resolve/{}", base_url, cluster)).expect("invalid discovery url");
        Polled {
            client: Rc::new(Client::new(reactor)),
            url,
            interval: timer.interval(period),
            state: State::Waiting,
        }
    }

    fn request(&self) -> Box<::futures::Future<Item = ClusterLoadAssignment, Error = DiscoveryError>> {
        request(self.client.clone(), self.url.clone())
    }
}

impl Stream for Polled {
    type Item = Result<ClusterLoadAssignment, DiscoveryError>;
    type Error = ();

    fn poll(&mut self) -> Poll<Option<Self::Item>, ()> {
        loop {
            match self.state {
                State::Waiting => match self.interval.poll() {
                    Err(_) => return Ok(Async::NotReady),
                    Ok(Async::NotReady) => return Ok(Async::NotReady),
                    Ok(Async::Ready(_)) => {
                        self.state = State::Requesting(self.request());
                    }
                },
                State::Requesting(ref mut fut) => match fut.poll() {
                    Ok(Async::NotReady) => return Ok(Async::NotReady),
                    Ok(Async::Ready(assignment)) => {
                        self.state = State::Waiting;
                        return Ok(Async::Ready(Some(Ok(assignment))));
                    }
                    Err(e) => {
                        self.state = State::Waiting;
                        return Ok(Async::Ready(Some(Err(e))));
                    }
                },
            }
        }
    }
}

fn request<C: HyperConnect>(client: Rc<Client<C>>, url: Url) -> Box<::futures::Future<Item = ClusterLoadAssignment, Error = DiscoveryError>> {
    use futures::Future;

    debug!("polling discovery endpoint at {}", url);
    let uri = url.as_str().parse().expect("invalid discovery url");
    let fut = client
        .get(uri)
        .map_err(|e| DiscoveryError::Io(io::Error::new(io::ErrorKind::Other, e)))
        .and_then(|rsp| match rsp.status() {
            StatusCode::Ok => Ok(rsp),
            status => Err(DiscoveryError::UnexpectedStatus(status)),
        })
        .and_then(|rsp| {
            rsp.body()
                .concat2()
                .map_err(|e| DiscoveryError::Io(io::Error::new(io::ErrorKind::Other, e)))
        })
        .and_then(|body| serde_json::from_slice(&body[..]).map_err(DiscoveryError::Serde));
    Box::new(fut)
}
