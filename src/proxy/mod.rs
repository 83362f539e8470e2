//! TCP Proxy Filter connection state machine (spec.md §4.4).
//!
//! [`ProxyFilter`] is the pure transition table for the state/event grid
//! spec.md §4.4 describes: given the current state and an event, it
//! returns the next state plus the [`Action`]s a caller must perform
//! (arm/cancel timers, enable/disable reads, close a side, report a
//! connect outcome). Keeping this as data-in data-out logic — no socket, no
//! timer, no event loop — means the whole retry/close grid from spec.md
//! §4.4/§8 is unit-testable without a reactor, the same way
//! `host::set`/`host::priority_set` test their invariants directly rather
//! than through a running proxy.
//!
//! [`connector`] and [`duplex`] wire this into real I/O: connecting with
//! retry over `tokio_core::net::TcpStream`, and copying bytes with the
//! deferred upstream flush spec.md §4.4 calls for.

pub mod connector;
pub mod duplex;
pub mod route;

/// Why a connection closed, surfaced as the access-log `%RESPONSE_FLAGS%`
/// token (spec.md §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseFlag {
    /// UF: all connect attempts to the upstream failed.
    UpstreamFailure,
    /// UH: no healthy host was available to connect to.
    NoHealthyHost,
    /// UO: the resource manager denied a new upstream connection.
    Overflow,
    /// UT: idle timer expiry.
    Timeout,
}

impl ResponseFlag {
    pub fn code(&self) -> &'static str {
        match *self {
            ResponseFlag::UpstreamFailure => "UF",
            ResponseFlag::NoHealthyHost => "UH",
            ResponseFlag::Overflow => "UO",
            ResponseFlag::Timeout => "UT",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseFlush {
    FlushWrite,
    NoFlush,
}

/// Outlier-detection signal reported per attempted connect (spec.md §4.4
/// "Retries").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutlierResult {
    Success,
    Timeout,
    ConnectFailed,
}

/// Side effects a transition requires. The caller (connector/duplex/the
/// per-connection driver) performs these against the real socket/timer;
/// `ProxyFilter` only decides which ones are needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    PickHostAndConnect,
    ArmConnectTimer,
    CancelConnectTimer,
    ResetIdleTimer,
    ReadDisableDownstream,
    ReadEnableDownstream,
    ReadDisableUpstream,
    ReadEnableUpstream,
    WriteUpstream,
    WriteUpstreamEnd,
    WriteDownstream,
    CloseUpstream(CloseFlush),
    CloseDownstream(CloseFlush, Option<ResponseFlag>),
    ReportOutlier(OutlierResult),
    /// Detach the upstream connection into the "flush active" holding set
    /// per spec.md §4.4 "Deferred flush".
    DeferUpstreamFlush,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    NotStarted,
    Connecting { attempts: u32 },
    Connected,
    HalfClosed,
    Closing,
    Closed,
}

/// Drives one downstream connection's lifecycle. `max_connect_attempts`
/// caps total attempts including the first (spec.md §4.4 "Retries").
pub struct ProxyFilter {
    state: State,
    max_connect_attempts: u32,
    upstream_has_pending_writes: bool,
}

impl ProxyFilter {
    pub fn new(max_connect_attempts: u32) -> ProxyFilter {
        ProxyFilter {
            state: State::NotStarted,
            max_connect_attempts: max_connect_attempts.max(1),
            upstream_has_pending_writes: false,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            State::NotStarted => "not_started",
            State::Connecting { .. } => "connecting",
            State::Connected => "connected",
            State::HalfClosed => "half_closed",
            State::Closing => "closing",
            State::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn connect_attempts(&self) -> u32 {
        match self.state {
            State::Connecting { attempts } => attempts,
            _ => 0,
        }
    }

    /// Tracks whether the upstream side currently has writes the filter is
    /// waiting to flush, consulted by [`Self::on_downstream_remote_close`].
    pub fn note_upstream_write_pending(&mut self, pending: bool) {
        self.upstream_has_pending_writes = pending;
    }

    pub fn on_downstream_connected(&mut self) -> Vec<Action> {
        if self.state != State::NotStarted {
            return Vec::new();
        }
        self.state = State::Connecting { attempts: 1 };
        vec![Action::PickHostAndConnect, Action::ArmConnectTimer, Action::ReadDisableDownstream]
    }

    pub fn on_upstream_connected(&mut self) -> Vec<Action> {
        match self.state {
            State::Connecting { .. } => {
                self.state = State::Connected;
                vec![Action::CancelConnectTimer, Action::ReadEnableDownstream, Action::ReportOutlier(OutlierResult::Success), Action::ResetIdleTimer]
            }
            _ => Vec::new(),
        }
    }

    /// A connect attempt failed, whether by timer expiry or a remote/local
    /// close while connecting. Retries if attempts remain; otherwise closes
    /// downstream with `UF` regardless of which failure mode triggered the
    /// last attempt (spec.md §8 scenario 3).
    fn connect_attempt_failed(&mut self, outlier: OutlierResult) -> Vec<Action> {
        let attempts = match self.state {
            State::Connecting { attempts } => attempts,
            _ => return Vec::new(),
        };
        if attempts < self.max_connect_attempts {
            self.state = State::Connecting { attempts: attempts + 1 };
            vec![Action::ReportOutlier(outlier), Action::PickHostAndConnect, Action::ArmConnectTimer]
        } else {
            self.state = State::Closed;
            vec![Action::ReportOutlier(outlier), Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::UpstreamFailure))]
        }
    }

    pub fn on_connect_timeout(&mut self) -> Vec<Action> {
        self.connect_attempt_failed(OutlierResult::Timeout)
    }

    pub fn on_upstream_closed_while_connecting(&mut self) -> Vec<Action> {
        self.connect_attempt_failed(OutlierResult::ConnectFailed)
    }

    /// The resource manager denied the upstream connection outright
    /// (spec.md §4.4 "Connection-pool overflow"): non-retryable, close
    /// downstream immediately.
    pub fn on_connect_overflow(&mut self) -> Vec<Action> {
        match self.state {
            State::Connecting { .. } => {
                self.state = State::Closed;
                vec![Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::Overflow))]
            }
            _ => Vec::new(),
        }
    }

    /// No healthy host was available to even attempt a connect.
    pub fn on_no_healthy_host(&mut self) -> Vec<Action> {
        match self.state {
            State::Connecting { .. } => {
                self.state = State::Closed;
                vec![Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::NoHealthyHost))]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_downstream_data(&mut self, end: bool) -> Vec<Action> {
        match self.state {
            State::Connected if end => {
                self.state = State::HalfClosed;
                vec![Action::WriteUpstreamEnd]
            }
            State::Connected => vec![Action::WriteUpstream],
            _ => Vec::new(),
        }
    }

    pub fn on_upstream_data(&mut self) -> Vec<Action> {
        match self.state {
            State::Connected | State::HalfClosed => vec![Action::WriteDownstream, Action::ResetIdleTimer],
            _ => Vec::new(),
        }
    }

    pub fn on_downstream_high_watermark(&mut self) -> Vec<Action> {
        match self.state {
            State::Connected => vec![Action::ReadDisableUpstream],
            _ => Vec::new(),
        }
    }

    pub fn on_downstream_low_watermark(&mut self) -> Vec<Action> {
        match self.state {
            State::Connected => vec![Action::ReadEnableUpstream],
            _ => Vec::new(),
        }
    }

    pub fn on_idle_timeout(&mut self) -> Vec<Action> {
        match self.state {
            State::Connected | State::HalfClosed => {
                self.state = State::Closed;
                vec![Action::CloseUpstream(CloseFlush::NoFlush), Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::Timeout))]
            }
            _ => Vec::new(),
        }
    }

    /// Applies in any state but `Closed` (spec.md §4.4's transition grid
    /// puts this event on the `Any` row with no carve-out), including
    /// mid-connect: a downstream disconnect while an upstream connect
    /// attempt is outstanding still needs to abort that attempt rather
    /// than leave the filter stuck in `Connecting` forever.
    pub fn on_downstream_remote_close(&mut self) -> Vec<Action> {
        match self.state {
            State::Closed => Vec::new(),
            _ => {
                self.state = State::Closing;
                let flush = if self.upstream_has_pending_writes { CloseFlush::FlushWrite } else { CloseFlush::NoFlush };
                if flush == CloseFlush::FlushWrite {
                    vec![Action::DeferUpstreamFlush]
                } else {
                    vec![Action::CloseUpstream(CloseFlush::NoFlush)]
                }
            }
        }
    }

    /// Upstream closed after the connection was established (not during
    /// connect retry).
    pub fn on_upstream_remote_close_post_connect(&mut self) -> Vec<Action> {
        match self.state {
            State::Connected | State::HalfClosed => {
                self.state = State::Closing;
                vec![Action::CloseDownstream(CloseFlush::FlushWrite, None)]
            }
            _ => Vec::new(),
        }
    }

    /// Finalizes a deferred upstream flush (spec.md §4.4): success on
    /// upstream `LocalClose`, forced `NoFlush` on idle expiry while
    /// detached.
    pub fn on_deferred_flush_complete(&mut self) -> Vec<Action> {
        self.state = State::Closed;
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, CloseFlush, OutlierResult, ProxyFilter, ResponseFlag};

    #[test]
    fn connect_retry_within_budget_keeps_downstream_open() {
        let mut f = ProxyFilter::new(3);
        f.on_downstream_connected();
        assert_eq!(f.connect_attempts(), 1);

        let actions = f.on_connect_timeout();
        assert!(actions.contains(&Action::ReportOutlier(OutlierResult::Timeout)));
        assert!(actions.contains(&Action::PickHostAndConnect));
        assert_eq!(f.connect_attempts(), 2);

        let actions = f.on_upstream_closed_while_connecting();
        assert!(actions.contains(&Action::ReportOutlier(OutlierResult::ConnectFailed)));
        assert_eq!(f.connect_attempts(), 3);

        let actions = f.on_upstream_connected();
        assert!(actions.contains(&Action::ReportOutlier(OutlierResult::Success)));
        assert_eq!(f.state_name(), "connected");
        assert!(!f.is_closed());
    }

    #[test]
    fn connect_exceeding_budget_closes_downstream_with_uf() {
        let mut f = ProxyFilter::new(3);
        f.on_downstream_connected();
        f.on_connect_timeout();
        f.on_upstream_closed_while_connecting();
        let actions = f.on_upstream_closed_while_connecting();
        assert!(f.is_closed());
        assert!(actions.contains(&Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::UpstreamFailure))));
        assert_eq!(ResponseFlag::UpstreamFailure.code(), "UF");
    }

    #[test]
    fn downstream_half_close_writes_end_marker() {
        let mut f = ProxyFilter::new(1);
        f.on_downstream_connected();
        f.on_upstream_connected();
        let actions = f.on_downstream_data(true);
        assert_eq!(actions, vec![Action::WriteUpstreamEnd]);
        assert_eq!(f.state_name(), "half_closed");
    }

    #[test]
    fn downstream_close_with_pending_upstream_writes_defers_flush() {
        let mut f = ProxyFilter::new(1);
        f.on_downstream_connected();
        f.on_upstream_connected();
        f.note_upstream_write_pending(true);
        let actions = f.on_downstream_remote_close();
        assert_eq!(actions, vec![Action::DeferUpstreamFlush]);
    }

    #[test]
    fn downstream_close_without_pending_writes_closes_upstream_now() {
        let mut f = ProxyFilter::new(1);
        f.on_downstream_connected();
        f.on_upstream_connected();
        let actions = f.on_downstream_remote_close();
        assert_eq!(actions, vec![Action::CloseUpstream(CloseFlush::NoFlush)]);
    }

    #[test]
    fn downstream_close_while_connecting_aborts_instead_of_sticking() {
        let mut f = ProxyFilter::new(3);
        f.on_downstream_connected();
        assert_eq!(f.state_name(), "connecting");
        let actions = f.on_downstream_remote_close();
        assert_eq!(actions, vec![Action::CloseUpstream(CloseFlush::NoFlush)]);
        assert_eq!(f.state_name(), "closing");
        assert!(!f.is_closed());
    }

    #[test]
    fn idle_timeout_closes_both_sides_with_no_flush() {
        let mut f = ProxyFilter::new(1);
        f.on_downstream_connected();
        f.on_upstream_connected();
        let actions = f.on_idle_timeout();
        assert!(actions.contains(&Action::CloseUpstream(CloseFlush::NoFlush)));
        assert!(actions.contains(&Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::Timeout))));
        assert!(f.is_closed());
    }

    #[test]
    fn overflow_closes_downstream_immediately() {
        let mut f = ProxyFilter::new(3);
        f.on_downstream_connected();
        let actions = f.on_connect_overflow();
        assert!(f.is_closed());
        assert!(actions.contains(&Action::CloseDownstream(CloseFlush::NoFlush, Some(ResponseFlag::Overflow))));
    }
}
