//! Upstream endpoint membership: [`Host`], [`HostSet`], [`PrioritySet`].
//!
//! Per-endpoint mutable state lives behind an `RwLock` the way a
//! connection-pool endpoint tracks weight and consecutive-failure
//! bookkeeping, and hosts are kept in available/retired-style pools keyed
//! by address, generalized per spec.md §3/§4.1 into health-flag based
//! healthy/unhealthy partitioning, locality buckets, and a priority-tiered
//! `PrioritySet`.

mod priority_set;
mod scheduler;
mod set;

pub use self::priority_set::{MembershipDelta, Observer, PrioritySet};
pub use self::scheduler::LocalityScheduler;
pub use self::set::HostSet;

use metadata::Metadata;
use locality::Locality;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// A tiny hand-rolled bitflags macro.
///
/// Nothing else in this crate needs a `bitflags` dependency, and
/// `health_flags` only ever needs three bits, so a macro-generated newtype
/// over `u8` mirrors what `bitflags!` would produce without adding a
/// dependency used in exactly one place.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub struct $name($repr);
        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub fn bits(&self) -> $repr {
                self.0
            }
        }
    };
}

bitflags_like! {
    /// `health_flags` per spec.md §3. Healthy iff all flags are clear.
    pub struct HealthFlags: u8 {
        const FAILED_ACTIVE_HC = 0b001;
        const FAILED_OUTLIER_CHECK = 0b010;
        const FAILED_EDS_HEALTH = 0b100;
    }
}

const MIN_WEIGHT: u32 = 1;
const MAX_WEIGHT: u32 = 128;

fn clamp_weight(w: u32) -> u32 {
    if w < MIN_WEIGHT {
        MIN_WEIGHT
    } else if w > MAX_WEIGHT {
        MAX_WEIGHT
    } else {
        w
    }
}

/// An upstream endpoint.
///
/// `address` is immutable for the lifetime of the `Host`; `weight`,
/// `locality`, `metadata` and `health_flags` may be swapped out-of-band as
/// the membership engine reconciles updates, so they're held behind an
/// `RwLock`-guarded inner record per spec.md §5 ("mutable fields ... atomic
/// or guarded by a reader-writer lock"). Two `Host`s are equal iff their
/// addresses are equal (spec.md §3 invariant), which is what the
/// reconciliation algorithm in spec.md §4.3 dedupes on.
#[derive(Clone)]
pub struct Host(Arc<Inner>);

struct Inner {
    address: SocketAddr,
    hostname: RwLock<String>,
    mutable: RwLock<Mutable>,
    health_flags: AtomicUsize,
    used: AtomicUsize,
    rx_bytes: AtomicUsize,
    tx_bytes: AtomicUsize,
    consecutive_failures: AtomicUsize,
}

struct Mutable {
    weight: u32,
    locality: Locality,
    metadata: Metadata,
}

impl Host {
    pub fn new(address: SocketAddr, hostname: String, locality: Locality, metadata: Metadata, weight: u32) -> Host {
        Host(Arc::new(Inner {
            address,
            hostname: RwLock::new(hostname),
            mutable: RwLock::new(Mutable {
                weight: clamp_weight(weight),
                locality,
                metadata,
            }),
            health_flags: AtomicUsize::new(0),
            used: AtomicUsize::new(1),
            rx_bytes: AtomicUsize::new(0),
            tx_bytes: AtomicUsize::new(0),
            consecutive_failures: AtomicUsize::new(0),
        }))
    }

    pub fn address(&self) -> SocketAddr {
        self.0.address
    }

    pub fn hostname(&self) -> String {
        self.0.hostname.read().unwrap().clone()
    }

    pub fn weight(&self) -> u32 {
        self.0.mutable.read().unwrap().weight
    }

    pub fn set_weight(&self, w: u32) {
        self.0.mutable.write().unwrap().weight = clamp_weight(w);
    }

    pub fn locality(&self) -> Locality {
        self.0.mutable.read().unwrap().locality.clone()
    }

    pub fn set_locality(&self, l: Locality) {
        self.0.mutable.write().unwrap().locality = l;
    }

    pub fn metadata(&self) -> Metadata {
        self.0.mutable.read().unwrap().metadata.clone()
    }

    pub fn set_metadata(&self, m: Metadata) {
        self.0.mutable.write().unwrap().metadata = m;
    }

    pub fn health_flags(&self) -> u8 {
        self.0.health_flags.load(Ordering::Acquire) as u8
    }

    pub fn is_healthy(&self) -> bool {
        self.health_flags() == 0
    }

    pub fn set_health_flag(&self, flag: HealthFlags) {
        self.0.health_flags.fetch_or(flag.bits() as usize, Ordering::AcqRel);
    }

    pub fn clear_health_flag(&self, flag: HealthFlags) {
        self.0.health_flags.fetch_and(!(flag.bits() as usize), Ordering::AcqRel);
    }

    pub fn mark_used(&self) {
        self.0.used.store(1, Ordering::Release);
    }

    pub fn reset_used(&self) {
        self.0.used.store(0, Ordering::Release);
    }

    pub fn used(&self) -> bool {
        self.0.used.load(Ordering::Acquire) != 0
    }

    pub fn record_read(&self, sz: usize) {
        self.0.rx_bytes.fetch_add(sz, Ordering::Relaxed);
    }

    pub fn record_write(&self, sz: usize) {
        self.0.tx_bytes.fetch_add(sz, Ordering::Relaxed);
    }

    pub fn rx_bytes(&self) -> usize {
        self.0.rx_bytes.load(Ordering::Relaxed)
    }

    pub fn tx_bytes(&self) -> usize {
        self.0.tx_bytes.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.0.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn record_connect_success(&self) {
        self.0.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.0.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Host) -> bool {
        self.0.address == other.0.address
    }
}
impl Eq for Host {}

impl ::std::fmt::Debug for Host {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(
            f,
            "Host {{ addr: {}, weight: {}, healthy: {} }}",
            self.address(),
            self.weight(),
            self.is_healthy()
        )
    }
}
