//! meshline-tcp: a native TCP proxy data plane.
//!
//! Three subsystems carry the weight of this crate: cluster membership
//! ([`host`] / [`membership`]), the TCP proxy connection state machine
//! ([`proxy`]), and the Thrift wire codec ([`thrift`]). Everything else —
//! config loading, stats, the admin surface — exists to wire those three
//! together into a runnable process.

#[macro_use]
extern crate log;
extern crate bytes;
extern crate futures;
extern crate hyper;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tacho;
#[macro_use]
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_timer;
extern crate url;

pub mod admin;
pub mod app;
pub mod buffer;
pub mod cluster_name;
pub mod config;
pub mod host;
pub mod locality;
pub mod membership;
pub mod metadata;
pub mod proxy;
pub mod resource_manager;
pub mod stats;
pub mod thrift;

pub use buffer::Buffer;
pub use cluster_name::ClusterName;
pub use host::{Host, HostSet, PrioritySet};
pub use locality::Locality;
pub use metadata::Metadata;
