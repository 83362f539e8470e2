//! Wire shape for cluster load assignments (spec.md §6).
//!
//! Modeled as plain `#[derive(Deserialize)]` structs the way a namerd-style
//! discovery response is parsed, rather than generated protobuf bindings —
//! xDS transport mechanics are out of scope per spec.md §1, and the
//! discovery client here is itself JSON-based.

use locality::Locality;
use metadata::Metadata;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LocalityLbEndpoints {
    #[serde(default)]
    pub locality: Locality,
    pub priority: u32,
    pub load_balancing_weight: Option<u32>,
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub health_status: HealthStatus,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Endpoint {
    pub address: Address,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u16,
}

impl SocketAddress {
    pub fn to_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.address, self.port_value)
            .parse()
            .map_err(|e| format!("invalid endpoint address {}:{}: {}", self.address, self.port_value, e))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Draining,
}

impl Default for HealthStatus {
    fn default() -> HealthStatus {
        HealthStatus::Unknown
    }
}

#[derive(Debug)]
pub enum ValidationError {
    WrongCluster { expected: String, got: String },
    PriorityTooLarge(u32),
    InvalidAddress(String),
}

impl ::std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match *self {
            ValidationError::WrongCluster { ref expected, ref got } => {
                write!(f, "unexpected cluster_name: expected {}, got {}", expected, got)
            }
            ValidationError::PriorityTooLarge(p) => write!(f, "priority {} exceeds maximum of 127", p),
            ValidationError::InvalidAddress(ref reason) => write!(f, "{}", reason),
        }
    }
}
impl ::std::error::Error for ValidationError {
    fn description(&self) -> &str {
        "cluster load assignment validation failure"
    }
}

/// Validates an assignment against the subscribed cluster name and the
/// priority range spec.md §4.1 requires (`priority ∈ [0,127]`).
pub fn validate(assignment: &ClusterLoadAssignment, subscribed_cluster: &str) -> Result<(), ValidationError> {
    if assignment.cluster_name != subscribed_cluster {
        return Err(ValidationError::WrongCluster {
            expected: subscribed_cluster.to_string(),
            got: assignment.cluster_name.clone(),
        });
    }
    for group in &assignment.endpoints {
        if group.priority > 127 {
            return Err(ValidationError::PriorityTooLarge(group.priority));
        }
        for ep in &group.lb_endpoints {
            ep.endpoint.address.socket_address.to_socket_addr().map_err(ValidationError::InvalidAddress)?;
        }
    }
    Ok(())
}
