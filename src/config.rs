//! Configuration loading (spec.md §6 "TCP proxy config").
//!
//! `from_str` content-sniffs JSON vs. YAML: a leading `{` means JSON,
//! anything else is handed to `serde_yaml`. The shape below generalizes a
//! single `ProxyConfig`/`ServerConfig`/discovery-config trio into the
//! richer surface spec.md §6 calls for — per-cluster discovery endpoints,
//! route tables with CIDR/port matching, and the resource-manager/
//! idle-timeout knobs §4.4/§4.6 need.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use std::{io, time};

use proxy::route::RouteMatch;

pub fn from_str(txt: &str) -> io::Result<AppConfig> {
    let txt = txt.trim_left();
    if txt.starts_with('{') {
        ::serde_json::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    } else {
        ::serde_yaml::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub proxies: Vec<ProxyConfig>,
    /// Size of the shared transfer buffer, in bytes; falls back to a
    /// built-in default when absent.
    pub buffer_size_bytes: Option<usize>,
    pub admin: Option<AdminConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub stat_prefix: String,
    pub servers: Vec<ServerConfig>,
    pub discovery: DiscoveryConfig,
    pub destination: DestinationConfig,
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub metadata_match: Vec<(String, String)>,
    pub resource_limits: Option<ResourceLimitsConfig>,
}

fn default_max_connect_attempts() -> u32 {
    1
}

impl ProxyConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.filter(|&ms| ms > 0).map(time::Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_ms.map(time::Duration::from_millis).unwrap_or_else(|| time::Duration::from_secs(5))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

/// Where the proxy's membership updates come from for one cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub base_url: String,
    pub cluster: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub is_local_cluster: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Either a single fixed cluster, or a route table matched per-connection
/// (spec.md §4.4 "Routing").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationConfig {
    Cluster { cluster: String },
    Routes { routes: Vec<RouteConfig> },
}

/// One routing rule. First match wins; declaration order breaks ties.
/// Ranges are parsed by [`proxy::route`] into `RouteMatch`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteConfig {
    pub cluster: String,
    pub destination_ip_list: Option<Vec<String>>,
    pub destination_ports: Option<String>,
    pub source_ip_list: Option<Vec<String>>,
    pub source_ports: Option<String>,
}

impl RouteConfig {
    pub fn compile(&self) -> Result<(RouteMatch, String), ConfigError> {
        let m = RouteMatch::compile(
            self.destination_ip_list.as_ref().map(|v| v.as_slice()).unwrap_or(&[]),
            self.destination_ports.as_ref().map(|s| s.as_str()),
            self.source_ip_list.as_ref().map(|v| v.as_slice()).unwrap_or(&[]),
            self.source_ports.as_ref().map(|s| s.as_str()),
        )
        .map_err(ConfigError)?;
        Ok((m, self.cluster.clone()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceLimitsConfig {
    pub max_connections: Option<usize>,
    pub max_pending_requests: Option<usize>,
    pub max_requests: Option<usize>,
    pub max_retries: Option<usize>,
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ::std::error::Error for ConfigError {
    fn description(&self) -> &str {
        "configuration error"
    }
}

impl<'a> From<&'a str> for ConfigError {
    fn from(s: &'a str) -> ConfigError {
        ConfigError(s.to_string())
    }
}

impl From<String> for ConfigError {
    fn from(s: String) -> ConfigError {
        ConfigError(s)
    }
}

#[cfg(test)]
mod tests {
    use super::{from_str, DestinationConfig};

    #[test]
    fn parse_cluster_destination_yaml() {
        let yaml = "
proxies:
  - stat_prefix: ingress
    servers:
      - addr: 0.0.0.0:4321
    discovery:
      base_url: http://localhost:9901
      cluster: backend
    destination:
      cluster: backend
    max_connect_attempts: 3
    ";
        let app = from_str(yaml).unwrap();
        assert_eq!(app.proxies.len(), 1);
        let proxy = &app.proxies[0];
        assert_eq!(proxy.max_connect_attempts, 3);
        match proxy.destination {
            DestinationConfig::Cluster { ref cluster } => assert_eq!(cluster, "backend"),
            DestinationConfig::Routes { .. } => panic!("expected a cluster destination"),
        }
    }

    #[test]
    fn parse_route_table_json() {
        let json = r#"{
            "proxies": [{
                "stat_prefix": "ingress",
                "servers": [{"addr": "0.0.0.0:4321"}],
                "discovery": {"base_url": "http://localhost:9901", "cluster": "backend"},
                "destination": {"routes": [
                    {"cluster": "backend", "destination_ports": "80,443"}
                ]}
            }]
        }"#;
        let app = from_str(json).unwrap();
        match app.proxies[0].destination {
            DestinationConfig::Routes { ref routes } => assert_eq!(routes.len(), 1),
            DestinationConfig::Cluster { .. } => panic!("expected a route table"),
        }
    }

    #[test]
    fn default_max_connect_attempts_is_one() {
        let yaml = "
proxies:
  - stat_prefix: ingress
    servers:
      - addr: 0.0.0.0:4321
    discovery:
      base_url: http://localhost:9901
      cluster: backend
    destination:
      cluster: backend
    ";
        let app = from_str(yaml).unwrap();
        assert_eq!(app.proxies[0].max_connect_attempts, 1);
    }
}
