/// Core value types shared by the discovery provider and the routing cache
pub mod descriptors;

pub use descriptors::ConnectionDescriptors;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Identity of one backend process instance, as reported by discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceDescriptor {
    pub datacenter: String,
    pub rack: String,
    pub public_host: String,
    pub cluster_key: String,
    pub cluster_name: String,
    pub service_key: String,
    pub service_name: String,
    pub release_group_key: String,
    pub release_group_name: String,
    pub instance_key: String,
    pub instance_name: i32,
    pub version: String,
    pub region: String,
    pub public_key: String,
    pub secure_port: u16,
    pub enabled: bool,
}

/// A resolved network address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = String;

    /// Parse `host:port`; the port is taken after the last colon
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid endpoint format '{}': must be host:port", s))?;

        if host.trim().is_empty() {
            return Err(format!("Invalid endpoint '{}': empty host", s));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| format!("Invalid port in endpoint '{}': {}", s, e))?;

        Ok(Self::new(host, port))
    }
}

/// One addressable backend endpoint
///
/// Two descriptors are equal when they point at the same host and port; the
/// instance metadata and auxiliary maps do not take part in comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub instance: InstanceDescriptor,
    pub ssl_enabled: bool,
    pub loopback: bool,
    pub host_port: HostPort,
    /// Opaque to the router
    #[serde(default)]
    pub aux_ports: BTreeMap<String, String>,
    /// Opaque to the router
    #[serde(default)]
    pub aux_flags: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    /// Descriptor for a plain endpoint with no metadata
    pub fn new(instance: InstanceDescriptor, host_port: HostPort) -> Self {
        Self {
            instance,
            ssl_enabled: false,
            loopback: false,
            host_port,
            aux_ports: BTreeMap::new(),
            aux_flags: BTreeMap::new(),
        }
    }

    pub fn with_ssl(mut self, ssl_enabled: bool) -> Self {
        self.ssl_enabled = ssl_enabled;
        self
    }
}

impl PartialEq for ConnectionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.host_port == other.host_port
    }
}

impl Eq for ConnectionDescriptor {}

impl Hash for ConnectionDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host_port.hash(state);
    }
}
