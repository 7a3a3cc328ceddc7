/// In-memory discovery provider backed by a route table
use super::{ConnectionDescriptorsRequest, ConnectionDescriptorsResponse, DiscoveryProvider};
use crate::config::{ConfigError, DiscoveryConfig};
use crate::core::{ConnectionDescriptor, HostPort, InstanceDescriptor};
use crate::error::DiscoveryError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Where one tenant routes to
#[derive(Debug, Clone)]
pub struct StaticRoute {
    pub owner_id: String,
    pub descriptors: Vec<ConnectionDescriptor>,
}

/// Discovery provider that answers from a fixed, mutable table
///
/// Answers only requests coming from `allowed_instances` when that set is
/// given. Tenants missing from the table resolve to `None`.
pub struct StaticDiscoveryProvider {
    routes: RwLock<HashMap<String, StaticRoute>>,
    allowed_instances: Option<HashSet<String>>,
    requests: AtomicUsize,
}

impl StaticDiscoveryProvider {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            allowed_instances: None,
            requests: AtomicUsize::new(0),
        }
    }

    /// Only answer requests made by these instance ids
    pub fn restricted_to<I, S>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_instances = Some(instances.into_iter().map(Into::into).collect());
        self
    }

    /// Build the route table from the `[discovery]` configuration section
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, ConfigError> {
        let mut routes = HashMap::new();

        for route in &config.routes {
            let mut descriptors = Vec::with_capacity(route.endpoints.len());
            for (ordinal, endpoint) in route.endpoints.iter().enumerate() {
                let host_port: HostPort = endpoint
                    .parse()
                    .map_err(ConfigError::ValidationError)?;
                let instance = InstanceDescriptor {
                    public_host: host_port.host.clone(),
                    instance_key: format!("{}-{}", route.owner, ordinal),
                    instance_name: ordinal as i32,
                    release_group_name: route.release_group.clone().unwrap_or_default(),
                    enabled: true,
                    ..Default::default()
                };
                descriptors.push(ConnectionDescriptor::new(instance, host_port).with_ssl(route.ssl));
            }

            routes.insert(
                route.tenant.clone(),
                StaticRoute {
                    owner_id: route.owner.clone(),
                    descriptors,
                },
            );
        }

        let provider = Self {
            routes: RwLock::new(routes),
            allowed_instances: None,
            requests: AtomicUsize::new(0),
        };

        Ok(if config.allowed_instances.is_empty() {
            provider
        } else {
            provider.restricted_to(config.allowed_instances.iter().cloned())
        })
    }

    /// Add or replace the route for a tenant
    pub async fn set_route(&self, tenant_id: impl Into<String>, route: StaticRoute) {
        let mut routes = self.routes.write().await;
        routes.insert(tenant_id.into(), route);
    }

    pub async fn remove_route(&self, tenant_id: &str) -> Option<StaticRoute> {
        let mut routes = self.routes.write().await;
        routes.remove(tenant_id)
    }

    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Total number of requests answered so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for StaticDiscoveryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DiscoveryProvider for StaticDiscoveryProvider {
    async fn request_connections(
        &self,
        request: &ConnectionDescriptorsRequest,
        expected_release_group: Option<&str>,
    ) -> Result<Option<ConnectionDescriptorsResponse>, DiscoveryError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(allowed) = &self.allowed_instances {
            if !allowed.contains(&request.instance_id) {
                log::debug!(
                    "Ignoring request {} from unknown instance {}",
                    request.request_id,
                    request.instance_id
                );
                return Ok(None);
            }
        }

        let routes = self.routes.read().await;
        let Some(route) = routes.get(&request.tenant_id) else {
            return Ok(None);
        };

        let descriptors = route
            .descriptors
            .iter()
            .filter(|d| match expected_release_group {
                Some(group) => d.instance.release_group_name == group,
                None => true,
            })
            .cloned()
            .collect();

        Ok(Some(ConnectionDescriptorsResponse::ok(
            route.owner_id.clone(),
            descriptors,
        )))
    }
}
