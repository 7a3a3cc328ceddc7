/// Tenant routing: the two-level tenant -> owner -> descriptors cache
///
/// Key behaviour:
/// - Fresh hits return the exact same `Arc<ConnectionDescriptors>` every time
/// - Tenants that resolve to the same owner share one descriptor set
/// - At most one discovery call per tenant is in flight at any moment
/// - A background sweep re-resolves entries shortly before they expire
pub mod cache;
pub mod refresh;
pub mod report;

pub use cache::TenantRoutingCache;
pub use report::TenantsRoutingServiceReport;

use std::time::Duration;

/// Routing cache configuration
#[derive(Debug, Clone)]
pub struct RoutingCacheConfig {
    /// Identifier of this process, sent with every discovery request
    pub instance_id: String,
    pub service_id: String,
    pub port_name: String,
    pub release_group: Option<String>,
    /// How long a resolution stays fresh
    pub ttl: Duration,
    /// How often the background sweep runs
    pub refresh_interval: Duration,
    /// Entries expiring within this margin are refreshed by the sweep
    pub refresh_margin: Duration,
}

impl RoutingCacheConfig {
    /// Create a new routing cache configuration with validation
    pub fn new(
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        port_name: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, String> {
        let instance_id = instance_id.into();
        if instance_id.trim().is_empty() {
            return Err("Instance id cannot be empty".to_string());
        }

        if ttl.is_zero() {
            return Err("Cache TTL must be greater than 0".to_string());
        }

        Ok(Self {
            instance_id,
            service_id: service_id.into(),
            port_name: port_name.into(),
            release_group: None,
            ttl,
            refresh_interval: (ttl / 6).max(Duration::from_millis(10)),
            refresh_margin: ttl / 4,
        })
    }

    pub fn with_release_group(mut self, release_group: impl Into<String>) -> Self {
        self.release_group = Some(release_group.into());
        self
    }

    pub fn with_refresh(mut self, interval: Duration, margin: Duration) -> Self {
        self.refresh_interval = interval;
        self.refresh_margin = margin;
        self
    }

    /// Check if configuration is valid
    pub fn is_valid(&self) -> bool {
        !self.instance_id.trim().is_empty()
            && !self.ttl.is_zero()
            && !self.refresh_interval.is_zero()
            && self.refresh_margin < self.ttl
    }
}
