/// Point-in-time snapshot of the routing cache
use crate::core::ConnectionDescriptors;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which tenants route to which owner, and what each owner resolved to
///
/// Built from copies of the cache maps. The descriptor sets are the same
/// immutable `Arc`s the cache hands to callers, so identity comparisons
/// against earlier `get_connections` results hold. Tenants discovery knows
/// nothing about have no owner and are listed in `unrouted_tenants` instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TenantsRoutingServiceReport {
    pub tenant_to_user_id: BTreeMap<String, String>,
    pub user_ids_connection_descriptors: BTreeMap<String, Arc<ConnectionDescriptors>>,
    pub unrouted_tenants: BTreeMap<String, Arc<ConnectionDescriptors>>,
}

impl TenantsRoutingServiceReport {
    /// Routed and unrouted tenants together
    pub fn tenant_count(&self) -> usize {
        self.tenant_to_user_id.len() + self.unrouted_tenants.len()
    }

    pub fn owner_count(&self) -> usize {
        self.user_ids_connection_descriptors.len()
    }

    /// Tenants currently mapped to `owner_id`, sorted
    pub fn tenants_for_owner(&self, owner_id: &str) -> Vec<&str> {
        self.tenant_to_user_id
            .iter()
            .filter(|(_, owner)| owner.as_str() == owner_id)
            .map(|(tenant, _)| tenant.as_str())
            .collect()
    }

    pub fn connections_for_tenant(&self, tenant_id: &str) -> Option<&Arc<ConnectionDescriptors>> {
        match self.tenant_to_user_id.get(tenant_id) {
            Some(owner) => self.user_ids_connection_descriptors.get(owner),
            None => self.unrouted_tenants.get(tenant_id),
        }
    }
}
