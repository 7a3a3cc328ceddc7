/// Discovery provider contract and its request/response payloads
///
/// The routing cache talks to exactly one provider. How the provider reaches
/// the discovery backend (HTTP, RPC, a static table) is up to the
/// implementation.
pub mod static_provider;

pub use static_provider::{StaticDiscoveryProvider, StaticRoute};

use crate::core::ConnectionDescriptor;
use crate::error::DiscoveryError;
use crate::utils::generate_id;
use serde::{Deserialize, Serialize};

/// Ask the discovery backend for the endpoints serving one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptorsRequest {
    pub tenant_id: String,
    /// The instance making the request, for auditing and affinity
    pub instance_id: String,
    pub connect_to_service_named: String,
    pub port_name: String,
    pub request_id: String,
}

impl ConnectionDescriptorsRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        instance_id: impl Into<String>,
        connect_to_service_named: impl Into<String>,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            instance_id: instance_id.into(),
            connect_to_service_named: connect_to_service_named.into(),
            port_name: port_name.into(),
            request_id: generate_id("cdr"),
        }
    }
}

/// Discovery backend answer for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptorsResponse {
    pub status_code: u16,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Account owning the tenant's routing; tenants of one owner share a set
    pub owner_id: String,
    #[serde(default)]
    pub descriptors: Vec<ConnectionDescriptor>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl ConnectionDescriptorsResponse {
    pub fn ok(owner_id: impl Into<String>, descriptors: Vec<ConnectionDescriptor>) -> Self {
        Self {
            status_code: 200,
            errors: Vec::new(),
            owner_id: owner_id.into(),
            descriptors,
            extra: None,
        }
    }

    /// Reject responses the cache must not install
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if !(200..300).contains(&self.status_code) {
            return Err(DiscoveryError::Rejected {
                status_code: self.status_code,
                errors: self.errors.clone(),
            });
        }

        if self.owner_id.trim().is_empty() {
            return Err(DiscoveryError::malformed("response carries no owner id"));
        }

        Ok(())
    }
}

/// Performs one remote resolution per call
///
/// `Ok(None)` means the backend has no mapping for the tenant. Implementations
/// must be safe to call concurrently for different tenants.
#[async_trait::async_trait]
pub trait DiscoveryProvider: Send + Sync {
    async fn request_connections(
        &self,
        request: &ConnectionDescriptorsRequest,
        expected_release_group: Option<&str>,
    ) -> Result<Option<ConnectionDescriptorsResponse>, DiscoveryError>;
}
