pub mod config;
pub mod error;
/// Tenant router - resolves tenants to the backend endpoints serving them
///
/// A tenant id is resolved through a discovery provider into an owning
/// account and a set of connection descriptors. Results are cached per
/// tenant and shared per owner, refreshed in the background, and exposed as
/// a routing report for diagnostics.
pub mod core;
pub mod discovery;
pub mod routing;
pub mod utils;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::core::ConnectionDescriptors;
use crate::discovery::{DiscoveryProvider, StaticDiscoveryProvider};
use crate::error::{RouterError, RouterResult};
use crate::routing::{RoutingCacheConfig, TenantRoutingCache, TenantsRoutingServiceReport};

/// Routing cache plus the background task keeping it fresh
///
/// The cache lives exactly as long as the router; nothing is persisted.
pub struct TenantRouter {
    cache: Arc<TenantRoutingCache>,
    shutdown: Option<watch::Sender<bool>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl TenantRouter {
    pub fn new(config: RoutingCacheConfig, provider: Arc<dyn DiscoveryProvider>) -> Self {
        Self {
            cache: Arc::new(TenantRoutingCache::new(config, provider)),
            shutdown: None,
            refresh_task: None,
        }
    }

    /// Router backed by the static routes of the `[discovery]` section
    pub fn from_config(config: &Config) -> RouterResult<Self> {
        config.validate()?;
        let provider = StaticDiscoveryProvider::from_config(&config.discovery)?;
        Ok(Self::new(config.routing_cache_config()?, Arc::new(provider)))
    }

    /// Shared handle to the cache for request-routing code
    pub fn cache(&self) -> Arc<TenantRoutingCache> {
        Arc::clone(&self.cache)
    }

    pub fn is_running(&self) -> bool {
        self.refresh_task.is_some()
    }

    /// Spawn the refresh sweep; must be called inside a tokio runtime
    pub fn start(&mut self) {
        if self.is_running() {
            log::warn!("Tenant router already started");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&self.cache).start_refresh_task(shutdown_rx));

        self.shutdown = Some(shutdown_tx);
        self.refresh_task = Some(task);
        log::info!(
            "Tenant router started for instance {}",
            self.cache.config().instance_id
        );
    }

    /// Resolve tenants ahead of the first request, concurrently
    ///
    /// Returns how many of them resolved to at least one descriptor.
    pub async fn warm(&self, tenants: &[String]) -> RouterResult<usize> {
        let lookups = tenants.iter().map(|tenant| self.cache.get_connections(tenant));
        let results = futures::future::join_all(lookups).await;

        let mut routed = 0;
        for result in results {
            if !result?.is_empty() {
                routed += 1;
            }
        }

        log::info!("Warmed {} tenants, {} with routes", tenants.len(), routed);
        Ok(routed)
    }

    pub async fn get_connections(&self, tenant_id: &str) -> RouterResult<Arc<ConnectionDescriptors>> {
        Ok(self.cache.get_connections(tenant_id).await?)
    }

    pub async fn invalidate_tenant(&self, tenant_id: &str) -> RouterResult<()> {
        Ok(self.cache.invalidate_tenant(tenant_id).await?)
    }

    pub async fn routing_report(&self) -> TenantsRoutingServiceReport {
        self.cache.routing_report().await
    }

    /// Stop the refresh sweep and wait for it to exit
    ///
    /// Refreshes the sweep started are aborted, so no discovery call is made
    /// on the router's behalf once this returns.
    pub async fn shutdown(&mut self) -> RouterResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already be gone; that is fine
            let _ = shutdown.send(true);
        }

        if let Some(task) = self.refresh_task.take() {
            task.await
                .map_err(|e| RouterError::internal(format!("refresh task failed: {}", e)))?;
            log::info!("Tenant router stopped");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticRouteConfig;
    use crate::error::RoutingError;

    fn config_with_routes() -> Config {
        let mut config = Config::default();
        config.discovery.routes = vec![
            StaticRouteConfig {
                tenant: "acme".to_string(),
                owner: "account-1".to_string(),
                endpoints: vec!["10.0.1.10:10000".to_string()],
                ssl: false,
                release_group: None,
            },
            StaticRouteConfig {
                tenant: "globex".to_string(),
                owner: "account-1".to_string(),
                endpoints: vec!["10.0.1.10:10000".to_string()],
                ssl: false,
                release_group: None,
            },
        ];
        config
    }

    #[test]
    fn test_router_from_invalid_config() {
        let mut config = Config::default();
        config.cache.ttl_sec = 0;
        assert!(matches!(
            TenantRouter::from_config(&config),
            Err(RouterError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_router_lifecycle() {
        let mut router = TenantRouter::from_config(&config_with_routes()).unwrap();
        assert!(!router.is_running());

        router.start();
        assert!(router.is_running());
        router.start();

        let tenants = vec!["acme".to_string(), "globex".to_string(), "initech".to_string()];
        assert_eq!(router.warm(&tenants).await.unwrap(), 2);

        let acme = router.get_connections("acme").await.unwrap();
        let globex = router.get_connections("globex").await.unwrap();
        assert!(Arc::ptr_eq(&acme, &globex));

        let report = router.routing_report().await;
        assert_eq!(report.tenant_count(), 3);
        assert_eq!(report.tenants_for_owner("account-1"), vec!["acme", "globex"]);

        router.shutdown().await.unwrap();
        assert!(!router.is_running());
        router.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_refreshes() {
        use crate::routing::cache::tests::ScriptedProvider;
        use std::time::Duration;

        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("acme", "account-1", &[10000]);
        let config = RoutingCacheConfig::new("testInstance", "testService", "testPort", Duration::from_millis(100))
            .unwrap()
            .with_refresh(Duration::from_millis(20), Duration::from_millis(100));

        let mut router = TenantRouter::new(config, provider.clone());
        router.get_connections("acme").await.unwrap();
        provider.set_delay("acme", Duration::from_secs(10));

        router.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.calls_for("acme"), 2);

        tokio::time::timeout(Duration::from_secs(1), router.shutdown())
            .await
            .expect("shutdown waited on a refresh")
            .unwrap();

        assert!(router.cache().try_claim("acme").is_some());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls_for("acme"), 2);
    }

    #[tokio::test]
    async fn test_router_rejects_empty_tenant() {
        let router = TenantRouter::from_config(&config_with_routes()).unwrap();
        assert!(matches!(
            router.invalidate_tenant("").await,
            Err(RouterError::Routing(RoutingError::EmptyTenantId))
        ));
        assert!(router.warm(&[String::new()]).await.is_err());
    }
}
