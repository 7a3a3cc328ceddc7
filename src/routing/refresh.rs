/// Scheduled refresh of routing entries that are about to expire
use super::TenantRoutingCache;
use crate::utils::deadline_after;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;

impl TenantRoutingCache {
    /// Re-resolve one tenant unless it is already being resolved or has been
    /// invalidated. Returns whether a discovery call was made.
    pub async fn refresh_tenant(&self, tenant_id: &str) -> bool {
        let Some(claim) = self.try_claim(tenant_id) else {
            log::debug!("Tenant {} is already being resolved, skipping refresh", tenant_id);
            return false;
        };

        if !self.is_cached(tenant_id).await {
            return false;
        }

        self.resolve(&claim).await;
        true
    }

    /// Start refreshing every entry that expires within the refresh margin
    ///
    /// Each tenant is refreshed on its own task in `refreshes` so one slow
    /// discovery call cannot hold up the rest. Tasks resolve to
    /// `refresh_tenant`'s result. Returns how many were started.
    pub async fn sweep(self: &Arc<Self>, refreshes: &mut JoinSet<bool>) -> usize {
        let horizon = deadline_after(Instant::now(), self.config().refresh_margin);
        let due = self.expiring_before(horizon).await;

        if !due.is_empty() {
            tracing::debug!("Refreshing {} routing entries", due.len());
        }

        let started = due.len();
        for tenant_id in due {
            let cache = Arc::clone(self);
            refreshes.spawn(async move { cache.refresh_tenant(&tenant_id).await });
        }
        started
    }

    /// Run the sweep on the configured interval until `shutdown` flips to true
    /// or its sender is dropped. Refreshes still running at that point are
    /// aborted before this returns.
    pub async fn start_refresh_task(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config().refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut refreshes = JoinSet::new();

        tracing::info!(
            "Routing refresh task started (interval {:?}, margin {:?})",
            self.config().refresh_interval,
            self.config().refresh_margin
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = self.sweep(&mut refreshes).await;
                    if started > 0 {
                        tracing::debug!("Sweep started {} refreshes", started);
                    }
                }
                Some(finished) = refreshes.join_next(), if !refreshes.is_empty() => {
                    if let Err(e) = finished {
                        tracing::warn!("Routing refresh task failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !refreshes.is_empty() {
            tracing::debug!("Aborting {} routing refreshes", refreshes.len());
        }
        refreshes.shutdown().await;
        tracing::info!("Routing refresh task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::cache::tests::ScriptedProvider;
    use crate::routing::RoutingCacheConfig;
    use std::time::Duration;

    fn cache_with(provider: &Arc<ScriptedProvider>, ttl: Duration, margin: Duration) -> Arc<TenantRoutingCache> {
        let config = RoutingCacheConfig::new("testInstance", "testService", "testPort", ttl)
            .unwrap()
            .with_refresh(Duration::from_millis(20), margin);
        Arc::new(TenantRoutingCache::new(config, provider.clone()))
    }

    #[tokio::test]
    async fn test_sweep_refreshes_entries_near_expiry() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("tenant", "owner", &[1]);
        provider.answer("later", "owner-2", &[2]);
        let cache = cache_with(&provider, Duration::from_millis(300), Duration::from_millis(250));

        let before = cache.get_connections("tenant").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.get_connections("later").await.unwrap();

        let mut refreshes = JoinSet::new();
        assert_eq!(cache.sweep(&mut refreshes).await, 1);
        assert!(refreshes.join_next().await.unwrap().unwrap());
        assert!(refreshes.join_next().await.is_none());
        assert_eq!(provider.calls_for("tenant"), 2);
        assert_eq!(provider.calls_for("later"), 1);

        // same topology, same instance, fresh again
        let after = cache.get_connections("tenant").await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(provider.calls_for("tenant"), 2);
    }

    #[tokio::test]
    async fn test_sweep_picks_up_topology_change() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("tenant", "owner", &[1]);
        let cache = cache_with(&provider, Duration::from_millis(100), Duration::from_millis(100));

        let before = cache.get_connections("tenant").await.unwrap();
        provider.answer("tenant", "owner", &[1, 2]);

        let mut refreshes = JoinSet::new();
        cache.sweep(&mut refreshes).await;
        while refreshes.join_next().await.is_some() {}
        let after = cache.get_connections("tenant").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_refreshes_tenants_independently() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("slow", "owner-1", &[1]);
        provider.answer("fast", "owner-2", &[2]);
        let cache = cache_with(&provider, Duration::from_secs(1), Duration::from_secs(1));

        cache.get_connections("slow").await.unwrap();
        cache.get_connections("fast").await.unwrap();
        provider.set_delay("slow", Duration::from_millis(400));

        let started = Instant::now();
        let mut refreshes = JoinSet::new();
        assert_eq!(cache.sweep(&mut refreshes).await, 2);

        assert!(refreshes.join_next().await.unwrap().unwrap());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(provider.calls_for("fast"), 2);

        assert!(refreshes.join_next().await.unwrap().unwrap());
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(provider.calls_for("slow"), 2);
    }

    #[tokio::test]
    async fn test_refresh_skips_busy_and_invalidated_tenants() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("tenant", "owner", &[1]);
        let cache = cache_with(&provider, Duration::from_secs(60), Duration::from_secs(1));

        cache.get_connections("tenant").await.unwrap();

        let claim = cache.try_claim("tenant").unwrap();
        assert!(!cache.refresh_tenant("tenant").await);
        drop(claim);

        cache.invalidate_tenant("tenant").await.unwrap();
        assert!(!cache.refresh_tenant("tenant").await);
        assert_eq!(provider.calls_for("tenant"), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_entry() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("tenant", "owner", &[1]);
        let cache = cache_with(&provider, Duration::from_secs(60), Duration::from_secs(1));

        let before = cache.get_connections("tenant").await.unwrap();
        provider.set_failing(true);
        assert!(cache.refresh_tenant("tenant").await);

        let after = cache.get_connections("tenant").await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(cache.routing_report().await.tenant_to_user_id["tenant"], "owner");
    }

    #[tokio::test]
    async fn test_refresh_task_runs_until_shutdown() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("tenant", "owner", &[1]);
        let cache = cache_with(&provider, Duration::from_millis(60), Duration::from_millis(50));
        cache.get_connections("tenant").await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&cache).start_refresh_task(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(provider.calls_for("tenant") >= 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("refresh task did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_task_aborts_running_refreshes_on_shutdown() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        provider.answer("tenant", "owner", &[1]);
        let cache = cache_with(&provider, Duration::from_millis(100), Duration::from_millis(100));
        cache.get_connections("tenant").await.unwrap();
        provider.set_delay("tenant", Duration::from_secs(10));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&cache).start_refresh_task(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.try_claim("tenant").is_none());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("refresh task did not stop")
            .unwrap();

        assert!(cache.try_claim("tenant").is_some());
        assert_eq!(provider.calls_for("tenant"), 2);
    }
}
