/// Tenant routing cache
///
/// Two maps make up the cache: tenant -> owner (with an expiry) and owner ->
/// descriptor set. Both sit behind one `RwLock` that is only ever held for
/// map operations; discovery calls run under a per-tenant claim instead, so a
/// slow tenant never blocks lookups for anybody else.
use super::{RoutingCacheConfig, TenantsRoutingServiceReport};
use crate::core::{ConnectionDescriptor, ConnectionDescriptors};
use crate::discovery::{ConnectionDescriptorsRequest, DiscoveryProvider};
use crate::error::{RouterError, RoutingError};
use crate::utils::{deadline_after, format_duration};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{OwnedMutexGuard, RwLock};

/// What a tenant resolved to
#[derive(Debug, Clone)]
enum Route {
    /// Served by the owner's shared descriptor set
    Owner(String),
    /// Discovery had no routing for the tenant; the empty set is the
    /// tenant's own and never enters the owner map
    Unrouted(Arc<ConnectionDescriptors>),
}

impl Route {
    fn owner_id(&self) -> Option<&str> {
        match self {
            Route::Owner(owner_id) => Some(owner_id),
            Route::Unrouted(_) => None,
        }
    }
}

/// Tenant -> owner indirection; holds no owner descriptors itself
#[derive(Debug, Clone)]
struct CacheEntry {
    route: Route,
    expires_at: Instant,
}

#[derive(Debug)]
struct OwnerSet {
    connections: Arc<ConnectionDescriptors>,
    /// Handed to a tenant that was invalidated since; never reused
    retired: bool,
}

#[derive(Debug, Default)]
struct RoutingState {
    tenants: HashMap<String, CacheEntry>,
    owners: HashMap<String, OwnerSet>,
}

impl RoutingState {
    fn connections(&self, entry: &CacheEntry) -> Option<Arc<ConnectionDescriptors>> {
        match &entry.route {
            Route::Owner(owner_id) => self.owners.get(owner_id).map(|set| Arc::clone(&set.connections)),
            Route::Unrouted(connections) => Some(Arc::clone(connections)),
        }
    }

    fn fresh(&self, tenant_id: &str, now: Instant) -> Option<Arc<ConnectionDescriptors>> {
        let entry = self.tenants.get(tenant_id)?;
        if entry.expires_at <= now {
            return None;
        }
        self.connections(entry)
    }

    /// Whatever the tenant last resolved to, expired or not
    fn last_known(&self, tenant_id: &str) -> Option<Arc<ConnectionDescriptors>> {
        let entry = self.tenants.get(tenant_id)?;
        self.connections(entry)
    }

    fn owner_in_use(&self, owner_id: &str) -> bool {
        self.tenants
            .values()
            .any(|entry| entry.route.owner_id() == Some(owner_id))
    }

    fn prune_owner(&mut self, owner_id: &str) {
        if !self.owner_in_use(owner_id) && self.owners.remove(owner_id).is_some() {
            debug!("Dropped descriptors of owner {} (no tenants left)", owner_id);
        }
    }
}

/// Per-tenant resolution lock plus a count of invalidations seen while it
/// was held
#[derive(Debug)]
struct ClaimSlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    invalidations: AtomicU64,
}

impl Default for ClaimSlot {
    fn default() -> Self {
        Self {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            invalidations: AtomicU64::new(0),
        }
    }
}

type ClaimMap = Mutex<HashMap<String, Arc<ClaimSlot>>>;

/// Exclusive right to resolve one tenant
///
/// Lazy lookups wait for it, the background sweep only tries it. The slot is
/// removed from the claim map once nobody else holds or waits on it, also
/// when a waiter is cancelled before it got the lock.
pub(crate) struct TenantClaim<'a> {
    claims: &'a ClaimMap,
    tenant_id: String,
    slot: Arc<ClaimSlot>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TenantClaim<'_> {
    pub(crate) fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn invalidations(&self) -> u64 {
        self.slot.invalidations.load(Ordering::SeqCst)
    }
}

impl Drop for TenantClaim<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference lives in the map, one in this claim
        let idle = claims
            .get(&self.tenant_id)
            .map_or(false, |slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) <= 2);
        if idle {
            claims.remove(&self.tenant_id);
        }
    }
}

/// Resolves tenants to connection descriptors and caches the answers
pub struct TenantRoutingCache {
    config: RoutingCacheConfig,
    provider: Arc<dyn DiscoveryProvider>,
    state: RwLock<RoutingState>,
    claims: ClaimMap,
    /// Handed out when discovery fails and nothing was cached yet
    empty: Arc<ConnectionDescriptors>,
}

fn validate_tenant_id(tenant_id: &str) -> Result<(), RoutingError> {
    if tenant_id.trim().is_empty() {
        return Err(RoutingError::EmptyTenantId);
    }
    Ok(())
}

impl TenantRoutingCache {
    pub fn new(config: RoutingCacheConfig, provider: Arc<dyn DiscoveryProvider>) -> Self {
        Self {
            config,
            provider,
            state: RwLock::new(RoutingState::default()),
            claims: Mutex::new(HashMap::new()),
            empty: Arc::new(ConnectionDescriptors::empty()),
        }
    }

    pub fn config(&self) -> &RoutingCacheConfig {
        &self.config
    }

    /// Get the descriptors currently serving a tenant
    ///
    /// Discovery failures never surface here: the last known value is
    /// returned instead, or an empty set when there is none. The only error is
    /// an empty tenant id.
    pub async fn get_connections(&self, tenant_id: &str) -> Result<Arc<ConnectionDescriptors>, RoutingError> {
        validate_tenant_id(tenant_id)?;

        if let Some(hit) = self.state.read().await.fresh(tenant_id, Instant::now()) {
            debug!("Routing cache hit for tenant {}", tenant_id);
            return Ok(hit);
        }

        let claim = self.claim(tenant_id).await;

        // Someone else may have resolved the tenant while we waited
        if let Some(hit) = self.state.read().await.fresh(tenant_id, Instant::now()) {
            debug!("Tenant {} resolved by a concurrent lookup", tenant_id);
            return Ok(hit);
        }

        Ok(self.resolve(&claim).await)
    }

    /// Forget a tenant's owner mapping
    ///
    /// The next lookup for the tenant goes to discovery and returns a newly
    /// minted descriptor set even when the topology is unchanged. Other
    /// tenants of the same owner keep their entries.
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> Result<(), RoutingError> {
        validate_tenant_id(tenant_id)?;

        let mut state = self.state.write().await;
        let removed = state.tenants.remove(tenant_id);

        // A resolution holding the lock must not install what it fetched
        let in_flight = {
            let claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
            match claims.get(tenant_id) {
                Some(slot) if slot.lock.try_lock().is_err() => {
                    slot.invalidations.fetch_add(1, Ordering::SeqCst);
                    true
                }
                _ => false,
            }
        };

        match removed {
            Some(entry) => {
                if let Route::Owner(owner_id) = entry.route {
                    info!("Invalidated tenant {} (owner {})", tenant_id, owner_id);
                    if let Some(set) = state.owners.get_mut(&owner_id) {
                        set.retired = true;
                    }
                    state.prune_owner(&owner_id);
                } else {
                    info!("Invalidated tenant {} (no route)", tenant_id);
                }
            }
            None if in_flight => {
                debug!("Invalidated tenant {} while a resolution was in flight", tenant_id);
            }
            None => {}
        }

        Ok(())
    }

    /// Snapshot of both cache levels
    pub async fn routing_report(&self) -> TenantsRoutingServiceReport {
        let state = self.state.read().await;
        let mut report = TenantsRoutingServiceReport::default();

        for (tenant, entry) in &state.tenants {
            match &entry.route {
                Route::Owner(owner_id) => {
                    report.tenant_to_user_id.insert(tenant.clone(), owner_id.clone());
                }
                Route::Unrouted(connections) => {
                    report.unrouted_tenants.insert(tenant.clone(), Arc::clone(connections));
                }
            }
        }
        report.user_ids_connection_descriptors = state
            .owners
            .iter()
            .map(|(owner, set)| (owner.clone(), Arc::clone(&set.connections)))
            .collect();

        report
    }

    /// Number of tenants with a cached resolution, expired ones included
    pub async fn tenant_count(&self) -> usize {
        self.state.read().await.tenants.len()
    }

    pub(crate) async fn is_cached(&self, tenant_id: &str) -> bool {
        self.state.read().await.tenants.contains_key(tenant_id)
    }

    /// Tenants whose entries expire before `horizon`
    pub(crate) async fn expiring_before(&self, horizon: Instant) -> Vec<String> {
        let state = self.state.read().await;
        state
            .tenants
            .iter()
            .filter(|(_, entry)| entry.expires_at <= horizon)
            .map(|(tenant, _)| tenant.clone())
            .collect()
    }

    /// Register interest in a tenant's slot without taking its lock
    fn claim_ticket(&self, tenant_id: &str) -> TenantClaim<'_> {
        let slot = {
            let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(claims.entry(tenant_id.to_string()).or_default())
        };
        TenantClaim {
            claims: &self.claims,
            tenant_id: tenant_id.to_string(),
            slot,
            guard: None,
        }
    }

    async fn claim(&self, tenant_id: &str) -> TenantClaim<'_> {
        let mut claim = self.claim_ticket(tenant_id);
        let lock = Arc::clone(&claim.slot.lock);
        claim.guard = Some(lock.lock_owned().await);
        claim
    }

    /// Claim a tenant only if nobody is resolving it right now
    pub(crate) fn try_claim(&self, tenant_id: &str) -> Option<TenantClaim<'_>> {
        let mut claim = self.claim_ticket(tenant_id);
        let lock = Arc::clone(&claim.slot.lock);
        claim.guard = Some(lock.try_lock_owned().ok()?);
        Some(claim)
    }

    /// Ask discovery about the claimed tenant and commit the answer
    pub(crate) async fn resolve(&self, claim: &TenantClaim<'_>) -> Arc<ConnectionDescriptors> {
        let tenant_id = claim.tenant_id();
        let seen_invalidations = claim.invalidations();

        let request = ConnectionDescriptorsRequest::new(
            tenant_id,
            self.config.instance_id.as_str(),
            self.config.service_id.as_str(),
            self.config.port_name.as_str(),
        );
        let started = Instant::now();

        let answer = match self
            .provider
            .request_connections(&request, self.config.release_group.as_deref())
            .await
        {
            Ok(Some(response)) => response.validate().map(|()| Some(response)),
            other => other,
        };

        match answer {
            Ok(Some(response)) => {
                info!(
                    "Resolved tenant {} to owner {} with {} descriptors in {}",
                    tenant_id,
                    response.owner_id,
                    response.descriptors.len(),
                    format_duration(started.elapsed())
                );
                self.commit(claim, seen_invalidations, Some(response.owner_id), response.descriptors)
                    .await
            }
            Ok(None) => {
                debug!("Discovery has no routing for tenant {}, caching empty result", tenant_id);
                self.commit(claim, seen_invalidations, None, Vec::new()).await
            }
            Err(e) => {
                let error = RouterError::from(e);
                log::log!(
                    error.severity().log_level(),
                    "Discovery failed for tenant {} (request {}, {}): {}",
                    tenant_id,
                    request.request_id,
                    if error.is_recoverable() { "will retry" } else { "not retryable" },
                    error
                );
                self.state
                    .read()
                    .await
                    .last_known(tenant_id)
                    .unwrap_or_else(|| Arc::clone(&self.empty))
            }
        }
    }

    async fn commit(
        &self,
        claim: &TenantClaim<'_>,
        seen_invalidations: u64,
        owner_id: Option<String>,
        descriptors: Vec<ConnectionDescriptor>,
    ) -> Arc<ConnectionDescriptors> {
        let tenant_id = claim.tenant_id();
        let mut state = self.state.write().await;

        // Invalidations only happen under the state lock, which we hold now
        let stale = claim.invalidations() != seen_invalidations;

        let current = match &owner_id {
            Some(owner_id) => state
                .owners
                .get(owner_id)
                .filter(|set| !set.retired)
                .map(|set| Arc::clone(&set.connections)),
            None => state.tenants.get(tenant_id).and_then(|entry| match &entry.route {
                Route::Unrouted(connections) => Some(Arc::clone(connections)),
                Route::Owner(_) => None,
            }),
        };
        let connections = match current.filter(|existing| existing.same_endpoints(&descriptors)) {
            Some(existing) => existing,
            None => Arc::new(ConnectionDescriptors::new(descriptors)),
        };

        if stale {
            debug!(
                "Tenant {} was invalidated during resolution, not caching the answer",
                tenant_id
            );
            if let Some(owner_id) = owner_id {
                if state.owner_in_use(&owner_id) {
                    state.owners.insert(
                        owner_id,
                        OwnerSet {
                            connections: Arc::clone(&connections),
                            retired: false,
                        },
                    );
                }
            }
            return connections;
        }

        let route = match owner_id {
            Some(owner_id) => {
                state.owners.insert(
                    owner_id.clone(),
                    OwnerSet {
                        connections: Arc::clone(&connections),
                        retired: false,
                    },
                );
                Route::Owner(owner_id)
            }
            None => Route::Unrouted(Arc::clone(&connections)),
        };

        let entry = CacheEntry {
            route: route.clone(),
            expires_at: deadline_after(Instant::now(), self.config.ttl),
        };
        if let Some(previous) = state.tenants.insert(tenant_id.to_string(), entry) {
            if let Some(previous_owner) = previous.route.owner_id() {
                if route.owner_id() != Some(previous_owner) {
                    info!(
                        "Tenant {} moved from owner {} to {}",
                        tenant_id,
                        previous_owner,
                        route.owner_id().unwrap_or("no route")
                    );
                    state.prune_owner(previous_owner);
                }
            }
        }

        connections
    }
}
