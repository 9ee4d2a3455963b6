use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::access::{Caller, Resource};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage for serialized responses. Production uses Redis; tests use
/// [`MemoryCache`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    /// Removes every key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Which response of a resource a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind<'a> {
    List,
    Detail(i64),
    View(&'a str),
}

/// Form-urlencoded query string sorted by parameter name. Repeated names keep
/// their request order since handlers read the last value.
pub fn normalize_params(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in sorted {
        out.append_pair(k, v);
    }
    out.finish()
}

fn user_segment(resource: Resource, caller: Option<&Caller>) -> String {
    if !resource.per_user() {
        return "shared".to_string();
    }
    match caller {
        Some(c) => format!("u{}", c.user_id),
        None => "anon".to_string(),
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    ttl: Duration,
    enabled: bool,
    /// Bumped by every `invalidate`; a body computed across a bump is not stored.
    generation: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            ttl,
            enabled: true,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            enabled: false,
            ..Self::new(backend, "skyway", Duration::from_secs(0))
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `{ns}:{resource}:list:{user}:{params}`,
    /// `{ns}:{resource}:detail:{id}:{user}:{params}` or
    /// `{ns}:{resource}:view:{name}:{user}:{params}`.
    pub fn key(
        &self,
        resource: Resource,
        kind: CacheKind<'_>,
        caller: Option<&Caller>,
        params: &[(String, String)],
    ) -> String {
        let user = user_segment(resource, caller);
        let params = normalize_params(params);
        let base = format!("{}:{}", self.namespace, resource.as_str());
        match kind {
            CacheKind::List => format!("{}:list:{}:{}", base, user, params),
            CacheKind::Detail(id) => format!("{}:detail:{}:{}:{}", base, id, user, params),
            CacheKind::View(name) => format!("{}:view:{}:{}:{}", base, name, user, params),
        }
    }

    /// Returns the stored body for `key`, or runs `compute`, stores its output
    /// and returns it. Backend failures degrade to a miss.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if !self.enabled {
            return compute().await;
        }

        match self.backend.get(key).await {
            Ok(Some(body)) => {
                debug!(key, "cache hit");
                return Ok(body);
            }
            Ok(None) => debug!(key, "cache miss"),
            Err(e) => warn!(key, error = %e, "cache read failed, computing"),
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let body = compute().await?;
        // Only guards writes made through this process; other replicas can
        // still race a store against their invalidation until the TTL.
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(key, "invalidated while computing, not stored");
            return Ok(body);
        }
        if let Err(e) = self.backend.set(key, &body, self.ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
        Ok(body)
    }

    /// Drops every cached response a write to `resource` (row `id`) could
    /// have made stale: that row's detail keys for all users, all list and
    /// view keys, and everything cached for dependent resources.
    pub async fn invalidate(&self, resource: Resource, id: Option<i64>) {
        if !self.enabled {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        let base = format!("{}:{}", self.namespace, resource.as_str());
        let mut prefixes = Vec::with_capacity(4);
        if let Some(id) = id {
            prefixes.push(format!("{}:detail:{}:", base, id));
        }
        prefixes.push(format!("{}:list:", base));
        prefixes.push(format!("{}:view:", base));
        for dependent in dependents_closure(resource) {
            prefixes.push(format!("{}:{}:", self.namespace, dependent.as_str()));
        }

        for prefix in prefixes {
            match self.backend.delete_prefix(&prefix).await {
                Ok(removed) => debug!(prefix = %prefix, removed, "cache invalidated"),
                Err(e) => warn!(prefix = %prefix, error = %e, "cache invalidation failed"),
            }
        }
    }
}

/// Dependents of `resource`, followed transitively.
fn dependents_closure(resource: Resource) -> Vec<Resource> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack: Vec<Resource> = resource.dependents().to_vec();
    while let Some(next) = stack.pop() {
        if next == resource || !seen.insert(next) {
            continue;
        }
        out.push(next);
        stack.extend_from_slice(next.dependents());
    }
    out
}

/// In-process backend with TTL expiry and a switch to simulate an outage.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    down: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> (Arc<MemoryCache>, ResponseCache) {
        let backend = Arc::new(MemoryCache::new());
        let cache = ResponseCache::new(backend.clone(), "t", Duration::from_secs(600));
        (backend, cache)
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const ANA: Caller = Caller {
        user_id: 4,
        role: Role::User,
    };
    const BOB: Caller = Caller {
        user_id: 5,
        role: Role::User,
    };

    #[test]
    fn key_layout() {
        let (_, cache) = cache();
        let p = params(&[("page", "2"), ("search", "la")]);
        assert_eq!(
            cache.key(Resource::Airlines, CacheKind::List, Some(&ANA), &p),
            "t:airlines:list:shared:page=2&search=la"
        );
        assert_eq!(
            cache.key(Resource::Reservations, CacheKind::Detail(9), Some(&ANA), &[]),
            "t:reservations:detail:9:u4:"
        );
        assert_eq!(
            cache.key(Resource::FlightRequests, CacheKind::View("pending"), None, &[]),
            "t:flight_requests:view:pending:anon:"
        );
    }

    #[test]
    fn param_order_does_not_matter() {
        let a = normalize_params(&params(&[("b", "2"), ("a", "1 x")]));
        let b = normalize_params(&params(&[("a", "1 x"), ("b", "2")]));
        assert_eq!(a, b);
        assert_eq!(a, "a=1+x&b=2");
    }

    #[test]
    fn repeated_param_order_matters() {
        let a = normalize_params(&params(&[("search", "avi"), ("search", "zzz")]));
        let b = normalize_params(&params(&[("search", "zzz"), ("search", "avi")]));
        assert_ne!(a, b);
        assert_eq!(b, "search=zzz&search=avi");
        let c = normalize_params(&params(&[("search", "zzz"), ("page", "2"), ("search", "avi")]));
        assert_eq!(c, "page=2&search=zzz&search=avi");
    }

    #[test]
    fn per_user_keys_differ() {
        let (_, cache) = cache();
        let a = cache.key(Resource::Reservations, CacheKind::List, Some(&ANA), &[]);
        let b = cache.key(Resource::Reservations, CacheKind::List, Some(&BOB), &[]);
        assert_ne!(a, b);
        let a = cache.key(Resource::Flights, CacheKind::List, Some(&ANA), &[]);
        let b = cache.key(Resource::Flights, CacheKind::List, Some(&BOB), &[]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (_, cache) = cache();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let body: Result<String, ()> = cache
                .get_or_compute("t:airlines:list:shared:", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("[1]".to_string())
                })
                .await;
            assert_eq!(body.unwrap(), "[1]");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outage_degrades_to_miss() {
        let (backend, cache) = cache();
        backend.set_available(false);
        let body: Result<String, ()> = cache
            .get_or_compute("t:x:list:shared:", || async { Ok("fresh".to_string()) })
            .await;
        assert_eq!(body.unwrap(), "fresh");
        cache.invalidate(Resource::Airlines, Some(1)).await;
    }

    #[tokio::test]
    async fn body_computed_across_invalidation_is_not_stored() {
        let (backend, cache) = cache();
        let key = cache.key(Resource::Airlines, CacheKind::List, None, &[]);
        let body: Result<String, ()> = cache
            .get_or_compute(&key, || async {
                cache.invalidate(Resource::Airlines, None).await;
                Ok("[old]".to_string())
            })
            .await;
        assert_eq!(body.unwrap(), "[old]");
        assert!(backend.keys().is_empty());

        let _: Result<String, ()> = cache
            .get_or_compute(&key, || async { Ok("[new]".to_string()) })
            .await;
        assert_eq!(backend.keys(), vec![key]);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let (backend, cache) = cache();
        let body: Result<String, &str> = cache
            .get_or_compute("t:x:list:shared:", || async { Err("boom") })
            .await;
        assert_eq!(body, Err("boom"));
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn invalidation_scopes() {
        let (backend, cache) = cache();
        for key in [
            "t:airlines:detail:1:shared:",
            "t:airlines:detail:12:shared:",
            "t:airlines:list:shared:",
            "t:airlines:view:x:shared:",
            "t:flights:detail:3:shared:",
            "t:destinations:list:shared:",
        ] {
            backend.set(key, "{}", Duration::from_secs(60)).await.unwrap();
        }
        cache.invalidate(Resource::Airlines, Some(1)).await;
        assert_eq!(
            backend.keys(),
            vec![
                "t:airlines:detail:12:shared:".to_string(),
                "t:destinations:list:shared:".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn user_writes_reach_passengers_transitively() {
        let (backend, cache) = cache();
        backend
            .set("t:reservation_passengers:list:u4:", "[]", Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate(Resource::Users, Some(4)).await;
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_always_computes() {
        let backend = Arc::new(MemoryCache::new());
        let cache = ResponseCache::disabled(backend.clone());
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _: Result<String, ()> = cache
                .get_or_compute("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(String::new())
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn entries_expire() {
        let backend = MemoryCache::new();
        backend.set("k", "v", Duration::from_millis(0)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }
}
