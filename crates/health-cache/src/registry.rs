use crate::{CacheMetrics, Lookup, RegistryError, Result, Ttl, TtlCache};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Computes the current value of a resource. Expected to be quick (one system
/// call or a read of state somebody else maintains).
pub type Provider = Box<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

struct Resource {
    provider: Provider,
    ttl: Ttl,
}

/// Maps resource names to providers, backed by the shared [`TtlCache`].
///
/// Concurrent misses on the same resource may each run the provider; the last
/// writer wins in the cache. Providers are cheap enough that this is not
/// worth serialising.
pub struct ResourceRegistry {
    cache: Arc<TtlCache<Value>>,
    resources: HashMap<String, Resource>,
    order: Vec<String>,
    metrics: Option<CacheMetrics>,
}

impl ResourceRegistry {
    pub fn new(cache: Arc<TtlCache<Value>>) -> Self {
        Self {
            cache,
            resources: HashMap::new(),
            order: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: CacheMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register<F>(&mut self, name: impl Into<String>, ttl: Ttl, provider: F) -> Result<()>
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.resources.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.order.push(name.clone());
        self.resources.insert(
            name,
            Resource {
                provider: Box::new(provider),
                ttl,
            },
        );
        Ok(())
    }

    /// Returns the cached value if fresh, otherwise runs the provider and
    /// caches its result with the resource's TTL. Provider failures are
    /// returned as-is and leave the cache untouched.
    pub fn resolve(&self, name: &str) -> Result<Value> {
        let resource = self
            .resources
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if let Lookup::Hit(value) = self.cache.get(name) {
            debug!(resource = name, "Using cached data.");
            if let Some(m) = &self.metrics {
                m.hits.inc();
            }
            return Ok(value);
        }

        debug!(resource = name, "Fetching new data.");
        if let Some(m) = &self.metrics {
            m.misses.inc();
        }
        let value = (resource.provider)().map_err(|e| {
            if let Some(m) = &self.metrics {
                m.provider_errors.inc();
            }
            RegistryError::Provider {
                resource: name.to_string(),
                reason: format!("{e:#}"),
            }
        })?;
        self.cache.set(name, value.clone(), resource.ttl);
        Ok(value)
    }

    /// Resolves every resource and merges the results into one object, in
    /// registration order. Non-object values are stored under their name.
    pub fn resolve_all(&self) -> Result<Value> {
        let mut merged = Map::new();
        for name in &self.order {
            match self.resolve(name)? {
                Value::Object(fields) => merged.extend(fields),
                other => {
                    merged.insert(name.clone(), other);
                }
            }
        }
        Ok(Value::Object(merged))
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn ttl(&self, name: &str) -> Option<Ttl> {
        self.resources.get(name).map(|r| r.ttl)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, MetricsHub};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (ResourceRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(TtlCache::with_clock(clock.clone()));
        (ResourceRegistry::new(cache), clock)
    }

    fn counting(calls: &Arc<AtomicUsize>, value: Value) -> impl Fn() -> anyhow::Result<Value> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.clone())
        }
    }

    #[test]
    fn test_unknown_resource_is_not_found() {
        let (registry, _clock) = setup();
        let err = registry.resolve("unknown").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "unknown"));
    }

    #[test]
    fn test_provider_runs_once_while_fresh() {
        let (mut registry, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register("memory", Ttl::from_secs(2), counting(&calls, json!({"memory": {"total": 1}})))
            .unwrap();

        let first = registry.resolve("memory").unwrap();
        clock.advance(Duration::from_secs(1));
        let second = registry.resolve("memory").unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        registry.resolve("memory").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_never_expiring_resource_computed_once() {
        let (mut registry, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register("hardware", Ttl::Never, counting(&calls, json!({"hardware": {}})))
            .unwrap();
        registry.resolve("hardware").unwrap();
        clock.advance(Duration::from_secs(86_400));
        registry.resolve("hardware").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fresh_published_value_skips_provider() {
        let (mut registry, _clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register("battery", Ttl::Never, counting(&calls, json!({"battery": {"present": false}})))
            .unwrap();
        let published = json!({"battery": {"present": true, "percentage": 80}});
        registry
            .cache()
            .set("battery", published.clone(), Ttl::Never);

        assert_eq!(registry.resolve("battery").unwrap(), published);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_provider_error_propagates_and_is_not_cached() {
        let (mut registry, _clock) = setup();
        registry
            .register("status", Ttl::from_secs(1), || anyhow::bail!("vcgencmd missing"))
            .unwrap();
        let err = registry.resolve("status").unwrap_err();
        match err {
            RegistryError::Provider { resource, reason } => {
                assert_eq!(resource, "status");
                assert!(reason.contains("vcgencmd missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.cache().has("status"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (mut registry, _clock) = setup();
        registry.register("cpu", Ttl::from_secs(1), || Ok(json!({}))).unwrap();
        let err = registry
            .register("cpu", Ttl::from_secs(5), || Ok(json!({})))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
        assert_eq!(registry.ttl("cpu"), Some(Ttl::from_secs(1)));
    }

    #[test]
    fn test_resolve_all_merges_in_order() {
        let (mut registry, _clock) = setup();
        registry
            .register("memory", Ttl::from_secs(2), || Ok(json!({"memory": {"total": 4}})))
            .unwrap();
        registry
            .register("disk", Ttl::from_secs(10), || Ok(json!({"disk": {"total": 32}})))
            .unwrap();
        registry
            .register("uptime", Ttl::from_secs(1), || Ok(json!(12)))
            .unwrap();
        let all = registry.resolve_all().unwrap();
        assert_eq!(all["memory"]["total"], 4);
        assert_eq!(all["disk"]["total"], 32);
        assert_eq!(all["uptime"], 12);
        assert_eq!(registry.names(), ["memory", "disk", "uptime"]);
    }

    #[test]
    fn test_metrics_count_hits_and_misses() {
        let (registry, _clock) = setup();
        let hub = MetricsHub::new().unwrap();
        let mut registry = registry.with_metrics(hub.cache.clone());
        registry
            .register("swap", Ttl::from_secs(5), || Ok(json!({"swap": {}})))
            .unwrap();
        registry.resolve("swap").unwrap();
        registry.resolve("swap").unwrap();
        registry.resolve("swap").unwrap();
        assert_eq!(hub.cache.misses.get(), 1);
        assert_eq!(hub.cache.hits.get(), 2);
    }
}
