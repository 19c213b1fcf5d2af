use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct CacheMetrics {
    pub hits: IntCounter,
    pub misses: IntCounter,
    pub provider_errors: IntCounter,
}

#[derive(Clone)]
pub struct LinkMetrics {
    pub lines_rx: IntCounter,
    pub lines_unparseable: IntCounter,
    pub reconnects: IntCounter,
    pub commands_tx: IntCounter,
    pub battery_percentage: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub cache: CacheMetrics,
    pub link: LinkMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let cache = CacheMetrics {
            hits: counter("health_cache_hits", "Resource reads served from cache")?,
            misses: counter("health_cache_misses", "Resource reads that ran a provider")?,
            provider_errors: counter("health_provider_errors", "Provider invocations that failed")?,
        };
        let link = LinkMetrics {
            lines_rx: counter("battery_lines_rx", "Lines read from the battery link")?,
            lines_unparseable: counter(
                "battery_lines_unparseable",
                "Battery lines that could not be decoded",
            )?,
            reconnects: counter("battery_reconnects", "Battery link reconnect cycles")?,
            commands_tx: counter("battery_commands_tx", "Commands drained to the battery")?,
            battery_percentage: IntGauge::new(
                "battery_percentage",
                "Last reported battery state of charge",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let _ = registry.register(Box::new(cache.hits.clone()));
        let _ = registry.register(Box::new(cache.misses.clone()));
        let _ = registry.register(Box::new(cache.provider_errors.clone()));
        let _ = registry.register(Box::new(link.lines_rx.clone()));
        let _ = registry.register(Box::new(link.lines_unparseable.clone()));
        let _ = registry.register(Box::new(link.reconnects.clone()));
        let _ = registry.register(Box::new(link.commands_tx.clone()));
        let _ = registry.register(Box::new(link.battery_percentage.clone()));
        Ok(Self {
            registry,
            cache,
            link,
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_counters() {
        let hub = MetricsHub::new().unwrap();
        hub.cache.hits.inc();
        hub.link.battery_percentage.set(87);
        let text = hub.encode_text();
        assert!(text.contains("health_cache_hits 1"));
        assert!(text.contains("battery_percentage 87"));
        assert!(text.contains("battery_reconnects 0"));
    }
}
