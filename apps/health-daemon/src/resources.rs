use anyhow::Result;
use battery_link::{BatterySnapshot, MonitorHandle};
use board_probe::{Board, BoardCapabilities, SystemProbe};
use health_cache::{CacheMetrics, ResourceRegistry, Ttl, TtlCache};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Resource names with their default TTL in signed seconds, in the order the
/// aggregate endpoint merges them.
pub const DEFAULT_TTLS: &[(&str, i64)] = &[
    ("volts", 1),
    ("temperature", 1),
    ("memory", 2),
    ("swap", 5),
    ("cpu", 1),
    ("gpu", 1),
    ("disk", 10),
    ("firmware", -1),
    ("hardware", -1),
    ("status", 1),
    ("battery", -1),
];

/// Everything the providers read from.
#[derive(Clone)]
pub struct Sources {
    pub board: Arc<Board>,
    pub system: Arc<SystemProbe>,
    /// `None` when the battery monitor is disabled.
    pub battery: Option<MonitorHandle>,
}

fn ttl_for(name: &str, default: i64, overrides: &BTreeMap<String, i64>) -> Ttl {
    Ttl::from_secs(overrides.get(name).copied().unwrap_or(default))
}

/// Registers the full resource table on top of `cache`.
pub fn build_registry(
    sources: Sources,
    cache: Arc<TtlCache<Value>>,
    overrides: &BTreeMap<String, i64>,
    metrics: Option<CacheMetrics>,
) -> Result<ResourceRegistry> {
    for name in overrides.keys() {
        if !DEFAULT_TTLS.iter().any(|(n, _)| n == name) {
            warn!(resource = %name, "TTL override for unknown resource ignored");
        }
    }

    let mut registry = ResourceRegistry::new(cache);
    if let Some(m) = metrics {
        registry = registry.with_metrics(m);
    }

    for &(name, default) in DEFAULT_TTLS {
        let ttl = ttl_for(name, default, overrides);
        let board = sources.board.clone();
        let system = sources.system.clone();
        match name {
            "volts" => registry.register(name, ttl, move || Ok(json!({ "volts": board.voltage() })))?,
            "temperature" => registry.register(name, ttl, move || {
                Ok(json!({ "temperature": system.temperature(board.thermal_zone()) }))
            })?,
            "memory" => registry.register(name, ttl, move || Ok(json!({ "memory": system.memory() })))?,
            "swap" => registry.register(name, ttl, move || Ok(json!({ "swap": system.swap() })))?,
            "cpu" => registry.register(name, ttl, move || Ok(json!({ "cpu": system.cpu() })))?,
            "gpu" => registry.register(name, ttl, move || Ok(json!({ "gpu": board.gpu() })))?,
            "disk" => registry.register(name, ttl, move || Ok(json!({ "disk": system.disk()? })))?,
            "firmware" => {
                registry.register(name, ttl, move || Ok(json!({ "firmware": board.firmware() })))?
            }
            "hardware" => {
                registry.register(name, ttl, move || Ok(json!({ "hardware": board.hardware() })))?
            }
            "status" => registry.register(name, ttl, move || {
                Ok(serde_json::to_value(board.throttling())?)
            })?,
            "battery" => {
                let battery = sources.battery.clone();
                registry.register(name, ttl, move || {
                    Ok(match &battery {
                        Some(handle) => handle.resource_value(),
                        None => BatterySnapshot::absent_resource_value(),
                    })
                })?
            }
            other => anyhow::bail!("no provider for resource {other}"),
        }
    }

    info!(count = registry.names().len(), "Resources registered");
    Ok(registry)
}
