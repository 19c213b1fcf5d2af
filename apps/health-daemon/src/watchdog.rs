use health_cache::ResourceRegistry;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Latest watchdog result.
#[derive(Clone, Debug, Serialize)]
pub struct Verdict {
    pub healthy: bool,
    /// The `status` field of the last check, or the failure reason.
    pub status: String,
    pub checked_at: Option<String>,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            healthy: true,
            status: "unknown".to_string(),
            checked_at: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct Health {
    verdict: Arc<RwLock<Verdict>>,
}

impl Health {
    pub fn verdict(&self) -> Verdict {
        self.verdict.read().clone()
    }

    /// Runs one check against the `status` resource. Only an `error` status
    /// makes the daemon unhealthy; a failing provider leaves it healthy with
    /// the reason recorded.
    pub fn check(&self, registry: &ResourceRegistry) -> Verdict {
        let (healthy, status) = match registry.resolve("status") {
            Ok(value) => {
                let status = value
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("ND")
                    .to_string();
                (status != "error", status)
            }
            Err(e) => {
                warn!(error = %e, "Health check could not read status");
                (true, e.to_string())
            }
        };
        let verdict = Verdict {
            healthy,
            status,
            checked_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
        };
        let previous = std::mem::replace(&mut *self.verdict.write(), verdict.clone());
        if previous.healthy != verdict.healthy {
            if verdict.healthy {
                debug!(status = %verdict.status, "Module healthy");
            } else {
                warn!(status = %verdict.status, "Module unhealthy");
            }
        }
        verdict
    }
}

/// Checks health every `period` until `shutdown` flips to true.
pub async fn run(
    health: Health,
    registry: Arc<ResourceRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let health = health.clone();
                let registry = registry.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || health.check(&registry)).await {
                    warn!(error = %e, "Health check task failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Health watchdog stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health_cache::{Ttl, TtlCache};
    use serde_json::json;

    fn registry_with_status(status: &'static str) -> ResourceRegistry {
        let mut reg = ResourceRegistry::new(Arc::new(TtlCache::new()));
        reg.register("status", Ttl::from_secs(0), move || {
            Ok(json!({ "status": status, "status_msgs": [] }))
        })
        .unwrap();
        reg
    }

    #[test]
    fn test_error_status_is_unhealthy() {
        let health = Health::default();
        assert!(!health.check(&registry_with_status("error")).healthy);
        assert!(!health.verdict().healthy);
        assert_eq!(health.verdict().status, "error");
    }

    #[test]
    fn test_warning_and_nd_are_healthy() {
        let health = Health::default();
        assert!(health.check(&registry_with_status("warning")).healthy);
        assert!(health.check(&registry_with_status("ND")).healthy);
        assert!(health.verdict().checked_at.is_some());
    }

    #[test]
    fn test_failing_provider_stays_healthy() {
        let mut reg = ResourceRegistry::new(Arc::new(TtlCache::new()));
        reg.register("status", Ttl::from_secs(1), || anyhow::bail!("vcgencmd missing"))
            .unwrap();
        let verdict = Health::default().check(&reg);
        assert!(verdict.healthy);
        assert!(verdict.status.contains("vcgencmd missing"));
    }

    #[tokio::test]
    async fn test_watchdog_runs_until_shutdown() {
        let health = Health::default();
        let registry = Arc::new(registry_with_status("error"));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run(health.clone(), registry, Duration::from_millis(20), rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!health.verdict().healthy);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
