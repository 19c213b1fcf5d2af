//! health-cache: TTL-bounded shared cache and resource registry
//!
//! Every resource served by the health daemon goes through a single [`TtlCache`]
//! instance. Entries carry their own freshness window, so cheap-but-noisy
//! readings (cpu, voltages) and effectively static ones (hardware model,
//! firmware) can live side by side. The [`ResourceRegistry`] sits on top of the
//! cache and recomputes a resource only when its entry is missing or stale.

mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

mod cache;
pub use cache::{Lookup, Ttl, TtlCache};

mod error;
pub use error::{RegistryError, Result};

mod registry;
pub use registry::{Provider, ResourceRegistry};

mod metrics;
pub use metrics::{CacheMetrics, LinkMetrics, MetricsHub};
