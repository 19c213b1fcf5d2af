//! Background worker owning the battery connection.
//!
//! The worker runs the `Searching -> Connected -> Reading -> ErrorBackoff`
//! cycle on a dedicated thread. It is the only code that ever touches the
//! device handle; everyone else talks to it through [`MonitorHandle`], which
//! reads shared state and enqueues commands.

use crate::{
    BatteryCommand, BatteryInfo, BatterySnapshot, CommandQueue, DevicePath, HistoryBuffer,
    LinkError, LinkHandle, ProtocolDecoder, Record, Result, SerialLink,
};
use health_cache::{LinkMetrics, Ttl, TtlCache};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Called on the worker thread after each new snapshot is stored.
pub type SnapshotCallback = Box<dyn Fn(&BatterySnapshot) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub baud_rate: u32,
    /// Wait after any connection failure before searching again.
    pub backoff: Duration,
    /// Shutdown-flag polling interval while backing off.
    pub backoff_tick: Duration,
    pub history_capacity: usize,
    pub cache_key: String,
    /// Skip discovery and always connect to this path.
    pub device: Option<DevicePath>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            backoff: Duration::from_secs(5),
            backoff_tick: Duration::from_millis(500),
            history_capacity: 600,
            cache_key: "battery".to_string(),
            device: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Searching,
    Connected,
    Reading,
    ErrorBackoff,
    ShuttingDown,
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorStatus {
    pub state: LinkState,
    pub device: Option<String>,
    pub readings: u64,
    pub reconnects: u64,
    pub last_reading: Option<String>,
}

struct Shared {
    state: RwLock<LinkState>,
    device: RwLock<Option<DevicePath>>,
    snapshot: RwLock<Option<BatterySnapshot>>,
    info: RwLock<Option<BatteryInfo>>,
    history: RwLock<HistoryBuffer<BatterySnapshot>>,
    last_reading: RwLock<Option<OffsetDateTime>>,
    commands: CommandQueue,
    shutdown: AtomicBool,
    readings: AtomicU64,
    reconnects: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: LinkState, device: Option<&DevicePath>) {
        *self.state.write() = state;
        *self.device.write() = device.cloned();
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

enum Step<H> {
    Search,
    Connect(DevicePath),
    Read(H),
    Backoff,
    Shutdown,
}

/// Per-connection bookkeeping.
#[derive(Default)]
struct Session {
    seen_snapshot: bool,
    seen_info: bool,
    queried: bool,
}

pub struct BatteryMonitor<L: SerialLink> {
    link: L,
    cache: Arc<TtlCache<Value>>,
    config: MonitorConfig,
    callback: Option<SnapshotCallback>,
    metrics: Option<LinkMetrics>,
    shared: Arc<Shared>,
}

impl<L: SerialLink + 'static> BatteryMonitor<L> {
    pub fn new(link: L, cache: Arc<TtlCache<Value>>, config: MonitorConfig) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(LinkState::Searching),
            device: RwLock::new(None),
            snapshot: RwLock::new(None),
            info: RwLock::new(None),
            history: RwLock::new(HistoryBuffer::new(config.history_capacity)),
            last_reading: RwLock::new(None),
            commands: CommandQueue::new(),
            shutdown: AtomicBool::new(false),
            readings: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        });
        Self {
            link,
            cache,
            config,
            callback: None,
            metrics: None,
            shared,
        }
    }

    /// Builds a monitor with defaults for everything optional and starts it.
    pub fn start(
        link: L,
        cache: Arc<TtlCache<Value>>,
        config: MonitorConfig,
    ) -> Result<MonitorHandle> {
        Self::new(link, cache, config).spawn()
    }

    pub fn with_callback(mut self, callback: SnapshotCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_metrics(mut self, metrics: LinkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Moves the monitor onto its own thread.
    pub fn spawn(self) -> Result<MonitorHandle> {
        let shared = self.shared.clone();
        let worker = std::thread::Builder::new()
            .name("battery-monitor".to_string())
            .spawn(move || self.run())
            .map_err(|e| LinkError::Io(format!("cannot spawn battery monitor: {e}")))?;
        Ok(MonitorHandle {
            shared,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    fn run(mut self) {
        info!(baud = self.config.baud_rate, "Battery monitor started");
        let mut candidates = VecDeque::new();
        let mut step: Step<L::Handle> = Step::Search;
        loop {
            if self.shared.stopping() {
                if let Step::Read(mut handle) = step {
                    if handle.is_open() {
                        handle.close();
                    }
                }
                break;
            }
            step = match step {
                Step::Search => self.search(&mut candidates),
                Step::Connect(path) => self.connect(path),
                Step::Read(handle) => self.read_loop(handle),
                Step::Backoff => self.backoff(),
                Step::Shutdown => break,
            };
        }
        self.shared.set_state(LinkState::ShuttingDown, None);
        info!("Battery monitor stopped");
    }

    fn search(&mut self, candidates: &mut VecDeque<DevicePath>) -> Step<L::Handle> {
        self.shared.set_state(LinkState::Searching, None);
        if let Some(pinned) = &self.config.device {
            return Step::Connect(pinned.clone());
        }
        if candidates.is_empty() {
            match self.link.discover() {
                Ok(found) => candidates.extend(found),
                Err(e) => warn!(error = %e, "Battery discovery failed"),
            }
        }
        match candidates.pop_front() {
            Some(path) => Step::Connect(path),
            None => {
                warn!("No battery device found");
                Step::Backoff
            }
        }
    }

    fn connect(&mut self, path: DevicePath) -> Step<L::Handle> {
        self.shared.set_state(LinkState::Connected, Some(&path));
        match self.link.open(&path, self.config.baud_rate) {
            Ok(handle) => {
                info!(device = %path, "Battery connected");
                Step::Read(handle)
            }
            Err(e) => {
                warn!(device = %path, error = %e, "Cannot open battery device");
                Step::Backoff
            }
        }
    }

    fn read_loop(&mut self, mut handle: L::Handle) -> Step<L::Handle> {
        self.shared
            .set_state(LinkState::Reading, Some(handle.path()));
        let mut decoder = ProtocolDecoder::new();
        let mut session = Session::default();
        loop {
            if self.shared.stopping() {
                handle.close();
                return Step::Shutdown;
            }
            if let Some(report) = self.shared.commands.drain_into(&mut handle) {
                if let Some(m) = &self.metrics {
                    m.commands_tx
                        .inc_by((report.attempts - report.failures) as u64);
                }
                if report.any_failed() {
                    warn!(device = %handle.path(), command = %report.command, failures = report.failures, "Battery write failed, reconnecting");
                    handle.close();
                    return Step::Backoff;
                }
            }
            if !session.seen_snapshot && !session.seen_info && !session.queried {
                session.queried = self
                    .shared
                    .commands
                    .enqueue_if_empty(BatteryCommand::QueryInfo);
            }
            match handle.read_line() {
                Ok(raw) => {
                    if let Some(m) = &self.metrics {
                        m.lines_rx.inc();
                    }
                    for record in decoder.push_line(&raw) {
                        self.apply(record, &mut session);
                    }
                }
                Err(LinkError::Timeout) => continue,
                Err(e) => {
                    warn!(device = %handle.path(), error = %e, "Battery read failed, reconnecting");
                    handle.close();
                    return Step::Backoff;
                }
            }
        }
    }

    fn apply(&self, record: Record, session: &mut Session) {
        match record {
            Record::Telemetry(snapshot) => {
                session.seen_snapshot = true;
                self.publish(snapshot);
            }
            Record::DeviceInfo(info) if !session.seen_info => {
                session.seen_info = true;
                info!(firmware = %info.firmware_version, serial = %info.serial_number, "Battery identified");
                *self.shared.info.write() = Some(info);
            }
            Record::DeviceInfo(_) => debug!("Repeated battery info ignored"),
            Record::Unparseable(reason) => {
                if let Some(m) = &self.metrics {
                    m.lines_unparseable.inc();
                }
                debug!(%reason, "Unparseable battery line");
            }
        }
    }

    fn publish(&self, snapshot: BatterySnapshot) {
        self.cache.set(
            self.config.cache_key.clone(),
            snapshot.to_resource_value(),
            Ttl::Never,
        );
        self.shared.history.write().push(snapshot.clone());
        *self.shared.last_reading.write() = Some(OffsetDateTime::now_utc());
        self.shared.readings.fetch_add(1, Ordering::SeqCst);
        if let Some(m) = &self.metrics {
            m.battery_percentage.set(i64::from(snapshot.percentage));
        }
        if let Some(cb) = &self.callback {
            cb(&snapshot);
        }
        *self.shared.snapshot.write() = Some(snapshot);
    }

    fn backoff(&mut self) -> Step<L::Handle> {
        self.shared.set_state(LinkState::ErrorBackoff, None);
        self.shared.reconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(m) = &self.metrics {
            m.reconnects.inc();
        }
        debug!(window = ?self.config.backoff, "Battery backoff");
        let deadline = Instant::now() + self.config.backoff;
        loop {
            if self.shared.stopping() {
                return Step::Shutdown;
            }
            let now = Instant::now();
            if now >= deadline {
                return Step::Search;
            }
            std::thread::sleep(self.config.backoff_tick.min(deadline - now));
        }
    }
}

/// Cloneable view of a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MonitorHandle {
    pub fn snapshot(&self) -> Option<BatterySnapshot> {
        self.shared.snapshot.read().clone()
    }

    /// `{"battery": {...}}` for the current snapshot, or the `present: false`
    /// placeholder before the first reading.
    pub fn resource_value(&self) -> Value {
        match self.snapshot() {
            Some(s) => s.to_resource_value(),
            None => BatterySnapshot::absent_resource_value(),
        }
    }

    pub fn info(&self) -> Option<BatteryInfo> {
        self.shared.info.read().clone()
    }

    pub fn info_or_placeholder(&self) -> BatteryInfo {
        self.info().unwrap_or_else(BatteryInfo::placeholder)
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<BatterySnapshot> {
        self.shared.history.read().to_vec()
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.read()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state(),
            device: self.shared.device.read().as_ref().map(|d| d.to_string()),
            readings: self.shared.readings.load(Ordering::SeqCst),
            reconnects: self.shared.reconnects.load(Ordering::SeqCst),
            last_reading: self
                .shared
                .last_reading
                .read()
                .and_then(|t| t.format(&Rfc3339).ok()),
        }
    }

    /// Asks the pack to cut power after `seconds`. Only enqueues; delivery
    /// happens on the worker's next iteration and is not acknowledged.
    pub fn turn_off(&self, seconds: u32) -> Result<()> {
        let command = BatteryCommand::turn_off(seconds)?;
        info!(seconds, "Battery turn-off requested");
        self.shared.commands.enqueue(command);
        Ok(())
    }

    pub fn query_info(&self) {
        self.shared.commands.enqueue(BatteryCommand::QueryInfo);
    }

    pub fn pending_command(&self) -> Option<BatteryCommand> {
        self.shared.commands.peek()
    }

    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    /// Requests shutdown and waits for the worker to exit. Latency is one
    /// line read or one backoff tick.
    pub fn shutdown(&self) {
        self.request_shutdown();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Battery monitor thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::MockLink;
    use health_cache::{Lookup, MetricsHub};
    use std::sync::atomic::AtomicUsize;

    const TELEMETRY: &str = r#"{"CellTemp(degK)": 300.0, "CellVoltage(mV)": 3700, "ChargerVoltage(mV)": 5000, "Current(mA)": -420, "CycleCount": 12, "SOC(%)": 87, "TimeToEmpty(min)": 10, "USB OUT-1(mV)": 5004, "USB OUT-2(mV)": 0}"#;

    fn device() -> DevicePath {
        DevicePath::new("/dev/ttyACM0")
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            backoff: Duration::from_millis(300),
            backoff_tick: Duration::from_millis(20),
            ..MonitorConfig::default()
        }
    }

    fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn count(writes: &[Vec<u8>], bytes: &[u8]) -> usize {
        writes.iter().filter(|w| w.as_slice() == bytes).count()
    }

    #[test]
    fn test_telemetry_is_published() {
        let link = MockLink::new(vec![device()]);
        link.push_line(TELEMETRY);
        let cache = Arc::new(TtlCache::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let hub = MetricsHub::new().unwrap();
        let monitor = BatteryMonitor::new(link.clone(), cache.clone(), fast_config())
            .with_callback(Box::new(move |_| {
                seen_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .with_metrics(hub.link.clone())
            .spawn()
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || monitor.snapshot().is_some()));
        let snap = monitor.snapshot().unwrap();
        assert_eq!(snap.percentage, 87);
        assert_eq!(snap.time_to_empty, 600);
        match cache.get("battery") {
            Lookup::Hit(v) => {
                assert_eq!(v["battery"]["present"], true);
                assert_eq!(v["battery"]["percentage"], 87);
            }
            Lookup::Miss => panic!("battery not published"),
        }
        assert_eq!(monitor.history().len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(hub.link.battery_percentage.get(), 87);
        let status = monitor.status();
        assert_eq!(status.readings, 1);
        assert!(status.last_reading.is_some());
        monitor.shutdown();
    }

    #[test]
    fn test_turn_off_writes_exactly_three_times() {
        let link = MockLink::new(vec![device()]);
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || monitor.state() == LinkState::Reading));

        monitor.turn_off(7).unwrap();
        assert!(wait_until(Duration::from_secs(2), || count(&link.writes(), b"Q07") == 3));
        assert!(wait_until(Duration::from_secs(1), || monitor.pending_command()
            != Some(BatteryCommand::TurnOff { seconds: 7 })));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count(&link.writes(), b"Q07"), 3);
        monitor.shutdown();
    }

    #[test]
    fn test_turn_off_rejects_three_digit_delay() {
        let link = MockLink::new(vec![]);
        let monitor =
            BatteryMonitor::start(link, Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert!(matches!(monitor.turn_off(120), Err(LinkError::InvalidCommand(_))));
        assert_eq!(monitor.pending_command(), None);
        monitor.shutdown();
    }

    #[test]
    fn test_info_query_is_issued_once_per_connection() {
        let link = MockLink::new(vec![device()]);
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || count(&link.writes(), b"??") == 3));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count(&link.writes(), b"??"), 3);
        monitor.shutdown();
    }

    #[test]
    fn test_first_info_record_per_connection_wins() {
        let link = MockLink::new(vec![device()]);
        link.push_line(r#"{"FirmwareVersion": "1.0", "SerialNumber": "A"}"#);
        link.push_line(r#"{"FirmwareVersion": "2.0", "SerialNumber": "B"}"#);
        let monitor =
            BatteryMonitor::start(link, Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert_eq!(monitor.info_or_placeholder().serial_number, "ND");
        assert!(wait_until(Duration::from_secs(2), || monitor.info().is_some()));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(monitor.info().unwrap().serial_number, "A");
        monitor.shutdown();
    }

    #[test]
    fn test_read_failure_backs_off_before_rediscovery() {
        let link = MockLink::new(vec![device()]);
        link.push_error("device unplugged");
        let config = fast_config();
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), config.clone()).unwrap();

        assert!(wait_until(Duration::from_secs(3), || link.discovered_at().len() >= 2));
        let times = link.discovered_at();
        assert!(times[1] - times[0] >= config.backoff);
        assert!(monitor.status().reconnects >= 1);
        monitor.shutdown();
    }

    #[test]
    fn test_open_failure_backs_off() {
        let link = MockLink::new(vec![device()]);
        link.fail_open(true);
        let config = fast_config();
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), config.clone()).unwrap();

        assert!(wait_until(Duration::from_secs(2), || monitor.state() == LinkState::ErrorBackoff));
        assert!(monitor.status().reconnects >= 1);
        assert!(wait_until(Duration::from_secs(3), || link.discovered_at().len() >= 2));
        let times = link.discovered_at();
        assert!(times[1] - times[0] >= config.backoff);
        assert!(link.opened().len() >= 1);
        assert!(monitor.snapshot().is_none());
        monitor.shutdown();
    }

    #[test]
    fn test_device_appearing_later_is_connected() {
        let link = MockLink::new(vec![]);
        link.push_line(TELEMETRY);
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || monitor.state() == LinkState::ErrorBackoff));
        assert!(link.opened().is_empty());

        link.set_devices(vec![device()]);
        assert!(wait_until(Duration::from_secs(3), || monitor.snapshot().is_some()));
        assert_eq!(monitor.state(), LinkState::Reading);
        assert_eq!(link.opened(), vec![device()]);
        monitor.shutdown();
    }

    #[test]
    fn test_no_device_backs_off_and_shutdown_is_prompt() {
        let link = MockLink::new(vec![]);
        let config = MonitorConfig {
            backoff: Duration::from_secs(10),
            backoff_tick: Duration::from_millis(50),
            ..MonitorConfig::default()
        };
        let monitor = BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), config).unwrap();
        assert!(wait_until(Duration::from_secs(2), || monitor.state() == LinkState::ErrorBackoff));

        let start = Instant::now();
        monitor.shutdown();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(monitor.state(), LinkState::ShuttingDown);
        assert!(!monitor.is_running());
        assert_eq!(link.discovered_at().len(), 1);
    }

    #[test]
    fn test_unparseable_and_timeouts_keep_connection() {
        let link = MockLink::new(vec![device()]);
        link.push_line("\0\0 garbage");
        link.push_timeout();
        link.push_line("{\"SOC(%)\": ");
        link.push_line(TELEMETRY);
        let hub = MetricsHub::new().unwrap();
        let monitor = BatteryMonitor::new(link.clone(), Arc::new(TtlCache::new()), fast_config())
            .with_metrics(hub.link.clone())
            .spawn()
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || monitor.snapshot().is_some()));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(monitor.state(), LinkState::Reading);
        assert_eq!(monitor.status().reconnects, 0);
        assert_eq!(link.opened().len(), 1);
        assert_eq!(hub.link.lines_unparseable.get(), 2);
        monitor.shutdown();
    }

    #[test]
    fn test_write_failure_forces_reconnect() {
        let link = MockLink::new(vec![device()]);
        link.fail_writes(true);
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || monitor.status().reconnects >= 1));
        assert!(monitor.snapshot().is_none());
        monitor.shutdown();
    }

    #[test]
    fn test_candidates_tried_in_turn() {
        let second = DevicePath::new("/dev/ttyACM1");
        let link = MockLink::new(vec![device(), second.clone()]);
        link.push_error("not a battery");
        let monitor =
            BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), fast_config()).unwrap();
        assert!(wait_until(Duration::from_secs(3), || link.opened().len() >= 2));
        assert_eq!(link.opened()[1], second);
        assert_eq!(link.discovered_at().len(), 1);
        monitor.shutdown();
    }

    #[test]
    fn test_pinned_device_skips_discovery() {
        let link = MockLink::new(vec![device()]);
        let config = MonitorConfig {
            device: Some(device()),
            ..fast_config()
        };
        let monitor = BatteryMonitor::start(link.clone(), Arc::new(TtlCache::new()), config).unwrap();
        assert!(wait_until(Duration::from_secs(2), || monitor.state() == LinkState::Reading));
        assert!(link.discovered_at().is_empty());
        assert_eq!(monitor.status().device.as_deref(), Some("/dev/ttyACM0"));
        monitor.shutdown();
    }
}
