use crate::{DevicePath, LinkError, LinkHandle, Result, SerialLink};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One scripted response to `read_line`.
#[derive(Clone, Debug)]
pub enum MockRead {
    Line(Vec<u8>),
    Timeout,
    Error(String),
}

#[derive(Debug)]
struct MockState {
    devices: Vec<DevicePath>,
    script: VecDeque<MockRead>,
    writes: Vec<Vec<u8>>,
    flushes: usize,
    discovered_at: Vec<Instant>,
    opened: Vec<DevicePath>,
    fail_open: bool,
    fail_writes: bool,
    idle: Duration,
    simulated: bool,
    tick: u64,
    info_requested: bool,
}

/// In-process battery link. Clones share one state, so a test can keep a
/// clone to script reads and inspect writes while the monitor owns another.
///
/// With an empty script, reads sleep for the idle delay and time out, unless
/// the link was built with [`MockLink::simulated`], which produces an endless
/// stream of plausible telemetry and answers `??` with a device-info line.
#[derive(Clone, Debug)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new(devices: Vec<DevicePath>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices,
                script: VecDeque::new(),
                writes: Vec::new(),
                flushes: 0,
                discovered_at: Vec::new(),
                opened: Vec::new(),
                fail_open: false,
                fail_writes: false,
                idle: Duration::from_millis(10),
                simulated: false,
                tick: 0,
                info_requested: false,
            })),
        }
    }

    /// A single fake pack at `/dev/mock-battery0` printing one reading per
    /// second.
    pub fn simulated() -> Self {
        let link = Self::new(vec![DevicePath::new("/dev/mock-battery0")]);
        {
            let mut state = link.state.lock();
            state.simulated = true;
            state.idle = Duration::from_secs(1);
        }
        link
    }

    pub fn push_line(&self, line: impl AsRef<[u8]>) {
        self.state
            .lock()
            .script
            .push_back(MockRead::Line(line.as_ref().to_vec()));
    }

    pub fn push_timeout(&self) {
        self.state.lock().script.push_back(MockRead::Timeout);
    }

    pub fn push_error(&self, reason: impl Into<String>) {
        self.state
            .lock()
            .script
            .push_back(MockRead::Error(reason.into()));
    }

    pub fn set_devices(&self, devices: Vec<DevicePath>) {
        self.state.lock().devices = devices;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn set_idle(&self, idle: Duration) {
        self.state.lock().idle = idle;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn discovered_at(&self) -> Vec<Instant> {
        self.state.lock().discovered_at.clone()
    }

    pub fn opened(&self) -> Vec<DevicePath> {
        self.state.lock().opened.clone()
    }
}

impl SerialLink for MockLink {
    type Handle = MockHandle;

    fn discover(&mut self) -> Result<Vec<DevicePath>> {
        let mut state = self.state.lock();
        state.discovered_at.push(Instant::now());
        Ok(state.devices.clone())
    }

    fn open(&mut self, path: &DevicePath, _baud_rate: u32) -> Result<MockHandle> {
        let mut state = self.state.lock();
        state.opened.push(path.clone());
        if state.fail_open || !state.devices.contains(path) {
            return Err(LinkError::Connection {
                path: path.to_string(),
                reason: "no such device".to_string(),
            });
        }
        Ok(MockHandle {
            path: path.clone(),
            state: self.state.clone(),
            open: true,
        })
    }
}

#[derive(Debug)]
pub struct MockHandle {
    path: DevicePath,
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl LinkHandle for MockHandle {
    fn path(&self) -> &DevicePath {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        let (next, idle, simulated) = {
            let mut state = self.state.lock();
            (state.script.pop_front(), state.idle, state.simulated)
        };
        match next {
            Some(MockRead::Line(line)) => Ok(line),
            Some(MockRead::Timeout) => Err(LinkError::Timeout),
            Some(MockRead::Error(reason)) => Err(LinkError::Io(reason)),
            None if simulated => {
                std::thread::sleep(idle);
                Ok(self.simulate())
            }
            None => {
                std::thread::sleep(idle);
                Err(LinkError::Timeout)
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(LinkError::Io("broken pipe".to_string()));
        }
        if bytes == b"??" {
            state.info_requested = true;
        }
        state.writes.push(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(LinkError::Io("broken pipe".to_string()));
        }
        state.flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

impl MockHandle {
    fn simulate(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.info_requested) {
            return br#"{"FirmwareVersion": "0.0-mock", "BootData": {"Version": "0.0", "PCBVersion": "0", "Date": "01/01/24"}, "SerialNumber": "MOCK-0001"}"#.to_vec();
        }
        state.tick += 1;
        let soc = 100 - (state.tick % 100);
        format!(
            "\0 {{\"CellTemp(degK)\": 301.15, \"CellVoltage(mV)\": {}, \"ChargerVoltage(mV)\": 0, \
             \"Current(mA)\": -850, \"CycleCount\": 42, \"SOC(%)\": {soc}, \"TimeToEmpty(min)\": {}, \
             \"USB OUT-1(mV)\": 5020, \"USB OUT-2(mV)\": 0}}\0",
            3300 + soc * 9,
            soc * 3,
        )
        .into_bytes()
    }
}
