use crate::{LinkError, LinkHandle, Result};
use core::fmt;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Every pending command is written this many times. The pack never
/// acknowledges, so repetition is the only delivery aid.
pub const WRITE_ATTEMPTS: usize = 3;

const MAX_TURN_OFF_SECONDS: u8 = 99;

/// Outgoing instruction to the battery pack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatteryCommand {
    /// `??`: ask the pack to print its device-info record.
    QueryInfo,
    /// `Qnn`: cut power after `seconds`.
    TurnOff { seconds: u8 },
}

impl BatteryCommand {
    pub fn turn_off(seconds: u32) -> Result<Self> {
        match u8::try_from(seconds) {
            Ok(s) if s <= MAX_TURN_OFF_SECONDS => Ok(Self::TurnOff { seconds: s }),
            _ => Err(LinkError::InvalidCommand(format!(
                "turn-off delay {seconds}s does not fit two digits"
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::QueryInfo => b"??".to_vec(),
            Self::TurnOff { seconds } => format!("Q{seconds:02}").into_bytes(),
        }
    }
}

impl fmt::Display for BatteryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryInfo => f.write_str("query-info"),
            Self::TurnOff { seconds } => write!(f, "turn-off({seconds}s)"),
        }
    }
}

/// Outcome of one drain cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrainReport {
    pub command: BatteryCommand,
    pub attempts: usize,
    pub failures: usize,
}

impl DrainReport {
    pub fn all_failed(&self) -> bool {
        self.failures == self.attempts
    }

    pub fn any_failed(&self) -> bool {
        self.failures > 0
    }
}

/// Single-slot outgoing command channel. Last writer wins.
#[derive(Debug, Default)]
pub struct CommandQueue {
    slot: Mutex<Option<BatteryCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `command`, returning whatever unconsumed command it replaced.
    pub fn enqueue(&self, command: BatteryCommand) -> Option<BatteryCommand> {
        let replaced = self.slot.lock().replace(command);
        if let Some(prev) = replaced {
            debug!(%prev, next = %command, "Pending battery command replaced");
        }
        replaced
    }

    /// Stores `command` only if the slot is empty.
    pub fn enqueue_if_empty(&self, command: BatteryCommand) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(command);
        true
    }

    pub fn take(&self) -> Option<BatteryCommand> {
        self.slot.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn peek(&self) -> Option<BatteryCommand> {
        *self.slot.lock()
    }

    /// Writes the pending command [`WRITE_ATTEMPTS`] times, flushing after
    /// each write. The slot is emptied before the first write, so it ends up
    /// cleared whatever the outcome. Returns `None` when nothing was pending.
    pub fn drain_into<H: LinkHandle + ?Sized>(&self, handle: &mut H) -> Option<DrainReport> {
        let command = self.take()?;
        let bytes = command.encode();
        let mut failures = 0;
        for attempt in 1..=WRITE_ATTEMPTS {
            let outcome = handle.write(&bytes).and_then(|()| handle.flush());
            if let Err(e) = outcome {
                failures += 1;
                warn!(device = %handle.path(), %command, attempt, error = %e, "Battery command write failed");
            }
        }
        debug!(device = %handle.path(), %command, failures, "Battery command drained");
        Some(DrainReport {
            command,
            attempts: WRITE_ATTEMPTS,
            failures,
        })
    }
}
