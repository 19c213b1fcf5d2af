use crate::config::TriggerConfig;
use crate::error::ApiError;
use battery_link::MonitorHandle;
use serde::Serialize;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Shutdown,
    Reboot,
}

impl FromStr for Trigger {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shutdown" => Ok(Trigger::Shutdown),
            "reboot" => Ok(Trigger::Reboot),
            other => Err(ApiError::NotFound(format!("unknown trigger '{other}'"))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TriggerOutcome {
    pub trigger: Trigger,
    /// Seconds handed to the battery, when a turn-off was queued.
    pub battery_off_in: Option<u32>,
    pub command: Vec<String>,
}

/// Host power actions. Disabled unless the configuration turns them on.
pub struct Triggers {
    config: TriggerConfig,
    battery: Option<MonitorHandle>,
}

impl Triggers {
    pub fn new(config: TriggerConfig, battery: Option<MonitorHandle>) -> Self {
        Self { config, battery }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shutdown queues the battery turn-off before the OS command runs, so the
    /// pack cuts power after the host has gone down.
    pub fn fire(&self, name: &str) -> Result<TriggerOutcome, ApiError> {
        let trigger: Trigger = name.parse()?;
        if !self.config.enabled {
            return Err(ApiError::Forbidden("triggers are disabled".to_string()));
        }

        let command = match trigger {
            Trigger::Shutdown => &self.config.shutdown_command,
            Trigger::Reboot => &self.config.reboot_command,
        };
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ApiError::Internal(format!("no command configured for {name}")))?;

        let mut battery_off_in = None;
        if trigger == Trigger::Shutdown {
            match &self.battery {
                Some(handle) => {
                    let delay = self.config.battery_off_delay_s;
                    handle
                        .turn_off(delay)
                        .map_err(|e| ApiError::Internal(e.to_string()))?;
                    battery_off_in = Some(delay);
                }
                None => warn!("Battery monitor disabled; shutting down without battery turn-off"),
            }
        }

        info!(?trigger, program = %program, "Running trigger command");
        tokio::process::Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| ApiError::Internal(format!("cannot run {program}: {e}")))?;

        Ok(TriggerOutcome {
            trigger,
            battery_off_in,
            command: command.clone(),
        })
    }
}
