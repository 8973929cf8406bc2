pub mod autodetect;
pub mod axes;
pub mod control;
pub mod doctor;
pub mod error;
pub mod guard;
pub mod mav;
pub mod schedule;
pub mod state;
pub mod transport;

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use autodetect::{default_candidate_bauds, default_candidate_devs, ProbePlan};
use control::{ControlSettings, DEFAULT_ARM_CUSTOM_MODE, DEFAULT_SMOOTHING_FACTOR};

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// If true, probe candidate serial ports/bauds and pick the first that
    /// yields an autopilot HEARTBEAT.
    pub autodetect: bool,

    /// When autodetect=false: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    /// Autodetect candidate paths. Defaults to whatever ttyACM*/ttyUSB*/ttyTHS*
    /// devices the system reports.
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Companion heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Custom flight mode requested right after arming. Default 1.
    pub arm_custom_mode: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlConfig {
    /// Fraction of the remaining stick error applied per 20 ms tick, in (0, 1].
    pub smoothing_factor: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MavIds {
    pub sys_id: u8,
    pub comp_id: u8,
    pub target_sys: u8,
    pub target_comp: u8,
}

impl Default for MavIds {
    fn default() -> Self {
        // 255/190: ground station / mission computer; 1/1: first autopilot
        Self { sys_id: 255, comp_id: 190, target_sys: 1, target_comp: 1 }
    }
}

impl FcConfig {
    pub fn ids(&self) -> MavIds {
        MavIds {
            sys_id: self.sys_id,
            comp_id: self.comp_id,
            target_sys: self.target_sys,
            target_comp: self.target_comp,
        }
    }

    /// Candidate list for the connector: the fixed port when autodetect is
    /// off, otherwise the configured or discovered candidates.
    pub fn probe_plan(&self) -> Result<ProbePlan> {
        let (candidate_devs, candidate_bauds) = if self.autodetect {
            (
                self.candidate_devs.clone().unwrap_or_else(default_candidate_devs),
                self.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds),
            )
        } else {
            let dev = self.serial_dev.clone().context("fc.serial_dev missing (autodetect=false)")?;
            let baud = self.baud.context("fc.baud missing (autodetect=false)")?;
            (vec![dev], vec![baud])
        };
        Ok(ProbePlan { candidate_devs, candidate_bauds, ids: self.ids() })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        let hz = self.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        Duration::from_secs_f32(1.0 / hz)
    }
}

impl ControlSettings {
    pub fn from_config(fc: &FcConfig, control: &ControlConfig) -> Self {
        Self {
            smoothing_factor: control.smoothing_factor.unwrap_or(DEFAULT_SMOOTHING_FACTOR),
            arm_custom_mode: fc.arm_custom_mode.unwrap_or(DEFAULT_ARM_CUSTOM_MODE),
            heartbeat_interval: fc.heartbeat_interval(),
        }
    }
}

pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
