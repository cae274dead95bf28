//! `From` implementations bridging `filler_config` types to `filler_core` types.

use crate::blend::{ControlMode, ProcessVariable};
use crate::config::{AutoTuneCfg, ControlCfg, FillCfg, PidCfg, SafetyCfg};
use crate::error::BuildError;
use crate::pid::PidGains;
use crate::supervisor::SupervisorCfg;
use crate::zones::{ZoneDefinition, ZoneSchedule};

// ── Modes ────────────────────────────────────────────────────────────────────

impl From<filler_config::ModeCfg> for ControlMode {
    fn from(m: filler_config::ModeCfg) -> Self {
        match m {
            filler_config::ModeCfg::Zone => Self::ZoneOnly,
            filler_config::ModeCfg::Pid => Self::PidOnly,
            filler_config::ModeCfg::Hybrid => Self::Hybrid,
        }
    }
}

impl From<filler_config::ProcessVariableCfg> for ProcessVariable {
    fn from(v: filler_config::ProcessVariableCfg) -> Self {
        match v {
            filler_config::ProcessVariableCfg::Flow => Self::Flow,
            filler_config::ProcessVariableCfg::Weight => Self::Weight,
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

impl From<&filler_config::PidCfg> for PidCfg {
    fn from(c: &filler_config::PidCfg) -> Self {
        Self {
            gains: PidGains {
                kp: c.kp,
                ki: c.ki,
                kd: c.kd,
            },
            integral_min: c.integral_min,
            integral_max: c.integral_max,
            output_min: c.output_min,
            output_max: c.output_max,
        }
    }
}

impl From<&filler_config::AutoTuneCfg> for AutoTuneCfg {
    fn from(c: &filler_config::AutoTuneCfg) -> Self {
        Self {
            center_pct: c.center_pct,
            step_pct: c.step_pct,
            min_oscillations: c.min_oscillations,
            timeout_ms: c.timeout_ms,
            setpoint: c.setpoint,
            test_target: c.test_target,
            settle_delta: c.settle_delta,
        }
    }
}

impl From<&filler_config::SafetyCfg> for SafetyCfg {
    fn from(c: &filler_config::SafetyCfg) -> Self {
        Self {
            stage_timeout_ms: c.stage_timeout_ms,
        }
    }
}

impl From<&filler_config::FillCfg> for FillCfg {
    fn from(c: &filler_config::FillCfg) -> Self {
        Self {
            default_target: c.default_target,
            min_target: c.min_target,
            max_target: c.max_target,
            sensor_min: c.sensor_min,
            sensor_max: c.sensor_max,
            completed_hold_ms: c.completed_hold_ms,
            mode: c.mode.into(),
            pid_variable: c.pid_variable.into(),
            flow_alpha: c.flow_alpha,
        }
    }
}

impl From<&filler_config::ControlCfg> for ControlCfg {
    fn from(c: &filler_config::ControlCfg) -> Self {
        Self {
            tick_ms: c.tick_ms,
            status_filling_ms: c.status_filling_ms,
            status_idle_ms: c.status_idle_ms,
        }
    }
}

// ── Zone table ───────────────────────────────────────────────────────────────

impl ZoneSchedule {
    /// Build a schedule from config rows, filling in default flow setpoints.
    pub fn from_rows(rows: &[filler_config::ZoneRow]) -> Result<Self, BuildError> {
        let zones = rows
            .iter()
            .enumerate()
            .map(|(i, r)| ZoneDefinition {
                end_percent: r.end_percent,
                base_pressure_pct: r.base_pressure_pct,
                pid_range_pct: r.pid_range_pct,
                gain_multiplier: r.gain_multiplier,
                target_flow: r.target_flow_or_default(i),
            })
            .collect();
        Self::new(zones)
    }
}

impl SupervisorCfg {
    /// Assemble the runtime config from a loaded document and the zone rows
    /// (from `[[zones]]` or the CSV file, as resolved by the caller).
    pub fn from_config(
        cfg: &filler_config::Config,
        zones: &[filler_config::ZoneRow],
    ) -> Result<Self, BuildError> {
        Ok(Self {
            pid: (&cfg.pid).into(),
            autotune: (&cfg.autotune).into(),
            safety: (&cfg.safety).into(),
            fill: (&cfg.fill).into(),
            control: (&cfg.control).into(),
            zones: ZoneSchedule::from_rows(zones)?,
        })
    }
}
