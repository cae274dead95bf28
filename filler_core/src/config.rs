//! Configuration types for the fill controller.
//!
//! These are the runtime configuration structs used by `FillSupervisor`.
//! They are separate from the TOML-deserialized config in `filler_config`.

use crate::blend::{ControlMode, ProcessVariable};
use crate::pid::PidGains;

/// PID gains and clamp bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidCfg {
    pub gains: PidGains,
    /// Lower bound of the integral accumulator (anti-windup).
    pub integral_min: f32,
    /// Upper bound of the integral accumulator (anti-windup).
    pub integral_max: f32,
    /// Output clamp in percent.
    pub output_min: f32,
    pub output_max: f32,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            gains: PidGains {
                kp: 2.0,
                ki: 0.5,
                kd: 0.1,
            },
            integral_min: -50.0,
            integral_max: 50.0,
            output_min: 0.0,
            output_max: 100.0,
        }
    }
}

/// Relay-feedback auto-tune settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoTuneCfg {
    /// Relay center in percent; high/low are `center ± step`.
    pub center_pct: f32,
    /// Relay half-amplitude in percent (the `d` of the describing function).
    pub step_pct: f32,
    /// Oscillations required; the test needs `min_oscillations + 1` peaks.
    pub min_oscillations: usize,
    /// Session-wide timeout in milliseconds.
    pub timeout_ms: u64,
    /// Weight the relay switches around.
    pub setpoint: f32,
    /// Weight at which the relay test stops regardless of peak count.
    pub test_target: f32,
    /// Minimum weight rise over the initial reading before peaks are tracked.
    pub settle_delta: f32,
}

impl AutoTuneCfg {
    pub fn relay_high_pct(&self) -> f32 {
        (self.center_pct + self.step_pct).clamp(0.0, 100.0)
    }

    pub fn relay_low_pct(&self) -> f32 {
        (self.center_pct - self.step_pct).clamp(0.0, 100.0)
    }

    /// Half of the swing the relay can actually make after clamping.
    pub fn effective_step_pct(&self) -> f32 {
        (self.relay_high_pct() - self.relay_low_pct()) / 2.0
    }

    pub fn required_peaks(&self) -> usize {
        self.min_oscillations + 1
    }
}

impl Default for AutoTuneCfg {
    fn default() -> Self {
        Self {
            center_pct: 50.0,
            step_pct: 20.0,
            min_oscillations: 3,
            timeout_ms: 120_000,
            setpoint: 25.0,
            test_target: 50.0,
            settle_delta: 5.0,
        }
    }
}

/// Safety interlock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyCfg {
    /// Per-stage confirmation timeout in milliseconds.
    pub stage_timeout_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 30_000,
        }
    }
}

/// Fill-level settings: target bounds, sensor sanity window, mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillCfg {
    pub default_target: f32,
    pub min_target: f32,
    pub max_target: f32,
    /// Readings below this are treated as a sensor fault.
    pub sensor_min: f32,
    /// Readings above this are treated as a sensor fault.
    pub sensor_max: f32,
    /// How long `Completed` is held before returning to `Idle`.
    pub completed_hold_ms: u64,
    pub mode: ControlMode,
    /// Process variable the PID acts on in `Hybrid` and `PidOnly`.
    pub pid_variable: ProcessVariable,
    /// EMA factor for the flow-rate estimate, in (0, 1].
    pub flow_alpha: f32,
}

impl Default for FillCfg {
    fn default() -> Self {
        Self {
            default_target: 200.0,
            min_target: 10.0,
            max_target: 250.0,
            sensor_min: -10.0,
            sensor_max: 500.0,
            completed_hold_ms: 2_000,
            mode: ControlMode::Hybrid,
            pid_variable: ProcessVariable::Flow,
            flow_alpha: 0.3,
        }
    }
}

/// Control clock and telemetry cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCfg {
    pub tick_ms: u64,
    /// Status publish interval while filling.
    pub status_filling_ms: u64,
    /// Status publish interval in every other state.
    pub status_idle_ms: u64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            status_filling_ms: 5_000,
            status_idle_ms: 30_000,
        }
    }
}
