//! Controller state and the snapshot handed to telemetry.

use std::time::{Duration, Instant};

use crate::autotune::TunePhase;
use crate::blend::ControlMode;
use crate::error::FillError;
use crate::interlock::SafetyStage;
use crate::pid::PidGains;
use crate::zones::Zone;

/// Top-level controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillState {
    #[default]
    Idle,
    SafetyCheck,
    Filling,
    Completed,
    Error,
    Cancelled,
}

impl FillState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::SafetyCheck => "SAFETY_CHECK",
            Self::Filling => "FILLING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// States that only leave through `request_reset`.
    pub fn needs_reset(&self) -> bool {
        matches!(self, Self::Error | Self::Cancelled)
    }
}

impl core::fmt::Display for FillState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetime statistics plus the per-fill elapsed time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillCounters {
    pub fill_number: u32,
    /// Zone changes during the current (or last) fill; entering the first
    /// zone counts as one.
    pub zone_transitions: u32,
    pub elapsed_ms: u64,
    pub total_dispensed: f32,
    pub last_fill_error: Option<FillError>,
}

/// Everything the controller knows about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    pub fill_state: FillState,
    pub safety_stage: SafetyStage,
    pub active_zone: Zone,
    pub target_weight: f32,
    pub current_weight: f32,
    /// Last commanded actuator percent.
    pub pressure_setpoint_pct: f32,
    /// Filtered flow estimate in mass per second.
    pub flow_rate: f32,
    pub pid_gains: Option<PidGains>,
    pub pid_integral: f32,
    pub pid_prev_measurement: Option<f32>,
    pub pid_last_tick: Option<Instant>,
    pub mode: ControlMode,
    pub counters: FillCounters,
    pub error: Option<FillError>,
    pub scale_online: bool,
    pub feedback_active: bool,
    pub tune_phase: TunePhase,
}

/// Point-in-time copy of [`ControlState`] for status publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: ControlState,
    pub uptime: Duration,
}

impl StatusSnapshot {
    /// Percent of target reached; zero without a target.
    pub fn percent_complete(&self) -> f32 {
        if self.state.target_weight > 0.0 {
            self.state.current_weight / self.state.target_weight * 100.0
        } else {
            0.0
        }
    }

    /// First line of the operator display for the current state.
    pub fn headline(&self) -> String {
        match self.state.fill_state {
            FillState::SafetyCheck => self.state.safety_stage.prompt().0.to_string(),
            FillState::Filling if self.state.tune_phase.is_active() => {
                format!("TUNE {}", self.state.tune_phase.as_str())
            }
            FillState::Filling => format!("{} {:.0}%", self.state.active_zone, self.percent_complete()),
            FillState::Error => self
                .state
                .error
                .as_ref()
                .map_or_else(|| "ERROR".to_string(), |e| format!("ERR {}", e.kind_name())),
            other => other.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(state: ControlState) -> StatusSnapshot {
        StatusSnapshot {
            state,
            uptime: Duration::ZERO,
        }
    }

    #[test]
    fn percent_complete_handles_zero_target() {
        assert_eq!(snap(ControlState::default()).percent_complete(), 0.0);
        let s = snap(ControlState {
            target_weight: 200.0,
            current_weight: 50.0,
            ..ControlState::default()
        });
        assert_eq!(s.percent_complete(), 25.0);
    }

    #[test]
    fn headline_follows_state() {
        let s = snap(ControlState {
            fill_state: FillState::Filling,
            active_zone: Zone::Slow,
            target_weight: 200.0,
            current_weight: 150.0,
            ..ControlState::default()
        });
        assert_eq!(s.headline(), "SLOW 75%");

        let s = snap(ControlState {
            fill_state: FillState::Error,
            error: Some(FillError::SafetyTimeout),
            ..ControlState::default()
        });
        assert_eq!(s.headline(), "ERR safety_timeout");

        let s = snap(ControlState {
            fill_state: FillState::SafetyCheck,
            safety_stage: SafetyStage::HoseCheck,
            ..ControlState::default()
        });
        assert_eq!(s.headline(), "SAFETY CHECK 2/4");
    }

    #[test]
    fn only_error_and_cancelled_need_reset() {
        assert!(FillState::Error.needs_reset());
        assert!(FillState::Cancelled.needs_reset());
        assert!(!FillState::Completed.needs_reset());
    }
}
