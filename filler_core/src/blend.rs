//! Zone base pressure plus a zone-scaled, range-clamped PID correction.

use std::time::Instant;

use crate::pid::PidController;
use crate::zones::{Zone, ZoneDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Open-loop zone schedule only.
    ZoneOnly,
    /// Raw PID output, no zone base.
    PidOnly,
    /// Zone base with bounded PID correction.
    #[default]
    Hybrid,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZoneOnly => "zone",
            Self::PidOnly => "pid",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Which measurement the PID closes the loop on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessVariable {
    /// Filtered flow rate against the zone's `target_flow`.
    #[default]
    Flow,
    /// Current weight against the fill target.
    Weight,
}

#[derive(Debug, Clone)]
pub struct HybridBlender {
    mode: ControlMode,
    prev_zone: Zone,
}

impl HybridBlender {
    pub fn new(mode: ControlMode) -> Self {
        Self {
            mode,
            prev_zone: Zone::Idle,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        self.mode = mode;
    }

    /// Forget the previous zone so the next blend starts from a fresh PID.
    pub fn reset(&mut self) {
        self.prev_zone = Zone::Idle;
    }

    /// Actuator command in percent for this tick.
    ///
    /// A zone change since the previous call resets the PID before any
    /// computation. Gains are scaled by the zone multiplier for this call only.
    pub fn blend(
        &mut self,
        zone: Zone,
        def: &ZoneDefinition,
        pid: &mut PidController,
        setpoint: f32,
        measurement: f32,
        now: Instant,
    ) -> f32 {
        if zone != self.prev_zone {
            tracing::debug!(from = %self.prev_zone, to = %zone, "zone change, pid reset");
            pid.reset();
            self.prev_zone = zone;
        }

        match self.mode {
            ControlMode::ZoneOnly => def.base_pressure_pct,
            ControlMode::PidOnly => pid.compute(setpoint, measurement, now),
            ControlMode::Hybrid => {
                let gains = pid.gains().scaled(def.gain_multiplier);
                let correction = pid.correction(gains, setpoint, measurement, now, def.pid_range_pct);
                let out = (def.base_pressure_pct + correction).clamp(0.0, 100.0);
                tracing::trace!(base = def.base_pressure_pct, correction, out, "hybrid blend");
                out
            }
        }
    }
}

/// EMA-filtered flow estimate (mass per second) from successive weights.
#[derive(Debug, Clone)]
pub struct FlowEstimator {
    alpha: f32,
    prev: Option<(Instant, f32)>,
    filtered: f32,
}

impl FlowEstimator {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            prev: None,
            filtered: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.prev = None;
        self.filtered = 0.0;
    }

    pub fn rate(&self) -> f32 {
        self.filtered
    }

    /// Feed a weight sample; gaps over one second restart the filter.
    pub fn update(&mut self, weight: f32, now: Instant) -> f32 {
        match self.prev {
            Some((t, w)) if now > t => {
                let dt = (now - t).as_secs_f32();
                if dt > 1.0 {
                    self.filtered = 0.0;
                } else {
                    let instant = (weight - w) / dt;
                    self.filtered = self.alpha * instant + (1.0 - self.alpha) * self.filtered;
                }
                self.prev = Some((now, weight));
            }
            Some(_) => {}
            None => self.prev = Some((now, weight)),
        }
        self.filtered
    }
}
