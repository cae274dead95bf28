//! PID controller with clamping anti-windup and derivative-on-measurement.
//!
//! Time steps come from the caller's clock. A step that is non-positive or
//! longer than one second is a discontinuity: the controller re-anchors its
//! timestamp and measurement and hands back the previously held output without
//! touching the integral.

use std::time::{Duration, Instant};

use filler_traits::StoredGains;

use crate::config::PidCfg;

const MAX_DT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    /// All three gains multiplied by `factor`.
    #[inline]
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            kp: self.kp * factor,
            ki: self.ki * factor,
            kd: self.kd * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

impl From<StoredGains> for PidGains {
    fn from(g: StoredGains) -> Self {
        Self {
            kp: g.kp,
            ki: g.ki,
            kd: g.kd,
        }
    }
}

impl From<PidGains> for StoredGains {
    fn from(g: PidGains) -> Self {
        Self {
            kp: g.kp,
            ki: g.ki,
            kd: g.kd,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    integral_min: f32,
    integral_max: f32,
    output_min: f32,
    output_max: f32,

    integral: f32,
    prev_measurement: Option<f32>,
    last_tick: Option<Instant>,
    last_output: f32,
}

impl PidController {
    pub fn new(cfg: &PidCfg) -> Self {
        Self {
            gains: cfg.gains,
            integral_min: cfg.integral_min,
            integral_max: cfg.integral_max,
            output_min: cfg.output_min,
            output_max: cfg.output_max,
            integral: 0.0,
            prev_measurement: None,
            last_tick: None,
            last_output: 0.0,
        }
    }

    /// Clear integral, measurement history, timestamp and held output.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measurement = None;
        self.last_tick = None;
        self.last_output = 0.0;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn prev_measurement(&self) -> Option<f32> {
        self.prev_measurement
    }

    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }

    /// Standard output in `[output_min, output_max]` using the stored gains.
    pub fn compute(&mut self, setpoint: f32, measurement: f32, now: Instant) -> f32 {
        let gains = self.gains;
        let (lo, hi) = (self.output_min, self.output_max);
        self.step(gains, setpoint, measurement, now, lo, hi)
    }

    /// Signed correction in `[-range, range]` using caller-supplied gains.
    ///
    /// The stored gains are left untouched; the integral and measurement
    /// history are shared with `compute`.
    pub fn correction(
        &mut self,
        gains: PidGains,
        setpoint: f32,
        measurement: f32,
        now: Instant,
        range: f32,
    ) -> f32 {
        let range = range.abs();
        self.step(gains, setpoint, measurement, now, -range, range)
    }

    fn step(
        &mut self,
        gains: PidGains,
        setpoint: f32,
        measurement: f32,
        now: Instant,
        lo: f32,
        hi: f32,
    ) -> f32 {
        let dt = match self.last_tick {
            Some(last) if now > last && now - last <= MAX_DT => (now - last).as_secs_f32(),
            _ => {
                tracing::trace!(measurement, "pid discontinuity, re-anchoring");
                self.last_tick = Some(now);
                self.prev_measurement = Some(measurement);
                return self.last_output;
            }
        };

        let error = setpoint - measurement;
        let p = gains.kp * error;

        self.integral = (self.integral + error * dt).clamp(self.integral_min, self.integral_max);
        let i = gains.ki * self.integral;

        let prev = self.prev_measurement.unwrap_or(measurement);
        let d = -gains.kd * (measurement - prev) / dt;

        let raw = p + i + d;
        let out = if raw.is_finite() {
            raw.clamp(lo, hi)
        } else {
            self.last_output.clamp(lo, hi)
        };

        self.prev_measurement = Some(measurement);
        self.last_tick = Some(now);
        self.last_output = out;
        out
    }
}
