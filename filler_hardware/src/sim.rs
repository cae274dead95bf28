//! Simulated pneumatic plant.
//!
//! Weight rises at `flow_per_sec_at_full * pressure / 100` per second of
//! clock time. Every part integrates the plant up to "now" before touching
//! it, so readings stay consistent however the parts are polled.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use filler_traits::{ActuatorOutput, BoxError, Clock, FeedbackInput, WeightSensor};

use crate::error::HwError;

/// Plant parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimCfg {
    pub flow_per_sec_at_full: f32,
    pub wobble_amplitude: f32,
    pub wobble_period_ms: u64,
    /// The scale disconnects after this many reads.
    pub fail_after_reads: Option<u64>,
    /// Weight on the scale at start.
    pub initial_weight: f32,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            flow_per_sec_at_full: 4.0,
            wobble_amplitude: 0.0,
            wobble_period_ms: 10_000,
            fail_after_reads: None,
            initial_weight: 0.0,
        }
    }
}

#[derive(Debug)]
struct PlantState {
    weight: f32,
    pressure_pct: f32,
    last_update: Instant,
    reads: u64,
}

/// Shared plant; hand out its parts with `scale()`, `valve()`, ...
#[derive(Clone)]
pub struct SimPlant {
    cfg: SimCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    state: Arc<Mutex<PlantState>>,
}

impl core::fmt::Debug for SimPlant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimPlant")
            .field("cfg", &self.cfg)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SimPlant {
    pub fn new(cfg: SimCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let now = clock.now();
        Self {
            cfg,
            clock,
            epoch: now,
            state: Arc::new(Mutex::new(PlantState {
                weight: cfg.initial_weight,
                pressure_pct: 0.0,
                last_update: now,
                reads: 0,
            })),
        }
    }

    pub fn scale(&self) -> SimScale {
        SimScale {
            plant: self.clone(),
        }
    }

    pub fn valve(&self) -> SimValve {
        SimValve {
            plant: self.clone(),
        }
    }

    pub fn feedback(&self) -> SimFeedback {
        SimFeedback {
            plant: self.clone(),
        }
    }

    /// Mass currently on the scale, without wobble.
    pub fn weight(&self) -> f32 {
        self.advance().map_or(0.0, |s| s.weight)
    }

    pub fn pressure_pct(&self) -> f32 {
        self.lock().map_or(0.0, |s| s.pressure_pct)
    }

    /// Swap in an empty container: weight goes back to `initial_weight`.
    pub fn replace_container(&self) {
        if let Ok(mut s) = self.advance() {
            s.weight = self.cfg.initial_weight;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlantState>, HwError> {
        self.state
            .lock()
            .map_err(|_| HwError::Actuator("plant state poisoned".into()))
    }

    /// Integrate flow up to now and return the locked state.
    fn advance(&self) -> Result<MutexGuard<'_, PlantState>, HwError> {
        let now = self.clock.now();
        let mut s = self.lock()?;
        let dt = now.saturating_duration_since(s.last_update).as_secs_f32();
        s.weight += self.cfg.flow_per_sec_at_full * s.pressure_pct / 100.0 * dt;
        s.last_update = now;
        Ok(s)
    }

    fn wobble(&self) -> f32 {
        if self.cfg.wobble_amplitude == 0.0 || self.cfg.wobble_period_ms == 0 {
            return 0.0;
        }
        let t_ms = self.clock.ms_since(self.epoch) % self.cfg.wobble_period_ms;
        let phase = t_ms as f32 / self.cfg.wobble_period_ms as f32;
        self.cfg.wobble_amplitude * (TAU * phase).sin()
    }
}

/// Scale view of the plant.
#[derive(Debug, Clone)]
pub struct SimScale {
    plant: SimPlant,
}

impl SimScale {
    fn read_weight(&self) -> Result<f32, HwError> {
        let wobble = self.plant.wobble();
        let mut s = self.plant.advance()?;
        s.reads += 1;
        if let Some(limit) = self.plant.cfg.fail_after_reads
            && s.reads > limit
        {
            return Err(HwError::Disconnected);
        }
        Ok(s.weight + wobble)
    }
}

impl WeightSensor for SimScale {
    fn read(&mut self) -> Result<f32, BoxError> {
        match self.read_weight() {
            Ok(w) => Ok(w),
            Err(e) => {
                tracing::debug!(error = %e, "simulated scale read failed");
                Err(Box::new(e))
            }
        }
    }
}

/// Valve view of the plant.
#[derive(Debug, Clone)]
pub struct SimValve {
    plant: SimPlant,
}

impl ActuatorOutput for SimValve {
    fn set_percent(&mut self, pct: f32) -> Result<(), BoxError> {
        if !(pct.is_finite() && (0.0..=100.0).contains(&pct)) {
            return Err(Box::new(HwError::Actuator(format!(
                "command {pct} outside 0..=100"
            ))));
        }
        let mut s = self.plant.advance()?;
        if s.pressure_pct != pct {
            tracing::trace!(from = s.pressure_pct, to = pct, "valve");
        }
        s.pressure_pct = pct;
        Ok(())
    }
}

/// Pressure-switch contact: active while any pressure is commanded.
#[derive(Debug, Clone)]
pub struct SimFeedback {
    plant: SimPlant,
}

impl FeedbackInput for SimFeedback {
    fn is_active(&self) -> bool {
        self.plant.pressure_pct() > 0.0
    }
}

/// Raw confirm-button contact.
///
/// With `auto_confirm` the contact closes on every other poll, like an
/// operator pressing and releasing steadily. Otherwise it closes for one poll
/// per [`ButtonHandle::press`]. Edge detection is left to the caller.
#[derive(Debug, Clone)]
pub struct SimButton {
    auto_confirm: bool,
    toggle: bool,
    latched: Arc<AtomicBool>,
}

/// Presses a [`SimButton`] from another thread.
#[derive(Debug, Clone)]
pub struct ButtonHandle(Arc<AtomicBool>);

impl ButtonHandle {
    pub fn press(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl SimButton {
    pub fn new(auto_confirm: bool) -> Self {
        Self {
            auto_confirm,
            toggle: false,
            latched: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> ButtonHandle {
        ButtonHandle(Arc::clone(&self.latched))
    }

    /// Contact level for this poll (`true` = closed).
    pub fn is_pressed(&mut self) -> bool {
        if self.latched.swap(false, Ordering::Relaxed) {
            return true;
        }
        if self.auto_confirm {
            self.toggle = !self.toggle;
            return self.toggle;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filler_traits::ManualClock;

    fn plant(cfg: SimCfg) -> (SimPlant, ManualClock) {
        let clock = ManualClock::new();
        (SimPlant::new(cfg, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn weight_integrates_pressure_over_time() {
        let (p, clock) = plant(SimCfg::default());
        let mut valve = p.valve();
        let mut scale = p.scale();
        valve.set_percent(50.0).unwrap();
        clock.advance_ms(2_000);
        assert!((scale.read().unwrap() - 4.0).abs() < 1e-4);
        valve.set_percent(0.0).unwrap();
        clock.advance_ms(5_000);
        assert!((scale.read().unwrap() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn replacing_the_container_resets_weight() {
        let (p, clock) = plant(SimCfg {
            initial_weight: 1.5,
            ..SimCfg::default()
        });
        p.valve().set_percent(100.0).unwrap();
        clock.advance_ms(1_000);
        assert!((p.weight() - 5.5).abs() < 1e-4);
        p.replace_container();
        assert!((p.weight() - 1.5).abs() < 1e-4);
    }

    #[test]
    fn scale_disconnects_after_limit() {
        let (p, _clock) = plant(SimCfg {
            fail_after_reads: Some(2),
            ..SimCfg::default()
        });
        let mut scale = p.scale();
        assert!(scale.read().is_ok());
        assert!(scale.read().is_ok());
        let e = scale.read().unwrap_err();
        assert!(matches!(e.downcast_ref::<HwError>(), Some(HwError::Disconnected)));
    }

    #[test]
    fn valve_rejects_out_of_range_commands() {
        let (p, _clock) = plant(SimCfg::default());
        let mut valve = p.valve();
        assert!(valve.set_percent(101.0).is_err());
        assert!(valve.set_percent(f32::NAN).is_err());
        assert_eq!(p.pressure_pct(), 0.0);
    }

    #[test]
    fn feedback_follows_pressure() {
        let (p, _clock) = plant(SimCfg::default());
        let fb = p.feedback();
        assert!(!fb.is_active());
        p.valve().set_percent(10.0).unwrap();
        assert!(fb.is_active());
    }

    #[test]
    fn wobble_is_added_to_the_reading_only() {
        let (p, clock) = plant(SimCfg {
            wobble_amplitude: 1.0,
            wobble_period_ms: 4_000,
            ..SimCfg::default()
        });
        clock.advance_ms(1_000);
        assert!((p.scale().read().unwrap() - 1.0).abs() < 1e-4);
        assert_eq!(p.weight(), 0.0);
    }

    #[test]
    fn auto_confirm_alternates_and_handle_closes_for_one_poll() {
        let mut b = SimButton::new(true);
        assert_eq!(
            [b.is_pressed(), b.is_pressed(), b.is_pressed()],
            [true, false, true]
        );

        let mut manual = SimButton::new(false);
        assert!(!manual.is_pressed());
        manual.handle().press();
        assert!(manual.is_pressed());
        assert!(!manual.is_pressed());
    }
}
