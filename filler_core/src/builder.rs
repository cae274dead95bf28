//! Type-state builder for `FillSupervisor` and generic `build_supervisor` constructor.
//!
//! Sensor, actuator and confirm button must be provided before `build()` is
//! available. `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use filler_traits::{
    ActuatorOutput, Clock, ConfirmButton, EventSink, FeedbackInput, MonotonicClock, ParameterStore,
    WeightSensor,
};

use crate::config::{AutoTuneCfg, ControlCfg, FillCfg, PidCfg, SafetyCfg};
use crate::error::{BuildError, Result};
use crate::pid::PidGains;
use crate::state::StatusSnapshot;
use crate::supervisor::{FillSupervisor, SupervisorCfg};
use crate::zones::ZoneSchedule;

/// Boxed, dynamically dispatched supervisor as produced by the builder.
pub type DynFillSupervisor = FillSupervisor<
    Box<dyn WeightSensor + Send>,
    Box<dyn ActuatorOutput + Send>,
    Box<dyn ConfirmButton + Send>,
>;

type DynSink = Box<dyn EventSink<StatusSnapshot> + Send>;
type DynFeedback = Box<dyn FeedbackInput + Send>;
type DynClock = Arc<dyn Clock + Send + Sync>;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `FillSupervisor`. Configuration is validated on `build()`.
pub struct FillSupervisorBuilder<S, A, B> {
    sensor: Option<Box<dyn WeightSensor + Send>>,
    actuator: Option<Box<dyn ActuatorOutput + Send>>,
    button: Option<Box<dyn ConfirmButton + Send>>,
    feedback: Option<DynFeedback>,
    sink: Option<DynSink>,
    clock: Option<DynClock>,
    pid: Option<PidCfg>,
    stored_gains: Option<PidGains>,
    zones: Option<ZoneSchedule>,
    safety: Option<SafetyCfg>,
    autotune: Option<AutoTuneCfg>,
    fill: Option<FillCfg>,
    control: Option<ControlCfg>,
    _s: PhantomData<S>,
    _a: PhantomData<A>,
    _b: PhantomData<B>,
}

impl Default for FillSupervisorBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            sensor: None,
            actuator: None,
            button: None,
            feedback: None,
            sink: None,
            clock: None,
            pid: None,
            stored_gains: None,
            zones: None,
            safety: None,
            autotune: None,
            fill: None,
            control: None,
            _s: PhantomData,
            _a: PhantomData,
            _b: PhantomData,
        }
    }
}

impl DynFillSupervisor {
    /// Start building a supervisor.
    pub fn builder() -> FillSupervisorBuilder<Missing, Missing, Missing> {
        FillSupervisorBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate configuration and construct a `FillSupervisor`.
///
/// Shared by `FillSupervisorBuilder::try_build()` and `build_supervisor()`.
fn validate_and_build<S, A, B>(
    sensor: S,
    actuator: A,
    button: B,
    cfg: SupervisorCfg,
    feedback: Option<DynFeedback>,
    sink: Option<DynSink>,
    clock: Option<DynClock>,
) -> Result<FillSupervisor<S, A, B>>
where
    S: WeightSensor,
    A: ActuatorOutput,
    B: ConfirmButton,
{
    let pid = &cfg.pid;
    if !pid.gains.is_finite() || pid.gains.kp < 0.0 || pid.gains.ki < 0.0 || pid.gains.kd < 0.0 {
        return Err(invalid("pid gains must be finite and >= 0"));
    }
    if pid.integral_min.is_nan() || pid.integral_max.is_nan() || pid.integral_min > pid.integral_max {
        return Err(invalid("pid integral_min must be <= integral_max"));
    }
    if !(pid.output_min.is_finite() && pid.output_max.is_finite()) || pid.output_min >= pid.output_max {
        return Err(invalid("pid output_min must be < output_max"));
    }

    let tune = &cfg.autotune;
    if !(tune.step_pct > 0.0 && tune.step_pct <= 50.0) {
        return Err(invalid("autotune step_pct must be in (0, 50]"));
    }
    if !(0.0..=100.0).contains(&tune.center_pct) {
        return Err(invalid("autotune center_pct must be in [0, 100]"));
    }
    if tune.min_oscillations == 0 {
        return Err(invalid("autotune min_oscillations must be >= 1"));
    }
    if tune.required_peaks() > crate::autotune::PEAK_CAPACITY {
        return Err(invalid("autotune min_oscillations exceeds peak buffer"));
    }
    if tune.timeout_ms == 0 {
        return Err(invalid("autotune timeout_ms must be > 0"));
    }
    if !tune.settle_delta.is_finite() || tune.settle_delta < 0.0 {
        return Err(invalid("autotune settle_delta must be >= 0"));
    }
    if !(tune.test_target.is_finite() && tune.setpoint.is_finite()) || tune.test_target <= tune.setpoint {
        return Err(invalid("autotune test_target must exceed setpoint"));
    }

    if cfg.safety.stage_timeout_ms == 0 {
        return Err(invalid("safety stage_timeout_ms must be > 0"));
    }

    let fill = &cfg.fill;
    if !(fill.min_target > 0.0 && fill.min_target <= fill.max_target) {
        return Err(invalid("fill target bounds must satisfy 0 < min <= max"));
    }
    if !(fill.min_target..=fill.max_target).contains(&fill.default_target) {
        return Err(invalid("target weight out of range"));
    }
    if fill.sensor_min.is_nan() || fill.sensor_max.is_nan() || fill.sensor_min >= fill.sensor_max {
        return Err(invalid("fill sensor_min must be < sensor_max"));
    }
    if !(fill.flow_alpha > 0.0 && fill.flow_alpha <= 1.0) {
        return Err(invalid("fill flow_alpha must be in (0, 1]"));
    }

    if cfg.control.tick_ms == 0 {
        return Err(invalid("control tick_ms must be > 0"));
    }

    let clock: DynClock = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    let mut sup = FillSupervisor::new(sensor, actuator, button, cfg, clock);
    sup.feedback = feedback;
    if let Some(sink) = sink {
        sup.sink = sink;
    }
    Ok(sup)
}

impl<S, A, B> FillSupervisorBuilder<S, A, B> {
    /// Fallible build available in any type-state; returns a detailed error
    /// for missing pieces.
    pub fn try_build(self) -> Result<DynFillSupervisor> {
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor))?;
        let actuator = self
            .actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingActuator))?;
        let button = self
            .button
            .ok_or_else(|| eyre::Report::new(BuildError::MissingButton))?;

        let mut pid = self.pid.unwrap_or_default();
        if let Some(g) = self.stored_gains {
            pid.gains = g;
        }
        let cfg = SupervisorCfg {
            pid,
            autotune: self.autotune.unwrap_or_default(),
            safety: self.safety.unwrap_or_default(),
            fill: self.fill.unwrap_or_default(),
            control: self.control.unwrap_or_default(),
            zones: self.zones.unwrap_or_default(),
        };
        validate_and_build(sensor, actuator, button, cfg, self.feedback, self.sink, self.clock)
    }
}

/// Chainable setters that do not affect type-state.
impl<S, A, B> FillSupervisorBuilder<S, A, B> {
    pub fn with_pid(mut self, pid: PidCfg) -> Self {
        self.pid = Some(pid);
        self
    }
    pub fn with_zones(mut self, zones: ZoneSchedule) -> Self {
        self.zones = Some(zones);
        self
    }
    pub fn with_safety(mut self, safety: SafetyCfg) -> Self {
        self.safety = Some(safety);
        self
    }
    pub fn with_autotune(mut self, autotune: AutoTuneCfg) -> Self {
        self.autotune = Some(autotune);
        self
    }
    pub fn with_fill(mut self, fill: FillCfg) -> Self {
        self.fill = Some(fill);
        self
    }
    pub fn with_control(mut self, control: ControlCfg) -> Self {
        self.control = Some(control);
        self
    }
    pub fn with_feedback(mut self, feedback: impl FeedbackInput + Send + 'static) -> Self {
        self.feedback = Some(Box::new(feedback));
        self
    }
    pub fn with_sink(mut self, sink: impl EventSink<StatusSnapshot> + Send + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Prefer gains from a parameter store over the configured defaults.
    ///
    /// An empty store keeps the defaults; a failing store is logged and also
    /// keeps the defaults.
    pub fn with_parameter_store(mut self, store: &dyn ParameterStore) -> Self {
        match store.load_pid() {
            Ok(Some(g)) => {
                let gains = PidGains::from(g);
                if gains.is_finite() {
                    tracing::info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "loaded stored pid gains");
                    self.stored_gains = Some(gains);
                } else {
                    tracing::warn!("stored pid gains are not finite; using defaults");
                }
            }
            Ok(None) => tracing::debug!("no stored pid gains; using defaults"),
            Err(e) => tracing::warn!(error = %e, "failed to load stored pid gains; using defaults"),
        }
        self
    }
}

// Setters that advance type-state
impl<A, B> FillSupervisorBuilder<Missing, A, B> {
    pub fn with_sensor(
        self,
        sensor: impl WeightSensor + Send + 'static,
    ) -> FillSupervisorBuilder<Set, A, B> {
        FillSupervisorBuilder {
            sensor: Some(Box::new(sensor)),
            actuator: self.actuator,
            button: self.button,
            feedback: self.feedback,
            sink: self.sink,
            clock: self.clock,
            pid: self.pid,
            stored_gains: self.stored_gains,
            zones: self.zones,
            safety: self.safety,
            autotune: self.autotune,
            fill: self.fill,
            control: self.control,
            _s: PhantomData,
            _a: PhantomData,
            _b: PhantomData,
        }
    }
}

impl<S, B> FillSupervisorBuilder<S, Missing, B> {
    pub fn with_actuator(
        self,
        actuator: impl ActuatorOutput + Send + 'static,
    ) -> FillSupervisorBuilder<S, Set, B> {
        FillSupervisorBuilder {
            sensor: self.sensor,
            actuator: Some(Box::new(actuator)),
            button: self.button,
            feedback: self.feedback,
            sink: self.sink,
            clock: self.clock,
            pid: self.pid,
            stored_gains: self.stored_gains,
            zones: self.zones,
            safety: self.safety,
            autotune: self.autotune,
            fill: self.fill,
            control: self.control,
            _s: PhantomData,
            _a: PhantomData,
            _b: PhantomData,
        }
    }
}

impl<S, A> FillSupervisorBuilder<S, A, Missing> {
    pub fn with_button(
        self,
        button: impl ConfirmButton + Send + 'static,
    ) -> FillSupervisorBuilder<S, A, Set> {
        FillSupervisorBuilder {
            sensor: self.sensor,
            actuator: self.actuator,
            button: Some(Box::new(button)),
            feedback: self.feedback,
            sink: self.sink,
            clock: self.clock,
            pid: self.pid,
            stored_gains: self.stored_gains,
            zones: self.zones,
            safety: self.safety,
            autotune: self.autotune,
            fill: self.fill,
            control: self.control,
            _s: PhantomData,
            _a: PhantomData,
            _b: PhantomData,
        }
    }
}

impl FillSupervisorBuilder<Set, Set, Set> {
    /// Validate and build. Only available once sensor, actuator and button are set.
    pub fn build(self) -> Result<DynFillSupervisor> {
        self.try_build()
    }
}

/// Build a statically dispatched supervisor from concrete collaborators.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_supervisor<S, A, B>(
    sensor: S,
    actuator: A,
    button: B,
    cfg: SupervisorCfg,
    sink: Option<Box<dyn EventSink<StatusSnapshot> + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<FillSupervisor<S, A, B>>
where
    S: WeightSensor,
    A: ActuatorOutput,
    B: ConfirmButton,
{
    validate_and_build(sensor, actuator, button, cfg, None, sink, clock)
}
