//! Top-level fill state machine.
//!
//! `FillSupervisor::tick` is the single writer of [`ControlState`]. It never
//! sleeps; every timeout compares the injected clock against a recorded
//! start instant. Requests (`request_start`, `request_cancel`, ...) are
//! observed on the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use filler_traits::{ActuatorOutput, Clock, ConfirmButton, EventSink, FeedbackInput, WeightSensor};

use crate::autotune::{AutoTuner, TuneResult, TuneStatus};
use crate::blend::{ControlMode, FlowEstimator, HybridBlender, ProcessVariable};
use crate::config::{AutoTuneCfg, ControlCfg, FillCfg, PidCfg, SafetyCfg};
use crate::error::{BuildError, FillError, Result};
use crate::hw_error::{map_actuator_error, map_sensor_error};
use crate::interlock::{SafetyInterlock, SafetyStage};
use crate::pid::{PidController, PidGains};
use crate::state::{ControlState, FillState, StatusSnapshot};
use crate::zones::{Zone, ZoneLookup, ZoneSchedule};

/// Static configuration of one supervisor.
#[derive(Debug, Clone, Default)]
pub struct SupervisorCfg {
    pub pid: PidCfg,
    pub autotune: AutoTuneCfg,
    pub safety: SafetyCfg,
    pub fill: FillCfg,
    pub control: ControlCfg,
    pub zones: ZoneSchedule,
}

/// Cooperative cancel flag, cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Event sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink<StatusSnapshot> for NullSink {
    fn publish_event(&mut self, _kind: &str, _detail: &str) -> std::result::Result<(), filler_traits::BoxError> {
        Ok(())
    }

    fn publish_status(&mut self, _snapshot: &StatusSnapshot) -> std::result::Result<(), filler_traits::BoxError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Fill,
    AutoTune,
}

pub struct FillSupervisor<S, A, B> {
    sensor: S,
    actuator: A,
    button: B,
    pub(crate) feedback: Option<Box<dyn FeedbackInput + Send>>,
    pub(crate) sink: Box<dyn EventSink<StatusSnapshot> + Send>,
    clock: Arc<dyn Clock + Send + Sync>,

    fill_cfg: FillCfg,
    safety_cfg: SafetyCfg,
    control_cfg: ControlCfg,
    schedule: ZoneSchedule,

    pid: PidController,
    blender: HybridBlender,
    flow: FlowEstimator,
    tuner: AutoTuner,
    interlock: Option<SafetyInterlock>,
    purpose: Purpose,

    state: ControlState,
    cancel: CancelHandle,
    epoch: Instant,
    fill_started_at: Option<Instant>,
    completed_at: Option<Instant>,
    tune_result: Option<TuneResult>,
    last_status_publish: Option<Instant>,
    actuator_zeroed: bool,
}

impl<S, A, B> core::fmt::Debug for FillSupervisor<S, A, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FillSupervisor")
            .field("state", &self.state.fill_state)
            .field("target", &self.state.target_weight)
            .field("weight", &self.state.current_weight)
            .field("zone", &self.state.active_zone)
            .finish_non_exhaustive()
    }
}

impl<S, A, B> FillSupervisor<S, A, B>
where
    S: WeightSensor,
    A: ActuatorOutput,
    B: ConfirmButton,
{
    pub(crate) fn new(
        sensor: S,
        actuator: A,
        button: B,
        cfg: SupervisorCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        let state = ControlState {
            target_weight: cfg.fill.default_target,
            pid_gains: Some(cfg.pid.gains),
            mode: cfg.fill.mode,
            ..ControlState::default()
        };
        Self {
            sensor,
            actuator,
            button,
            feedback: None,
            sink: Box::new(NullSink),
            clock,
            pid: PidController::new(&cfg.pid),
            blender: HybridBlender::new(cfg.fill.mode),
            flow: FlowEstimator::new(cfg.fill.flow_alpha),
            tuner: AutoTuner::new(cfg.autotune),
            fill_cfg: cfg.fill,
            safety_cfg: cfg.safety,
            control_cfg: cfg.control,
            schedule: cfg.zones,
            interlock: None,
            purpose: Purpose::Fill,
            state,
            cancel: CancelHandle::new(),
            epoch,
            fill_started_at: None,
            completed_at: None,
            tune_result: None,
            last_status_publish: None,
            actuator_zeroed: false,
        }
    }

    /// One control step.
    pub fn tick(&mut self) -> FillState {
        let now = self.clock.now();
        let before = self.state.fill_state;

        if self.cancel.take() {
            self.apply_cancel();
        }

        self.state.feedback_active = self.feedback.as_ref().is_some_and(|f| f.is_active());
        let reading = self.read_weight();

        match self.state.fill_state {
            FillState::SafetyCheck => self.tick_safety(now),
            FillState::Filling => self.tick_filling(reading, now),
            FillState::Completed => {
                self.hold_zero();
                let held = self
                    .completed_at
                    .map_or(Duration::MAX, |t| now.saturating_duration_since(t));
                if held >= Duration::from_millis(self.fill_cfg.completed_hold_ms) {
                    self.transition(FillState::Idle);
                    self.completed_at = None;
                }
            }
            FillState::Idle | FillState::Error | FillState::Cancelled => self.hold_zero(),
        }

        self.sync_state();
        self.publish_status(now, before != self.state.fill_state);
        tracing::trace!(
            state = self.state.fill_state.as_str(),
            weight = self.state.current_weight,
            out = self.state.pressure_setpoint_pct,
            "tick"
        );
        self.state.fill_state
    }

    /// Idle → SafetyCheck, then a normal fill.
    pub fn request_start(&mut self) -> Result<()> {
        self.begin_safety(Purpose::Fill, "start a fill")
    }

    /// Idle → SafetyCheck, then a relay auto-tune session.
    pub fn request_autotune(&mut self) -> Result<()> {
        self.begin_safety(Purpose::AutoTune, "start auto-tune")
    }

    /// Ask the control loop to stop; observed on the next tick.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle for cancelling from another thread or a signal handler.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Acknowledge an Error or Cancelled state.
    pub fn request_reset(&mut self) -> Result<()> {
        if !self.state.fill_state.needs_reset() {
            return Err(self.invalid("reset"));
        }
        let from = self.state.fill_state;
        self.hold_zero();
        self.state.error = None;
        self.state.safety_stage = SafetyStage::Idle;
        self.state.active_zone = Zone::Idle;
        self.transition(FillState::Idle);
        self.publish_event("reset", &format!("from={from}"));
        self.sync_state();
        Ok(())
    }

    pub fn set_target(&mut self, weight: f32) -> Result<()> {
        if self.state.fill_state != FillState::Idle {
            return Err(self.invalid("change the target"));
        }
        if !(weight.is_finite()
            && (self.fill_cfg.min_target..=self.fill_cfg.max_target).contains(&weight))
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "target weight out of range",
            )));
        }
        self.state.target_weight = weight;
        tracing::info!(target = weight, "target weight set");
        Ok(())
    }

    pub fn set_mode(&mut self, mode: ControlMode) -> Result<()> {
        if self.state.fill_state != FillState::Idle {
            return Err(self.invalid("change the control mode"));
        }
        self.blender.set_mode(mode);
        self.state.mode = mode;
        tracing::info!(mode = mode.as_str(), "control mode set");
        Ok(())
    }

    /// Replace the PID gains, e.g. after a successful auto-tune.
    pub fn apply_gains(&mut self, gains: PidGains) -> Result<()> {
        if matches!(
            self.state.fill_state,
            FillState::Filling | FillState::SafetyCheck
        ) {
            return Err(self.invalid("change pid gains"));
        }
        if !gains.is_finite() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "pid gains must be finite",
            )));
        }
        self.pid.set_gains(gains);
        self.pid.reset();
        self.state.pid_gains = Some(gains);
        tracing::info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "pid gains applied");
        Ok(())
    }

    /// Result of the last successful auto-tune, handed out once.
    pub fn take_tune_result(&mut self) -> Option<TuneResult> {
        self.tune_result.take()
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn fill_state(&self) -> FillState {
        self.state.fill_state
    }

    pub fn pid_gains(&self) -> PidGains {
        self.pid.gains()
    }

    /// Clock shared with the supervisor, for pacing the loop that ticks it.
    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        Arc::clone(&self.clock)
    }

    pub fn control_cfg(&self) -> &ControlCfg {
        &self.control_cfg
    }

    pub fn fill_cfg(&self) -> &FillCfg {
        &self.fill_cfg
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state.clone(),
            uptime: self.clock.now().saturating_duration_since(self.epoch),
        }
    }

    /// Operator display lines for the current state.
    pub fn prompt(&self) -> (String, String) {
        match self.state.fill_state {
            FillState::SafetyCheck => {
                let (a, b) = self.state.safety_stage.prompt();
                (a.to_string(), b.to_string())
            }
            FillState::Idle => {
                let (a, b) = SafetyStage::Idle.prompt();
                (a.to_string(), b.to_string())
            }
            _ => {
                let snap = self.snapshot();
                (
                    snap.headline(),
                    format!(
                        "{:.1}/{:.1}",
                        self.state.current_weight, self.state.target_weight
                    ),
                )
            }
        }
    }

    // ── per-state logic ──────────────────────────────────────────────────────

    fn tick_safety(&mut self, now: Instant) {
        self.hold_zero();
        let confirmed = self.button.pressed_edge();
        let stage = self
            .interlock
            .as_mut()
            .map_or(SafetyStage::Cancelled, |il| il.tick(confirmed, now));
        self.state.safety_stage = stage;

        match stage {
            SafetyStage::Complete => {
                self.interlock = None;
                self.enter_filling(now);
            }
            SafetyStage::Timeout => {
                self.interlock = None;
                self.publish_event("safety_check_failed", "stage timeout");
                self.finish_cancelled(FillError::SafetyTimeout);
            }
            SafetyStage::Cancelled => {
                self.interlock = None;
                self.publish_event("safety_check_failed", "cancelled by operator");
                self.finish_cancelled(FillError::SafetyCancelled);
            }
            SafetyStage::Idle
            | SafetyStage::AirCheck
            | SafetyStage::HoseCheck
            | SafetyStage::PositionCheck
            | SafetyStage::StartCheck => {}
        }
    }

    fn enter_filling(&mut self, now: Instant) {
        self.fill_started_at = Some(now);
        self.state.counters.elapsed_ms = 0;
        self.state.counters.zone_transitions = 0;
        self.state.active_zone = Zone::Idle;
        self.pid.reset();
        self.blender.reset();
        self.flow.reset();
        if self.purpose == Purpose::AutoTune {
            self.tuner.start(now);
        }
        self.transition(FillState::Filling);
    }

    fn tick_filling(&mut self, reading: std::result::Result<f32, FillError>, now: Instant) {
        let weight = match reading {
            Ok(w) => w,
            Err(e) => return self.fault(e),
        };
        self.state.counters.elapsed_ms = self
            .fill_started_at
            .map_or(0, |t| self.clock.ms_since(t));

        if self.tuner.is_active() {
            return self.tick_tuner(weight, now);
        }

        let target = self.state.target_weight;
        let pct = weight / target * 100.0;
        let flow = self.flow.update(weight, now);
        self.state.flow_rate = flow;

        match self.schedule.zone_for(pct) {
            ZoneLookup::TargetReached => self.complete_fill(weight, now),
            ZoneLookup::Active { zone, def } => {
                if zone != self.state.active_zone {
                    self.state.counters.zone_transitions += 1;
                    tracing::info!(from = %self.state.active_zone, to = %zone, pct, "zone transition");
                    let detail = format!("{} -> {} at {pct:.1}%", self.state.active_zone, zone);
                    self.publish_event("zone_transition", &detail);
                    self.state.active_zone = zone;
                }
                let (setpoint, measurement) = match self.fill_cfg.pid_variable {
                    ProcessVariable::Flow => (def.target_flow, flow),
                    ProcessVariable::Weight => (target, weight),
                };
                let out = self
                    .blender
                    .blend(zone, &def, &mut self.pid, setpoint, measurement, now);
                if let Err(e) = self.command(out) {
                    self.fault(e);
                }
            }
        }
    }

    fn tick_tuner(&mut self, weight: f32, now: Instant) {
        let status = self.tuner.tick(weight, now);
        self.state.tune_phase = self.tuner.phase();
        match status {
            TuneStatus::Running { output_pct } => {
                if let Err(e) = self.command(output_pct) {
                    self.fault(e);
                }
            }
            TuneStatus::Complete(res) => {
                if let Err(e) = self.command(0.0) {
                    return self.fault(e);
                }
                self.tune_result = Some(res);
                let detail = format!(
                    "ku={:.3} pu={:.3} kp={:.3} ki={:.3} kd={:.3}",
                    res.ultimate_gain, res.ultimate_period, res.gains.kp, res.gains.ki, res.gains.kd
                );
                self.publish_event("autotune_complete", &detail);
                self.transition(FillState::Idle);
            }
            TuneStatus::Failed(e) => {
                self.publish_event("autotune_failed", &e.to_string());
                self.fault(e);
            }
        }
    }

    fn complete_fill(&mut self, weight: f32, now: Instant) {
        // The fill only counts once the valve has accepted the close.
        if let Err(e) = self.command(0.0) {
            return self.fault(e);
        }
        let c = &mut self.state.counters;
        c.fill_number += 1;
        c.total_dispensed += weight;
        c.last_fill_error = None;
        let detail = format!(
            "fill={} target={:.1} actual={:.1} elapsed_ms={} error=none",
            c.fill_number, self.state.target_weight, weight, c.elapsed_ms
        );
        tracing::info!(
            fill = c.fill_number,
            target = self.state.target_weight,
            actual = weight,
            elapsed_ms = c.elapsed_ms,
            transitions = c.zone_transitions,
            "fill complete"
        );
        self.state.active_zone = Zone::Idle;
        self.completed_at = Some(now);
        self.publish_event("fill_complete", &detail);
        self.transition(FillState::Completed);
    }

    fn apply_cancel(&mut self) {
        match self.state.fill_state {
            FillState::SafetyCheck => {
                if let Some(il) = self.interlock.as_mut() {
                    il.cancel();
                }
            }
            FillState::Filling => {
                self.tuner.cancel();
                self.state.tune_phase = self.tuner.phase();
                self.publish_event("cancelled", "stopped by operator");
                self.finish_cancelled(FillError::Cancelled);
            }
            other => tracing::debug!(state = other.as_str(), "cancel request ignored"),
        }
    }

    fn fault(&mut self, e: FillError) {
        self.tuner.cancel();
        self.state.tune_phase = self.tuner.phase();
        self.hold_zero();
        tracing::error!(error = %e, state = self.state.fill_state.as_str(), "fault");
        self.publish_event("fault", &e.to_string());
        self.state.active_zone = Zone::Idle;
        self.state.counters.last_fill_error = Some(e.clone());
        self.state.error = Some(e);
        self.transition(FillState::Error);
    }

    fn finish_cancelled(&mut self, e: FillError) {
        self.hold_zero();
        tracing::warn!(reason = %e, "fill cancelled");
        self.state.active_zone = Zone::Idle;
        self.state.counters.last_fill_error = Some(e.clone());
        self.state.error = Some(e);
        self.transition(FillState::Cancelled);
    }

    // ── plumbing ─────────────────────────────────────────────────────────────

    fn begin_safety(&mut self, purpose: Purpose, request: &'static str) -> Result<()> {
        if self.state.fill_state != FillState::Idle {
            return Err(self.invalid(request));
        }
        // A press left over from before the sequence must not confirm stage 1,
        // and neither may a stop request raised while idle.
        let _ = self.button.pressed_edge();
        let _ = self.cancel.take();

        let now = self.clock.now();
        self.interlock = Some(SafetyInterlock::begin(self.safety_cfg, now));
        self.purpose = purpose;
        self.tune_result = None;
        self.state.error = None;
        self.state.safety_stage = SafetyStage::AirCheck;
        let detail = match purpose {
            Purpose::Fill => format!(
                "target={:.1} mode={}",
                self.state.target_weight,
                self.blender.mode().as_str()
            ),
            Purpose::AutoTune => "autotune".to_string(),
        };
        self.publish_event("fill_start", &detail);
        self.transition(FillState::SafetyCheck);
        self.sync_state();
        Ok(())
    }

    fn read_weight(&mut self) -> std::result::Result<f32, FillError> {
        match self.sensor.read() {
            Ok(w) if w.is_finite()
                && (self.fill_cfg.sensor_min..=self.fill_cfg.sensor_max).contains(&w) =>
            {
                self.state.scale_online = true;
                self.state.current_weight = w;
                Ok(w)
            }
            Ok(w) => {
                self.state.scale_online = true;
                Err(FillError::SensorOutOfRange(w))
            }
            Err(e) => {
                if self.state.scale_online {
                    tracing::warn!(error = %e, "weight sensor went offline");
                }
                self.state.scale_online = false;
                Err(map_sensor_error(&*e))
            }
        }
    }

    fn command(&mut self, pct: f32) -> std::result::Result<(), FillError> {
        match self.actuator.set_percent(pct) {
            Ok(()) => {
                self.state.pressure_setpoint_pct = pct;
                self.actuator_zeroed = pct <= 0.0;
                Ok(())
            }
            Err(e) => {
                self.actuator_zeroed = false;
                Err(map_actuator_error(&*e))
            }
        }
    }

    /// Drive the actuator to 0 % unless it is already there.
    fn hold_zero(&mut self) {
        if self.actuator_zeroed {
            return;
        }
        if let Err(e) = self.command(0.0) {
            tracing::error!(error = %e, "failed to zero actuator");
        }
    }

    fn transition(&mut self, to: FillState) {
        let from = self.state.fill_state;
        if from != to {
            tracing::info!(from = from.as_str(), to = to.as_str(), "state transition");
            self.state.fill_state = to;
        }
    }

    fn invalid(&self, request: &'static str) -> eyre::Report {
        eyre::Report::new(FillError::InvalidModeTransition {
            state: self.state.fill_state.as_str(),
            request,
        })
    }

    fn sync_state(&mut self) {
        self.state.pid_gains = Some(self.pid.gains());
        self.state.pid_integral = self.pid.integral();
        self.state.pid_prev_measurement = self.pid.prev_measurement();
        self.state.pid_last_tick = self.pid.last_tick();
        self.state.tune_phase = self.tuner.phase();
        self.state.mode = self.blender.mode();
    }

    fn publish_event(&mut self, kind: &str, detail: &str) {
        if let Err(e) = self.sink.publish_event(kind, detail) {
            tracing::warn!(error = %e, kind, "event publish failed");
        }
    }

    fn publish_status(&mut self, now: Instant, changed: bool) {
        let interval_ms = if self.state.fill_state == FillState::Filling {
            self.control_cfg.status_filling_ms
        } else {
            self.control_cfg.status_idle_ms
        };
        let due = self.last_status_publish.is_none_or(|t| {
            now.saturating_duration_since(t) >= Duration::from_millis(interval_ms)
        });
        if !(changed || due) {
            return;
        }
        let snap = self.snapshot();
        if let Err(e) = self.sink.publish_status(&snap) {
            tracing::warn!(error = %e, "status publish failed");
        }
        self.last_status_publish = Some(now);
    }
}
