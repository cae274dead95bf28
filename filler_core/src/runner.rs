//! Fixed-period control loop around `FillSupervisor::tick`.
//!
//! The tick itself never sleeps; pacing happens here through the
//! supervisor's clock, so a virtual clock runs a whole fill instantly.

use std::time::{Duration, Instant};

use eyre::WrapErr;
use filler_traits::{ActuatorOutput, Clock, ConfirmButton, WeightSensor};

use crate::autotune::TuneResult;
use crate::error::{FillError, Result};
use crate::state::FillState;
use crate::supervisor::FillSupervisor;

/// Delay-until pacer for the control loop.
#[derive(Debug, Clone)]
pub struct ControlClock {
    period: Duration,
    next_deadline: Option<Instant>,
    overruns: u64,
}

impl ControlClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            next_deadline: None,
            overruns: 0,
        }
    }

    pub fn from_tick_ms(tick_ms: u64) -> Self {
        Self::new(Duration::from_millis(tick_ms))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks that started late because the previous one overran.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Sleep until the next deadline. A late caller is not made to catch up:
    /// the schedule re-anchors at `now`.
    pub fn wait<C: Clock + ?Sized>(&mut self, clock: &C) {
        let now = clock.now();
        let deadline = self.next_deadline.unwrap_or(now + self.period);
        if deadline > now {
            clock.sleep(deadline - now);
            self.next_deadline = Some(deadline + self.period);
        } else {
            self.overruns += 1;
            tracing::debug!(
                late_ms = u64::try_from((now - deadline).as_millis()).unwrap_or(u64::MAX),
                "control tick overran"
            );
            self.next_deadline = Some(now + self.period);
        }
    }
}

/// Summary of a completed fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillOutcome {
    pub fill_number: u32,
    pub target: f32,
    pub actual: f32,
    pub elapsed_ms: u64,
    pub zone_transitions: u32,
}

fn terminal_error<S, A, B>(sup: &FillSupervisor<S, A, B>) -> eyre::Report
where
    S: WeightSensor,
    A: ActuatorOutput,
    B: ConfirmButton,
{
    let e = sup.state().error.clone().unwrap_or(FillError::Cancelled);
    eyre::Report::new(e)
}

/// Run one fill from Idle to Completed.
///
/// Error and Cancelled end the run with the recorded `FillError`; the
/// supervisor stays in that state until the caller resets it.
pub fn run_fill<S, A, B>(sup: &mut FillSupervisor<S, A, B>, target: f32) -> Result<FillOutcome>
where
    S: WeightSensor,
    A: ActuatorOutput,
    B: ConfirmButton,
{
    sup.set_target(target).wrap_err("setting fill target")?;
    sup.request_start().wrap_err("starting fill")?;

    let clock = sup.clock();
    let mut pacer = ControlClock::from_tick_ms(sup.control_cfg().tick_ms);
    tracing::info!(target, mode = sup.state().mode.as_str(), "fill start");

    loop {
        match sup.tick() {
            FillState::Completed => {
                let s = sup.state();
                let outcome = FillOutcome {
                    fill_number: s.counters.fill_number,
                    target: s.target_weight,
                    actual: s.current_weight,
                    elapsed_ms: s.counters.elapsed_ms,
                    zone_transitions: s.counters.zone_transitions,
                };
                if pacer.overruns() > 0 {
                    tracing::warn!(overruns = pacer.overruns(), "control loop overran during fill");
                }
                return Ok(outcome);
            }
            FillState::Error | FillState::Cancelled => {
                let err = terminal_error(sup);
                tracing::error!(error = %err, "fill aborted");
                return Err(err);
            }
            FillState::Idle => eyre::bail!("fill returned to idle without completing"),
            FillState::SafetyCheck | FillState::Filling => {}
        }
        pacer.wait(&*clock);
    }
}

/// Run a relay auto-tune session and hand back the identified gains.
///
/// The gains are not applied; the caller decides whether to keep them.
pub fn run_autotune<S, A, B>(sup: &mut FillSupervisor<S, A, B>) -> Result<TuneResult>
where
    S: WeightSensor,
    A: ActuatorOutput,
    B: ConfirmButton,
{
    sup.request_autotune().wrap_err("starting auto-tune")?;

    let clock = sup.clock();
    let mut pacer = ControlClock::from_tick_ms(sup.control_cfg().tick_ms);
    tracing::info!("auto-tune start");

    loop {
        match sup.tick() {
            FillState::Idle => {
                return sup
                    .take_tune_result()
                    .ok_or_else(|| eyre::eyre!("auto-tune ended without a result"));
            }
            FillState::Error | FillState::Cancelled => {
                let err = terminal_error(sup);
                tracing::error!(error = %err, "auto-tune aborted");
                return Err(err);
            }
            FillState::Completed => eyre::bail!("auto-tune ended in a fill completion"),
            FillState::SafetyCheck | FillState::Filling => {}
        }
        pacer.wait(&*clock);
    }
}
