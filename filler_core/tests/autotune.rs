mod common;

use std::sync::Arc;

use common::{Rig, rig};
use filler_core::mocks::{PressButton, RecordingActuator, RecordingSink, SharedSensor};
use filler_core::{AutoTuneCfg, DynFillSupervisor, FillCfg, FillError, FillState, TunePhase};
use filler_traits::{BoxError, ManualClock, ParameterStore, StoredGains};

/// Piecewise-linear weight trace: peaks of 30/35/30/35 at 5/15/25/35 s.
const TRACE: [(f32, f32); 9] = [
    (1.0, 20.0),
    (5.0, 30.0),
    (10.0, 20.0),
    (15.0, 35.0),
    (20.0, 20.0),
    (25.0, 30.0),
    (30.0, 20.0),
    (35.0, 35.0),
    (40.0, 20.0),
];

fn trace_at(t: f32) -> f32 {
    if t < TRACE[0].0 {
        return 0.0;
    }
    for w in TRACE.windows(2) {
        let ((t0, v0), (t1, v1)) = (w[0], w[1]);
        if t <= t1 {
            return v0 + (v1 - v0) * (t - t0) / (t1 - t0);
        }
    }
    TRACE[TRACE.len() - 1].1
}

/// Start a tune, confirm the interlock, then feed the trace once per second
/// until the supervisor leaves Filling.
fn run_trace(r: &mut Rig) -> FillState {
    r.sup.request_autotune().unwrap();
    r.confirm_all();
    assert_eq!(r.sup.fill_state(), FillState::Filling);

    for k in 0..60u16 {
        r.sensor.set(trace_at(f32::from(k)));
        let st = r.sup.tick();
        if st != FillState::Filling {
            return st;
        }
        r.clock.advance_ms(1_000);
    }
    r.sup.fill_state()
}

#[test]
fn relay_trace_yields_ziegler_nichols_gains() {
    let mut r = rig(FillCfg::default());
    assert_eq!(run_trace(&mut r), FillState::Idle);

    let res = r.sup.take_tune_result().expect("tune result");
    assert!((res.ultimate_gain - 5.093).abs() < 1e-3, "ku = {}", res.ultimate_gain);
    assert!((res.ultimate_period - 10.0).abs() < 1e-4);
    assert!((res.gains.kp - 3.056).abs() < 1e-2);
    assert!((res.gains.ki - 0.611).abs() < 1e-3);
    assert!((res.gains.kd - 3.82).abs() < 1e-2);
    assert!(r.sup.take_tune_result().is_none());

    assert_eq!(r.valve.last(), Some(0.0));
    assert_eq!(r.sup.state().tune_phase, TunePhase::Complete);
    let kinds = r.sink.event_kinds();
    assert_eq!(kinds.first().map(String::as_str), Some("fill_start"));
    assert_eq!(kinds.last().map(String::as_str), Some("autotune_complete"));

    // Gains are only applied on request.
    assert_eq!(r.sup.pid_gains().kp, 2.0);
    r.sup.apply_gains(res.gains).unwrap();
    assert_eq!(r.sup.pid_gains(), res.gains);
}

#[test]
fn valve_refusing_to_close_after_tune_is_a_fault() {
    let mut r = rig(FillCfg::default());
    r.sup.request_autotune().unwrap();
    r.confirm_all();

    let mut st = FillState::Filling;
    for k in 0..60u16 {
        if r.sup.state().tune_phase == TunePhase::Calculating {
            r.valve.set_failing(true);
        }
        r.sensor.set(trace_at(f32::from(k)));
        st = r.sup.tick();
        if st != FillState::Filling {
            break;
        }
        r.clock.advance_ms(1_000);
    }

    assert_eq!(st, FillState::Error);
    assert!(matches!(r.sup.state().error, Some(FillError::ActuatorFault(_))));
    assert!(r.sup.take_tune_result().is_none());
    assert!(!r.sink.event_kinds().contains(&"autotune_complete".to_string()));
}

/// Relay at 90 ± 20 is clamped to 100/70, so the gain uses a 15 % half-swing.
#[test]
fn clamped_relay_uses_the_effective_swing() {
    let sensor = SharedSensor::new(0.0);
    let valve = RecordingActuator::default();
    let button = PressButton::default();
    let sink = RecordingSink::default();
    let clock = ManualClock::new();
    let sup = DynFillSupervisor::builder()
        .with_sensor(sensor.clone())
        .with_actuator(valve.clone())
        .with_button(button.clone())
        .with_autotune(AutoTuneCfg {
            center_pct: 90.0,
            step_pct: 20.0,
            ..AutoTuneCfg::default()
        })
        .with_sink(sink.clone())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let mut r = Rig {
        sup,
        sensor,
        valve,
        button,
        sink,
        clock,
    };

    assert_eq!(run_trace(&mut r), FillState::Idle);
    let res = r.sup.take_tune_result().expect("tune result");
    // 4·15 / (π·5)
    assert!((res.ultimate_gain - 3.820).abs() < 1e-3, "ku = {}", res.ultimate_gain);
    assert!(r.valve.commands().contains(&100.0));
    assert!(r.valve.commands().contains(&70.0));
}

#[test]
fn relay_commands_alternate_between_levels() {
    let mut r = rig(FillCfg::default());
    run_trace(&mut r);
    let cmds = r.valve.commands();
    assert!(cmds.contains(&70.0));
    assert!(cmds.contains(&30.0));
    assert!(cmds.iter().all(|&c| c == 0.0 || c == 30.0 || c == 70.0));
}

#[test]
fn tune_timeout_is_an_error_and_keeps_gains() {
    let mut r = rig(FillCfg::default());
    r.sup.request_autotune().unwrap();
    r.confirm_all();
    r.sensor.set(0.0);
    r.sup.tick();
    // Never rises enough to leave settling.
    let st = r.step(120_001);
    assert_eq!(st, FillState::Error);
    assert_eq!(r.sup.state().error, Some(FillError::AutoTuneTimeout));
    assert_eq!(r.sup.state().tune_phase, TunePhase::Timeout);
    assert_eq!(r.sup.pid_gains().kp, 2.0);
    assert!(r.sink.event_kinds().contains(&"autotune_failed".to_string()));

    r.sup.request_reset().unwrap();
    assert_eq!(r.sup.fill_state(), FillState::Idle);
}

#[test]
fn cancelling_a_tune_discards_it() {
    let mut r = rig(FillCfg::default());
    r.sup.request_autotune().unwrap();
    r.confirm_all();
    r.sensor.set(10.0);
    r.step(1_000);
    r.sup.request_cancel();
    assert_eq!(r.step(1_000), FillState::Cancelled);
    assert_eq!(r.sup.state().error, Some(FillError::Cancelled));
    assert_eq!(r.sup.state().tune_phase, TunePhase::Cancelled);
    assert!(r.sup.take_tune_result().is_none());
    assert_eq!(r.valve.last(), Some(0.0));
}

#[test]
fn autotune_needs_idle() {
    let mut r = rig(FillCfg::default());
    r.start_filling(100.0);
    let e = r.sup.request_autotune().unwrap_err();
    assert!(matches!(
        e.downcast_ref::<FillError>(),
        Some(FillError::InvalidModeTransition { .. })
    ));
}

#[test]
fn gains_cannot_change_mid_fill() {
    let mut r = rig(FillCfg::default());
    r.start_filling(100.0);
    let g = r.sup.pid_gains().scaled(2.0);
    assert!(r.sup.apply_gains(g).is_err());
}

/// Store that keeps gains in memory.
#[derive(Default)]
struct MemStore(Option<StoredGains>);

impl ParameterStore for MemStore {
    fn load_pid(&self) -> Result<Option<StoredGains>, BoxError> {
        Ok(self.0)
    }

    fn save_pid(&mut self, gains: &StoredGains) -> Result<(), BoxError> {
        self.0 = Some(*gains);
        Ok(())
    }
}

#[test]
fn tuned_gains_survive_a_restart_through_the_store() {
    let mut r = rig(FillCfg::default());
    run_trace(&mut r);
    let res = r.sup.take_tune_result().unwrap();
    let mut store = MemStore::default();
    store.save_pid(&res.gains.into()).unwrap();

    let restarted = filler_core::DynFillSupervisor::builder()
        .with_sensor(filler_core::mocks::SharedSensor::new(0.0))
        .with_actuator(filler_core::mocks::RecordingActuator::default())
        .with_button(filler_core::mocks::PressButton::default())
        .with_parameter_store(&store)
        .build()
        .unwrap();
    assert_eq!(restarted.pid_gains(), res.gains);
}
