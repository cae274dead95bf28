mod common;

use std::sync::Arc;

use common::rig;
use filler_core::mocks::{FailingSink, RecordingActuator, RecordingSink};
use filler_core::{
    ControlMode, DynFillSupervisor, FillCfg, FillState, ProcessVariable, Zone, ZoneSchedule, run_fill,
};
use filler_traits::{BoxError, Clock, ConfirmButton, ManualClock, WeightSensor};

fn zone_only() -> FillCfg {
    FillCfg {
        mode: ControlMode::ZoneOnly,
        ..FillCfg::default()
    }
}

#[test]
fn zone_only_fill_walks_every_zone_and_completes() {
    let mut r = rig(zone_only());
    r.start_filling(200.0);

    let steps = [
        (0.0, Zone::Fast, 100.0),
        (100.0, Zone::Moderate, 70.0),
        (150.0, Zone::Slow, 40.0),
        (190.0, Zone::Fine, 20.0),
    ];
    for (weight, zone, cmd) in steps {
        r.sensor.set(weight);
        assert_eq!(r.step(100), FillState::Filling);
        assert_eq!(r.sup.state().active_zone, zone);
        assert_eq!(r.valve.last(), Some(cmd));
    }

    r.sensor.set(197.0);
    assert_eq!(r.step(100), FillState::Completed);
    assert_eq!(r.valve.last(), Some(0.0));

    let c = &r.sup.state().counters;
    assert_eq!(c.fill_number, 1);
    assert_eq!(c.zone_transitions, 4);
    assert!((c.total_dispensed - 197.0).abs() < 1e-4);
    assert!(c.last_fill_error.is_none());

    assert_eq!(
        r.sink.event_kinds(),
        vec![
            "fill_start",
            "zone_transition",
            "zone_transition",
            "zone_transition",
            "zone_transition",
            "fill_complete"
        ]
    );
    let (_, detail) = r.sink.events().pop().unwrap();
    assert!(detail.starts_with("fill=1 target=200.0 actual=197.0"), "{detail}");
}

#[test]
fn completed_returns_to_idle_after_hold() {
    let mut r = rig(zone_only());
    r.start_filling(100.0);
    r.sensor.set(99.0);
    assert_eq!(r.step(100), FillState::Completed);
    assert_eq!(r.step(1_000), FillState::Completed);
    assert_eq!(r.step(1_000), FillState::Idle);
    assert_eq!(r.sup.state().active_zone, Zone::Idle);
}

#[test]
fn actuator_is_zero_outside_filling() {
    let mut r = rig(zone_only());
    r.sup.tick();
    assert_eq!(r.valve.commands(), vec![0.0]);
    r.sup.request_start().unwrap();
    r.button.press();
    r.sup.tick();
    assert!(r.valve.commands().iter().all(|&c| c == 0.0));
}

#[test]
fn hybrid_output_stays_within_zone_band() {
    let mut r = rig(FillCfg {
        mode: ControlMode::Hybrid,
        pid_variable: ProcessVariable::Flow,
        ..FillCfg::default()
    });
    r.start_filling(200.0);
    let schedule = ZoneSchedule::default();

    let mut w = 0.0f32;
    while r.sup.fill_state() == FillState::Filling {
        r.sensor.set(w);
        if r.step(100) != FillState::Filling {
            break;
        }
        let zone = r.sup.state().active_zone;
        let def = schedule.definition(zone).unwrap();
        let out = r.valve.last().unwrap();
        let lo = (def.base_pressure_pct - def.pid_range_pct).max(0.0);
        let hi = (def.base_pressure_pct + def.pid_range_pct).min(100.0);
        assert!(out >= lo - 1e-4 && out <= hi + 1e-4, "{zone}: {out} not in [{lo}, {hi}]");
        w += 2.0;
    }
    assert_eq!(r.sup.fill_state(), FillState::Completed);
}

#[test]
fn pid_only_on_weight_drives_toward_target() {
    let mut r = rig(FillCfg {
        mode: ControlMode::PidOnly,
        pid_variable: ProcessVariable::Weight,
        ..FillCfg::default()
    });
    r.start_filling(200.0);
    r.sensor.set(0.0);
    r.step(100);
    r.step(100);
    // error of 200 with kp = 2 saturates the output
    assert_eq!(r.valve.last(), Some(100.0));

    let st = r.sup.state();
    assert_eq!(st.pid_last_tick, Some(r.clock.now()));
    assert_eq!(st.pid_prev_measurement, Some(0.0));
}

#[test]
fn mode_and_target_are_fixed_outside_idle() {
    let mut r = rig(zone_only());
    r.start_filling(150.0);
    let e = r.sup.set_mode(ControlMode::Hybrid).unwrap_err();
    assert!(e.to_string().contains("FILLING"), "{e}");
    assert!(r.sup.set_target(100.0).is_err());
    assert_eq!(r.sup.state().target_weight, 150.0);
}

#[test]
fn sink_failures_do_not_stop_the_fill() {
    let sensor = common_sensor();
    let valve = RecordingActuator::default();
    let clock = ManualClock::new();
    let mut sup = DynFillSupervisor::builder()
        .with_sensor(sensor)
        .with_actuator(valve.clone())
        .with_button(AlwaysConfirm)
        .with_fill(zone_only())
        .with_sink(FailingSink)
        .with_clock(Arc::new(clock))
        .build()
        .unwrap();
    let outcome = run_fill(&mut sup, 100.0).unwrap();
    assert_eq!(outcome.fill_number, 1);
    assert!(outcome.actual >= 98.0);
}

#[test]
fn run_fill_reports_outcome_on_virtual_time() {
    let sink = RecordingSink::default();
    let clock = ManualClock::new();
    let t0 = clock.origin();
    let mut sup = DynFillSupervisor::builder()
        .with_sensor(common_sensor())
        .with_actuator(RecordingActuator::default())
        .with_button(AlwaysConfirm)
        .with_fill(zone_only())
        .with_sink(sink.clone())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    let outcome = run_fill(&mut sup, 100.0).unwrap();
    assert_eq!(outcome.fill_number, 1);
    assert_eq!(outcome.target, 100.0);
    assert_eq!(outcome.zone_transitions, 4);
    assert!(outcome.elapsed_ms > 0);
    assert!(clock.ms_since(t0) >= outcome.elapsed_ms);
    assert_eq!(sink.event_kinds().last().map(String::as_str), Some("fill_complete"));
}

/// Weight rises by one unit per read.
struct Ramp(f32);

impl WeightSensor for Ramp {
    fn read(&mut self) -> Result<f32, BoxError> {
        self.0 += 1.0;
        Ok(self.0)
    }
}

fn common_sensor() -> Ramp {
    Ramp(0.0)
}

struct AlwaysConfirm;

impl ConfirmButton for AlwaysConfirm {
    fn pressed_edge(&mut self) -> bool {
        true
    }
}
