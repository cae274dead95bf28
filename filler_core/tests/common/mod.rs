#![allow(dead_code)]

use std::sync::Arc;

use filler_core::mocks::{PressButton, RecordingActuator, RecordingSink, SharedSensor};
use filler_core::{DynFillSupervisor, FillCfg, FillState};
use filler_traits::ManualClock;

/// Supervisor wired to shared-handle mocks and a manual clock.
pub struct Rig {
    pub sup: DynFillSupervisor,
    pub sensor: SharedSensor,
    pub valve: RecordingActuator,
    pub button: PressButton,
    pub sink: RecordingSink,
    pub clock: ManualClock,
}

pub fn rig(fill: FillCfg) -> Rig {
    let sensor = SharedSensor::new(0.0);
    let valve = RecordingActuator::default();
    let button = PressButton::default();
    let sink = RecordingSink::default();
    let clock = ManualClock::new();
    let sup = DynFillSupervisor::builder()
        .with_sensor(sensor.clone())
        .with_actuator(valve.clone())
        .with_button(button.clone())
        .with_fill(fill)
        .with_sink(sink.clone())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .expect("valid rig");
    Rig {
        sup,
        sensor,
        valve,
        button,
        sink,
        clock,
    }
}

impl Rig {
    /// Advance by `ms` and run one tick.
    pub fn step(&mut self, ms: u64) -> FillState {
        self.clock.advance_ms(ms);
        self.sup.tick()
    }

    /// Confirm all four safety stages, one press per tick.
    pub fn confirm_all(&mut self) {
        for _ in 0..4 {
            self.button.press();
            self.sup.tick();
        }
    }

    /// Start a fill at `target` and walk through the interlock.
    pub fn start_filling(&mut self, target: f32) {
        self.sup.set_target(target).expect("target in range");
        self.sup.request_start().expect("idle");
        self.confirm_all();
        assert_eq!(self.sup.fill_state(), FillState::Filling);
    }
}
