use std::io::Cursor;
use std::sync::Arc;

use filler_hardware::error::HwError;
use filler_hardware::{LineScale, SimCfg, SimPlant};
use filler_traits::{ActuatorOutput, Clock, ManualClock, WeightSensor};
use rstest::rstest;

#[rstest]
#[case(100.0, 10_000, 40.0)]
#[case(25.0, 4_000, 4.0)]
#[case(0.0, 60_000, 0.0)]
fn delivered_mass_matches_pressure_and_time(
    #[case] pressure: f32,
    #[case] ms: u64,
    #[case] expected: f32,
) {
    let clock = ManualClock::new();
    let plant = SimPlant::new(SimCfg::default(), Arc::new(clock.clone()));
    let mut valve = plant.valve();
    let mut scale = plant.scale();

    valve.set_percent(pressure).unwrap();
    // Poll in 100 ms steps like the control loop would.
    for _ in 0..ms / 100 {
        clock.sleep(std::time::Duration::from_millis(100));
        scale.read().unwrap();
    }
    assert!((scale.read().unwrap() - expected).abs() < 1e-2);
}

#[test]
fn parts_share_one_plant() {
    let clock = ManualClock::new();
    let plant = SimPlant::new(
        SimCfg {
            initial_weight: 12.5,
            ..SimCfg::default()
        },
        Arc::new(clock),
    );
    let mut a = plant.scale();
    let mut b = plant.clone().scale();
    assert_eq!(a.read().unwrap(), 12.5);
    assert_eq!(b.read().unwrap(), 12.5);
}

#[test]
fn line_scale_reports_every_reading_then_disconnects() {
    let feed = "WT:+000.00 LBS\r\nWT:+001.25 LBS\r\nWT:+999.00 LBS\r\n";
    let mut scale = LineScale::new(Cursor::new(feed));
    assert_eq!(scale.read().unwrap(), 0.0);
    assert_eq!(scale.read().unwrap(), 1.25);
    let e = scale.read().unwrap_err();
    assert!(matches!(e.downcast_ref::<HwError>(), Some(HwError::OutOfRange(_))));
    let e = scale.read().unwrap_err();
    assert!(matches!(e.downcast_ref::<HwError>(), Some(HwError::Disconnected)));
}
