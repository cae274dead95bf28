use filler_core::error::BuildError;
use filler_core::mocks::{PressButton, RecordingActuator, SharedSensor};
use filler_core::{
    AutoTuneCfg, ControlCfg, DynFillSupervisor, FillCfg, PidCfg, PidGains, SafetyCfg, SupervisorCfg,
    build_supervisor,
};
use filler_traits::{BoxError, ParameterStore, StoredGains};
use rstest::rstest;

#[rstest]
fn builder_missing_sensor_yields_typed_build_error() {
    let err = DynFillSupervisor::builder()
        .with_actuator(RecordingActuator::default())
        .with_button(PressButton::default())
        .try_build()
        .expect_err("should fail with MissingSensor");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingSensor) => {}
        other => panic!("expected MissingSensor, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_actuator_yields_typed_build_error() {
    let err = DynFillSupervisor::builder()
        .with_sensor(SharedSensor::new(0.0))
        .with_button(PressButton::default())
        .try_build()
        .expect_err("should fail with MissingActuator");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingActuator)
    ));
}

#[rstest]
fn builder_missing_button_yields_typed_build_error() {
    let err = DynFillSupervisor::builder()
        .with_sensor(SharedSensor::new(0.0))
        .with_actuator(RecordingActuator::default())
        .try_build()
        .expect_err("should fail with MissingButton");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingButton)
    ));
}

fn with_cfg(cfg: SupervisorCfg) -> filler_core::Result<()> {
    build_supervisor(
        SharedSensor::new(0.0),
        RecordingActuator::default(),
        PressButton::default(),
        cfg,
        None,
        None,
    )
    .map(|_| ())
}

#[rstest]
#[case::negative_gain(SupervisorCfg {
    pid: PidCfg { gains: PidGains { kp: -1.0, ki: 0.0, kd: 0.0 }, ..PidCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::inverted_output(SupervisorCfg {
    pid: PidCfg { output_min: 80.0, output_max: 20.0, ..PidCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::zero_step(SupervisorCfg {
    autotune: AutoTuneCfg { step_pct: 0.0, ..AutoTuneCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::center_outside_range(SupervisorCfg {
    autotune: AutoTuneCfg { center_pct: 120.0, ..AutoTuneCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::too_many_oscillations(SupervisorCfg {
    autotune: AutoTuneCfg { min_oscillations: 10, ..AutoTuneCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::zero_stage_timeout(SupervisorCfg {
    safety: SafetyCfg { stage_timeout_ms: 0 },
    ..SupervisorCfg::default()
})]
#[case::default_target_outside_bounds(SupervisorCfg {
    fill: FillCfg { default_target: 400.0, ..FillCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::nan_alpha(SupervisorCfg {
    fill: FillCfg { flow_alpha: f32::NAN, ..FillCfg::default() },
    ..SupervisorCfg::default()
})]
#[case::zero_tick(SupervisorCfg {
    control: ControlCfg { tick_ms: 0, ..ControlCfg::default() },
    ..SupervisorCfg::default()
})]
fn invalid_config_is_rejected(#[case] cfg: SupervisorCfg) {
    let err = with_cfg(cfg).expect_err("config should be rejected");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[test]
fn defaults_build() {
    with_cfg(SupervisorCfg::default()).unwrap();
}

struct FixedStore(Result<Option<StoredGains>, &'static str>);

impl ParameterStore for FixedStore {
    fn load_pid(&self) -> Result<Option<StoredGains>, BoxError> {
        self.0.map_err(Into::into)
    }

    fn save_pid(&mut self, _gains: &StoredGains) -> Result<(), BoxError> {
        Ok(())
    }
}

fn built_with(store: &FixedStore) -> PidGains {
    DynFillSupervisor::builder()
        .with_sensor(SharedSensor::new(0.0))
        .with_actuator(RecordingActuator::default())
        .with_button(PressButton::default())
        .with_parameter_store(store)
        .build()
        .unwrap()
        .pid_gains()
}

#[rstest]
#[case::empty(FixedStore(Ok(None)))]
#[case::unreadable(FixedStore(Err("disk gone")))]
#[case::not_finite(FixedStore(Ok(Some(StoredGains { kp: f32::NAN, ki: 0.1, kd: 0.0 }))))]
fn store_problems_fall_back_to_configured_gains(#[case] store: FixedStore) {
    assert_eq!(built_with(&store), PidCfg::default().gains);
}

#[test]
fn stored_gains_override_configured_ones() {
    let g = StoredGains {
        kp: 3.0,
        ki: 0.6,
        kd: 3.8,
    };
    let got = built_with(&FixedStore(Ok(Some(g))));
    assert_eq!(got, PidGains::from(g));
}
