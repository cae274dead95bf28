//! Rig assembly and the `fill` / `autotune` / `self-check` commands.
//!
//! The rig is the simulated plant wired into a `FillSupervisor` the same
//! way real hardware would be: scale (optionally behind the sampler thread),
//! pressure valve, feedback contact, confirm button, telemetry publisher and
//! gain store.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{Result, WrapErr};
use filler_config::{Config, FileParameterStore, ZoneRow};
use filler_core::debounce::LatchedButton;
use filler_core::sampler::{SampledSensor, Sampler, stale_threshold_ms};
use filler_core::telemetry::{Telemetry, TelemetryPublisher};
use filler_core::{
    ControlClock, ControlMode, DynFillSupervisor, FillState, FillSupervisor, FillSupervisorBuilder,
    Set, SupervisorCfg, run_autotune, run_fill,
};
use filler_hardware::{LineScale, SimButton, SimCfg, SimPlant};
use filler_traits::{
    ActuatorOutput, Clock, FeedbackInput, ManualClock, MonotonicClock, ParameterStore, StoredGains,
    WeightSensor,
};

pub struct Rig {
    pub sup: DynFillSupervisor,
    pub plant: SimPlant,
    // Joined on drop, after the supervisor's sink is gone.
    _telemetry: Option<TelemetryPublisher>,
}

fn log_telemetry(msg: &Telemetry) {
    match msg {
        Telemetry::Event { kind, detail } => {
            tracing::info!(target: "filler::telemetry", kind = %kind, detail = %detail, "event");
        }
        Telemetry::Status(s) => tracing::debug!(
            target: "filler::telemetry",
            state = %s.state.fill_state,
            weight = s.state.current_weight,
            pressure = s.state.pressure_setpoint_pct,
            headline = %s.headline(),
            "status"
        ),
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Wire the simulated plant into a supervisor according to `cfg`.
pub fn assemble(cfg: &Config, zones: &[ZoneRow]) -> Result<Rig> {
    let sim = &cfg.simulation;
    let clock: Arc<dyn Clock + Send + Sync> = if sim.virtual_time {
        Arc::new(ManualClock::new())
    } else {
        Arc::new(MonotonicClock::new())
    };
    let plant = SimPlant::new(
        SimCfg {
            flow_per_sec_at_full: sim.flow_per_sec_at_full,
            wobble_amplitude: sim.wobble_amplitude,
            wobble_period_ms: sim.wobble_period_ms,
            fail_after_reads: sim.fail_after_reads,
            initial_weight: 0.0,
        },
        Arc::clone(&clock),
    );

    let mut button = SimButton::new(sim.auto_confirm);
    if !sim.auto_confirm {
        let handle = button.handle();
        tracing::info!("press Enter to confirm each safety prompt");
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
                handle.press();
            }
        });
    }

    let rt = SupervisorCfg::from_config(cfg, zones).wrap_err("invalid configuration")?;
    let mut builder = FillSupervisor::builder()
        .with_pid(rt.pid)
        .with_zones(rt.zones)
        .with_safety(rt.safety)
        .with_autotune(rt.autotune)
        .with_fill(rt.fill)
        .with_control(rt.control)
        .with_feedback(plant.feedback())
        .with_clock(Arc::clone(&clock));

    if let Some(path) = cfg.store.path.as_deref() {
        builder = builder.with_parameter_store(&FileParameterStore::new(path));
    }

    let telemetry = if cfg.telemetry.enabled {
        let (publisher, sink) =
            TelemetryPublisher::spawn(cfg.telemetry.queue_capacity, log_telemetry);
        builder = builder.with_sink(sink);
        Some(publisher)
    } else {
        None
    };

    let builder = builder
        .with_actuator(plant.valve())
        .with_button(LatchedButton::new(move || button.is_pressed()));

    // A virtual clock never sleeps, so the sampler thread could not keep pace.
    let sup = if cfg.sensor.sampled && !sim.virtual_time {
        let hz = cfg.sensor.sample_hz;
        let sampler = Sampler::spawn(plant.scale(), hz, MonotonicClock::new());
        let stale = stale_threshold_ms(cfg.sensor.stale_ms, hz);
        tracing::info!(hz, stale_ms = stale, "sampler started");
        finish(builder.with_sensor(SampledSensor::new(sampler, MonotonicClock::new(), stale)))?
    } else {
        finish(builder.with_sensor(plant.scale()))?
    };

    Ok(Rig {
        sup,
        plant,
        _telemetry: telemetry,
    })
}

fn finish(builder: FillSupervisorBuilder<Set, Set, Set>) -> Result<DynFillSupervisor> {
    builder.build().wrap_err("building fill supervisor")
}

/// Route Ctrl-C to the supervisor's cancel flag.
fn install_cancel(sup: &DynFillSupervisor) -> Result<()> {
    let cancel = sup.cancel_handle();
    ctrlc::set_handler(move || {
        tracing::warn!("stop requested");
        cancel.cancel();
    })
    .wrap_err("installing Ctrl-C handler")
}

/// Tick through the Completed hold until the supervisor is Idle again.
fn settle_to_idle(sup: &mut DynFillSupervisor) {
    let clock = sup.clock();
    let mut pacer = ControlClock::from_tick_ms(sup.control_cfg().tick_ms);
    while sup.tick() == FillState::Completed {
        pacer.wait(&*clock);
    }
}

pub fn fill_cmd(
    cfg: &Config,
    zones: &[ZoneRow],
    target: Option<f32>,
    mode: Option<ControlMode>,
    count: u32,
    json: bool,
) -> Result<()> {
    let mut rig = assemble(cfg, zones)?;
    install_cancel(&rig.sup)?;
    if let Some(m) = mode {
        rig.sup.set_mode(m)?;
    }
    let target = target.unwrap_or(cfg.fill.default_target);

    for i in 0..count.max(1) {
        if i > 0 {
            settle_to_idle(&mut rig.sup);
            rig.plant.replace_container();
        }
        let outcome = run_fill(&mut rig.sup, target)?;
        let s = rig.sup.state();
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "timestamp": unix_ms(),
                    "fill_number": outcome.fill_number,
                    "mode": s.mode.as_str(),
                    "target": outcome.target,
                    "actual": outcome.actual,
                    "elapsed_ms": outcome.elapsed_ms,
                    "zone_transitions": outcome.zone_transitions,
                    "total_dispensed": s.counters.total_dispensed,
                })
            );
        } else {
            println!(
                "fill #{} complete: {:.2} / {:.2} in {:.1}s ({} zone transitions, mode {})",
                outcome.fill_number,
                outcome.actual,
                outcome.target,
                outcome.elapsed_ms as f64 / 1000.0,
                outcome.zone_transitions,
                s.mode.as_str(),
            );
        }
    }
    Ok(())
}

pub fn autotune_cmd(cfg: &Config, zones: &[ZoneRow], save: bool, json: bool) -> Result<()> {
    let mut rig = assemble(cfg, zones)?;
    install_cancel(&rig.sup)?;
    let res = run_autotune(&mut rig.sup)?;
    rig.sup.apply_gains(res.gains)?;

    let saved_to = if save {
        let path = cfg
            .store
            .path
            .as_deref()
            .ok_or_else(|| eyre::eyre!("--save needs store.path in the config"))?;
        let mut store = FileParameterStore::new(path);
        store
            .save_pid(&StoredGains::from(res.gains))
            .map_err(|e| eyre::eyre!(e))
            .wrap_err_with(|| format!("saving gains to {path}"))?;
        tracing::info!(path, "pid gains saved");
        Some(path)
    } else {
        None
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "timestamp": unix_ms(),
                "ultimate_gain": res.ultimate_gain,
                "ultimate_period_s": res.ultimate_period,
                "kp": res.gains.kp,
                "ki": res.gains.ki,
                "kd": res.gains.kd,
                "saved_to": saved_to,
            })
        );
    } else {
        println!(
            "auto-tune complete: Ku={:.3} Pu={:.2}s -> kp={:.3} ki={:.3} kd={:.3}",
            res.ultimate_gain, res.ultimate_period, res.gains.kp, res.gains.ki, res.gains.kd
        );
        if let Some(p) = saved_to {
            println!("gains saved to {p}");
        }
    }
    Ok(())
}

fn read_serial_scale(device: &Path) -> Result<f32> {
    let file = std::fs::File::open(device)
        .wrap_err_with(|| format!("open scale device {}", device.display()))?;
    let mut scale = LineScale::new(std::io::BufReader::new(file));
    scale
        .read_weight()
        .wrap_err_with(|| format!("read scale device {}", device.display()))
}

pub fn self_check_cmd(cfg: &Config, zones: &[ZoneRow], scale_device: Option<&Path>) -> Result<()> {
    let rig = assemble(cfg, zones)?;
    let mut scale = rig.plant.scale();
    let weight = scale
        .read()
        .map_err(|e| eyre::eyre!(e))
        .wrap_err("reading simulated scale")?;
    let mut valve = rig.plant.valve();
    valve
        .set_percent(0.0)
        .map_err(|e| eyre::eyre!(e))
        .wrap_err("zeroing valve")?;
    let feedback = rig.plant.feedback().is_active();
    println!("scale: ok ({weight:.2})");
    println!("valve: ok");
    println!("feedback: {}", if feedback { "active" } else { "inactive" });

    if let Some(dev) = scale_device {
        let w = read_serial_scale(dev)?;
        println!("serial scale: ok ({w:.2})");
    }
    println!("state: {}", rig.sup.fill_state());
    println!("OK");
    Ok(())
}
