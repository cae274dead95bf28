#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema, zone-table CSV loader and gain persistence for the filler.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - The zone table may come from `[[zones]]` entries or a CSV file with a
//!   fixed header.
//! - `FileParameterStore` keeps tuned PID gains in a small TOML file.

use serde::Deserialize;

pub mod store;

pub use store::{FileParameterStore, write_atomic};

/// Zone table row.
///
/// CSV headers (exact):
/// end_percent,base_pressure_pct,pid_range_pct,gain_multiplier
///
/// `target_flow` is only available from TOML; rows without it use the
/// built-in flow setpoint for their position.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ZoneRow {
    pub end_percent: f32,
    pub base_pressure_pct: f32,
    pub pid_range_pct: f32,
    pub gain_multiplier: f32,
    #[serde(default)]
    pub target_flow: Option<f32>,
}

/// Flow setpoints (mass/s) for zones that do not specify one.
pub const DEFAULT_TARGET_FLOWS: [f32; 4] = [3.0, 2.0, 1.0, 0.3];

impl ZoneRow {
    /// Flow setpoint for the row at `index`.
    pub fn target_flow_or_default(&self, index: usize) -> f32 {
        self.target_flow.unwrap_or_else(|| {
            DEFAULT_TARGET_FLOWS
                .get(index)
                .copied()
                .unwrap_or(DEFAULT_TARGET_FLOWS[DEFAULT_TARGET_FLOWS.len() - 1])
        })
    }
}

fn default_zones() -> Vec<ZoneRow> {
    let row = |end_percent, base_pressure_pct, pid_range_pct, gain_multiplier| ZoneRow {
        end_percent,
        base_pressure_pct,
        pid_range_pct,
        gain_multiplier,
        target_flow: None,
    };
    vec![
        row(40.0, 100.0, 20.0, 1.5),
        row(70.0, 70.0, 15.0, 1.0),
        row(90.0, 40.0, 10.0, 0.75),
        row(98.0, 20.0, 5.0, 0.5),
    ]
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModeCfg {
    Zone,
    Pid,
    #[default]
    Hybrid,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessVariableCfg {
    #[default]
    Flow,
    Weight,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FillCfg {
    pub default_target: f32,
    pub min_target: f32,
    pub max_target: f32,
    /// Sane reading window; anything outside is a sensor fault.
    pub sensor_min: f32,
    pub sensor_max: f32,
    pub completed_hold_ms: u64,
    pub mode: ModeCfg,
    pub pid_variable: ProcessVariableCfg,
    /// EMA factor of the flow estimate, (0.0, 1.0].
    pub flow_alpha: f32,
}

impl Default for FillCfg {
    fn default() -> Self {
        Self {
            default_target: 200.0,
            min_target: 10.0,
            max_target: 250.0,
            sensor_min: -10.0,
            sensor_max: 500.0,
            completed_hold_ms: 2_000,
            mode: ModeCfg::Hybrid,
            pid_variable: ProcessVariableCfg::Flow,
            flow_alpha: 0.3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub integral_min: f32,
    pub integral_max: f32,
    pub output_min: f32,
    pub output_max: f32,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.5,
            kd: 0.1,
            integral_min: -50.0,
            integral_max: 50.0,
            output_min: 0.0,
            output_max: 100.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutoTuneCfg {
    pub center_pct: f32,
    /// Relay half-amplitude in percent
    pub step_pct: f32,
    pub min_oscillations: usize,
    pub timeout_ms: u64,
    /// Weight the relay switches around
    pub setpoint: f32,
    /// Weight that ends the relay test early
    pub test_target: f32,
    /// Rise over the first reading required before peaks are tracked
    pub settle_delta: f32,
}

impl Default for AutoTuneCfg {
    fn default() -> Self {
        Self {
            center_pct: 50.0,
            step_pct: 20.0,
            min_oscillations: 3,
            timeout_ms: 120_000,
            setpoint: 25.0,
            test_target: 50.0,
            settle_delta: 5.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SafetyCfg {
    /// Per-stage confirmation timeout
    pub stage_timeout_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    pub tick_ms: u64,
    pub status_filling_ms: u64,
    pub status_idle_ms: u64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            status_filling_ms: 5_000,
            status_idle_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorCfg {
    /// Read through a background sampler thread instead of inside the tick
    pub sampled: bool,
    pub sample_hz: u32,
    /// Age after which the last sample counts as missing
    pub stale_ms: u64,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            sampled: true,
            sample_hz: 20,
            stale_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryCfg {
    pub enabled: bool,
    /// Bounded queue between the control loop and the publisher thread
    pub queue_capacity: usize,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StoreCfg {
    /// TOML file holding tuned PID gains; absent means gains are not persisted
    pub path: Option<String>,
}

/// Simulated plant used when no hardware binding is present.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationCfg {
    /// Mass per second delivered at 100 % pressure
    pub flow_per_sec_at_full: f32,
    /// Confirm every safety stage automatically
    pub auto_confirm: bool,
    /// Run on a virtual clock that advances instead of sleeping
    pub virtual_time: bool,
    /// Make the scale fail after this many reads
    pub fail_after_reads: Option<u64>,
    /// Sinusoidal disturbance added to the reading
    pub wobble_amplitude: f32,
    pub wobble_period_ms: u64,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            flow_per_sec_at_full: 4.0,
            auto_confirm: true,
            virtual_time: false,
            fail_after_reads: None,
            wobble_amplitude: 0.0,
            wobble_period_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fill: FillCfg,
    #[serde(default)]
    pub pid: PidCfg,
    /// Zone table; ignored when `zones_csv` is set.
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneRow>,
    /// Optional CSV file with the zone table.
    #[serde(default)]
    pub zones_csv: Option<String>,
    #[serde(default)]
    pub autotune: AutoTuneCfg,
    #[serde(default)]
    pub safety: SafetyCfg,
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub sensor: SensorCfg,
    #[serde(default)]
    pub telemetry: TelemetryCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub simulation: SimulationCfg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fill: FillCfg::default(),
            pid: PidCfg::default(),
            zones: default_zones(),
            zones_csv: None,
            autotune: AutoTuneCfg::default(),
            safety: SafetyCfg::default(),
            control: ControlCfg::default(),
            sensor: SensorCfg::default(),
            telemetry: TelemetryCfg::default(),
            logging: Logging::default(),
            store: StoreCfg::default(),
            simulation: SimulationCfg::default(),
        }
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_zone_csv(path: &std::path::Path) -> eyre::Result<Vec<ZoneRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open zone CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = [
        "end_percent",
        "base_pressure_pct",
        "pid_range_pct",
        "gain_multiplier",
    ];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "zone CSV must have headers '{}', got: {}",
            expected.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ZoneRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }
    validate_zones(&rows)?;
    Ok(rows)
}

fn validate_zones(rows: &[ZoneRow]) -> eyre::Result<()> {
    if rows.is_empty() {
        eyre::bail!("zones must contain at least one row");
    }
    if rows.len() > 4 {
        eyre::bail!("zones must contain at most 4 rows, got {}", rows.len());
    }
    let mut prev = 0.0f32;
    for (i, z) in rows.iter().enumerate() {
        if !z.end_percent.is_finite() || z.end_percent <= prev {
            eyre::bail!("zones[{i}].end_percent must be strictly increasing and > 0");
        }
        prev = z.end_percent;
        if !(0.0..=100.0).contains(&z.base_pressure_pct) {
            eyre::bail!("zones[{i}].base_pressure_pct must be in [0, 100]");
        }
        if !(0.0..=100.0).contains(&z.pid_range_pct) {
            eyre::bail!("zones[{i}].pid_range_pct must be in [0, 100]");
        }
        if !(z.gain_multiplier.is_finite() && z.gain_multiplier > 0.0) {
            eyre::bail!("zones[{i}].gain_multiplier must be > 0");
        }
        if let Some(f) = z.target_flow
            && !(f.is_finite() && f >= 0.0)
        {
            eyre::bail!("zones[{i}].target_flow must be >= 0");
        }
    }
    if prev > 100.0 {
        eyre::bail!("zones: last end_percent must be <= 100");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Fill
        let f = &self.fill;
        if !(f.min_target > 0.0 && f.min_target <= f.max_target) {
            eyre::bail!("fill.min_target must be > 0 and <= fill.max_target");
        }
        if !(f.min_target..=f.max_target).contains(&f.default_target) {
            eyre::bail!("fill.default_target must be within [fill.min_target, fill.max_target]");
        }
        if f.sensor_min.is_nan() || f.sensor_max.is_nan() || f.sensor_min >= f.sensor_max {
            eyre::bail!("fill.sensor_min must be < fill.sensor_max");
        }
        if f.max_target > f.sensor_max {
            eyre::bail!("fill.max_target must not exceed fill.sensor_max");
        }
        if !(f.flow_alpha > 0.0 && f.flow_alpha <= 1.0) {
            eyre::bail!("fill.flow_alpha must be in (0.0, 1.0]");
        }
        if f.completed_hold_ms > 60 * 1000 {
            eyre::bail!("fill.completed_hold_ms is unreasonably large (>1min)");
        }

        // PID
        let p = &self.pid;
        for (name, v) in [("kp", p.kp), ("ki", p.ki), ("kd", p.kd)] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("pid.{name} must be finite and >= 0");
            }
        }
        if p.integral_min.is_nan() || p.integral_max.is_nan() || p.integral_min > p.integral_max {
            eyre::bail!("pid.integral_min must be <= pid.integral_max");
        }
        if p.output_min.is_nan() || p.output_max.is_nan() || p.output_min >= p.output_max {
            eyre::bail!("pid.output_min must be < pid.output_max");
        }
        if p.output_min < 0.0 || p.output_max > 100.0 {
            eyre::bail!("pid output bounds must lie within [0, 100]");
        }

        // Zones
        if self.zones_csv.is_none() {
            validate_zones(&self.zones)?;
        }

        // Auto-tune
        let t = &self.autotune;
        if !(0.0..=100.0).contains(&t.center_pct) {
            eyre::bail!("autotune.center_pct must be in [0, 100]");
        }
        if !(t.step_pct > 0.0 && t.step_pct <= 50.0) {
            eyre::bail!("autotune.step_pct must be in (0, 50]");
        }
        if t.min_oscillations == 0 || t.min_oscillations >= 10 {
            eyre::bail!("autotune.min_oscillations must be in [1, 9]");
        }
        if t.timeout_ms == 0 {
            eyre::bail!("autotune.timeout_ms must be >= 1");
        }
        if !t.settle_delta.is_finite() || t.settle_delta < 0.0 {
            eyre::bail!("autotune.settle_delta must be >= 0");
        }
        if t.setpoint.is_nan() || t.test_target.is_nan() || t.test_target <= t.setpoint {
            eyre::bail!("autotune.test_target must be > autotune.setpoint");
        }

        // Safety
        if self.safety.stage_timeout_ms == 0 {
            eyre::bail!("safety.stage_timeout_ms must be >= 1");
        }
        if self.safety.stage_timeout_ms > 10 * 60 * 1000 {
            eyre::bail!("safety.stage_timeout_ms is unreasonably large (>10min)");
        }

        // Control
        if self.control.tick_ms == 0 || self.control.tick_ms > 1_000 {
            eyre::bail!("control.tick_ms must be in [1, 1000]");
        }
        if self.control.status_filling_ms == 0 || self.control.status_idle_ms == 0 {
            eyre::bail!("control status intervals must be >= 1");
        }

        // Sensor
        if self.sensor.sample_hz == 0 {
            eyre::bail!("sensor.sample_hz must be > 0");
        }
        if self.sensor.stale_ms == 0 {
            eyre::bail!("sensor.stale_ms must be >= 1");
        }

        // Telemetry
        if self.telemetry.queue_capacity == 0 {
            eyre::bail!("telemetry.queue_capacity must be >= 1");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        // Simulation
        let s = &self.simulation;
        if !(s.flow_per_sec_at_full.is_finite() && s.flow_per_sec_at_full > 0.0) {
            eyre::bail!("simulation.flow_per_sec_at_full must be > 0");
        }
        if !s.wobble_amplitude.is_finite() || s.wobble_amplitude < 0.0 {
            eyre::bail!("simulation.wobble_amplitude must be >= 0");
        }
        if s.wobble_period_ms == 0 {
            eyre::bail!("simulation.wobble_period_ms must be >= 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_toml("").expect("parse");
        assert_eq!(cfg.zones.len(), 4);
        assert_eq!(cfg.fill.mode, ModeCfg::Hybrid);
        assert_eq!(cfg.autotune.timeout_ms, 120_000);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn target_flow_falls_back_by_position() {
        let rows = default_zones();
        assert_eq!(rows[0].target_flow_or_default(0), 3.0);
        assert_eq!(rows[3].target_flow_or_default(3), 0.3);
        let custom = ZoneRow {
            target_flow: Some(1.25),
            ..rows[1]
        };
        assert_eq!(custom.target_flow_or_default(1), 1.25);
    }
}
