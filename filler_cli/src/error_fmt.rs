//! Human-readable error descriptions and structured JSON error formatting.

use filler_core::error::{BuildError, FillError};

const ZONE_CSV_HEADER: &str = "end_percent,base_pressure_pct,pid_range_pct,gain_multiplier";

/// Innermost message of the error chain.
fn root_cause(err: &eyre::Report) -> String {
    err.chain()
        .last()
        .map_or_else(|| err.to_string(), ToString::to_string)
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => {
                "What happened: No weight sensor was provided to the fill controller.\nLikely causes: The scale failed to initialize or was not wired into the builder.\nHow to fix: Ensure the scale is created successfully and passed via with_sensor(...).".to_string()
            }
            BuildError::MissingActuator => {
                "What happened: No pressure actuator was provided to the fill controller.\nLikely causes: The valve driver failed to initialize or was not wired into the builder.\nHow to fix: Ensure the valve is created successfully and passed via with_actuator(...).".to_string()
            }
            BuildError::MissingButton => {
                "What happened: No confirm button was provided to the fill controller.\nLikely causes: The operator input was not wired into the builder.\nHow to fix: Pass the button via with_button(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/filler_config.toml for a sample."
            ),
        };
    }

    if let Some(fe) = err.downcast_ref::<FillError>() {
        return match fe {
            FillError::SensorUnavailable(_) => "What happened: The weight sensor stopped answering.\nLikely causes: Scale unplugged, serial line down, or sampler readings went stale.\nHow to fix: Check the scale connection and power; raise sensor.stale_ms if the scale is slow.".to_string(),
            FillError::SensorOutOfRange(w) => format!(
                "What happened: The scale reported {w}, outside the sane range.\nLikely causes: Scale not tared, overloaded, or a corrupted reading.\nHow to fix: Tare the scale and check fill.sensor_min/fill.sensor_max."
            ),
            FillError::ActuatorFault(_) => "What happened: The pressure actuator rejected a command.\nLikely causes: Regulator driver fault or wiring problem.\nHow to fix: Check the regulator and its driver, then reset and retry.".to_string(),
            FillError::SafetyTimeout => "What happened: The safety check was not confirmed in time.\nLikely causes: The operator did not press confirm within the stage timeout.\nHow to fix: Start again and confirm each prompt; adjust safety.stage_timeout_ms if needed.".to_string(),
            FillError::SafetyCancelled | FillError::Cancelled => "What happened: The run was cancelled.\nLikely causes: Stop requested by the operator (Ctrl-C).\nHow to fix: Start a new run when ready.".to_string(),
            FillError::AutoTuneTimeout => "What happened: Auto-tune did not finish before its timeout.\nLikely causes: The weight never crossed the relay setpoint often enough.\nHow to fix: Check autotune.setpoint and autotune.step_pct, or raise autotune.timeout_ms.".to_string(),
            FillError::AutoTuneInsufficientData { peaks, required } => format!(
                "What happened: Auto-tune saw {peaks} oscillation peaks but needs {required}.\nLikely causes: The test weight limit was reached before the system oscillated.\nHow to fix: Raise autotune.test_target or lower autotune.min_oscillations."
            ),
            FillError::InvalidModeTransition { .. } => format!(
                "What happened: {fe}.\nLikely causes: The controller was busy or needed a reset.\nHow to fix: Wait for the current run to finish, or reset after an error."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    let cause = root_cause(err);

    if cause.to_ascii_lowercase().contains("zone csv must have headers") {
        return format!("Invalid headers in zone CSV. Expected '{ZONE_CSV_HEADER}'.");
    }

    if lower.contains("invalid configuration") || lower.contains("load zone table") {
        return format!(
            "What happened: Configuration is invalid ({cause}).\nLikely causes: Out-of-range values or an inconsistent zone table.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("parse config") {
        return format!(
            "What happened: The config file is not valid TOML ({cause}).\nLikely causes: A typo, a missing quote, or a value of the wrong type.\nHow to fix: Fix the reported line in the config file."
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read ({cause}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass an existing file with --config."
        );
    }

    // Generic fallback
    format!(
        "Something went wrong. Cause: {cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map the terminal fill error (if present) to stable exit codes; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<FillError>() {
        Some(FillError::SafetyTimeout) => 2,
        Some(FillError::SafetyCancelled | FillError::Cancelled) => 3,
        Some(FillError::SensorUnavailable(_)) => 4,
        Some(FillError::SensorOutOfRange(_)) => 5,
        Some(FillError::ActuatorFault(_)) => 6,
        Some(FillError::AutoTuneTimeout) => 7,
        Some(FillError::AutoTuneInsufficientData { .. }) => 8,
        Some(FillError::InvalidModeTransition { .. }) => 9,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = if let Some(fe) = err.downcast_ref::<FillError>() {
        fe.kind_name()
    } else if err.downcast_ref::<BuildError>().is_some() {
        "build_error"
    } else {
        "error"
    };
    json!({
        "reason": reason,
        "cause": root_cause(err),
        "message": humanize(err),
    })
    .to_string()
}
