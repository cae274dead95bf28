//! Maps `Box<dyn Error>` from trait boundaries to typed `FillError`.
//!
//! The traits in `filler_traits` use `Box<dyn Error + Send + Sync>` so any
//! binding can plug in; this module converts those into our error kinds, with
//! an optional feature-gated path for `filler_hardware::HwError` downcasting.

use crate::error::FillError;

/// Map a sensor-side error to `SensorUnavailable` or `SensorOutOfRange`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_sensor_error(e: &(dyn std::error::Error + 'static)) -> FillError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<filler_hardware::error::HwError>() {
            return match hw {
                filler_hardware::error::HwError::OutOfRange(v) => FillError::SensorOutOfRange(*v),
                other => FillError::SensorUnavailable(other.to_string()),
            };
        }
    }

    FillError::SensorUnavailable(e.to_string())
}

/// Map an actuator-side error to `ActuatorFault`.
pub fn map_actuator_error(e: &(dyn std::error::Error + 'static)) -> FillError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<filler_hardware::error::HwError>() {
            return FillError::ActuatorFault(hw.to_string());
        }
    }

    let s = e.to_string();
    if s.is_empty() {
        FillError::ActuatorFault("unknown actuator error".into())
    } else {
        FillError::ActuatorFault(s)
    }
}
