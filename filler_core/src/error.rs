use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FillError {
    #[error("weight sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("weight reading {0} outside sane range")]
    SensorOutOfRange(f32),
    #[error("actuator fault: {0}")]
    ActuatorFault(String),
    #[error("safety check timed out")]
    SafetyTimeout,
    #[error("safety check cancelled")]
    SafetyCancelled,
    #[error("fill cancelled by operator")]
    Cancelled,
    #[error("auto-tune timed out")]
    AutoTuneTimeout,
    #[error("auto-tune collected {peaks} peaks, needs {required}")]
    AutoTuneInsufficientData { peaks: usize, required: usize },
    #[error("cannot {request} while {state}")]
    InvalidModeTransition {
        state: &'static str,
        request: &'static str,
    },
}

impl FillError {
    /// Stable snake_case name used in events and JSON output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SensorUnavailable(_) => "sensor_unavailable",
            Self::SensorOutOfRange(_) => "sensor_out_of_range",
            Self::ActuatorFault(_) => "actuator_fault",
            Self::SafetyTimeout => "safety_timeout",
            Self::SafetyCancelled => "safety_cancelled",
            Self::Cancelled => "cancelled",
            Self::AutoTuneTimeout => "autotune_timeout",
            Self::AutoTuneInsufficientData { .. } => "autotune_insufficient_data",
            Self::InvalidModeTransition { .. } => "invalid_mode_transition",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing weight sensor")]
    MissingSensor,
    #[error("missing actuator")]
    MissingActuator,
    #[error("missing confirm button")]
    MissingButton,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
