//! Collaborator contracts consumed by the fill controller core.
//!
//! Hardware bindings (sensor, pneumatic valve, buttons) and outer surfaces
//! (telemetry, persistence) implement these traits; the core never talks to
//! a concrete device.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Error type used at every trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Live weight source. Must fail fast instead of blocking the control tick.
pub trait WeightSensor {
    fn read(&mut self) -> Result<f32, BoxError>;
}

/// Pneumatic pressure actuator commanded in percent (0..=100).
pub trait ActuatorOutput {
    fn set_percent(&mut self, pct: f32) -> Result<(), BoxError>;
}

/// Optional discrete confirmation that the actuator reached its commanded state.
pub trait FeedbackInput {
    fn is_active(&self) -> bool;
}

/// Operator confirmation input.
///
/// Returns true exactly once per physical press, however often it is polled.
pub trait ConfirmButton {
    fn pressed_edge(&mut self) -> bool;
}

/// PID gain triple as persisted by a [`ParameterStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Persistence of tuned gains.
///
/// `load_pid` returns `Ok(None)` when nothing was stored yet; that is a signal
/// to use configured defaults, not an error.
pub trait ParameterStore {
    fn load_pid(&self) -> Result<Option<StoredGains>, BoxError>;
    fn save_pid(&mut self, gains: &StoredGains) -> Result<(), BoxError>;
}

/// One-way telemetry. Callers log failures and carry on.
pub trait EventSink<S> {
    fn publish_event(&mut self, kind: &str, detail: &str) -> Result<(), BoxError>;
    fn publish_status(&mut self, snapshot: &S) -> Result<(), BoxError>;
}

impl<T: WeightSensor + ?Sized> WeightSensor for Box<T> {
    fn read(&mut self) -> Result<f32, BoxError> {
        (**self).read()
    }
}

impl<T: ActuatorOutput + ?Sized> ActuatorOutput for Box<T> {
    fn set_percent(&mut self, pct: f32) -> Result<(), BoxError> {
        (**self).set_percent(pct)
    }
}

impl<T: ConfirmButton + ?Sized> ConfirmButton for Box<T> {
    fn pressed_edge(&mut self) -> bool {
        (**self).pressed_edge()
    }
}

impl<T: FeedbackInput + ?Sized> FeedbackInput for Box<T> {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}
