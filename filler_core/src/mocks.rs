//! Shared-handle collaborators for tests and dry runs.
//!
//! Every mock is `Clone`; clones share state, so a test keeps one handle
//! while the supervisor owns another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use filler_traits::{ActuatorOutput, BoxError, ConfirmButton, EventSink, FeedbackInput, WeightSensor};

use crate::state::StatusSnapshot;

/// Weight source set by the test; `None` reads as a disconnected sensor.
#[derive(Debug, Clone, Default)]
pub struct SharedSensor {
    value: Arc<Mutex<Option<f32>>>,
}

impl SharedSensor {
    pub fn new(weight: f32) -> Self {
        Self {
            value: Arc::new(Mutex::new(Some(weight))),
        }
    }

    pub fn set(&self, weight: f32) {
        if let Ok(mut v) = self.value.lock() {
            *v = Some(weight);
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut v) = self.value.lock() {
            *v = None;
        }
    }
}

impl WeightSensor for SharedSensor {
    fn read(&mut self) -> Result<f32, BoxError> {
        let v = self.value.lock().map_err(|_| "sensor mutex poisoned")?;
        (*v).ok_or_else(|| "sensor disconnected".into())
    }
}

/// Records every commanded percentage.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    log: Arc<Mutex<Vec<f32>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingActuator {
    pub fn commands(&self) -> Vec<f32> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<f32> {
        self.log.lock().ok().and_then(|l| l.last().copied())
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, on: bool) {
        self.fail.store(on, Ordering::Relaxed);
    }
}

impl ActuatorOutput for RecordingActuator {
    fn set_percent(&mut self, pct: f32) -> Result<(), BoxError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err("actuator write failed".into());
        }
        if let Ok(mut l) = self.log.lock() {
            l.push(pct);
        }
        Ok(())
    }
}

/// Button whose presses are injected by the test. Each `press` is one
/// latched edge.
#[derive(Debug, Clone, Default)]
pub struct PressButton {
    latched: Arc<AtomicBool>,
}

impl PressButton {
    pub fn press(&self) {
        self.latched.store(true, Ordering::Relaxed);
    }
}

impl ConfirmButton for PressButton {
    fn pressed_edge(&mut self) -> bool {
        self.latched.swap(false, Ordering::Relaxed)
    }
}

/// Feedback level set by the test.
#[derive(Debug, Clone, Default)]
pub struct SharedFeedback {
    active: Arc<AtomicBool>,
}

impl SharedFeedback {
    pub fn set(&self, on: bool) {
        self.active.store(on, Ordering::Relaxed);
    }
}

impl FeedbackInput for SharedFeedback {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Keeps every event and status snapshot.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(String, String)>>>,
    statuses: Arc<Mutex<Vec<StatusSnapshot>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn event_kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|(k, _)| k).collect()
    }

    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        self.statuses.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl EventSink<StatusSnapshot> for RecordingSink {
    fn publish_event(&mut self, kind: &str, detail: &str) -> Result<(), BoxError> {
        if let Ok(mut e) = self.events.lock() {
            e.push((kind.to_string(), detail.to_string()));
        }
        Ok(())
    }

    fn publish_status(&mut self, snapshot: &StatusSnapshot) -> Result<(), BoxError> {
        if let Ok(mut s) = self.statuses.lock() {
            s.push(snapshot.clone());
        }
        Ok(())
    }
}

/// Sink that rejects everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSink;

impl EventSink<StatusSnapshot> for FailingSink {
    fn publish_event(&mut self, _kind: &str, _detail: &str) -> Result<(), BoxError> {
        Err("telemetry offline".into())
    }

    fn publish_status(&mut self, _snapshot: &StatusSnapshot) -> Result<(), BoxError> {
        Err("telemetry offline".into())
    }
}
