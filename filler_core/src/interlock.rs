//! Four-stage operator confirmation gating every fill.

use std::time::Instant;

use crate::config::SafetyCfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyStage {
    #[default]
    Idle,
    AirCheck,
    HoseCheck,
    PositionCheck,
    StartCheck,
    Complete,
    Timeout,
    Cancelled,
}

impl SafetyStage {
    /// Stage reached by one confirmation from `self`.
    pub fn next(self) -> Self {
        match self {
            Self::AirCheck => Self::HoseCheck,
            Self::HoseCheck => Self::PositionCheck,
            Self::PositionCheck => Self::StartCheck,
            Self::StartCheck => Self::Complete,
            other => other,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::AirCheck | Self::HoseCheck | Self::PositionCheck | Self::StartCheck
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Timeout | Self::Cancelled)
    }

    /// Two-line operator prompt for a 16x2 display.
    pub fn prompt(&self) -> (&'static str, &'static str) {
        match self {
            Self::Idle => ("Ready", "Press to start"),
            Self::AirCheck => ("SAFETY CHECK 1/4", "Air line OK?"),
            Self::HoseCheck => ("SAFETY CHECK 2/4", "Fill hose OK?"),
            Self::PositionCheck => ("SAFETY CHECK 3/4", "Tank position?"),
            Self::StartCheck => ("SAFETY CHECK 4/4", "Ready to fill?"),
            Self::Complete => ("Safety Complete", "Starting fill..."),
            Self::Timeout => ("SAFETY TIMEOUT", "Sequence abort"),
            Self::Cancelled => ("CANCELLED", "Safety aborted"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AirCheck => "AIR_CHECK",
            Self::HoseCheck => "HOSE_CHECK",
            Self::PositionCheck => "POSITION_CHECK",
            Self::StartCheck => "START_CHECK",
            Self::Complete => "COMPLETE",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// One confirmation session. Terminal stages end it; a new fill attempt
/// starts a fresh session.
#[derive(Debug, Clone)]
pub struct SafetyInterlock {
    cfg: SafetyCfg,
    stage: SafetyStage,
    stage_start: Instant,
}

impl SafetyInterlock {
    pub fn begin(cfg: SafetyCfg, now: Instant) -> Self {
        tracing::info!(stage = SafetyStage::AirCheck.as_str(), "safety sequence started");
        Self {
            cfg,
            stage: SafetyStage::AirCheck,
            stage_start: now,
        }
    }

    pub fn stage(&self) -> SafetyStage {
        self.stage
    }

    pub fn stage_start(&self) -> Instant {
        self.stage_start
    }

    /// Cancel from any non-terminal stage.
    pub fn cancel(&mut self) {
        if !self.stage.is_terminal() {
            tracing::warn!(stage = self.stage.as_str(), "safety sequence cancelled");
            self.stage = SafetyStage::Cancelled;
        }
    }

    /// Advance with at most one confirmation edge.
    pub fn tick(&mut self, confirmed: bool, now: Instant) -> SafetyStage {
        if !self.stage.is_pending() {
            return self.stage;
        }

        let elapsed_ms = now.saturating_duration_since(self.stage_start).as_millis();
        if elapsed_ms > u128::from(self.cfg.stage_timeout_ms) {
            tracing::warn!(stage = self.stage.as_str(), "safety check timeout");
            self.stage = SafetyStage::Timeout;
            return self.stage;
        }

        if confirmed {
            let next = self.stage.next();
            tracing::info!(from = self.stage.as_str(), to = next.as_str(), "safety stage confirmed");
            self.stage = next;
            self.stage_start = now;
        }
        self.stage
    }
}
