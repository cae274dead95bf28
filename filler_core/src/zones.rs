//! Fill-progress zones and the open-loop pressure schedule.

use crate::error::BuildError;

/// Active control band. `Idle` means no fill is driving the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Zone {
    #[default]
    Idle,
    Fast,
    Moderate,
    Slow,
    Fine,
}

impl Zone {
    /// Zone for the n-th row of the schedule.
    pub fn from_index(i: usize) -> Self {
        match i {
            0 => Self::Fast,
            1 => Self::Moderate,
            2 => Self::Slow,
            _ => Self::Fine,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Fast => "FAST",
            Self::Moderate => "MODERATE",
            Self::Slow => "SLOW",
            Self::Fine => "FINE",
        }
    }
}

impl core::fmt::Display for Zone {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the zone table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneDefinition {
    /// Upper bound (exclusive) of this zone in percent of target.
    pub end_percent: f32,
    /// Open-loop actuator command for this zone.
    pub base_pressure_pct: f32,
    /// Max PID correction (±) in percentage points.
    pub pid_range_pct: f32,
    /// Factor applied to kp/ki/kd while in this zone.
    pub gain_multiplier: f32,
    /// Flow setpoint (mass per second) for flow-based PID.
    pub target_flow: f32,
}

/// Result of a schedule lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoneLookup {
    Active { zone: Zone, def: ZoneDefinition },
    TargetReached,
}

pub const MAX_ZONES: usize = 4;

/// Validated, ordered zone table.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSchedule {
    zones: Vec<ZoneDefinition>,
}

impl ZoneSchedule {
    pub fn new(zones: Vec<ZoneDefinition>) -> Result<Self, BuildError> {
        if zones.is_empty() {
            return Err(BuildError::InvalidConfig("zone table must not be empty"));
        }
        if zones.len() > MAX_ZONES {
            return Err(BuildError::InvalidConfig("zone table has more than 4 zones"));
        }
        let mut prev_end = 0.0f32;
        for z in &zones {
            if !z.end_percent.is_finite() || z.end_percent <= prev_end {
                return Err(BuildError::InvalidConfig(
                    "zone end_percent must be strictly increasing and > 0",
                ));
            }
            prev_end = z.end_percent;
            if !(0.0..=100.0).contains(&z.base_pressure_pct) {
                return Err(BuildError::InvalidConfig(
                    "zone base_pressure_pct must be in [0, 100]",
                ));
            }
            if !(0.0..=100.0).contains(&z.pid_range_pct) {
                return Err(BuildError::InvalidConfig(
                    "zone pid_range_pct must be in [0, 100]",
                ));
            }
            if !(z.gain_multiplier.is_finite() && z.gain_multiplier > 0.0) {
                return Err(BuildError::InvalidConfig("zone gain_multiplier must be > 0"));
            }
            if !(z.target_flow.is_finite() && z.target_flow >= 0.0) {
                return Err(BuildError::InvalidConfig("zone target_flow must be >= 0"));
            }
        }
        if prev_end > 100.0 {
            return Err(BuildError::InvalidConfig(
                "last zone end_percent must be <= 100",
            ));
        }
        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[ZoneDefinition] {
        &self.zones
    }

    /// Definition of an active zone, if the table has a row for it.
    pub fn definition(&self, zone: Zone) -> Option<&ZoneDefinition> {
        let idx = match zone {
            Zone::Idle => return None,
            Zone::Fast => 0,
            Zone::Moderate => 1,
            Zone::Slow => 2,
            Zone::Fine => 3,
        };
        self.zones.get(idx)
    }

    /// First zone whose `end_percent` exceeds `percent_complete`.
    pub fn zone_for(&self, percent_complete: f32) -> ZoneLookup {
        self.zones
            .iter()
            .position(|z| z.end_percent > percent_complete)
            .map_or(ZoneLookup::TargetReached, |i| ZoneLookup::Active {
                zone: Zone::from_index(i),
                def: self.zones[i],
            })
    }
}

impl Default for ZoneSchedule {
    fn default() -> Self {
        let row = |end_percent, base_pressure_pct, pid_range_pct, gain_multiplier, target_flow| {
            ZoneDefinition {
                end_percent,
                base_pressure_pct,
                pid_range_pct,
                gain_multiplier,
                target_flow,
            }
        };
        Self {
            zones: vec![
                row(40.0, 100.0, 20.0, 1.5, 3.0),
                row(70.0, 70.0, 15.0, 1.0, 2.0),
                row(90.0, 40.0, 10.0, 0.75, 1.0),
                row(98.0, 20.0, 5.0, 0.5, 0.3),
            ],
        }
    }
}
