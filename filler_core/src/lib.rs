#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core fill-control logic (hardware-agnostic).
//!
//! All device access goes through the `filler_traits` contracts; the core
//! never sleeps and never blocks on I/O inside a tick.
//!
//! ## Architecture
//!
//! - **Zones**: progress bands and the open-loop pressure schedule (`zones`)
//! - **PID**: clamped, derivative-on-measurement controller (`pid`)
//! - **Blending**: zone base plus bounded, zone-scaled correction (`blend`)
//! - **Auto-tune**: relay feedback with Ziegler–Nichols gains (`autotune`)
//! - **Safety**: four-stage operator interlock (`interlock`)
//! - **Supervisor**: the fill state machine, single writer of `ControlState`
//! - **Runner**: fixed-period loop driving the supervisor (`runner`)
//!
//! Off-loop helpers (`sampler`, `telemetry`) keep slow sensors and sinks out
//! of the control period.

pub mod autotune;
pub mod blend;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod debounce;
pub mod error;
pub mod hw_error;
pub mod interlock;
pub mod mocks;
pub mod pid;
pub mod runner;
pub mod sampler;
pub mod state;
pub mod supervisor;
pub mod telemetry;
pub mod util;
pub mod zones;

pub use autotune::{AutoTuner, TunePhase, TuneResult, TuneStatus, compute_gains};
pub use blend::{ControlMode, HybridBlender, ProcessVariable};
pub use builder::{DynFillSupervisor, FillSupervisorBuilder, Missing, Set, build_supervisor};
pub use config::{AutoTuneCfg, ControlCfg, FillCfg, PidCfg, SafetyCfg};
pub use error::{BuildError, FillError, Report, Result};
pub use interlock::{SafetyInterlock, SafetyStage};
pub use pid::{PidController, PidGains};
pub use runner::{ControlClock, FillOutcome, run_autotune, run_fill};
pub use state::{ControlState, FillCounters, FillState, StatusSnapshot};
pub use supervisor::{CancelHandle, FillSupervisor, NullSink, SupervisorCfg};
pub use zones::{Zone, ZoneDefinition, ZoneLookup, ZoneSchedule};
