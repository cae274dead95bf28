//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use filler_core::ControlMode;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

/// Flushes the log file writer when taken and dropped.
pub static FILE_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> =
    Mutex::new(None);
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "filler", version, about = "Pneumatic fill controller CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/filler_config.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON; log as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Control strategy selectable from the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// Open-loop zone schedule
    Zone,
    /// PID only
    Pid,
    /// Zone base plus bounded PID correction
    Hybrid,
}

impl From<ModeArg> for ControlMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Zone => Self::ZoneOnly,
            ModeArg::Pid => Self::PidOnly,
            ModeArg::Hybrid => Self::Hybrid,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fill a container to the target weight
    Fill {
        /// Target weight; defaults to fill.default_target
        #[arg(long)]
        target: Option<f32>,
        /// Override fill.mode for this run
        #[arg(long, value_enum, value_name = "MODE")]
        mode: Option<ModeArg>,
        /// Number of consecutive fills (the container is swapped between fills)
        #[arg(long, default_value_t = 1, value_name = "N")]
        count: u32,
    },
    /// Run a relay auto-tune session and report the identified PID gains
    Autotune {
        /// Persist the gains to store.path
        #[arg(long, action = ArgAction::SetTrue)]
        save: bool,
    },
    /// Quick health check of the sensor, actuator and feedback path
    SelfCheck {
        /// Also read one line from a serial scale device (e.g. /dev/ttyUSB0)
        #[arg(long, value_name = "DEVICE")]
        scale_device: Option<PathBuf>,
    },
    /// Print the effective configuration after validation
    ShowConfig,
}
