//! Device bindings for the fill controller.
//!
//! - `sim`: a simulated plant. The scale's weight integrates the commanded
//!   valve pressure over time; valve, pressure contact and confirm button
//!   share that plant and one clock, so a virtual clock makes fills instant.
//! - `serial`: the line protocol of serial bench scales (`WT:+012.34 LBS`).

pub mod error;
pub mod serial;
pub mod sim;

pub use serial::{LineScale, parse_weight_line};
pub use sim::{ButtonHandle, SimButton, SimCfg, SimFeedback, SimPlant, SimScale, SimValve};
