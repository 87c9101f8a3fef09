//! RoboVac Bridge
//!
//! Cached, self-healing state layer for Eufy RoboVac vacuums, plus the
//! home-automation accessory and command-line tooling built on it.

pub mod accessory;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod paths;
pub mod transport;

pub use device::{RoboVac, RoboVacOptions};
pub use error::{DeviceError, Result};
