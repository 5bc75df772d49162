//! Detect an ESP32 board on a USB-serial port and flash a firmware image to it
//!
//! The firmware is either compiled into the executable (see `build.rs`) or read
//! from a `firmware.bin` file next to it. Flashing itself is delegated to the
//! espflash crate or to an esptool executable.

pub mod config;
pub mod embedded;
pub mod error;
pub mod firmware;
pub mod flasher;
pub mod logging;
pub mod orchestrator;
pub mod serial;

pub use config::Config;
pub use error::Error;
pub use orchestrator::{Context, DeploymentMode, Orchestrator, Report};
