//! Library and application errors

use std::{io, path::PathBuf, time::Duration};

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by esp32-autoflash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("No serial ports could be detected")]
    #[diagnostic(
        code(autoflash::no_device_found),
        help(
            "Make sure that the ESP32 is connected via USB, that the USB-UART drivers \
             are installed, and that the cable carries data and not only power"
        )
    )]
    NoDeviceFound,

    #[error("Failed to enumerate serial ports")]
    #[diagnostic(code(autoflash::serial_enumeration))]
    SerialEnumeration(#[source] serialport::Error),

    #[error("Operation was cancelled by the user")]
    #[diagnostic(code(autoflash::cancelled))]
    Cancelled,

    #[error("No flashing tool is available")]
    #[diagnostic(code(autoflash::capability_unavailable))]
    CapabilityUnavailable {
        #[help]
        advice: String,
    },

    #[error("Failed to install esptool: {0}")]
    #[diagnostic(
        code(autoflash::install_failed),
        help("Install it manually with `pip install esptool` and try again")
    )]
    InstallFailed(String),

    #[error("Firmware not found (neither embedded nor at {})", .0.display())]
    #[diagnostic(
        code(autoflash::firmware_not_found),
        help("Place a `firmware.bin` file next to the executable, or build it with `ESP32_AUTOFLASH_FIRMWARE` set")
    )]
    FirmwareNotFound(PathBuf),

    #[error("The embedded firmware payload is not valid base64")]
    #[diagnostic(
        code(autoflash::decode_error),
        help("The executable was built with a corrupt payload; rebuild it")
    )]
    DecodeError(#[source] base64::DecodeError),

    #[error("Failed to erase the flash on {port}: {detail}")]
    #[diagnostic(code(autoflash::erase_failed))]
    EraseFailed { port: String, detail: String },

    #[error("Failed to write the firmware to {port}: {detail}")]
    #[diagnostic(
        code(autoflash::write_failed),
        help("Hold the BOOT button while the upload starts, or try another USB cable or port")
    )]
    WriteFailed { port: String, detail: String },

    #[error("Timed out after {}s while trying to {operation}", .timeout.as_secs())]
    #[diagnostic(
        code(autoflash::timeout),
        help("Check the connection to the ESP32")
    )]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Failed to load configuration file {}", .path.display())]
    #[diagnostic(code(autoflash::config))]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(autoflash::io))]
    Io(#[from] io::Error),
}

impl From<dialoguer::Error> for Error {
    fn from(err: dialoguer::Error) -> Self {
        match err {
            dialoguer::Error::IO(e) => Self::Io(e),
        }
    }
}

/// Failure reported by a flashing tool for a single invocation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}
