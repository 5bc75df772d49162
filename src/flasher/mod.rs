//! Driving the flashing tool
//!
//! The actual bootloader protocol is implemented by a [FlashTool]: either the
//! espflash crate linked into this executable, or an esptool process. Which one
//! is used is decided once, when [ToolProvider::probe] runs.
//!
//! Flashing is always an erase followed by a write. A failed write is retried
//! exactly once at a lower baud rate; nothing else is retried.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::{
    config::Config,
    error::{Error, ToolError},
    logging::{PROGRESS, SUCCESS},
};

pub use self::external::{Esptool, ExternalTools};
#[cfg(feature = "library")]
pub use self::library::Espflash;

pub mod external;
#[cfg(feature = "library")]
pub mod library;

/// Which kind of [FlashTool] to use
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Display,
    EnumString,
    VariantNames,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    /// Prefer the built-in flasher, fall back to esptool
    #[default]
    Auto,
    /// Only use the built-in flasher
    Library,
    /// Only use an external esptool executable
    External,
}

/// Parameters of a single write operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub port: String,
    pub baud: u32,
    pub flash_size: String,
    pub offset: u32,
    pub firmware: PathBuf,
    pub timeout: Duration,
}

/// A flashing capability: something that can erase and program an ESP32
pub trait FlashTool {
    /// Name shown to the user
    fn name(&self) -> String;

    /// Erase the entire flash of the device on `port`
    fn erase(&mut self, port: &str, timeout: Duration) -> Result<(), ToolError>;

    /// Write a firmware image to the device
    fn write_flash(&mut self, request: &WriteRequest) -> Result<(), ToolError>;
}

/// Locates, and if necessary installs, a [FlashTool]
pub trait ToolProvider {
    /// Find a usable tool, or `None` if none can be invoked
    fn probe(&self) -> Option<Box<dyn FlashTool>>;

    /// Install a tool so that a subsequent [probe](Self::probe) can find it
    fn install(&self) -> Result<(), Error>;
}

/// Settings shared by every flash operation of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSettings {
    pub baud: u32,
    pub fallback_baud: u32,
    pub flash_size: String,
    pub offset: u32,
    pub erase_timeout: Duration,
    pub write_timeout: Duration,
    pub fallback_write_timeout: Duration,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for FlashSettings {
    fn from(config: &Config) -> Self {
        Self {
            baud: config.flash.baud,
            fallback_baud: config.flash.fallback_baud,
            flash_size: config.flash.flash_size.clone(),
            offset: config.flash.offset,
            erase_timeout: Duration::from_secs(config.timeouts.erase),
            write_timeout: Duration::from_secs(config.timeouts.write),
            fallback_write_timeout: Duration::from_secs(config.timeouts.fallback_write),
        }
    }
}

/// Outcome of one write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashAttempt {
    pub port: String,
    pub baud: u32,
    pub outcome: Result<(), String>,
}

impl FlashAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for FlashAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(()) => write!(f, "{} @ {} baud: ok", self.port, self.baud),
            Err(detail) => write!(f, "{} @ {} baud: {}", self.port, self.baud, detail),
        }
    }
}

/// Erase the device on `port` and write `firmware` to it
///
/// Returns every write attempt made, the last one being successful.
pub fn flash(
    tool: &mut dyn FlashTool,
    port: &str,
    firmware: &Path,
    settings: &FlashSettings,
) -> Result<Vec<FlashAttempt>, Error> {
    info!(target: PROGRESS, "Erasing flash of the ESP32 on port {port}...");

    tool.erase(port, settings.erase_timeout)
        .map_err(|err| match err {
            ToolError::Timeout(timeout) => Error::Timeout {
                operation: "erase the flash",
                timeout,
            },
            ToolError::Failed(detail) => Error::EraseFailed {
                port: port.to_owned(),
                detail,
            },
        })?;

    info!(target: SUCCESS, "Flash erased successfully!");
    info!(target: PROGRESS, "Sending firmware to the ESP32...");

    let mut request = WriteRequest {
        port: port.to_owned(),
        baud: settings.baud,
        flash_size: settings.flash_size.clone(),
        offset: settings.offset,
        firmware: firmware.to_path_buf(),
        timeout: settings.write_timeout,
    };

    let mut attempts = Vec::with_capacity(2);

    match write_attempt(tool, &request, &mut attempts) {
        Ok(()) => {
            info!(target: SUCCESS, "Firmware written successfully!");
            return Ok(attempts);
        }
        Err(ToolError::Timeout(timeout)) => return Err(write_timeout(timeout)),
        Err(ToolError::Failed(detail)) => {
            debug!("Write at {} baud failed: {detail}", request.baud);
            warn!(
                "Write failed at {} baud, retrying at {} baud...",
                request.baud, settings.fallback_baud
            );
        }
    }

    request.baud = settings.fallback_baud;
    request.timeout = settings.fallback_write_timeout;

    match write_attempt(tool, &request, &mut attempts) {
        Ok(()) => {
            info!(
                target: SUCCESS,
                "Firmware written successfully (at {} baud)!", request.baud
            );
            Ok(attempts)
        }
        Err(ToolError::Timeout(timeout)) => Err(write_timeout(timeout)),
        Err(ToolError::Failed(detail)) => Err(Error::WriteFailed {
            port: port.to_owned(),
            detail,
        }),
    }
}

fn write_attempt(
    tool: &mut dyn FlashTool,
    request: &WriteRequest,
    attempts: &mut Vec<FlashAttempt>,
) -> Result<(), ToolError> {
    let result = tool.write_flash(request);

    attempts.push(FlashAttempt {
        port: request.port.clone(),
        baud: request.baud,
        outcome: result.clone().map_err(|err| err.to_string()),
    });

    result
}

fn write_timeout(timeout: Duration) -> Error {
    Error::Timeout {
        operation: "write the firmware",
        timeout,
    }
}

/// The [ToolProvider] used outside of tests: espflash when compiled in and
/// allowed, otherwise an esptool executable
#[derive(Debug, Clone)]
pub struct SystemTools {
    backend: Backend,
    external: ExternalTools,
}

impl SystemTools {
    pub fn new(backend: Backend, external: ExternalTools) -> Self {
        Self { backend, external }
    }

    pub fn from_config(config: &Config, backend: Backend) -> Self {
        Self::new(backend, ExternalTools::from_config(config))
    }

    #[cfg(feature = "library")]
    fn library(&self) -> Option<Box<dyn FlashTool>> {
        info!("Using the built-in espflash flasher");
        Some(Box::new(Espflash::default()))
    }

    #[cfg(not(feature = "library"))]
    fn library(&self) -> Option<Box<dyn FlashTool>> {
        debug!("Built-in flasher not compiled in");
        None
    }

    fn external(&self) -> Option<Box<dyn FlashTool>> {
        let esptool = self.external.probe()?;
        info!("Using esptool as an external command ({})", esptool.name());

        Some(Box::new(esptool))
    }
}

impl ToolProvider for SystemTools {
    fn probe(&self) -> Option<Box<dyn FlashTool>> {
        match self.backend {
            Backend::Auto => self.library().or_else(|| self.external()),
            Backend::Library => self.library(),
            Backend::External => self.external(),
        }
    }

    fn install(&self) -> Result<(), Error> {
        if self.backend == Backend::Library {
            return Err(Error::InstallFailed(String::from(
                "the built-in flasher cannot be installed at runtime",
            )));
        }

        self.external.install()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Replays scripted results and records every call
    #[derive(Default)]
    struct ScriptedTool {
        erase: Option<ToolError>,
        writes: Vec<Result<(), ToolError>>,
        erased: Vec<(String, Duration)>,
        written: Vec<WriteRequest>,
    }

    impl FlashTool for ScriptedTool {
        fn name(&self) -> String {
            String::from("scripted")
        }

        fn erase(&mut self, port: &str, timeout: Duration) -> Result<(), ToolError> {
            self.erased.push((port.to_owned(), timeout));
            match self.erase.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn write_flash(&mut self, request: &WriteRequest) -> Result<(), ToolError> {
            self.written.push(request.clone());
            self.writes.remove(0)
        }
    }

    fn failed(detail: &str) -> ToolError {
        ToolError::Failed(detail.to_owned())
    }

    #[test]
    fn test_primary_write_succeeds() {
        let mut tool = ScriptedTool {
            writes: vec![Ok(())],
            ..Default::default()
        };

        let attempts = flash(
            &mut tool,
            "COM3",
            Path::new("firmware.bin"),
            &FlashSettings::default(),
        )
        .unwrap();

        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].succeeded());
        assert_eq!(tool.erased, vec![(String::from("COM3"), Duration::from_secs(30))]);
        assert_eq!(
            tool.written,
            vec![WriteRequest {
                port: String::from("COM3"),
                baud: 460_800,
                flash_size: String::from("detect"),
                offset: 0,
                firmware: PathBuf::from("firmware.bin"),
                timeout: Duration::from_secs(60),
            }]
        );
    }

    #[test]
    fn test_single_retry_at_lower_baud() {
        let mut tool = ScriptedTool {
            writes: vec![Err(failed("A fatal error occurred")), Ok(())],
            ..Default::default()
        };

        let attempts = flash(
            &mut tool,
            "COM3",
            Path::new("firmware.bin"),
            &FlashSettings::default(),
        )
        .unwrap();

        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, Err(String::from("A fatal error occurred")));
        assert_eq!(attempts[1].baud, 115_200);
        assert!(attempts[1].succeeded());
        assert_eq!(tool.written[1].timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_retry_failure_reports_retry_detail() {
        let mut tool = ScriptedTool {
            writes: vec![Err(failed("first")), Err(failed("second"))],
            ..Default::default()
        };

        let err = flash(
            &mut tool,
            "COM3",
            Path::new("firmware.bin"),
            &FlashSettings::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::WriteFailed { detail, .. } if detail == "second"));
        assert_eq!(tool.written.len(), 2);
    }

    #[test]
    fn test_erase_failure_skips_write() {
        let mut tool = ScriptedTool {
            erase: Some(failed("No serial data received")),
            ..Default::default()
        };

        let err = flash(
            &mut tool,
            "/dev/ttyUSB0",
            Path::new("firmware.bin"),
            &FlashSettings::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::EraseFailed { port, detail }
                if port == "/dev/ttyUSB0" && detail == "No serial data received"
        ));
        assert!(tool.written.is_empty());
    }

    #[test]
    fn test_erase_timeout() {
        let mut tool = ScriptedTool {
            erase: Some(ToolError::Timeout(Duration::from_secs(30))),
            ..Default::default()
        };

        let err = flash(
            &mut tool,
            "COM3",
            Path::new("firmware.bin"),
            &FlashSettings::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(tool.written.is_empty());
    }

    #[test]
    fn test_write_timeout_not_retried() {
        let mut tool = ScriptedTool {
            writes: vec![Err(ToolError::Timeout(Duration::from_secs(60))), Ok(())],
            ..Default::default()
        };

        let err = flash(
            &mut tool,
            "COM3",
            Path::new("firmware.bin"),
            &FlashSettings::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Timeout { timeout, .. } if timeout == Duration::from_secs(60)
        ));
        assert_eq!(tool.written.len(), 1);
    }

    fn missing_esptool() -> ExternalTools {
        ExternalTools::new(
            vec![String::from("esp32-autoflash-no-such-esptool")],
            Vec::new(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_external_backend_without_esptool() {
        let tools = SystemTools::new(Backend::External, missing_esptool());

        assert!(tools.probe().is_none());
    }

    #[cfg(feature = "library")]
    #[test]
    fn test_library_backend_is_always_available() {
        for backend in [Backend::Auto, Backend::Library] {
            let tools = SystemTools::new(backend, missing_esptool());
            let tool = tools.probe().unwrap();

            assert_eq!(tool.name(), "espflash (built-in)");
        }
    }

    #[cfg(not(feature = "library"))]
    #[test]
    fn test_library_backend_not_compiled_in() {
        assert!(SystemTools::new(Backend::Library, missing_esptool())
            .probe()
            .is_none());
        assert!(SystemTools::new(Backend::Auto, missing_esptool())
            .probe()
            .is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_auto_backend_falls_back_to_esptool() {
        let external = ExternalTools::new(
            vec![String::from("sh")],
            Vec::new(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let tool = SystemTools::new(Backend::Auto, external).probe().unwrap();

        let expected = if cfg!(feature = "library") {
            "espflash (built-in)"
        } else {
            "sh"
        };
        assert_eq!(tool.name(), expected);
    }

    #[test]
    fn test_library_backend_cannot_be_installed() {
        let external = ExternalTools::new(
            Vec::new(),
            vec![String::from("true")],
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let tools = SystemTools::new(Backend::Library, external);

        assert!(matches!(tools.install(), Err(Error::InstallFailed(_))));
    }

    #[test]
    fn test_backend_names() {
        use std::str::FromStr;

        assert_eq!(Backend::from_str("external").unwrap(), Backend::External);
        assert_eq!(Backend::Library.to_string(), "library");
        assert_eq!(Backend::VARIANTS, &["auto", "library", "external"]);
    }
}
