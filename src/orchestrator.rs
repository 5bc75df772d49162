//! One provisioning run: find the board, make sure a flashing tool is
//! available, resolve the firmware, flash it, clean up.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::{
    error::Error,
    firmware::{resolve_firmware, FirmwareSource},
    flasher::{self, FlashAttempt, FlashSettings, FlashTool, ToolProvider},
    logging::PROGRESS,
    serial::{
        confirm_port,
        find_target_port,
        PortEnumerator,
        PortSelection,
        Selection,
        SerialPortInfo,
    },
};

/// How the running executable was deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// A self-contained executable handed to end users; nothing may be
    /// installed on their machine
    Standalone,
    /// Run from a development setup, where missing tools may be installed
    Source,
}

impl DeploymentMode {
    pub fn allows_install(self) -> bool {
        self == DeploymentMode::Source
    }
}

/// Everything a run needs to know, decided before it starts
#[derive(Debug, Clone)]
pub struct Context {
    /// Directory searched for the local firmware file
    pub work_dir: PathBuf,
    /// Name of the local firmware file
    pub firmware_file: PathBuf,
    /// Base64-encoded firmware compiled into the executable
    pub embedded_firmware: Option<String>,
    /// Serial port given by the user, skipping discovery
    pub port: Option<String>,
    /// Ask before using a port that was only guessed
    pub confirm_port: bool,
    pub deployment: DeploymentMode,
    pub settings: FlashSettings,
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct Report {
    pub port: SerialPortInfo,
    pub tool: String,
    pub firmware: FirmwareSource,
    pub attempts: Vec<FlashAttempt>,
}

pub struct Orchestrator<'a> {
    context: Context,
    ports: &'a dyn PortEnumerator,
    tools: &'a dyn ToolProvider,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        context: Context,
        ports: &'a dyn PortEnumerator,
        tools: &'a dyn ToolProvider,
    ) -> Self {
        Self {
            context,
            ports,
            tools,
        }
    }

    /// Run every step in order, stopping at the first error
    pub fn run(&self) -> Result<Report, Error> {
        let target = self.select_port()?;
        let mut tool = self.ensure_tool()?;

        let firmware = resolve_firmware(
            self.context.embedded_firmware.as_deref(),
            &self.context.work_dir,
            &self.context.firmware_file,
        )?;
        debug!(
            "Flashing {} firmware {} ({} bytes)",
            firmware.source(),
            firmware.path().display(),
            firmware.len()
        );
        if firmware.is_empty() {
            warn!("The firmware image is empty, the ESP32 will not boot after flashing");
        }

        let result = flasher::flash(
            tool.as_mut(),
            &target.port.name,
            firmware.path(),
            &self.context.settings,
        );

        let source = firmware.source();
        if let Err(e) = firmware.cleanup() {
            warn!("Failed to remove temporary firmware file: {e}");
        }

        Ok(Report {
            port: target.port,
            tool: tool.name(),
            firmware: source,
            attempts: result?,
        })
    }

    fn select_port(&self) -> Result<PortSelection, Error> {
        if let Some(name) = &self.context.port {
            info!("Using serial port {name}");

            return Ok(PortSelection {
                port: SerialPortInfo::new(name.as_str(), "selected by the user"),
                selection: Selection::Configured,
            });
        }

        info!(target: PROGRESS, "Searching for ESP32 devices...");
        let target = find_target_port(self.ports)?;

        if target.selection == Selection::Guessed
            && self.context.confirm_port
            && !confirm_port(&target.port)?
        {
            return Err(Error::Cancelled);
        }

        Ok(target)
    }

    fn ensure_tool(&self) -> Result<Box<dyn FlashTool>, Error> {
        if let Some(tool) = self.tools.probe() {
            return Ok(tool);
        }

        if !self.context.deployment.allows_install() {
            return Err(Error::CapabilityUnavailable {
                advice: String::from(
                    "This executable cannot install esptool by itself. Install esptool \
                     (`pip install esptool`) or use a build with the built-in flasher",
                ),
            });
        }

        self.tools.install()?;

        self.tools.probe().ok_or_else(|| Error::CapabilityUnavailable {
            advice: String::from(
                "esptool was installed but cannot be run; make sure its install \
                 location is in your PATH",
            ),
        })
    }
}
