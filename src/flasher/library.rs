//! Flashing in-process with the espflash crate

use std::{fs, time::Duration};

use espflash::{
    connection::reset::{ResetAfterOperation, ResetBeforeOperation},
    error::{ConnectionError, Error as EspflashError},
    flasher::Flasher,
};
use log::debug;
use serialport::{FlowControl, SerialPortType, UsbPortInfo};

use super::{FlashTool, WriteRequest};
use crate::error::ToolError;

/// Baud rate the ROM bootloader is always reached at
const CONNECT_BAUD: u32 = 115_200;

/// The built-in flasher
///
/// Every operation opens its own connection, the same way two separate esptool
/// runs would. Only a write hard-resets the device afterwards. espflash applies
/// its own per-command timeouts, so the timeouts passed in are not enforced
/// here; they are only reported when espflash gives up.
#[derive(Debug, Default, Clone)]
pub struct Espflash;

impl Espflash {
    fn connect(
        &self,
        port: &str,
        speed: Option<u32>,
        timeout: Duration,
    ) -> Result<Flasher, ToolError> {
        let serial = serialport::new(port, CONNECT_BAUD)
            .flow_control(FlowControl::None)
            .open_native()
            .map_err(|e| ToolError::Failed(format!("failed to open serial port {port}: {e}")))?;

        Flasher::connect(
            serial,
            usb_port_info(port),
            speed,
            true,
            true,
            false,
            None,
            ResetAfterOperation::HardReset,
            ResetBeforeOperation::DefaultReset,
        )
        .map_err(|e| tool_error(e, timeout))
    }
}

/// Timeouts end the operation instead of being treated as a failed attempt
fn tool_error(err: EspflashError, timeout: Duration) -> ToolError {
    match err {
        EspflashError::Connection(ConnectionError::Timeout(_))
        | EspflashError::Flashing(ConnectionError::Timeout(_)) => ToolError::Timeout(timeout),
        err => ToolError::Failed(err.to_string()),
    }
}

/// USB details of `port`, used by espflash to pick a reset strategy
fn usb_port_info(port: &str) -> UsbPortInfo {
    let info = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .find(|info| info.port_name == port)
        .and_then(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => Some(usb),
            _ => None,
        });

    info.unwrap_or(UsbPortInfo {
        vid: 0,
        pid: 0,
        serial_number: None,
        manufacturer: None,
        product: None,
    })
}

impl FlashTool for Espflash {
    fn name(&self) -> String {
        String::from("espflash (built-in)")
    }

    fn erase(&mut self, port: &str, timeout: Duration) -> Result<(), ToolError> {
        let mut flasher = self.connect(port, None, timeout)?;

        flasher.erase_flash().map_err(|e| tool_error(e, timeout))
    }

    fn write_flash(&mut self, request: &WriteRequest) -> Result<(), ToolError> {
        let data = fs::read(&request.firmware).map_err(|e| {
            ToolError::Failed(format!(
                "failed to read {}: {e}",
                request.firmware.display()
            ))
        })?;

        if request.flash_size != "detect" {
            debug!(
                "Flash size '{}' requested, the built-in flasher always detects it",
                request.flash_size
            );
        }

        let mut flasher = self.connect(&request.port, Some(request.baud), request.timeout)?;

        flasher
            .write_bin_to_flash(request.offset, &data, None)
            .map_err(|e| tool_error(e, request.timeout))
    }
}
