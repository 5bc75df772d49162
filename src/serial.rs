//! Serial port discovery
//!
//! Ports are matched against the names of the USB-UART bridges commonly found
//! on ESP32 development boards. If nothing looks like such a bridge, the first
//! port the OS reports is used instead.

use dialoguer::{theme::ColorfulTheme, Confirm};
use log::{info, warn};
use serialport::{available_ports, SerialPortType};

use crate::{error::Error, logging::SUCCESS};

/// Substrings of port descriptions which indicate a USB-UART bridge
pub const KNOWN_BRIDGES: &[&str] = &[
    "cp210",
    "ch340",
    "ftdi",
    "usb-serial",
    "silicon labs",
    "qinheng",
    "uart",
];

/// A serial port as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Device identifier, e.g. `/dev/ttyUSB0` or `COM3`
    pub name: String,
    /// Human-readable description
    pub description: String,
}

impl SerialPortInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Whether the description names a known USB-UART bridge
    pub fn is_known_bridge(&self) -> bool {
        let description = self.description.to_lowercase();

        KNOWN_BRIDGES
            .iter()
            .any(|bridge| description.contains(bridge))
    }
}

/// How a port was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Its description matched a known bridge
    Matched,
    /// Nothing matched, it was the first port enumerated
    Guessed,
    /// Given on the command line or in the configuration file
    Configured,
}

/// The port flashing will target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSelection {
    pub port: SerialPortInfo,
    pub selection: Selection,
}

/// Source of the list of serial ports
pub trait PortEnumerator {
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>, Error>;
}

/// Enumerates the ports of the host system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>, Error> {
        let ports = available_ports().map_err(Error::SerialEnumeration)?;

        Ok(ports
            .into_iter()
            .map(|port| {
                let description = describe(&port.port_type);
                SerialPortInfo::new(port.port_name, description)
            })
            .collect())
    }
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => {
            let parts = [info.manufacturer.as_deref(), info.product.as_deref()];
            let description = parts.into_iter().flatten().collect::<Vec<_>>().join(" ");

            if description.is_empty() {
                format!("USB device {:04x}:{:04x}", info.vid, info.pid)
            } else {
                description
            }
        }
        SerialPortType::PciPort => String::from("PCI device"),
        SerialPortType::BluetoothPort => String::from("Bluetooth device"),
        SerialPortType::Unknown => String::from("n/a"),
    }
}

/// Pick the port to flash from an enumerated list
///
/// The first port whose description names a known bridge wins; otherwise the
/// first port is guessed. Returns `None` only for an empty list.
pub fn select_port(ports: &[SerialPortInfo]) -> Option<PortSelection> {
    let mut matches = ports.iter().filter(|port| port.is_known_bridge());

    match matches.next() {
        Some(port) => Some(PortSelection {
            port: port.clone(),
            selection: Selection::Matched,
        }),
        None => ports.first().map(|port| PortSelection {
            port: port.clone(),
            selection: Selection::Guessed,
        }),
    }
}

/// Find the serial port connected to the ESP32
pub fn find_target_port(enumerator: &dyn PortEnumerator) -> Result<PortSelection, Error> {
    let ports = enumerator.available_ports()?;

    for port in ports.iter().filter(|port| port.is_known_bridge()) {
        info!(target: SUCCESS, "ESP32 detected: {} - {}", port.name, port.description);
    }

    let selected = select_port(&ports).ok_or(Error::NoDeviceFound)?;

    if selected.selection == Selection::Guessed {
        warn!(
            "No known USB-UART bridge found, using generic port: {} - {}",
            selected.port.name, selected.port.description
        );
        if ports.len() > 1 {
            warn!(
                "{} serial ports are available; use `--port` to pick another one",
                ports.len()
            );
        }
    }

    Ok(selected)
}

/// Ask the user whether a guessed port should be used
pub fn confirm_port(port: &SerialPortInfo) -> Result<bool, Error> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Use serial port '{}' - {}?",
            port.name, port.description
        ))
        .interact_opt()?
        .ok_or(Error::Cancelled)
}

/// Print every port, highlighting those that look like an ESP32 board
pub fn list_ports(enumerator: &dyn PortEnumerator) -> Result<(), Error> {
    use crossterm::style::Stylize;

    let ports = enumerator.available_ports()?;
    if ports.is_empty() {
        return Err(Error::NoDeviceFound);
    }

    println!(
        "Detected {} serial ports. Ports which match a known USB-UART bridge are highlighted.\n",
        ports.len()
    );

    for port in &ports {
        if port.is_known_bridge() {
            println!("{} - {}", port.name.as_str().bold(), port.description);
        } else {
            println!("{} - {}", port.name, port.description);
        }
    }

    Ok(())
}
