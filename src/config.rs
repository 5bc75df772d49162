//! Configuration file
//!
//! All settings are optional; a missing file yields the defaults the tool has
//! always shipped with. The file is looked up in the working directory first,
//! then in the user's configuration directory.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{error::Error, flasher::Backend};

/// Name of the configuration file
pub const CONFIG_FILE: &str = "esp32-autoflash.toml";

/// Name of the firmware file looked up in the working directory
pub const DEFAULT_FIRMWARE_FILE: &str = "firmware.bin";

/// A configured, known serial connection
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Connection {
    /// Name of the serial port used for communication
    pub serial: Option<String>,
}

/// Where to look for a firmware image when none is embedded
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FirmwareConfig {
    /// File name, relative to the working directory
    pub file_name: PathBuf,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            file_name: PathBuf::from(DEFAULT_FIRMWARE_FILE),
        }
    }
}

/// Parameters of the write operation
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FlashConfig {
    /// Baud rate of the first write attempt
    pub baud: u32,
    /// Baud rate of the single retry
    pub fallback_baud: u32,
    /// Flash size passed to the tool, `detect` to let it probe the chip
    pub flash_size: String,
    /// Address the image is written to
    pub offset: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            baud: 460_800,
            fallback_baud: 115_200,
            flash_size: String::from("detect"),
            offset: 0x0,
        }
    }
}

/// How the flashing tool is located and installed
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ToolConfig {
    pub backend: Backend,
    /// esptool executable names, tried in order
    pub executables: Vec<String>,
    /// Command used to install esptool on demand
    pub install_command: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let python = if cfg!(windows) { "python" } else { "python3" };

        Self {
            backend: Backend::default(),
            executables: vec![String::from("esptool.py"), String::from("esptool")],
            install_command: [python, "-m", "pip", "install", "esptool"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Timeouts, in seconds
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub probe: u64,
    pub erase: u64,
    pub write: u64,
    pub fallback_write: u64,
    pub install: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe: 10,
            erase: 30,
            write: 60,
            fallback_write: 90,
            install: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install)
    }
}

/// Contents of the configuration file
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub firmware: FirmwareConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load the configuration visible from `work_dir`, falling back to the
    /// defaults if no file exists
    pub fn load(work_dir: &Path) -> Result<Self, Error> {
        match Self::find_config_path(work_dir) {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load the configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let data = read_to_string(path)?;
        let config = Self::parse(&data).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Config loaded from {}: {:#?}", path.display(), config);

        Ok(config)
    }

    fn parse(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    fn find_config_path(work_dir: &Path) -> Option<PathBuf> {
        let local_config = work_dir.join(CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        ProjectDirs::from("", "", "esp32-autoflash")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.connection.serial, None);
        assert_eq!(config.firmware.file_name, PathBuf::from("firmware.bin"));
        assert_eq!(config.flash.baud, 460_800);
        assert_eq!(config.flash.fallback_baud, 115_200);
        assert_eq!(config.flash.flash_size, "detect");
        assert_eq!(config.flash.offset, 0);
        assert_eq!(config.tool.backend, Backend::Auto);
        assert_eq!(config.tool.executables, vec!["esptool.py", "esptool"]);
        assert_eq!(config.timeouts.erase, 30);
        assert_eq!(config.timeouts.write, 60);
        assert_eq!(config.timeouts.fallback_write, 90);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [connection]
            serial = "/dev/ttyUSB1"

            [flash]
            baud = 921600
            offset = 0x1000

            [tool]
            backend = "external"
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.flash.baud, 921_600);
        assert_eq!(config.flash.fallback_baud, 115_200);
        assert_eq!(config.flash.offset, 0x1000);
        assert_eq!(config.tool.backend, Backend::External);
        assert_eq!(config.tool.executables.len(), 2);
    }

    #[test]
    fn test_invalid_backend() {
        assert!(Config::parse("[tool]\nbackend = \"jtag\"").is_err());
    }

    #[test]
    fn test_load_from_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[firmware]\nfile_name = \"app.bin\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.firmware.file_name, PathBuf::from("app.bin"));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[flash\nbaud = ").unwrap();

        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config { path: p, .. } if p == path));
    }
}
