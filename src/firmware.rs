//! Locating the firmware image to flash
//!
//! An embedded payload always wins over a file in the working directory. A
//! payload is decoded into a temporary file which is removed once the
//! [ResolvedFirmware] is dropped; a local file is used in place and never
//! touched.

use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use tempfile::TempPath;

use crate::{
    error::Error,
    logging::{PROGRESS, SUCCESS},
};

/// Where a firmware image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareSource {
    Embedded,
    LocalFile,
}

impl fmt::Display for FirmwareSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareSource::Embedded => write!(f, "embedded"),
            FirmwareSource::LocalFile => write!(f, "local file"),
        }
    }
}

/// A firmware image available on disk, ready to be handed to a flashing tool
#[derive(Debug)]
pub struct ResolvedFirmware {
    path: PathBuf,
    source: FirmwareSource,
    len: u64,
    temp: Option<TempPath>,
}

impl ResolvedFirmware {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> FirmwareSource {
        self.source
    }

    /// Size of the image in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the file at [path](Self::path) was created by this run
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Delete the temporary file, if one was created
    ///
    /// Dropping the value has the same effect but swallows any error.
    pub fn cleanup(mut self) -> Result<(), Error> {
        if let Some(temp) = self.temp.take() {
            temp.close()?;
            info!("Temporary files removed");
        }

        Ok(())
    }
}

/// Resolve the firmware to flash
///
/// `payload` is the base64-encoded embedded firmware; when absent,
/// `work_dir/file_name` is used if it exists.
pub fn resolve_firmware(
    payload: Option<&str>,
    work_dir: &Path,
    file_name: &Path,
) -> Result<ResolvedFirmware, Error> {
    match payload {
        Some(payload) => extract_embedded(payload),
        None => find_local(work_dir, file_name),
    }
}

fn extract_embedded(payload: &str) -> Result<ResolvedFirmware, Error> {
    info!(target: PROGRESS, "Extracting embedded firmware...");

    let data = decode_payload(payload)?;

    let mut file = tempfile::Builder::new()
        .prefix("esp32-autoflash-")
        .suffix(".bin")
        .tempfile()?;
    file.write_all(&data)?;
    file.flush()?;

    let temp = file.into_temp_path();
    debug!("Firmware written to {}", temp.display());
    info!(target: SUCCESS, "Firmware extracted: {} bytes", data.len());

    Ok(ResolvedFirmware {
        path: temp.to_path_buf(),
        source: FirmwareSource::Embedded,
        len: data.len() as u64,
        temp: Some(temp),
    })
}

/// Decode a base64 payload, ignoring any ASCII whitespace it was wrapped with
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, Error> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    STANDARD.decode(compact).map_err(Error::DecodeError)
}

fn find_local(work_dir: &Path, file_name: &Path) -> Result<ResolvedFirmware, Error> {
    let path = work_dir.join(file_name);

    match path.metadata() {
        Ok(metadata) if metadata.is_file() => {
            info!("Using local firmware: {}", path.display());

            Ok(ResolvedFirmware {
                path,
                source: FirmwareSource::LocalFile,
                len: metadata.len(),
                temp: None,
            })
        }
        _ => Err(Error::FirmwareNotFound(path)),
    }
}
