//! esptool invoked as an external process

use std::{
    ffi::OsString,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use super::{FlashTool, WriteRequest};
use crate::{
    config::Config,
    error::{Error, ToolError},
    logging::{PROGRESS, SUCCESS},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output of a process which ran to completion
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// The most useful description of why the process failed
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();

        if !stderr.is_empty() {
            stderr.to_owned()
        } else if !stdout.is_empty() {
            stdout.to_owned()
        } else {
            format!("process exited with {}", self.status)
        }
    }
}

/// Run `cmd` to completion, killing it once `timeout` has elapsed
///
/// Returns `Ok(None)` if the process was killed. A timeout too large to be
/// represented is no deadline at all. Its output is collected in
/// temporary files rather than pipes, so a chatty process can never block on a
/// full pipe while we are waiting for it.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
) -> io::Result<Option<CapturedOutput>> {
    debug!("Running command: {cmd:?}");

    let mut stdout = tempfile::tempfile()?;
    let mut stderr = tempfile::tempfile()?;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(stdout.try_clone()?)
        .stderr(stderr.try_clone()?)
        .spawn()?;

    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();

                return Err(e);
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(
                "Command timed out after {timeout:?}, killing process {}",
                child.id()
            );
            // The process may exit on its own between the two calls
            let _ = child.kill();
            child.wait()?;

            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    };

    debug!("Command exit status: {status}");

    Ok(Some(CapturedOutput {
        status,
        stdout: read_captured(&mut stdout)?,
        stderr: read_captured(&mut stderr)?,
    }))
}

fn read_captured(file: &mut File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// An esptool executable known to respond
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Esptool {
    program: String,
}

impl Esptool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: Vec<OsString>, timeout: Duration) -> Result<(), ToolError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);

        match run_with_timeout(&mut cmd, timeout) {
            Ok(Some(output)) if output.status.success() => Ok(()),
            Ok(Some(output)) => Err(ToolError::Failed(output.failure_detail())),
            Ok(None) => Err(ToolError::Timeout(timeout)),
            Err(e) => Err(ToolError::Failed(format!(
                "failed to run {}: {e}",
                self.program
            ))),
        }
    }
}

fn erase_args(port: &str) -> Vec<OsString> {
    ["--port", port, "erase_flash"].map(OsString::from).to_vec()
}

fn write_args(request: &WriteRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        String::from("--port"),
        request.port.clone(),
        String::from("--baud"),
        request.baud.to_string(),
        String::from("write_flash"),
        format!("--flash_size={}", request.flash_size),
        format!("{:#x}", request.offset),
    ]
    .map(OsString::from)
    .to_vec();
    args.push(request.firmware.clone().into_os_string());

    args
}

impl FlashTool for Esptool {
    fn name(&self) -> String {
        self.program.clone()
    }

    fn erase(&mut self, port: &str, timeout: Duration) -> Result<(), ToolError> {
        self.run(erase_args(port), timeout)
    }

    fn write_flash(&mut self, request: &WriteRequest) -> Result<(), ToolError> {
        self.run(write_args(request), request.timeout)
    }
}

/// Locates and installs esptool executables
#[derive(Debug, Clone)]
pub struct ExternalTools {
    executables: Vec<String>,
    install_command: Vec<String>,
    probe_timeout: Duration,
    install_timeout: Duration,
}

impl ExternalTools {
    pub fn new(
        executables: Vec<String>,
        install_command: Vec<String>,
        probe_timeout: Duration,
        install_timeout: Duration,
    ) -> Self {
        Self {
            executables,
            install_command,
            probe_timeout,
            install_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tool.executables.clone(),
            config.tool.install_command.clone(),
            config.timeouts.probe(),
            config.timeouts.install(),
        )
    }

    /// Return the first executable which answers `--help`
    ///
    /// Only a missing executable or a hung process rule a candidate out; its
    /// exit status is not checked.
    pub fn probe(&self) -> Option<Esptool> {
        self.executables.iter().find_map(|program| {
            let mut cmd = Command::new(program);
            cmd.arg("--help");

            match run_with_timeout(&mut cmd, self.probe_timeout) {
                Ok(Some(_)) => Some(Esptool::new(program.as_str())),
                Ok(None) => None,
                Err(e) => {
                    debug!("{program} is not available: {e}");
                    None
                }
            }
        })
    }

    /// Install esptool with the configured command
    pub fn install(&self) -> Result<(), Error> {
        let Some((program, args)) = self.install_command.split_first() else {
            return Err(Error::InstallFailed(String::from(
                "no install command is configured",
            )));
        };

        info!(target: PROGRESS, "esptool not found. Installing...");

        let mut cmd = Command::new(program);
        cmd.args(args);

        match run_with_timeout(&mut cmd, self.install_timeout) {
            Ok(Some(output)) if output.status.success() => {
                info!(target: SUCCESS, "esptool installed successfully!");
                Ok(())
            }
            Ok(Some(output)) => Err(Error::InstallFailed(output.failure_detail())),
            Ok(None) => Err(Error::InstallFailed(format!(
                "timed out after {}s",
                self.install_timeout.as_secs()
            ))),
            Err(e) => Err(Error::InstallFailed(format!("failed to run {program}: {e}"))),
        }
    }
}
