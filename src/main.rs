use std::{
    env,
    error::Error as _,
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use esp32_autoflash::{
    embedded,
    flasher::{Backend, FlashSettings, SystemTools},
    logging::{initialize_logger, SUCCESS},
    serial::{list_ports, SystemPorts},
    Config, Context, DeploymentMode, Error, Orchestrator,
};
use log::{debug, error, info, LevelFilter};
use miette::{Diagnostic, IntoDiagnostic, Result};

#[derive(Debug, Parser)]
#[clap(about, version)]
struct Cli {
    /// Serial port connected to the ESP32, skipping auto-detection
    #[clap(short, long)]
    port: Option<String>,

    /// Directory containing `firmware.bin` and `esp32-autoflash.toml`
    #[clap(long)]
    work_dir: Option<PathBuf>,

    /// Flashing tool to use
    #[clap(long, value_enum)]
    backend: Option<Backend>,

    /// Baud rate of the first write attempt
    #[clap(short, long)]
    baud: Option<u32>,

    /// Never install esptool, even if it is missing
    #[clap(long)]
    no_install: bool,

    /// Ask for confirmation before using a port which does not look like an
    /// ESP32 board
    #[clap(long)]
    confirm_port: bool,

    /// Exit without waiting for Enter (Windows only)
    #[clap(long)]
    no_pause: bool,

    /// Log level
    #[clap(long, default_value = "info", env = "ESP32_AUTOFLASH_LOG")]
    log_level: LevelFilter,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the available serial ports and exit without flashing
    ListPorts,
}

fn main() -> Result<ExitCode> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    initialize_logger(cli.log_level);
    debug!("{:#?}", cli);

    if let Some(Commands::ListPorts) = cli.command {
        list_ports(&SystemPorts)?;
        return Ok(ExitCode::SUCCESS);
    }

    // A bundled executable is handed to end users as-is, so it never installs
    // anything and looks for its files next to itself.
    let deployment = if embedded::is_bundled() || cli.no_install {
        DeploymentMode::Standalone
    } else {
        DeploymentMode::Source
    };

    let work_dir = match &cli.work_dir {
        Some(dir) => dir.clone(),
        None if embedded::is_bundled() => executable_dir()?,
        None => env::current_dir().into_diagnostic()?,
    };
    debug!("Working directory: {}", work_dir.display());

    print_header();
    let success = match Config::load(&work_dir) {
        Ok(config) => provision(&cli, &config, work_dir, deployment),
        Err(err) => {
            report_error(&err);
            false
        }
    };
    print_result(success);

    if cfg!(windows) && !cli.no_pause {
        pause();
    }

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn provision(cli: &Cli, config: &Config, work_dir: PathBuf, deployment: DeploymentMode) -> bool {
    let mut settings = FlashSettings::from(config);
    if let Some(baud) = cli.baud {
        settings.baud = baud;
    }

    let context = Context {
        work_dir,
        firmware_file: config.firmware.file_name.clone(),
        embedded_firmware: embedded::payload().map(String::from),
        port: cli.port.clone().or_else(|| config.connection.serial.clone()),
        confirm_port: cli.confirm_port,
        deployment,
        settings,
    };

    let backend = cli.backend.unwrap_or(config.tool.backend);
    let tools = SystemTools::from_config(config, backend);

    match Orchestrator::new(context, &SystemPorts, &tools).run() {
        Ok(report) => {
            debug!(
                "Flashed {} firmware with {} on {}",
                report.firmware, report.tool, report.port.name
            );
            for attempt in &report.attempts {
                debug!("Write attempt: {attempt}");
            }

            true
        }
        Err(err) => {
            report_error(&err);
            false
        }
    }
}

/// Log an error with its causes and, if there is one, its help text
fn report_error(err: &Error) {
    error!("{err}");

    let mut source = err.source();
    while let Some(cause) = source {
        error!("  caused by: {cause}");
        source = cause.source();
    }
    if let Some(help) = err.help() {
        info!("{help}");
    }
}

fn executable_dir() -> Result<PathBuf> {
    let exe = env::current_exe().into_diagnostic()?;

    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn print_header() {
    println!("{}", "=".repeat(60));
    println!("{:^60}", "ESP32 AUTO FLASHER");
    println!("{}", "=".repeat(60));
    println!();
}

fn print_result(success: bool) {
    println!();
    if success {
        info!(target: SUCCESS, "PROCESS COMPLETED SUCCESSFULLY!");
        info!(target: SUCCESS, "The ESP32 is programmed and ready to use");
    } else {
        error!("PROCESS FAILED!");
        error!("Check the errors above and try again");
    }
}

/// Keep the console window of a double-clicked executable open
fn pause() {
    if !io::stdin().is_terminal() {
        return;
    }

    println!();
    print!("Press Enter to close...");
    let _ = io::stdout().flush();

    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
}
