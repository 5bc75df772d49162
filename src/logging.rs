//! Console output
//!
//! Every status line is a [log] record rendered as `[HH:MM:SS] TAG message`.
//! Success and progress lines are `info` records sent to the [SUCCESS] and
//! [PROGRESS] targets, which only changes the tag they are printed with.

use std::io::Write;

use crossterm::style::{StyledContent, Stylize};
use env_logger::Env;
use log::{Level, LevelFilter, Record};

/// Log target for lines reporting a completed step
pub const SUCCESS: &str = "esp32_autoflash::success";
/// Log target for lines announcing a step that is about to run
pub const PROGRESS: &str = "esp32_autoflash::progress";

/// Initialize the logger with the given [LevelFilter], unless overridden by
/// `RUST_LOG`
pub fn initialize_logger(filter: LevelFilter) {
    env_logger::Builder::from_env(Env::default().default_filter_or(filter.as_str()))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} {}",
                chrono::Local::now().format("%H:%M:%S"),
                tag(record),
                record.args()
            )
        })
        .init();
}

fn tag(record: &Record) -> StyledContent<&'static str> {
    match (record.level(), record.target()) {
        (Level::Info, SUCCESS) => "SUCCESS ".green().bold(),
        (Level::Info, PROGRESS) => "PROGRESS".cyan().bold(),
        (Level::Error, _) => "ERROR   ".red().bold(),
        (Level::Warn, _) => "WARN    ".yellow().bold(),
        (Level::Info, _) => "INFO    ".blue(),
        (Level::Debug, _) => "DEBUG   ".dark_grey(),
        (Level::Trace, _) => "TRACE   ".dark_grey(),
    }
}
