use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn autoflash() -> Command {
    let mut cmd = Command::cargo_bin("esp32-autoflash").unwrap();
    cmd.env_remove("RUST_LOG").arg("--no-pause");
    cmd
}

#[test]
fn help() {
    autoflash()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("list-ports"));
}

#[test]
fn invalid_backend() {
    autoflash()
        .args(["--backend", "jtag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("auto"));
}

#[test]
fn missing_esptool_without_install() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("esp32-autoflash.toml"),
        "[tool]\nexecutables = [\"esp32-autoflash-no-such-esptool\"]\n",
    )
    .unwrap();

    autoflash()
        .arg("--work-dir")
        .arg(dir.path())
        .args(["--port", "/dev/ttyUSB9", "--backend", "external", "--no-install"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No flashing tool is available"));
}

#[cfg(unix)]
#[test]
fn missing_firmware() {
    let dir = tempfile::tempdir().unwrap();
    // Any executable answering `--help` passes the availability probe
    fs::write(
        dir.path().join("esp32-autoflash.toml"),
        "[tool]\nexecutables = [\"sh\"]\n",
    )
    .unwrap();

    autoflash()
        .arg("--work-dir")
        .arg(dir.path())
        .args(["--port", "/dev/ttyUSB9", "--backend", "external", "--no-install"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Firmware not found"));
}

#[test]
fn malformed_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("esp32-autoflash.toml"), "[flash\n").unwrap();

    autoflash()
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("ESP32 AUTO FLASHER"))
        .stderr(predicate::str::contains("Failed to load configuration file"))
        .stderr(predicate::str::contains("PROCESS FAILED"));
}
