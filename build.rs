//! Embeds a firmware image into the executable.
//!
//! When `ESP32_AUTOFLASH_FIRMWARE` points at a binary file, its contents are
//! base64-encoded into `$OUT_DIR/firmware.b64` and picked up by
//! `src/embedded.rs`. Otherwise an empty payload is written, which means no
//! firmware is embedded.

use std::{env, fs, path::PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};

const FIRMWARE_ENV: &str = "ESP32_AUTOFLASH_FIRMWARE";

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let output = out_dir.join("firmware.b64");

    println!("cargo:rerun-if-env-changed={FIRMWARE_ENV}");

    let payload = match env::var_os(FIRMWARE_ENV) {
        Some(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            println!("cargo:rerun-if-changed={}", path.display());

            let data = fs::read(&path)
                .unwrap_or_else(|e| panic!("Failed to read firmware {}: {e}", path.display()));
            println!(
                "cargo:warning=Embedding {} ({} bytes) into the executable",
                path.display(),
                data.len()
            );

            STANDARD.encode(data)
        }
        _ => String::new(),
    };

    fs::write(&output, payload).expect("Failed to write embedded firmware payload");
}
