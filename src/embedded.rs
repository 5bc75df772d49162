//! Firmware payload compiled into the executable by `build.rs`

const PAYLOAD: &str = include_str!(concat!(env!("OUT_DIR"), "/firmware.b64"));

/// The base64-encoded firmware embedded at build time, if any
pub fn payload() -> Option<&'static str> {
    (!PAYLOAD.is_empty()).then_some(PAYLOAD)
}

/// Whether this executable carries its own firmware
pub fn is_bundled() -> bool {
    payload().is_some()
}
