//! Sources for the configured modem device path.
//!
//! Android exposes the radio interface layer's serial device through the
//! `rild.libargs` system property (`-d /dev/smd0`). Other platforms rely on
//! the `device.path` config key.

use std::process::{Command, Stdio};

use tracing::debug;

use crate::modem::status::DevicePath;

pub trait DeviceHintSource: Send + Sync {
    fn device_hint(&self) -> Option<DevicePath>;
}

/// A hint fixed at construction (usually from configuration).
#[derive(Debug, Clone, Default)]
pub struct StaticHint(pub Option<DevicePath>);

impl StaticHint {
    pub fn new(path: Option<String>) -> Self {
        StaticHint(
            path.map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .map(DevicePath::new),
        )
    }
}

impl DeviceHintSource for StaticHint {
    fn device_hint(&self) -> Option<DevicePath> {
        self.0.clone()
    }
}

/// Parses a `rild.libargs` value such as `-d /dev/smd0`.
///
/// Absent when the property is unset, `UNKNOWN`, or too short to carry a
/// path after the `-d ` flag.
pub fn parse_rild_libargs(value: &str) -> Option<DevicePath> {
    let value = value.trim();
    if value.is_empty() || value == "UNKNOWN" {
        return None;
    }
    let path = value.strip_prefix("-d").unwrap_or(value).trim();
    if path.is_empty() {
        return None;
    }
    Some(DevicePath::new(path))
}

/// Reads `rild.libargs` through `getprop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RildLibargs;

impl DeviceHintSource for RildLibargs {
    fn device_hint(&self) -> Option<DevicePath> {
        let output = Command::new("getprop")
            .arg("rild.libargs")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout);
        let hint = parse_rild_libargs(&value);
        debug!(value = %value.trim(), hint = ?hint, "rild.libargs");
        hint
    }
}

/// First source that yields a hint wins.
#[derive(Default)]
pub struct ChainedHint {
    sources: Vec<Box<dyn DeviceHintSource>>,
}

impl ChainedHint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, source: impl DeviceHintSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl DeviceHintSource for ChainedHint {
    fn device_hint(&self) -> Option<DevicePath> {
        self.sources.iter().find_map(|s| s.device_hint())
    }
}
