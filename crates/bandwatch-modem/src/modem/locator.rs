//! # Device Discovery
//!
//! Finds the device node that speaks AT, in two tiers:
//!
//! 1. the configured hint (config key or `rild.libargs`), if any;
//! 2. every entry of the device directory matching the name pattern
//!    (default `^smd\d+$`), in listing order.
//!
//! A candidate is accepted when an `AT` probe comes back `OK` with an empty
//! payload line. Discovery has no global deadline; it is bounded by the sum
//! of the probe timeouts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::executor::{CommandSpec, DEFAULT_TIMEOUT, SessionExecutor};
use super::status::{DevicePath, SessionStatus};
use crate::hint::DeviceHintSource;

/// Default directory scanned for modem nodes.
pub const DEFAULT_SCAN_DIR: &str = "/dev";
/// Default name pattern for Qualcomm shared-memory modem ports.
pub const DEFAULT_DEVICE_PATTERN: &str = r"^smd\d+$";

static DEFAULT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_DEVICE_PATTERN).expect("default device pattern is valid"));

/// Where and how to look for candidates.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub scan_dir: PathBuf,
    pub pattern: Regex,
    pub probe_timeout: Duration,
    /// Resend the `AT` probe while a candidate stays silent.
    pub retry_on_silence: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        LocatorConfig {
            scan_dir: PathBuf::from(DEFAULT_SCAN_DIR),
            pattern: default_pattern(),
            probe_timeout: DEFAULT_TIMEOUT,
            retry_on_silence: true,
        }
    }
}

fn default_pattern() -> Regex {
    DEFAULT_PATTERN.clone()
}

/// Result of [`DeviceLocator::locate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: Option<DevicePath>,
    pub status: SessionStatus,
    /// Candidates probed, in order.
    pub probed: Vec<DevicePath>,
}

pub struct DeviceLocator {
    executor: Arc<SessionExecutor>,
    hint: Arc<dyn DeviceHintSource>,
    config: LocatorConfig,
}

impl DeviceLocator {
    pub fn new(
        executor: Arc<SessionExecutor>,
        hint: Arc<dyn DeviceHintSource>,
        config: LocatorConfig,
    ) -> Self {
        DeviceLocator {
            executor,
            hint,
            config,
        }
    }

    /// Discovers the device and stores the result on the session.
    pub fn locate(&self) -> Located {
        self.executor.set_status(SessionStatus::Unresolved);
        let mut probed = Vec::new();

        if !self.executor.privilege().is_available() {
            warn!("elevated privileges unavailable, discovery may fail");
            self.executor.set_status(SessionStatus::PrivilegeUnavailable);
        }

        let hint = self.hint.device_hint();
        let mut found = None;

        if let Some(candidate) = hint {
            debug!(%candidate, "trying configured device");
            probed.push(candidate.clone());
            if self.validate(&candidate) {
                found = Some(candidate);
            }
        }

        if found.is_none() {
            for candidate in self.scan() {
                if probed.contains(&candidate) {
                    continue;
                }
                debug!(%candidate, "possible device");
                probed.push(candidate.clone());
                if self.validate(&candidate) {
                    found = Some(candidate);
                    break;
                }
            }
        }

        let status = if found.is_some() {
            SessionStatus::DeviceFound
        } else {
            SessionStatus::NoDeviceFound
        };

        match &found {
            Some(path) => info!(%path, probed = probed.len(), "modem device found"),
            None => warn!(probed = probed.len(), dir = %self.config.scan_dir.display(), "no modem device found"),
        }

        self.executor.commit(found.clone(), status);

        Located {
            path: found,
            status,
            probed,
        }
    }

    /// Candidates from the device directory, in listing order.
    pub fn scan(&self) -> Vec<DevicePath> {
        let names = match self.executor.transport().list_devices(&self.config.scan_dir) {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "cannot scan for devices");
                return Vec::new();
            }
        };

        filter_candidates(&self.config.scan_dir, &names, &self.config.pattern)
    }

    fn validate(&self, candidate: &DevicePath) -> bool {
        let spec =
            CommandSpec::probe(self.config.probe_timeout).with_retry(self.config.retry_on_silence);
        let out = self.executor.run_on(candidate, &spec);
        let ok = is_bare_at_reply(&out.lines);
        debug!(%candidate, ok, status = %out.status, "probe");
        ok
    }
}

/// A modem answers `AT` with exactly one empty payload line.
pub fn is_bare_at_reply(lines: &[String]) -> bool {
    matches!(lines, [only] if only.is_empty())
}

/// Joins the names matching `pattern` onto `dir`.
pub fn filter_candidates(dir: &Path, names: &[String], pattern: &Regex) -> Vec<DevicePath> {
    names
        .iter()
        .filter(|name| pattern.is_match(name))
        .map(|name| DevicePath::new(dir.join(name).display().to_string()))
        .collect()
}
