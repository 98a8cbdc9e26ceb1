use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::hint::{ChainedHint, DeviceHintSource, RildLibargs, StaticHint};
use crate::modem::executor::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, ExecutorConfig};
use crate::modem::locator::{DEFAULT_DEVICE_PATTERN, DEFAULT_SCAN_DIR, LocatorConfig};
use crate::modem::session::SessionParts;
use crate::privilege::ElevationProbe;
use crate::transport::DeviceTransport;
use crate::transport::shell::{Elevation, ShellTransport};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BandwatchConfigInput {
    pub version: u32,
    pub device: DeviceConfigInput,
    pub command: CommandConfigInput,
    pub privilege: PrivilegeConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfigInput {
    pub path: Option<String>,
    pub scan_dir: Option<String>,
    pub pattern: Option<String>,
    pub rild_property: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandConfigInput {
    pub timeout_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub retry_on_silence: Option<bool>,
    pub max_resends: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfigInput {
    pub elevation: Option<String>,
    pub wrapper: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Tried before scanning.
    pub path: Option<String>,
    pub locator: LocatorConfig,
    /// Also consult `rild.libargs` when `path` is unset.
    pub rild_property: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: None,
            locator: LocatorConfig::default(),
            rild_property: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub timeout: Duration,
    pub retry_on_silence: bool,
    pub executor: ExecutorConfig,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_on_silence: true,
            executor: ExecutorConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BandwatchConfig {
    pub version: u32,
    pub device: DeviceConfig,
    pub command: CommandConfig,
    pub elevation: Elevation,
    /// Path of the `su`/`sudo` binary, when not the one on `PATH`.
    pub wrapper: Option<PathBuf>,
}

impl Default for BandwatchConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            device: DeviceConfig::default(),
            command: CommandConfig::default(),
            elevation: Elevation::default(),
            wrapper: None,
        }
    }
}

impl BandwatchConfigInput {
    pub fn resolve(self) -> Result<BandwatchConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let pattern_src = self
            .device
            .pattern
            .unwrap_or_else(|| DEFAULT_DEVICE_PATTERN.to_string());
        let pattern = Regex::new(&pattern_src).map_err(|source| ConfigError::Pattern {
            pattern: pattern_src.clone(),
            source,
        })?;

        let path = self.device.path.and_then(|p| {
            let trimmed = p.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });

        let retry_on_silence = self.command.retry_on_silence.unwrap_or(true);

        let device = DeviceConfig {
            path,
            locator: LocatorConfig {
                scan_dir: PathBuf::from(
                    self.device
                        .scan_dir
                        .unwrap_or_else(|| DEFAULT_SCAN_DIR.to_string()),
                ),
                pattern,
                probe_timeout: self
                    .command
                    .probe_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_TIMEOUT),
                retry_on_silence,
            },
            rild_property: self.device.rild_property.unwrap_or(true),
        };

        let poll_interval = self
            .command
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }

        let command = CommandConfig {
            timeout: self
                .command
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
            retry_on_silence,
            executor: ExecutorConfig {
                poll_interval,
                max_resends: self.command.max_resends,
            },
        };

        let elevation = match self.privilege.elevation {
            Some(raw) => Elevation::parse(&raw)?,
            None => Elevation::default(),
        };
        let wrapper = self
            .privilege
            .wrapper
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .map(PathBuf::from);

        Ok(BandwatchConfig {
            version,
            device,
            command,
            elevation,
            wrapper,
        })
    }
}

impl BandwatchConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(BandwatchConfig::default());
        }
        let parsed: BandwatchConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Hint chain: the configured path, then `rild.libargs` if enabled.
    pub fn hint_source(&self) -> Arc<dyn DeviceHintSource> {
        let mut chain = ChainedHint::new().then(StaticHint::new(self.device.path.clone()));
        if self.device.rild_property {
            chain = chain.then(RildLibargs);
        }
        Arc::new(chain)
    }

    /// Privilege check through the configured elevation wrapper.
    pub fn privilege_probe(&self) -> ElevationProbe {
        let probe = ElevationProbe::new(self.elevation);
        match &self.wrapper {
            Some(wrapper) => probe.with_wrapper(wrapper),
            None => probe,
        }
    }

    /// Shell transport through the configured elevation wrapper.
    pub fn shell_transport(&self) -> ShellTransport {
        let transport = ShellTransport::new(self.elevation);
        match &self.wrapper {
            Some(wrapper) => transport.with_wrapper(wrapper),
            None => transport,
        }
    }

    /// Session collaborators for `transport`, tuned from this config.
    pub fn session_parts(&self, transport: Arc<dyn DeviceTransport>) -> SessionParts {
        SessionParts::new(transport)
            .with_privilege(Arc::new(self.privilege_probe()))
            .with_hint(self.hint_source())
            .with_executor(self.command.executor.clone())
            .with_locator(self.device.locator.clone())
            .with_command_timeout(self.command.timeout)
            .with_retry_on_silence(self.command.retry_on_silence)
    }
}
