use thiserror::Error;

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not start listener on {path}: {source}")]
    ListenerSetup {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to terminate {what}: {source}")]
    Terminate {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for {what}: {source}")]
    Wait {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot list {dir}: {source}")]
    ListDevices {
        dir: String,
        #[source]
        source: std::io::Error,
    },
    #[error("device {0} is not available")]
    NoSuchDevice(String),
    #[error("listener on {0} refused by device")]
    ListenerRefused(String),
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid device pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("unknown elevation {0:?} (expected none, su or sudo)")]
    UnknownElevation(String),
}

// ── Session ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start discovery thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("discovery thread exited without a result")]
    DiscoveryAborted,
}
