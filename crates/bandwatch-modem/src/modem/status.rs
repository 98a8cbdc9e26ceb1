use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

/// Outcome of the last session operation.
///
/// `Unresolved` marks an operation in progress. Observers must read it as
/// "not yet determined", never as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Unresolved,
    PrivilegeUnavailable,
    DeviceFound,
    NoDeviceFound,
    CommandSucceeded,
    CommandFailed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unresolved => "unresolved",
            SessionStatus::PrivilegeUnavailable => "privilege_unavailable",
            SessionStatus::DeviceFound => "device_found",
            SessionStatus::NoDeviceFound => "no_device_found",
            SessionStatus::CommandSucceeded => "command_succeeded",
            SessionStatus::CommandFailed => "command_failed",
        }
    }

    /// Whether an operation is still running.
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionStatus::Unresolved)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque path of a line-oriented device node (e.g. `/dev/smd0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        DevicePath(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DevicePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Path and status shared between the executor, the locator and observers.
///
/// Writers hold the execution lock; readers may look at any time.
#[derive(Debug, Default)]
pub struct SessionState {
    path: Mutex<Option<DevicePath>>,
    status: Mutex<SessionStatus>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn path(&self) -> Option<DevicePath> {
        self.path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_path(&self, path: Option<DevicePath>) {
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = path;
    }
}
