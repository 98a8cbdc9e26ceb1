//! Whether the process can reach device nodes that need root.
//!
//! The answer is advisory: the session records `PrivilegeUnavailable` but
//! still attempts the operation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::debug;

use crate::transport::shell::Elevation;

pub trait PrivilegeProbe: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Available when the process already runs as root.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveRoot;

impl PrivilegeProbe for EffectiveRoot {
    fn is_available(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
}

/// Asks the elevation wrapper for `id -u` and expects `0`.
#[derive(Debug, Clone)]
pub struct ElevationProbe {
    elevation: Elevation,
    wrapper: Option<PathBuf>,
}

impl ElevationProbe {
    pub fn new(elevation: Elevation) -> Self {
        ElevationProbe {
            elevation,
            wrapper: None,
        }
    }

    /// Asks `program` instead of the `su`/`sudo` on `PATH`.
    pub fn with_wrapper(mut self, program: impl AsRef<Path>) -> Self {
        self.wrapper = Some(program.as_ref().to_path_buf());
        self
    }
}

impl PrivilegeProbe for ElevationProbe {
    fn is_available(&self) -> bool {
        if EffectiveRoot.is_available() {
            return true;
        }
        if self.elevation == Elevation::None {
            return false;
        }

        let program = match &self.wrapper {
            Some(path) => path.as_os_str(),
            None => OsStr::new(self.elevation.program()),
        };
        let output = self
            .elevation
            .command_via(program, "id -u")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(out) => {
                let uid = String::from_utf8_lossy(&out.stdout);
                let granted = out.status.success() && uid.trim() == "0";
                debug!(elevation = %self.elevation, granted, "privilege check");
                granted
            }
            Err(e) => {
                debug!(elevation = %self.elevation, error = %e, "privilege check failed to run");
                false
            }
        }
    }
}

/// Fixed answer, for simulation.
#[derive(Debug, Clone, Copy)]
pub struct AssumePrivileged(pub bool);

impl PrivilegeProbe for AssumePrivileged {
    fn is_available(&self) -> bool {
        self.0
    }
}
