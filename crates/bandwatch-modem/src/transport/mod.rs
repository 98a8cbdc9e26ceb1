//! # Device Transport
//!
//! The seam between the session core and whatever actually touches the
//! device node. A transport starts two kinds of long-running tasks:
//!
//! - a **listener** that streams lines read from the device into a
//!   [`LineSink`] until it is terminated or its lifetime runs out;
//! - a **writer** that pushes one command line to the device.
//!
//! Both are observed by polling their [`TaskHandle`]. Completion is never
//! signalled by callback.
//!
//! Implementations:
//!
//! - [`shell::ShellTransport`]: helper processes (`cat`, `printf`), optionally
//!   behind `su`/`sudo`.
//! - [`simulated::SimulatedTransport`]: in-memory scripted modems.

pub mod shell;
pub mod simulated;

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::TransportError;
use crate::modem::status::DevicePath;

/// Line terminator appended to every command written to a device.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Channel end a listener pushes device lines into.
pub type LineSink = Sender<String>;

/// Handle to a listener or writer task.
pub trait TaskHandle: Send {
    /// Short description for logs (e.g. `listen /dev/smd0`).
    fn label(&self) -> &str;

    /// Whether the task has stopped, for any reason.
    fn is_finished(&mut self) -> bool;

    /// Stops the task. Calling this on a finished task is a no-op.
    fn terminate(&mut self) -> Result<(), TransportError>;

    /// Blocks until the task stops on its own.
    fn wait(&mut self) -> Result<(), TransportError>;
}

/// Access to line-oriented device nodes.
pub trait DeviceTransport: Send + Sync {
    /// Starts streaming lines from `path` into `sink`. The listener stops by
    /// itself once `lifetime` has elapsed.
    fn open_listener(
        &self,
        path: &DevicePath,
        lifetime: Duration,
        sink: LineSink,
    ) -> Result<Box<dyn TaskHandle>, TransportError>;

    /// Writes `text` followed by [`LINE_TERMINATOR`] to `path`.
    fn write(&self, path: &DevicePath, text: &str) -> Result<Box<dyn TaskHandle>, TransportError>;

    /// Tears down anything still attached to a device from earlier calls.
    fn release(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Entry names in `dir`, sorted.
    fn list_devices(&self, dir: &Path) -> Result<Vec<String>, TransportError> {
        let entries = std::fs::read_dir(dir).map_err(|source| TransportError::ListDevices {
            dir: dir.display().to_string(),
            source,
        })?;

        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}
