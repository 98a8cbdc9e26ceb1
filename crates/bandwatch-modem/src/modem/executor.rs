//! # Command Execution
//!
//! Runs one AT command against the device and collects its response.
//!
//! ```text
//!  lock ─► listen ─► write ─► poll ──(complete | timeout | listener gone)──► terminate ─► normalize ─► release ─► unlock
//!                              │  ▲
//!                              ▼  │
//!                         sleep + resend (retry_on_silence)
//! ```
//!
//! Only one command is ever outstanding: every call, including the probes
//! made during discovery, takes the [`ExecutionLock`] for its whole duration.
//! That keeps a single reader and a single writer attached to the device,
//! so two responses never interleave in one buffer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use once_cell::sync::Lazy;
use quanta::Instant;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::framer::{self, ERROR_MARKER};
use super::status::{DevicePath, SessionState, SessionStatus};
use crate::error::TransportError;
use crate::privilege::PrivilegeProbe;
use crate::transport::{DeviceTransport, TaskHandle};

/// Default time a command may take before it is considered failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default polling granularity of the response loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Command used to check that a device speaks AT.
pub const PROBE_COMMAND: &str = "AT";

// ─── Execution Lock ─────────────────────────────────────────────────────────

static PROCESS_LOCK: Lazy<ExecutionLock> = Lazy::new(ExecutionLock::new);

/// Serializes command execution. Not reentrant.
///
/// Clones share the same underlying mutex. Sessions that must not run
/// concurrently with each other (the usual case: one physical modem) should
/// share [`ExecutionLock::process`]; tests create isolated locks.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLock(Arc<Mutex<()>>);

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by everything in this process.
    pub fn process() -> Self {
        PROCESS_LOCK.clone()
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Command Spec ───────────────────────────────────────────────────────────

/// What to run and how patiently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub text: String,
    /// Re-send the command on every poll tick without a complete response.
    pub retry_on_silence: bool,
    pub timeout: Duration,
}

impl CommandSpec {
    /// `text` with retry enabled and the default timeout.
    pub fn new(text: impl Into<String>) -> Self {
        CommandSpec {
            text: text.into(),
            retry_on_silence: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// The `AT` device probe.
    pub fn probe(timeout: Duration) -> Self {
        CommandSpec::new(PROBE_COMMAND).with_timeout(timeout)
    }

    pub fn with_retry(mut self, retry_on_silence: bool) -> Self {
        self.retry_on_silence = retry_on_silence;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─── Response Buffer ────────────────────────────────────────────────────────

/// Lines collected for one command.
///
/// Stops accepting lines once the response is framed, so trailing output
/// (a duplicate response to a resend, unsolicited reports) never lands
/// behind the terminal marker.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    command: String,
    lines: Vec<String>,
    complete: bool,
}

impl ResponseBuffer {
    pub fn new(command: &str) -> Self {
        ResponseBuffer {
            command: command.to_string(),
            lines: Vec::new(),
            complete: false,
        }
    }

    /// Appends a line. Returns `false` if the response was already complete.
    pub fn push(&mut self, line: String) -> bool {
        if self.complete {
            return false;
        }
        self.lines.push(line);
        self.complete = framer::is_complete(&self.command, &self.lines);
        true
    }

    /// Moves pending lines from `rx` until empty or the response completes.
    pub fn drain(&mut self, rx: &Receiver<String>) -> usize {
        let mut taken = 0;
        while !self.complete {
            let Ok(line) = rx.try_recv() else {
                break;
            };
            self.push(line);
            taken += 1;
        }
        taken
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.complete = false;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Why a command did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFailure {
    /// No device path is set; nothing was attempted.
    NoDevice,
    /// The listener could not be started, or was dead on arrival.
    ListenerSetupFailed,
    /// The command could not be written.
    WriteFailed,
    /// The listener stopped before a complete response arrived.
    ListenerFinished,
    /// No complete response before the deadline.
    Timeout,
    /// The device answered `ERROR`.
    DeviceError,
    /// A framed response that did not end in `OK`.
    Malformed,
}

/// Result of [`SessionExecutor::run_command`].
#[derive(Debug)]
pub struct CommandOutput {
    /// Normalized payload lines.
    pub lines: Vec<String>,
    pub status: SessionStatus,
    pub failure: Option<CommandFailure>,
    /// Privileges were reported unavailable; the attempt went ahead anyway.
    pub privilege_unavailable: bool,
    /// How many times the command was re-sent.
    pub resends: u32,
    /// Transport errors seen along the way, including teardown.
    pub faults: Vec<TransportError>,
}

impl CommandOutput {
    fn skipped(status: SessionStatus) -> Self {
        CommandOutput {
            lines: Vec::new(),
            status,
            failure: Some(CommandFailure::NoDevice),
            privilege_unavailable: false,
            resends: 0,
            faults: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::CommandSucceeded
    }
}

// ─── Executor ───────────────────────────────────────────────────────────────

/// Tuning for the response loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    /// Upper bound on resends per call. `None` resends on every tick.
    pub max_resends: Option<u32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_resends: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Complete,
    TimedOut,
    ListenerFinished,
}

/// Drives listen/write/poll/retry for one command at a time.
pub struct SessionExecutor {
    transport: Arc<dyn DeviceTransport>,
    privilege: Arc<dyn PrivilegeProbe>,
    lock: ExecutionLock,
    state: Arc<SessionState>,
    config: ExecutorConfig,
}

impl SessionExecutor {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        privilege: Arc<dyn PrivilegeProbe>,
        lock: ExecutionLock,
        state: Arc<SessionState>,
        config: ExecutorConfig,
    ) -> Self {
        SessionExecutor {
            transport,
            privilege,
            lock,
            state,
            config,
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    pub fn privilege(&self) -> &Arc<dyn PrivilegeProbe> {
        &self.privilege
    }

    /// Runs `spec` against the session's device path.
    ///
    /// Without a path this returns immediately with no lines and leaves the
    /// session status untouched.
    pub fn run_command(&self, spec: &CommandSpec) -> CommandOutput {
        let _guard = self.lock.acquire();
        let Some(path) = self.state.path() else {
            warn!(command = %spec.text, "no device path set, command not run");
            return CommandOutput::skipped(self.state.status());
        };
        self.execute(&path, spec)
    }

    /// Runs `spec` against `path` regardless of the session's own path.
    /// Used to probe discovery candidates.
    pub fn run_on(&self, path: &DevicePath, spec: &CommandSpec) -> CommandOutput {
        let _guard = self.lock.acquire();
        self.execute(path, spec)
    }

    /// Stores a discovery result under the execution lock.
    pub fn commit(&self, path: Option<DevicePath>, status: SessionStatus) {
        let _guard = self.lock.acquire();
        self.state.set_path(path);
        self.state.set_status(status);
    }

    /// Sets the session status under the execution lock.
    pub fn set_status(&self, status: SessionStatus) {
        let _guard = self.lock.acquire();
        self.state.set_status(status);
    }

    fn execute(&self, path: &DevicePath, spec: &CommandSpec) -> CommandOutput {
        self.state.set_status(SessionStatus::Unresolved);
        let mut buffer = ResponseBuffer::new(&spec.text);
        let mut faults = Vec::new();
        let mut failure = None;
        let mut resends = 0;
        let mut exit = None;

        let privilege_unavailable = !self.privilege.is_available();
        if privilege_unavailable {
            warn!(%path, "elevated privileges unavailable, trying anyway");
            self.state.set_status(SessionStatus::PrivilegeUnavailable);
        }

        let (line_tx, line_rx) = crossbeam_channel::unbounded();
        let mut listener = match self.transport.open_listener(path, spec.timeout, line_tx) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(%path, error = %e, "could not listen to device");
                faults.push(e);
                None
            }
        };

        let mut writer: Option<Box<dyn TaskHandle>> = None;
        let dead_on_arrival = listener.as_mut().is_some_and(|l| l.is_finished());
        match listener.as_mut() {
            None => failure = Some(CommandFailure::ListenerSetupFailed),
            Some(_) if dead_on_arrival => {
                warn!(%path, "listener finished before the command was sent");
                failure = Some(CommandFailure::ListenerSetupFailed);
            }
            Some(l) => {
                debug!(%path, command = %spec.text, "running");
                match self.transport.write(path, &spec.text) {
                    Ok(w) => {
                        writer = Some(w);
                        exit = Some(self.poll(
                            path,
                            spec,
                            &mut **l,
                            &mut writer,
                            &mut buffer,
                            &line_rx,
                            &mut resends,
                            &mut faults,
                        ));
                    }
                    Err(e) => {
                        warn!(%path, error = %e, "could not write command");
                        faults.push(e);
                        failure = Some(CommandFailure::WriteFailed);
                    }
                }
            }
        }

        // Lines that arrived after the last poll still belong to this response.
        buffer.drain(&line_rx);

        for task in [writer.as_mut(), listener.as_mut()].into_iter().flatten() {
            if let Err(e) = task.terminate() {
                warn!(task = task.label(), error = %e, "failed to terminate");
                faults.push(e);
            }
        }

        let normalized = framer::normalize(&spec.text, buffer.lines());
        let status = if normalized.succeeded {
            SessionStatus::CommandSucceeded
        } else {
            SessionStatus::CommandFailed
        };

        if !normalized.succeeded && failure.is_none() {
            failure = Some(classify(&buffer, &normalized.lines, exit));
        }

        match failure {
            None => debug!(%path, command = %spec.text, lines = normalized.lines.len(), resends, "command succeeded"),
            Some(kind) => info!(%path, command = %spec.text, failure = ?kind, resends, "command failed"),
        }

        // Lingering readers would duplicate output on the next call.
        if let Err(e) = self.transport.release() {
            warn!(error = %e, "failed to release transport");
            faults.push(e);
        }

        self.state.set_status(status);

        CommandOutput {
            lines: normalized.lines,
            status,
            failure,
            privilege_unavailable,
            resends,
            faults,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn poll(
        &self,
        path: &DevicePath,
        spec: &CommandSpec,
        listener: &mut dyn TaskHandle,
        writer: &mut Option<Box<dyn TaskHandle>>,
        buffer: &mut ResponseBuffer,
        line_rx: &Receiver<String>,
        resends: &mut u32,
        faults: &mut Vec<TransportError>,
    ) -> LoopExit {
        let started = Instant::now();
        loop {
            buffer.drain(line_rx);
            if !buffer.is_empty() && buffer.is_complete() {
                return LoopExit::Complete;
            }
            if started.elapsed() > spec.timeout {
                return LoopExit::TimedOut;
            }
            if listener.is_finished() {
                warn!(%path, task = listener.label(), "listener finished while waiting for response");
                return LoopExit::ListenerFinished;
            }

            thread::sleep(self.config.poll_interval);

            let may_resend = self.config.max_resends.is_none_or(|max| *resends < max);
            if spec.retry_on_silence && may_resend {
                // Blind resend: the device may act on the command more than
                // once. Cap it with `max_resends` where that matters.
                debug!(%path, command = %spec.text, "no response, resending");
                self.resend(path, spec, writer, faults);
                *resends += 1;
            }
        }
    }

    fn resend(
        &self,
        path: &DevicePath,
        spec: &CommandSpec,
        writer: &mut Option<Box<dyn TaskHandle>>,
        faults: &mut Vec<TransportError>,
    ) {
        if let Some(old) = writer.as_mut()
            && let Err(e) = old.terminate()
        {
            warn!(task = old.label(), error = %e, "failed to terminate previous write");
            faults.push(e);
        }

        match self.transport.write(path, &spec.text) {
            Ok(mut w) => {
                if let Err(e) = w.wait() {
                    warn!(task = w.label(), error = %e, "resend did not complete");
                    faults.push(e);
                }
                *writer = Some(w);
            }
            Err(e) => {
                warn!(%path, error = %e, "resend failed");
                faults.push(e);
            }
        }
    }
}

fn classify(buffer: &ResponseBuffer, payload: &[String], exit: Option<LoopExit>) -> CommandFailure {
    if payload.last().is_some_and(|l| l == ERROR_MARKER) {
        return CommandFailure::DeviceError;
    }
    match exit {
        Some(LoopExit::ListenerFinished) => CommandFailure::ListenerFinished,
        Some(LoopExit::TimedOut) => CommandFailure::Timeout,
        _ if buffer.is_complete() => CommandFailure::Malformed,
        _ => CommandFailure::Timeout,
    }
}
