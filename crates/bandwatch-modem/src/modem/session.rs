//! # Modem Session
//!
//! Ties discovery and execution together for one modem. Construction runs
//! discovery; afterwards callers run commands against the discovered path.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bandwatch_modem::modem::session::{ModemSession, SessionParts};
//! use bandwatch_modem::transport::shell::{Elevation, ShellTransport};
//!
//! let parts = SessionParts::new(Arc::new(ShellTransport::new(Elevation::Su)));
//! let pending = ModemSession::spawn(parts).unwrap();
//! let session = pending.wait().unwrap();
//! let out = session.run_command("AT$QCRSRP?");
//! println!("{:?} {:?}", out.status, out.lines);
//! ```

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;

use super::executor::{
    CommandOutput, CommandSpec, DEFAULT_TIMEOUT, ExecutionLock, ExecutorConfig, SessionExecutor,
};
use super::locator::{DeviceLocator, Located, LocatorConfig};
use super::status::{DevicePath, SessionState, SessionStatus};
use crate::error::SessionError;
use crate::hint::{DeviceHintSource, StaticHint};
use crate::privilege::{EffectiveRoot, PrivilegeProbe};
use crate::transport::DeviceTransport;

/// Collaborators and tuning for a [`ModemSession`].
pub struct SessionParts {
    pub transport: Arc<dyn DeviceTransport>,
    pub privilege: Arc<dyn PrivilegeProbe>,
    pub hint: Arc<dyn DeviceHintSource>,
    pub lock: ExecutionLock,
    pub executor: ExecutorConfig,
    pub locator: LocatorConfig,
    /// Timeout for [`ModemSession::run_command`].
    pub command_timeout: Duration,
    /// Resend commands while the device stays silent.
    pub retry_on_silence: bool,
}

impl SessionParts {
    /// Defaults: root check via `geteuid`, no hint, the process-wide lock.
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        SessionParts {
            transport,
            privilege: Arc::new(EffectiveRoot),
            hint: Arc::new(StaticHint::default()),
            lock: ExecutionLock::process(),
            executor: ExecutorConfig::default(),
            locator: LocatorConfig::default(),
            command_timeout: DEFAULT_TIMEOUT,
            retry_on_silence: true,
        }
    }

    pub fn with_privilege(mut self, privilege: Arc<dyn PrivilegeProbe>) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn with_hint(mut self, hint: Arc<dyn DeviceHintSource>) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_lock(mut self, lock: ExecutionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_locator(mut self, locator: LocatorConfig) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Applies to session commands and discovery probes alike.
    pub fn with_retry_on_silence(mut self, retry_on_silence: bool) -> Self {
        self.retry_on_silence = retry_on_silence;
        self.locator.retry_on_silence = retry_on_silence;
        self
    }
}

/// One modem: its discovered path, last status, and command entry points.
pub struct ModemSession {
    executor: Arc<SessionExecutor>,
    locator: DeviceLocator,
    command_timeout: Duration,
    retry_on_silence: bool,
    discovery: Mutex<Option<Located>>,
}

impl ModemSession {
    fn build(parts: SessionParts, state: Arc<SessionState>) -> Self {
        let executor = Arc::new(SessionExecutor::new(
            parts.transport,
            parts.privilege,
            parts.lock,
            state,
            parts.executor,
        ));
        let locator = DeviceLocator::new(executor.clone(), parts.hint, parts.locator);
        ModemSession {
            executor,
            locator,
            command_timeout: parts.command_timeout,
            retry_on_silence: parts.retry_on_silence,
            discovery: Mutex::new(None),
        }
    }

    /// Builds the session and runs discovery on the calling thread.
    pub fn open(parts: SessionParts) -> Self {
        Self::open_with_state(parts, Arc::new(SessionState::new()))
    }

    fn open_with_state(parts: SessionParts, state: Arc<SessionState>) -> Self {
        let session = Self::build(parts, state);
        session.rediscover();
        session
    }

    /// Runs discovery on a background thread.
    ///
    /// The returned handle blocks in [`PendingSession::wait`] until discovery
    /// is done; [`PendingSession::state`] can be observed meanwhile.
    pub fn spawn(parts: SessionParts) -> Result<PendingSession, SessionError> {
        let state = Arc::new(SessionState::new());
        let (tx, rx) = crossbeam_channel::bounded(1);
        let thread_state = state.clone();

        let handle = thread::Builder::new()
            .name("bandwatch-discovery".into())
            .spawn(move || {
                let session = ModemSession::open_with_state(parts, thread_state);
                let _ = tx.send(session);
            })?;

        Ok(PendingSession {
            rx,
            state,
            handle: Some(handle),
        })
    }

    /// Discovers the device again, replacing the stored path.
    pub fn rediscover(&self) -> Located {
        let located = self.locator.locate();
        *self.discovery.lock().unwrap_or_else(|e| e.into_inner()) = Some(located.clone());
        located
    }

    /// Result of the most recent discovery.
    pub fn last_discovery(&self) -> Option<Located> {
        self.discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// `text` with the session's timeout and retry setting.
    pub fn command_spec(&self, text: impl Into<String>) -> CommandSpec {
        CommandSpec::new(text)
            .with_timeout(self.command_timeout)
            .with_retry(self.retry_on_silence)
    }

    /// Runs `text` as described by [`ModemSession::command_spec`].
    pub fn run_command(&self, text: &str) -> CommandOutput {
        self.run_command_with(&self.command_spec(text))
    }

    pub fn run_command_with(&self, spec: &CommandSpec) -> CommandOutput {
        self.executor.run_command(spec)
    }

    pub fn status(&self) -> SessionStatus {
        self.executor.state().status()
    }

    pub fn device_path(&self) -> Option<DevicePath> {
        self.executor.state().path()
    }

    /// Whether a device path is available for commands.
    pub fn is_ready(&self) -> bool {
        self.device_path().is_some()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn retry_on_silence(&self) -> bool {
        self.retry_on_silence
    }
}

/// A session whose discovery is still running.
pub struct PendingSession {
    rx: Receiver<ModemSession>,
    state: Arc<SessionState>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PendingSession {
    /// Path and status as seen right now; `Unresolved` while in progress.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Blocks until discovery finishes.
    pub fn wait(mut self) -> Result<ModemSession, SessionError> {
        let session = self.rx.recv().map_err(|_| SessionError::DiscoveryAborted)?;
        self.join();
        Ok(session)
    }

    /// Blocks for at most `timeout`. `Ok(None)` means still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ModemSession>, SessionError> {
        match self.rx.recv_timeout(timeout) {
            Ok(session) => {
                self.join();
                Ok(Some(session))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::DiscoveryAborted),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            debug!("discovery thread panicked after delivering its session");
        }
    }
}
