//! Device access through helper processes.
//!
//! The listener is `cat <path>` with its stdout forwarded line by line from a
//! reader thread; the writer is a one-shot `printf` redirected into the
//! device. On rooted handsets both run behind `su -c`, on Linux hosts
//! behind `sudo -n`.
//!
//! Every helper leads its own process group. Stopping a helper signals the
//! whole group, so a `cat` started by `su` goes down with it.

use std::ffi::OsStr;
use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use quanta::Instant;
use tracing::{debug, warn};

use super::{DeviceTransport, LineSink, TaskHandle};
use crate::error::{ConfigError, TransportError};
use crate::modem::status::DevicePath;

/// How helper processes obtain access to the device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Elevation {
    /// Run helpers directly.
    None,
    /// `su -c <script>` (Android).
    #[default]
    Su,
    /// `sudo -n sh -c <script>`.
    Sudo,
}

impl Elevation {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Elevation::None),
            "su" => Ok(Elevation::Su),
            "sudo" => Ok(Elevation::Sudo),
            other => Err(ConfigError::UnknownElevation(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Elevation::None => "none",
            Elevation::Su => "su",
            Elevation::Sudo => "sudo",
        }
    }

    /// Program that runs the script.
    pub fn program(&self) -> &'static str {
        match self {
            Elevation::None => "sh",
            Elevation::Su => "su",
            Elevation::Sudo => "sudo",
        }
    }

    /// Builds the command that runs `script` with this elevation.
    pub fn command(&self, script: &str) -> Command {
        self.command_via(OsStr::new(self.program()), script)
    }

    /// Like [`Elevation::command`], with `program` standing in for the
    /// wrapper (e.g. `/system/xbin/su`). The command starts a new process
    /// group.
    pub fn command_via(&self, program: &OsStr, script: &str) -> Command {
        let mut cmd = Command::new(program);
        match self {
            Elevation::None | Elevation::Su => {
                cmd.arg("-c").arg(script);
            }
            Elevation::Sudo => {
                cmd.args(["-n", "sh", "-c"]).arg(script);
            }
        }
        cmd.process_group(0);
        cmd
    }
}

impl fmt::Display for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

type SharedChild = Arc<Mutex<Child>>;

/// How long a stopped helper group gets to exit on SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(200);

/// Transport backed by `cat`/`printf` helper processes.
pub struct ShellTransport {
    elevation: Elevation,
    wrapper: Option<PathBuf>,
    children: Mutex<Vec<SharedChild>>,
}

impl ShellTransport {
    pub fn new(elevation: Elevation) -> Self {
        ShellTransport {
            elevation,
            wrapper: None,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Runs `su`/`sudo` from `program` instead of `PATH`. Ignored without
    /// elevation.
    pub fn with_wrapper(mut self, program: impl AsRef<Path>) -> Self {
        self.wrapper = Some(program.as_ref().to_path_buf());
        self
    }

    pub fn elevation(&self) -> Elevation {
        self.elevation
    }

    fn helper(&self, script: &str) -> Command {
        match &self.wrapper {
            Some(program) if self.elevation != Elevation::None => {
                self.elevation.command_via(program.as_os_str(), script)
            }
            _ => self.elevation.command(script),
        }
    }

    /// Number of helper processes still tracked (running or not yet reaped).
    pub fn tracked_children(&self) -> usize {
        self.children.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn track(&self, child: Child) -> SharedChild {
        let shared = Arc::new(Mutex::new(child));
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.retain(|c| {
            let mut c = c.lock().unwrap_or_else(|e| e.into_inner());
            matches!(c.try_wait(), Ok(None))
        });
        children.push(shared.clone());
        shared
    }
}

impl Default for ShellTransport {
    fn default() -> Self {
        Self::new(Elevation::default())
    }
}

impl DeviceTransport for ShellTransport {
    fn open_listener(
        &self,
        path: &DevicePath,
        lifetime: Duration,
        sink: LineSink,
    ) -> Result<Box<dyn TaskHandle>, TransportError> {
        let script = format!("exec cat {}", shell_quote(path.as_str()));
        debug!(%path, elevation = %self.elevation, "starting listener");

        let setup_err = |source| TransportError::ListenerSetup {
            path: path.to_string(),
            source,
        };

        let mut child = self
            .helper(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(setup_err)?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(setup_err(std::io::Error::other("listener stdout not captured")));
        };

        let label = format!("listen {path}");
        let reader_path = path.to_string();
        let spawned = thread::Builder::new()
            .name("bandwatch-listen".into())
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                let mut raw = Vec::new();
                loop {
                    raw.clear();
                    match reader.read_until(b'\n', &mut raw) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!(path = %reader_path, error = %e, "device read failed");
                            break;
                        }
                    }
                    // Stray bytes on the port must not end the stream.
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    debug!(path = %reader_path, %line, "device line");
                    if sink.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(source) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(setup_err(source));
        }

        Ok(Box::new(ChildTask {
            label,
            child: self.track(child),
            started: Instant::now(),
            lifetime: Some(lifetime),
        }))
    }

    fn write(&self, path: &DevicePath, text: &str) -> Result<Box<dyn TaskHandle>, TransportError> {
        let script = format!(
            "printf '%s\\r\\n' {} > {}",
            shell_quote(text),
            shell_quote(path.as_str())
        );
        debug!(%path, command = %text, "writing command");

        let child = self
            .helper(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TransportError::Write {
                path: path.to_string(),
                source,
            })?;

        Ok(Box::new(ChildTask {
            label: format!("write {path}"),
            child: self.track(child),
            started: Instant::now(),
            lifetime: None,
        }))
    }

    fn release(&self) -> Result<(), TransportError> {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        let mut first_err = None;

        for shared in children.drain(..) {
            let mut child = shared.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = stop_child(&mut child, "lingering helper") {
                warn!(error = %e, "failed to release helper process");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Stops `child` and the rest of its process group, then reaps it.
///
/// `su` and `sudo` relay SIGTERM to the helper they started but cannot
/// relay SIGKILL, so the group gets SIGTERM first and SIGKILL after
/// [`TERM_GRACE`].
fn stop_child(child: &mut Child, what: &str) -> Result<(), TransportError> {
    let terminate_err = |source| TransportError::Terminate {
        what: what.to_string(),
        source,
    };

    if child.try_wait().map_err(terminate_err)?.is_some() {
        return Ok(());
    }

    let pgid = child.id() as libc::pid_t;
    if let Err(e) = signal_group(pgid, libc::SIGTERM) {
        debug!(task = what, error = %e, "SIGTERM to helper group failed");
    }

    let started = Instant::now();
    while !has_exited(pgid) && started.elapsed() < TERM_GRACE {
        thread::sleep(Duration::from_millis(5));
    }

    // The leader is not reaped yet, so its group id cannot have been reused.
    if let Err(e) = signal_group(pgid, libc::SIGKILL)
        && e.raw_os_error() != Some(libc::ESRCH)
    {
        debug!(task = what, error = %e, "SIGKILL to helper group failed");
        child.kill().map_err(terminate_err)?;
    }

    child.wait().map_err(|source| TransportError::Wait {
        what: what.to_string(),
        source,
    })?;
    Ok(())
}

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill has no memory preconditions; a negative pid addresses a
    // process group.
    if unsafe { libc::kill(-pgid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether `pid` has exited, without reaping it.
fn has_exited(pid: libc::pid_t) -> bool {
    // SAFETY: `info` is a valid out-parameter; WNOWAIT leaves the child for
    // `Child::wait`.
    unsafe {
        let mut info: libc::siginfo_t = std::mem::zeroed();
        let rc = libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        );
        rc == 0 && info.si_pid() != 0
    }
}

struct ChildTask {
    label: String,
    child: SharedChild,
    started: Instant,
    lifetime: Option<Duration>,
}

impl TaskHandle for ChildTask {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_finished(&mut self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(lifetime) = self.lifetime
            && self.started.elapsed() >= lifetime
        {
            if let Err(e) = stop_child(&mut child, &self.label) {
                warn!(task = %self.label, error = %e, "failed to stop expired helper");
            }
            return true;
        }

        match child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(task = %self.label, error = %e, "cannot poll helper process");
                true
            }
        }
    }

    fn terminate(&mut self) -> Result<(), TransportError> {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        stop_child(&mut child, &self.label)
    }

    fn wait(&mut self) -> Result<(), TransportError> {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        child
            .wait()
            .map(|_| ())
            .map_err(|source| TransportError::Wait {
                what: self.label.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Quoting ────────────────────────────────────────────────────────

    #[test]
    fn quote_plain() {
        assert_eq!(shell_quote("/dev/smd0"), "'/dev/smd0'");
    }

    #[test]
    fn quote_keeps_dollar_literal() {
        assert_eq!(shell_quote("AT$QCRSRP?"), "'AT$QCRSRP?'");
    }

    #[test]
    fn quote_escapes_single_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    // ─── Elevation ──────────────────────────────────────────────────────

    #[test]
    fn elevation_parse() {
        assert_eq!(Elevation::parse("SU").unwrap(), Elevation::Su);
        assert_eq!(Elevation::parse("sudo").unwrap(), Elevation::Sudo);
        assert_eq!(Elevation::parse("none").unwrap(), Elevation::None);
        assert!(matches!(
            Elevation::parse("doas"),
            Err(ConfigError::UnknownElevation(_))
        ));
    }

    #[test]
    fn elevation_command_shapes() {
        let cmd = Elevation::Sudo.command("id -u");
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-n", "sh", "-c", "id -u"]);

        let cmd = Elevation::Su.command("id -u");
        assert_eq!(cmd.get_program(), "su");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-c", "id -u"]);

        let cmd = Elevation::Su.command_via(OsStr::new("/system/xbin/su"), "id -u");
        assert_eq!(cmd.get_program(), "/system/xbin/su");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-c", "id -u"]);
    }

    // ─── Helper Processes ───────────────────────────────────────────────

    #[cfg(unix)]
    #[test]
    fn listener_streams_file_lines() {
        let file = std::env::temp_dir().join(format!("bandwatch-cat-{}", std::process::id()));
        std::fs::write(&file, "AT\r\n\r\nOK\r\n").unwrap();

        let transport = ShellTransport::new(Elevation::None);
        let (tx, rx) = crossbeam_channel::unbounded();
        let path = DevicePath::new(file.display().to_string());
        let mut listener = transport
            .open_listener(&path, Duration::from_secs(5), tx)
            .unwrap();

        let mut got = Vec::new();
        while let Ok(line) = rx.recv_timeout(Duration::from_secs(5)) {
            got.push(line);
        }
        assert_eq!(got, vec!["AT", "", "OK"]);

        listener.terminate().unwrap();
        transport.release().unwrap();
        assert_eq!(transport.tracked_children(), 0);
        std::fs::remove_file(&file).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn listener_survives_invalid_utf8() {
        let file = std::env::temp_dir().join(format!("bandwatch-noise-{}", std::process::id()));
        std::fs::write(&file, b"\xff\xfe junk\r\nAT\r\n\r\nOK\r\n").unwrap();

        let transport = ShellTransport::new(Elevation::None);
        let (tx, rx) = crossbeam_channel::unbounded();
        let path = DevicePath::new(file.display().to_string());
        let mut listener = transport
            .open_listener(&path, Duration::from_secs(5), tx)
            .unwrap();

        let mut got = Vec::new();
        while let Ok(line) = rx.recv_timeout(Duration::from_secs(5)) {
            got.push(line);
        }
        assert_eq!(got.len(), 4, "got {got:?}");
        assert!(got[0].contains("junk"));
        assert_eq!(got[1..], ["AT", "", "OK"]);

        listener.terminate().unwrap();
        transport.release().unwrap();
        std::fs::remove_file(&file).unwrap();
    }

    /// A `su` that forks its shell instead of exec'ing it, like the real one.
    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_stops_helper_behind_forking_su() {
        use std::ffi::CString;
        use std::io::{ErrorKind, Write};
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let dir = std::env::temp_dir().join(format!("bandwatch-su-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let wrapper = dir.join("su");
        std::fs::write(&wrapper, "#!/bin/sh\nsh -c \"$2\"\nstatus=$?\nexit $status\n").unwrap();
        std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let fifo = dir.join("smd0");
        let c_fifo = CString::new(fifo.as_os_str().as_bytes()).unwrap();
        // SAFETY: `c_fifo` is a valid NUL-terminated path.
        assert_eq!(unsafe { libc::mkfifo(c_fifo.as_ptr(), 0o600) }, 0);

        let transport = ShellTransport::new(Elevation::Su).with_wrapper(&wrapper);
        let (tx, rx) = crossbeam_channel::unbounded();
        let path = DevicePath::new(fifo.display().to_string());
        let mut listener = transport
            .open_listener(&path, Duration::from_secs(30), tx)
            .unwrap();

        // Opening the write end only succeeds once `cat` holds the read end.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut device = loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&fifo)
            {
                Ok(f) => break f,
                Err(e) if Instant::now() < deadline => {
                    assert_eq!(e.raw_os_error(), Some(libc::ENXIO));
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("listener never opened the device: {e}"),
            }
        };

        device.write_all(b"OK\r\n").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "OK");

        listener.terminate().unwrap();
        transport.release().unwrap();
        assert_eq!(transport.tracked_children(), 0);

        // With no reader left, writes fail with EPIPE.
        let deadline = Instant::now() + Duration::from_secs(2);
        let orphaned = loop {
            match device.write(b"AT\r\n") {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => break false,
                _ if Instant::now() >= deadline => break true,
                _ => thread::sleep(Duration::from_millis(10)),
            }
        };
        assert!(!orphaned, "cat outlived its su wrapper");

        drop(device);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn writer_appends_terminator() {
        let file = std::env::temp_dir().join(format!("bandwatch-printf-{}", std::process::id()));
        let transport = ShellTransport::new(Elevation::None);
        let path = DevicePath::new(file.display().to_string());

        let mut writer = transport.write(&path, "AT$QCRSRP?").unwrap();
        writer.wait().unwrap();
        assert!(writer.is_finished());

        let written = std::fs::read_to_string(&file).unwrap();
        assert_eq!(written, "AT$QCRSRP?\r\n");
        std::fs::remove_file(&file).unwrap();
    }
}
