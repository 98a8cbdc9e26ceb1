//! In-memory modems for `--simulate` mode and tests.
//!
//! Each simulated device answers the commands in its script: a write delivers
//! the echo (if enabled) followed by the scripted lines to every live
//! listener on that path. Unknown commands produce silence. Every transport
//! call is recorded as a [`TransportEvent`] so tests can check ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quanta::Instant;

use super::{DeviceTransport, LineSink, TaskHandle};
use crate::error::TransportError;
use crate::modem::status::DevicePath;

/// Scripted behaviour of one device node.
#[derive(Debug, Clone, Default)]
pub struct SimulatedModem {
    responses: HashMap<String, Vec<String>>,
    echo: bool,
    delay: Option<Duration>,
}

impl SimulatedModem {
    /// A modem that echoes commands, as most do by default (`ATE1`).
    pub fn new() -> Self {
        SimulatedModem {
            responses: HashMap::new(),
            echo: true,
            delay: None,
        }
    }

    /// Disables command echo (`ATE0`).
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Delays every response by `delay`, delivered from a background thread.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Lines sent back after the echo when `command` is written.
    pub fn respond<I, S>(mut self, command: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses
            .insert(command.to_string(), lines.into_iter().map(Into::into).collect());
        self
    }

    /// A Qualcomm modem camped on the given EARFCN.
    pub fn qualcomm(earfcn: u32) -> Self {
        SimulatedModem::new()
            .respond("AT", ["", "OK"])
            .respond(
                "AT$QCRSRP?",
                [format!("$QCRSRP: 1,{earfcn},1,-101,-75,34"), "OK".to_string()],
            )
    }

    fn reply(&self, command: &str) -> Option<Vec<String>> {
        let lines = self.responses.get(command)?;
        let mut out = Vec::with_capacity(lines.len() + 1);
        if self.echo {
            out.push(command.to_string());
        }
        out.extend(lines.iter().cloned());
        Some(out)
    }
}

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ListenerOpened(String),
    ListenerRefused(String),
    Write { path: String, text: String },
    Terminated(String),
    Released,
    Listed(String),
}

struct Listener {
    id: u64,
    path: String,
    sink: LineSink,
    stopped: Arc<AtomicBool>,
}

#[derive(Default)]
struct SimState {
    devices: BTreeMap<String, SimulatedModem>,
    refuse_listener: HashSet<String>,
    directories: HashMap<String, Vec<String>>,
    listeners: Vec<Listener>,
    events: Vec<TransportEvent>,
    next_id: u64,
}

/// Transport over a set of [`SimulatedModem`]s.
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `modem` at `path`.
    pub fn with_device(self, path: &str, modem: SimulatedModem) -> Self {
        self.lock().devices.insert(path.to_string(), modem);
        self
    }

    /// Makes listener setup on `path` fail.
    pub fn refuse_listener(self, path: &str) -> Self {
        self.lock().refuse_listener.insert(path.to_string());
        self
    }

    /// Sets the entries [`DeviceTransport::list_devices`] reports for `dir`.
    pub fn with_directory<I, S>(self, dir: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .directories
            .insert(dir.to_string(), entries.into_iter().map(Into::into).collect());
        self
    }

    /// Snapshot of the recorded calls.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.lock().events.clone()
    }

    /// Commands written so far, in order.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write { path, text } => Some((path.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Listeners not yet terminated or released.
    pub fn live_listeners(&self) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|l| !l.stopped.load(Ordering::Relaxed))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn deliver(listeners: &[Listener], path: &str, lines: &[String]) {
    for listener in listeners
        .iter()
        .filter(|l| l.path == path && !l.stopped.load(Ordering::Relaxed))
    {
        for line in lines {
            let _ = listener.sink.send(line.clone());
        }
    }
}

impl DeviceTransport for SimulatedTransport {
    fn open_listener(
        &self,
        path: &DevicePath,
        lifetime: Duration,
        sink: LineSink,
    ) -> Result<Box<dyn TaskHandle>, TransportError> {
        let mut state = self.lock();
        let path = path.to_string();

        if state.refuse_listener.contains(&path) {
            state.events.push(TransportEvent::ListenerRefused(path.clone()));
            return Err(TransportError::ListenerRefused(path));
        }
        if !state.devices.contains_key(&path) {
            state.events.push(TransportEvent::ListenerRefused(path.clone()));
            return Err(TransportError::NoSuchDevice(path));
        }

        let id = state.next_id;
        state.next_id += 1;
        let stopped = Arc::new(AtomicBool::new(false));
        state.listeners.push(Listener {
            id,
            path: path.clone(),
            sink,
            stopped: stopped.clone(),
        });
        state.events.push(TransportEvent::ListenerOpened(path.clone()));

        Ok(Box::new(SimTask {
            label: format!("listen {path}"),
            transport: self.clone(),
            listener: Some(id),
            stopped,
            started: Instant::now(),
            lifetime: Some(lifetime),
        }))
    }

    fn write(&self, path: &DevicePath, text: &str) -> Result<Box<dyn TaskHandle>, TransportError> {
        let mut state = self.lock();
        let path = path.to_string();
        state.events.push(TransportEvent::Write {
            path: path.clone(),
            text: text.to_string(),
        });

        let Some(modem) = state.devices.get(&path) else {
            return Err(TransportError::NoSuchDevice(path));
        };

        if let Some(lines) = modem.reply(text) {
            match modem.delay {
                Some(delay) => {
                    let transport = self.clone();
                    let path = path.clone();
                    std::thread::spawn(move || {
                        std::thread::sleep(delay);
                        let state = transport.lock();
                        deliver(&state.listeners, &path, &lines);
                    });
                }
                None => deliver(&state.listeners, &path, &lines),
            }
        }

        // The write itself completes immediately.
        Ok(Box::new(SimTask {
            label: format!("write {path}"),
            transport: self.clone(),
            listener: None,
            stopped: Arc::new(AtomicBool::new(true)),
            started: Instant::now(),
            lifetime: None,
        }))
    }

    fn release(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        for listener in state.listeners.drain(..) {
            listener.stopped.store(true, Ordering::Relaxed);
        }
        state.events.push(TransportEvent::Released);
        Ok(())
    }

    fn list_devices(&self, dir: &Path) -> Result<Vec<String>, TransportError> {
        let mut state = self.lock();
        let key = dir.display().to_string();
        state.events.push(TransportEvent::Listed(key.clone()));
        Ok(state.directories.get(&key).cloned().unwrap_or_default())
    }
}

struct SimTask {
    label: String,
    transport: SimulatedTransport,
    listener: Option<u64>,
    stopped: Arc<AtomicBool>,
    started: Instant,
    lifetime: Option<Duration>,
}

impl SimTask {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(id) = self.listener {
            self.transport.lock().listeners.retain(|l| l.id != id);
        }
    }
}

impl TaskHandle for SimTask {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_finished(&mut self) -> bool {
        if let Some(lifetime) = self.lifetime
            && self.started.elapsed() >= lifetime
        {
            self.stop();
        }
        self.stopped.load(Ordering::Relaxed)
    }

    fn terminate(&mut self) -> Result<(), TransportError> {
        if self.listener.is_some() && !self.stopped.load(Ordering::Relaxed) {
            self.transport
                .lock()
                .events
                .push(TransportEvent::Terminated(self.label.clone()));
        }
        self.stop();
        Ok(())
    }

    fn wait(&mut self) -> Result<(), TransportError> {
        while !self.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}
