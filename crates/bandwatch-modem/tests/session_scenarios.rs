//! End-to-end session behaviour against the simulated transport.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bandwatch_modem::hint::StaticHint;
use bandwatch_modem::modem::band::Band;
use bandwatch_modem::modem::detect::{BandDetector, Fallback};
use bandwatch_modem::modem::executor::{
    CommandFailure, CommandSpec, ExecutionLock, ExecutorConfig, SessionExecutor,
};
use bandwatch_modem::modem::locator::LocatorConfig;
use bandwatch_modem::modem::session::{ModemSession, SessionParts};
use bandwatch_modem::modem::status::{DevicePath, SessionState, SessionStatus};
use bandwatch_modem::privilege::AssumePrivileged;
use bandwatch_modem::transport::simulated::{SimulatedModem, SimulatedTransport, TransportEvent};

const SMD0: &str = "/dev/smd0";
const SMD1: &str = "/dev/smd1";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

fn fast_executor() -> ExecutorConfig {
    ExecutorConfig {
        poll_interval: Duration::from_millis(5),
        max_resends: None,
    }
}

fn parts(transport: SimulatedTransport) -> SessionParts {
    SessionParts::new(Arc::new(transport))
        .with_privilege(Arc::new(AssumePrivileged(true)))
        .with_lock(ExecutionLock::new())
        .with_executor(fast_executor())
        .with_locator(LocatorConfig {
            probe_timeout: Duration::from_millis(60),
            ..LocatorConfig::default()
        })
        .with_command_timeout(Duration::from_millis(120))
}

fn executor_on(transport: SimulatedTransport, path: &str) -> SessionExecutor {
    let state = Arc::new(SessionState::new());
    state.set_path(Some(DevicePath::new(path)));
    SessionExecutor::new(
        Arc::new(transport),
        Arc::new(AssumePrivileged(true)),
        ExecutionLock::new(),
        state,
        fast_executor(),
    )
}

fn spec(text: &str) -> CommandSpec {
    CommandSpec::new(text).with_timeout(Duration::from_millis(120))
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn successful_query_is_colon_truncated() {
    init_tracing();
    let transport = SimulatedTransport::new().with_device(SMD0, SimulatedModem::qualcomm(1575));
    let executor = executor_on(transport, SMD0);

    let out = executor.run_command(&spec("AT$QCRSRP?"));
    assert_eq!(out.lines, vec![": 1,1575,1,-101,-75,34".to_string()]);
    assert_eq!(out.status, SessionStatus::CommandSucceeded);
    assert!(out.failure.is_none());
    assert_eq!(executor.state().status(), SessionStatus::CommandSucceeded);
}

#[test]
fn probe_yields_empty_payload_line_and_is_accepted() {
    init_tracing();
    let transport = SimulatedTransport::new()
        .with_device(SMD0, SimulatedModem::new().respond("AT", ["", "OK"]))
        .with_directory("/dev", ["smd0"]);

    let executor = executor_on(transport.clone(), SMD0);
    let out = executor.run_command(&spec("AT"));
    assert_eq!(out.lines, vec![String::new()]);
    assert_eq!(out.status, SessionStatus::CommandSucceeded);

    let session = ModemSession::open(parts(transport));
    assert_eq!(session.status(), SessionStatus::DeviceFound);
    assert_eq!(session.device_path(), Some(DevicePath::new(SMD0)));
}

#[test]
fn device_error_keeps_error_marker() {
    init_tracing();
    let modem = SimulatedModem::new().respond("AT$QCRSRP?", ["ERROR"]);
    let transport = SimulatedTransport::new().with_device(SMD0, modem);
    let executor = executor_on(transport, SMD0);

    let out = executor.run_command(&spec("AT$QCRSRP?"));
    assert_eq!(out.lines, vec!["ERROR".to_string()]);
    assert_eq!(out.status, SessionStatus::CommandFailed);
    assert_eq!(out.failure, Some(CommandFailure::DeviceError));
}

#[test]
fn silence_fails_and_band_falls_back() {
    init_tracing();
    let modem = SimulatedModem::new().respond("AT", ["", "OK"]);
    let transport = SimulatedTransport::new()
        .with_device(SMD0, modem)
        .with_directory("/dev", ["smd0"]);

    let session = ModemSession::open(parts(transport));
    assert_eq!(session.status(), SessionStatus::DeviceFound);

    let out = session.run_command("AT$QCRSRP?");
    assert!(out.lines.is_empty());
    assert_eq!(out.status, SessionStatus::CommandFailed);
    assert!(out.resends > 0);

    let detection = BandDetector::new(&session)
        .with_spec(spec("AT$QCRSRP?"))
        .detect();
    assert_eq!(detection.band, Band::UNKNOWN);
    assert_eq!(
        detection.fallback,
        Some(Fallback::CommandFailed(SessionStatus::CommandFailed))
    );
}

#[test]
fn scan_probes_matching_entries_in_order() {
    init_tracing();
    // smd0 is listed but absent, so the listener on it is refused.
    let transport = SimulatedTransport::new()
        .with_device(SMD1, SimulatedModem::qualcomm(6300))
        .with_device("/dev/tty0", SimulatedModem::qualcomm(6300))
        .with_directory("/dev", ["smd0", "smd1", "tty0"]);

    let session = ModemSession::open(parts(transport.clone()));
    let located = session.last_discovery().expect("discovery ran");

    assert_eq!(
        located.probed,
        vec![DevicePath::new(SMD0), DevicePath::new(SMD1)]
    );
    assert_eq!(located.path, Some(DevicePath::new(SMD1)));
    assert_eq!(session.status(), SessionStatus::DeviceFound);

    let probed_tty = transport.events().iter().any(|e| match e {
        TransportEvent::ListenerOpened(p) | TransportEvent::ListenerRefused(p) => p == "/dev/tty0",
        TransportEvent::Write { path, .. } => path == "/dev/tty0",
        _ => false,
    });
    assert!(!probed_tty, "tty0 must never be probed");
}

#[test]
fn silent_candidate_is_skipped() {
    init_tracing();
    let transport = SimulatedTransport::new()
        .with_device(SMD0, SimulatedModem::new())
        .with_device(SMD1, SimulatedModem::qualcomm(1575))
        .with_directory("/dev", ["smd0", "smd1"]);

    let session = ModemSession::open(parts(transport));
    assert_eq!(session.device_path(), Some(DevicePath::new(SMD1)));

    let detection = BandDetector::new(&session).detect();
    assert_eq!(detection.band.number, 3);
    assert_eq!(detection.earfcn, Some(1575));
}

// ─── Discovery ──────────────────────────────────────────────────────────────

#[test]
fn empty_directory_finds_nothing() {
    init_tracing();
    let transport = SimulatedTransport::new().with_directory("/dev", Vec::<String>::new());
    let session = ModemSession::open(parts(transport.clone()));

    assert_eq!(session.status(), SessionStatus::NoDeviceFound);
    assert!(session.device_path().is_none());
    assert!(transport.writes().is_empty());
}

#[test]
fn error_reply_to_at_is_not_a_modem() {
    init_tracing();
    let transport = SimulatedTransport::new()
        .with_device(SMD0, SimulatedModem::new().respond("AT", ["", "ERROR"]))
        .with_directory("/dev", ["smd0"]);

    let session = ModemSession::open(parts(transport.clone()));
    assert_eq!(session.status(), SessionStatus::NoDeviceFound);
    assert!(session.device_path().is_none());
    assert_eq!(transport.writes(), [(SMD0.to_string(), "AT".to_string())]);
}

#[test]
fn hint_wins_over_scan() {
    init_tracing();
    let transport = SimulatedTransport::new()
        .with_device(SMD0, SimulatedModem::qualcomm(1575))
        .with_device("/dev/smd7", SimulatedModem::qualcomm(1575))
        .with_directory("/dev", ["smd0", "smd7"]);
    let parts =
        parts(transport.clone()).with_hint(Arc::new(StaticHint::new(Some("/dev/smd7".into()))));

    let session = ModemSession::open(parts);
    let located = session.last_discovery().expect("discovery ran");
    assert_eq!(located.path, Some(DevicePath::new("/dev/smd7")));
    assert_eq!(located.probed, vec![DevicePath::new("/dev/smd7")]);
    assert!(
        !transport
            .events()
            .contains(&TransportEvent::Listed("/dev".into()))
    );
}

#[test]
fn failed_hint_falls_back_to_scan_without_reprobing() {
    init_tracing();
    let transport = SimulatedTransport::new()
        .with_device(SMD1, SimulatedModem::qualcomm(1575))
        .with_directory("/dev", ["smd0", "smd1"]);
    let parts = parts(transport).with_hint(Arc::new(StaticHint::new(Some(SMD0.into()))));

    let session = ModemSession::open(parts);
    let located = session.last_discovery().expect("discovery ran");
    assert_eq!(
        located.probed,
        vec![DevicePath::new(SMD0), DevicePath::new(SMD1)]
    );
    assert_eq!(located.path, Some(DevicePath::new(SMD1)));
}

#[test]
fn missing_privilege_is_advisory() {
    init_tracing();
    let transport = SimulatedTransport::new()
        .with_device(SMD0, SimulatedModem::qualcomm(1575))
        .with_directory("/dev", ["smd0"]);
    let parts = parts(transport).with_privilege(Arc::new(AssumePrivileged(false)));

    let session = ModemSession::open(parts);
    assert_eq!(session.status(), SessionStatus::DeviceFound);

    let out = session.run_command("AT$QCRSRP?");
    assert!(out.privilege_unavailable);
    assert!(out.succeeded());
}

// ─── Concurrency ────────────────────────────────────────────────────────────

#[test]
fn concurrent_commands_do_not_interleave() {
    init_tracing();
    let transport = SimulatedTransport::new().with_device(SMD0, SimulatedModem::qualcomm(1575));
    let executor = Arc::new(executor_on(transport.clone(), SMD0));

    let workers: Vec<_> = ["AT", "AT$QCRSRP?"]
        .into_iter()
        .map(|command| {
            let executor = executor.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let out = executor.run_command(&spec(command));
                    assert!(out.succeeded(), "{command}: {:?}", out.failure);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let events = transport.events();
    let blocks: Vec<&[TransportEvent]> = events
        .split_inclusive(|e| *e == TransportEvent::Released)
        .collect();
    assert_eq!(blocks.len(), 10);

    for block in blocks {
        assert!(
            matches!(block.first(), Some(TransportEvent::ListenerOpened(_))),
            "block must start with a listener: {block:?}"
        );
        assert_eq!(block.last(), Some(&TransportEvent::Released));

        let texts: Vec<&str> = block
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(!texts.is_empty());
        assert!(
            texts.iter().all(|t| *t == texts[0]),
            "writes from different commands interleaved: {texts:?}"
        );
        assert_eq!(
            block
                .iter()
                .filter(|e| matches!(e, TransportEvent::ListenerOpened(_)))
                .count(),
            1
        );
    }
}

#[test]
fn discovery_and_commands_share_the_lock() {
    init_tracing();
    let modem = SimulatedModem::qualcomm(1575).with_delay(Duration::from_millis(10));
    let transport = SimulatedTransport::new()
        .with_device(SMD0, modem)
        .with_directory("/dev", ["smd0"]);
    let lock = ExecutionLock::new();

    let pending = ModemSession::spawn(parts(transport.clone()).with_lock(lock.clone())).unwrap();
    let state = pending.state().clone();

    // Holding the lock keeps discovery between steps; it never sees a failure.
    let guard = lock.acquire();
    assert_ne!(state.status(), SessionStatus::NoDeviceFound);
    drop(guard);

    let session = pending.wait().unwrap();
    assert_eq!(session.status(), SessionStatus::DeviceFound);
    assert_eq!(transport.live_listeners(), 0);
}
