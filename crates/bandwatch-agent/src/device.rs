//! Transport wiring: real device nodes through shell helpers, or an
//! in-memory modem for `--simulate`.

use std::sync::Arc;

use bandwatch_modem::config::BandwatchConfig;
use bandwatch_modem::hint::StaticHint;
use bandwatch_modem::modem::session::SessionParts;
use bandwatch_modem::privilege::AssumePrivileged;
use bandwatch_modem::transport::simulated::{SimulatedModem, SimulatedTransport};

/// Channel the simulated modem reports (band 3, 1800 MHz).
pub const SIMULATED_EARFCN: u32 = 1575;

/// Builds session collaborators for either mode.
pub fn session_parts(config: &BandwatchConfig, simulate: bool) -> SessionParts {
    if simulate {
        simulated_parts(config)
    } else {
        config.session_parts(Arc::new(config.shell_transport()))
    }
}

/// A Qualcomm modem at `<scan_dir>/smd0`, next to a node that is never
/// probed, with privileges assumed and no `getprop` lookup.
fn simulated_parts(config: &BandwatchConfig) -> SessionParts {
    let dir = config.device.locator.scan_dir.display().to_string();
    let modem_path = config.device.locator.scan_dir.join("smd0");
    let transport = SimulatedTransport::new()
        .with_device(
            &modem_path.display().to_string(),
            SimulatedModem::qualcomm(SIMULATED_EARFCN),
        )
        .with_directory(&dir, ["smd0", "tty0"]);

    tracing::info!(device = %modem_path.display(), earfcn = SIMULATED_EARFCN, "simulated modem attached");

    config
        .session_parts(Arc::new(transport))
        .with_privilege(Arc::new(AssumePrivileged(true)))
        .with_hint(Arc::new(StaticHint::new(config.device.path.clone())))
}
