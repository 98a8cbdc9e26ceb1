//! # bandwatch-modem
//!
//! Talks to a cellular modem through its AT-command device node and reports
//! the serving LTE band.
//!
//! - [`modem::framer`]: echo and terminal-marker framing of raw output.
//! - [`modem::executor`]: one command at a time, listener and writer helpers,
//!   resend on silence.
//! - [`modem::locator`]: hint-then-scan discovery of the device node.
//! - [`modem::session`]: the public session handle.
//! - [`transport`]: shell helpers and an in-memory simulated modem.

pub mod config;
pub mod error;
pub mod hint;
pub mod modem;
pub mod privilege;
pub mod transport;
