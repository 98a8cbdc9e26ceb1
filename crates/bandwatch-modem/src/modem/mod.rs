//! # Modem Session Layer
//!
//! AT-command sessions against a line-oriented modem device: response
//! framing, serialized command execution with retry on silence, device
//! discovery, and serving-band detection on top.

pub mod band;
pub mod detect;
pub mod executor;
pub mod framer;
pub mod locator;
pub mod session;
pub mod status;
