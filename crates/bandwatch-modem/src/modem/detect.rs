//! Serving-band detection on Qualcomm modems via `AT$QCRSRP?`.
//!
//! The response payload looks like `: <cell>,<earfcn>,<pci>,...` once the
//! label is stripped; the second field is the downlink EARFCN.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::band::{Band, LTE_BANDS, resolve_earfcn};
use super::executor::CommandSpec;
use super::session::ModemSession;
use super::status::SessionStatus;

/// Serving-cell RSRP query.
pub const BAND_QUERY: &str = "AT$QCRSRP?";

/// Why detection fell back to [`Band::UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Fallback {
    /// The query did not succeed.
    CommandFailed(SessionStatus),
    /// No payload line carried a channel field.
    NoChannel,
    /// The channel field was not a number.
    BadChannel(String),
    /// The channel is outside every catalogued band.
    UnmappedChannel(u32),
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::CommandFailed(status) => write!(f, "band query failed ({status})"),
            Fallback::NoChannel => write!(f, "no channel in response"),
            Fallback::BadChannel(raw) => write!(f, "unparseable channel {raw:?}"),
            Fallback::UnmappedChannel(earfcn) => write!(f, "EARFCN {earfcn} not in any band"),
        }
    }
}

/// Outcome of [`BandDetector::detect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub band: Band,
    pub earfcn: Option<u32>,
    pub status: SessionStatus,
    pub fallback: Option<Fallback>,
    pub lines: Vec<String>,
}

impl Detection {
    pub fn is_known(&self) -> bool {
        self.band.is_known()
    }
}

pub struct BandDetector<'a> {
    session: &'a ModemSession,
    catalog: &'a [Band],
    spec: CommandSpec,
}

impl<'a> BandDetector<'a> {
    pub fn new(session: &'a ModemSession) -> Self {
        BandDetector {
            session,
            catalog: LTE_BANDS,
            spec: session.command_spec(BAND_QUERY),
        }
    }

    pub fn with_catalog(mut self, catalog: &'a [Band]) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_spec(mut self, spec: CommandSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn detect(&self) -> Detection {
        let out = self.session.run_command_with(&self.spec);
        let detection = if out.succeeded() {
            interpret(self.catalog, out.lines, out.status)
        } else {
            Detection {
                band: Band::UNKNOWN,
                earfcn: None,
                status: out.status,
                fallback: Some(Fallback::CommandFailed(out.status)),
                lines: out.lines,
            }
        };

        match &detection.fallback {
            None => info!(band = %detection.band, earfcn = ?detection.earfcn, "serving band"),
            Some(reason) => warn!(%reason, "band unknown"),
        }
        detection
    }
}

/// Resolves the band from normalized `AT$QCRSRP?` payload lines.
pub fn interpret(catalog: &[Band], lines: Vec<String>, status: SessionStatus) -> Detection {
    let field = lines.iter().find_map(|line| {
        let fields: Vec<&str> = line.split(',').collect();
        (fields.len() >= 2).then(|| fields[1].trim().to_string())
    });
    debug!(?field, "channel field");

    let (band, earfcn, fallback) = match field {
        None => (Band::UNKNOWN, None, Some(Fallback::NoChannel)),
        Some(raw) => match raw.parse::<u32>() {
            Err(_) => (Band::UNKNOWN, None, Some(Fallback::BadChannel(raw))),
            Ok(earfcn) => match resolve_earfcn(catalog, earfcn) {
                Some(band) => (band, Some(earfcn), None),
                None => (
                    Band::UNKNOWN,
                    Some(earfcn),
                    Some(Fallback::UnmappedChannel(earfcn)),
                ),
            },
        },
    };

    Detection {
        band,
        earfcn,
        status,
        fallback,
        lines,
    }
}
