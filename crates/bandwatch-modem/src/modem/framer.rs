//! # Response Framing
//!
//! Decides when a complete AT response has arrived in the stream of lines read
//! from the device, and strips the echo/label/terminal noise from it.
//!
//! A response is framed by a **start** line (an echo of the command in one of
//! several textual forms) and an **end** line (`OK` or `ERROR`). The transport
//! sometimes mangles the echo, so matching is done against five forms:
//!
//! | Form | Example for `AT\$QCRSRP?` |
//! |------|---------------------------|
//! | literal           | `AT\$QCRSRP?` |
//! | escapes removed   | `AT$QCRSRP?`  |
//! | prefix removed    | `QCRSRP?`     |
//! | query removed     | `QCRSRP`      |
//! | label             | `QCRSRP:`     |

/// Success terminal marker.
pub const OK_MARKER: &str = "OK";
/// Error terminal marker.
pub const ERROR_MARKER: &str = "ERROR";

const ESCAPE: char = '\\';
const VENDOR_PREFIX: &str = "AT$";
const QUERY: char = '?';

/// Whether a line is one of the terminal markers.
pub fn is_terminal(line: &str) -> bool {
    line == OK_MARKER || line == ERROR_MARKER
}

/// The five textual forms a modem may echo a command back as.
pub fn echo_forms(command: &str) -> [String; 5] {
    let unescaped: String = command.chars().filter(|&c| c != ESCAPE).collect();
    let unprefixed = unescaped
        .strip_prefix(VENDOR_PREFIX)
        .unwrap_or(&unescaped)
        .to_string();
    let unqueried = unprefixed
        .strip_suffix(QUERY)
        .unwrap_or(&unprefixed)
        .to_string();
    let label = format!("{unqueried}:");

    [command.to_string(), unescaped, unprefixed, unqueried, label]
}

/// Payload extracted from a framed response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Normalized {
    pub lines: Vec<String>,
    pub succeeded: bool,
}

/// Locates the start (echo) and end (terminal) indices of a response.
///
/// Returns `None` unless both are present with `end > start`.
pub fn frame<S: AsRef<str>>(command: &str, lines: &[S]) -> Option<(usize, usize)> {
    let forms = echo_forms(command);
    let matches_echo = |line: &str| {
        forms
            .iter()
            .any(|form| !form.is_empty() && line.contains(form.as_str()))
    };

    let start = lines.iter().position(|l| matches_echo(l.as_ref()))?;
    let end = lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, l)| is_terminal(l.as_ref()))
        .map(|(i, _)| i)?;

    Some((start, end))
}

/// Whether `lines` contains a complete response to `command`.
///
/// Terminal markers seen before any echo are ignored: they are most likely
/// the tail of a previous command still draining from the device.
pub fn is_complete<S: AsRef<str>>(command: &str, lines: &[S]) -> bool {
    frame(command, lines).is_some()
}

/// Strips the echo line, the response label and the success marker.
///
/// The error marker is left in place, so a failed response keeps `ERROR`
/// as its last payload line.
pub fn normalize(command: &str, lines: &[String]) -> Normalized {
    let mut out: Vec<String> = lines.to_vec();

    if out.first().is_some_and(|first| first == command) {
        out.remove(0);
    }

    if let Some(first) = out.first_mut()
        && let Some(idx) = first.find(':')
    {
        first.replace_range(..idx, "");
    }

    let succeeded = out.last().is_some_and(|last| last == OK_MARKER);
    if succeeded {
        out.pop();
    }

    Normalized {
        lines: out,
        succeeded,
    }
}
