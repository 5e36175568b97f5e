//! Git-style conflict markers
//!
//! A conflict block looks like:
//!
//! ```text
//! <<<<<<< local
//! local lines
//! =======
//! remote lines
//! >>>>>>> remote
//! ```
//!
//! Both [`analyze`] and [`resolve`] walk the same three-state machine
//! (normal, in-local, in-remote). `analyze` is lenient and never fails;
//! `resolve` refuses to produce output from anything it cannot parse.
//!
//! A bare `=======` line outside a block is ordinary text (it is a setext
//! heading underline in markdown), so only `<<<<<<<` and `>>>>>>>` can
//! start trouble in the normal state.

use serde::Serialize;

use crate::error::MarkerError;

pub const OPEN_MARKER: &str = "<<<<<<<";
pub const SEPARATOR: &str = "=======";
pub const CLOSE_MARKER: &str = ">>>>>>>";

const LOCAL_LABEL: &str = "local";
const REMOTE_LABEL: &str = "remote";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Open,
    Separator,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// Inside the local half; holds the 1-based line of the opening marker
    InLocal(usize),
    InRemote(usize),
}

/// Recognize a marker line (line terminator already stripped)
///
/// Open and close markers are exactly seven characters, optionally followed
/// by whitespace and a label. The separator must stand alone.
fn classify(line: &str) -> Option<Marker> {
    let line = line.trim_end_matches(['\r', '\n']);
    let labelled = |prefix: &str| {
        line.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
    };
    if labelled(OPEN_MARKER) {
        Some(Marker::Open)
    } else if labelled(CLOSE_MARKER) {
        Some(Marker::Close)
    } else if line.trim_end() == SEPARATOR {
        Some(Marker::Separator)
    } else {
        None
    }
}

/// Result of scanning text for conflict markers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkerAnalysis {
    /// Complete open/separator/close triples
    pub conflict_count: usize,
    /// Any marker line was seen in a position where it acts as a marker
    pub has_conflict_markers: bool,
    /// Some marker was out of sequence, or a block was left open
    pub has_unbalanced_markers: bool,
    /// 1-based line of the first marker, if any
    pub first_marker_line: Option<usize>,
}

/// Scan `text` for conflict markers. Never fails.
pub fn analyze(text: &str) -> MarkerAnalysis {
    let mut analysis = MarkerAnalysis::default();
    let mut state = State::Normal;

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let Some(marker) = classify(line) else {
            continue;
        };

        let next = match (state, marker) {
            // Plain text in the normal state
            (State::Normal, Marker::Separator) => continue,
            (State::Normal, Marker::Open) => State::InLocal(line_no),
            (State::InLocal(open), Marker::Separator) => State::InRemote(open),
            (State::InRemote(_), Marker::Close) => {
                analysis.conflict_count += 1;
                State::Normal
            }
            // A second opener restarts the block
            (State::InLocal(_) | State::InRemote(_), Marker::Open) => {
                analysis.has_unbalanced_markers = true;
                State::InLocal(line_no)
            }
            (State::Normal | State::InLocal(_), Marker::Close) => {
                analysis.has_unbalanced_markers = true;
                State::Normal
            }
            (State::InRemote(open), Marker::Separator) => {
                analysis.has_unbalanced_markers = true;
                State::InRemote(open)
            }
        };

        analysis.has_conflict_markers = true;
        if analysis.first_marker_line.is_none() {
            analysis.first_marker_line = Some(line_no);
        }
        state = next;
    }

    if state != State::Normal {
        analysis.has_unbalanced_markers = true;
    }
    analysis
}

/// Which half of each block to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvePreference {
    LocalFirst,
    RemoteFirst,
}

/// Output of a successful [`resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    pub resolved_count: usize,
}

/// Replace every conflict block with the preferred half
///
/// # Errors
/// - [`MarkerError::MalformedBlock`] at the first out-of-sequence marker
/// - [`MarkerError::IncompleteMarkers`] if the input ends inside a block
pub fn resolve(text: &str, preference: ResolvePreference) -> Result<ResolvedText, MarkerError> {
    let mut out = String::with_capacity(text.len());
    let mut resolved_count = 0;
    let mut state = State::Normal;

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let malformed = |reason| MarkerError::MalformedBlock {
            line: line_no,
            reason,
        };

        match (state, classify(line)) {
            (State::Normal, None | Some(Marker::Separator)) => out.push_str(line),
            (State::Normal, Some(Marker::Open)) => state = State::InLocal(line_no),
            (State::Normal, Some(Marker::Close)) => {
                return Err(malformed("closing marker without an open block"))
            }

            (State::InLocal(_), None) => {
                if preference == ResolvePreference::LocalFirst {
                    out.push_str(line);
                }
            }
            (State::InLocal(open), Some(Marker::Separator)) => state = State::InRemote(open),
            (State::InLocal(_), Some(Marker::Open)) => {
                return Err(malformed("nested opening marker"))
            }
            (State::InLocal(_), Some(Marker::Close)) => {
                return Err(malformed("closing marker before separator"))
            }

            (State::InRemote(_), None) => {
                if preference == ResolvePreference::RemoteFirst {
                    out.push_str(line);
                }
            }
            (State::InRemote(_), Some(Marker::Close)) => {
                resolved_count += 1;
                state = State::Normal;
            }
            (State::InRemote(_), Some(Marker::Open)) => {
                return Err(malformed("nested opening marker"))
            }
            (State::InRemote(_), Some(Marker::Separator)) => {
                return Err(malformed("second separator in one block"))
            }
        }
    }

    match state {
        State::Normal => Ok(ResolvedText {
            text: out,
            resolved_count,
        }),
        State::InLocal(line) | State::InRemote(line) => {
            Err(MarkerError::IncompleteMarkers { line })
        }
    }
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Append one conflict block with the given halves to `out`
///
/// Each element of `local` and `remote` is a line including its terminator.
/// A missing final newline is added so the markers stay on their own lines.
pub fn write_block(out: &mut String, local: &[&str], remote: &[&str]) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(OPEN_MARKER);
    out.push(' ');
    out.push_str(LOCAL_LABEL);
    out.push('\n');
    push_lines(out, local);
    out.push_str(SEPARATOR);
    out.push('\n');
    push_lines(out, remote);
    out.push_str(CLOSE_MARKER);
    out.push(' ');
    out.push_str(REMOTE_LABEL);
    out.push('\n');
}
