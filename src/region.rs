//! Parsing and rendering of the marker-delimited managed region.
//!
//! ```text
//! 127.0.0.1	localhost
//!
//! #### BEGIN HOSTS-SYNC ####
//! # default/web
//! 10.0.0.5	web.test
//! 10.0.0.5	www.web.test
//! #### END HOSTS-SYNC ####
//! ```
//!
//! Scanning is a two-state machine. Malformed marker sequences never fail
//! the parse; they are reported as [`MarkerAnomaly`] values and resolved on a
//! best-effort basis.

use crate::config::SyncConfig;
use crate::table::EntryTable;
use std::fmt::Write as _;

/// Begin/end marker lines of one managed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    begin: String,
    end: String,
}

impl Markers {
    /// Renders the marker lines for `config`.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            begin: config.begin_marker(),
            end: config.end_marker(),
        }
    }

    /// The begin-marker line.
    #[must_use]
    pub fn begin(&self) -> &str {
        &self.begin
    }

    /// The end-marker line.
    #[must_use]
    pub fn end(&self) -> &str {
        &self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionState {
    Outside,
    Inside,
}

/// A marker sequence that does not form a single well-nested region.
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerAnomaly {
    /// A begin marker appeared while already inside a region. Ignored.
    NestedBegin {
        /// Line of the ignored marker.
        line: usize,
    },
    /// An end marker appeared outside any region. Dropped.
    StrayEnd {
        /// Line of the dropped marker.
        line: usize,
    },
    /// A region was still open at end of input; everything after its
    /// begin marker was discarded.
    Unterminated {
        /// Line of the unmatched begin marker.
        begin_line: usize,
    },
}

/// Content of a hosts file split around its managed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHosts<'a> {
    /// Lines outside any region, in original order, trailing blank lines
    /// removed.
    pub outside: Vec<&'a str>,
    /// Whether any begin or end marker was seen.
    pub had_region: bool,
    /// Irregular marker sequences encountered while scanning.
    pub anomalies: Vec<MarkerAnomaly>,
}

/// Splits `content` into lines outside the managed region.
///
/// Lines are separated by `\n`; any `\r` stays part of the line so unrelated
/// content round-trips unchanged. A line *containing* a marker counts as
/// that marker.
#[must_use]
pub fn parse<'a>(content: &'a str, markers: &Markers) -> ParsedHosts<'a> {
    let mut state = RegionState::Outside;
    let mut outside = Vec::new();
    let mut anomalies = Vec::new();
    let mut had_region = false;
    let mut open_at = 0;

    for (idx, line) in content.split_terminator('\n').enumerate() {
        let line_no = idx + 1;
        if line.contains(markers.begin()) {
            had_region = true;
            match state {
                RegionState::Outside => {
                    state = RegionState::Inside;
                    open_at = line_no;
                }
                RegionState::Inside => {
                    anomalies.push(MarkerAnomaly::NestedBegin { line: line_no });
                }
            }
            continue;
        }
        if line.contains(markers.end()) {
            had_region = true;
            if state == RegionState::Outside {
                anomalies.push(MarkerAnomaly::StrayEnd { line: line_no });
            }
            state = RegionState::Outside;
            continue;
        }
        if state == RegionState::Outside {
            outside.push(line);
        }
    }

    if state == RegionState::Inside {
        anomalies.push(MarkerAnomaly::Unterminated {
            begin_line: open_at,
        });
    }

    while outside.last().is_some_and(|l| l.trim().is_empty()) {
        outside.pop();
    }

    ParsedHosts {
        outside,
        had_region,
        anomalies,
    }
}

/// Renders the complete file: the outside lines followed, when `table` is
/// non-empty, by one blank line and the managed region. The result always
/// ends with exactly one newline.
#[must_use]
pub fn render(outside: &[&str], table: &EntryTable, markers: &Markers) -> String {
    let mut out = outside.join("\n");

    if !table.is_empty() {
        out.push('\n');
        out.push('\n');
        out.push_str(markers.begin());
        out.push('\n');
        for (key, entries) in table.iter() {
            let _ = writeln!(out, "# {key}");
            for entry in entries {
                let _ = writeln!(out, "{entry}");
            }
        }
        out.push_str(markers.end());
    }

    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
