//! Conflict marker location, extraction and resolution.
//!
//! Two marker families are handled:
//!
//! 1. **Raw markers**: the `<<<<<<<` / `=======` / `>>>>>>>` lines git writes
//!    into a file. In a notebook they usually break the JSON, but they can
//!    also live inside a single cell's source or an output's text.
//! 2. **Cell markers**: whole cells whose only content is a marker line,
//!    possibly wrapped in HTML or markdown styling. The notebook still
//!    parses; the cells between the start and separator cells are "current",
//!    those between separator and end are "incoming".
//!
//! Marker lines are anchored at the start of a line and consist of exactly
//! seven marker characters followed by whitespace or the end of the line.

use std::ops::Range;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::MarkerError;
use crate::notebook::Cell;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How to resolve one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "choice", content = "text")]
pub enum ResolutionChoice {
    /// Keep the receiving branch's side.
    Current,
    /// Keep the merged-in branch's side.
    Incoming,
    /// Keep current followed by incoming.
    Both,
    /// Replace the region with caller-provided text.
    Custom(String),
}

/// Role of a single marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// `<<<<<<<`
    Start,
    /// `|||||||` (diff3 base section)
    Base,
    /// `=======`
    Separator,
    /// `>>>>>>>`
    End,
}

/// A raw marker region located in a piece of text.
///
/// Byte offsets point at the first byte of the respective marker line;
/// `region_end` is the offset just past the end marker line (including its
/// terminator). Line numbers are 0-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRegion {
    pub start: usize,
    pub separator: usize,
    pub end: usize,
    pub region_end: usize,
    pub start_line: usize,
    pub separator_line: usize,
    pub end_line: usize,
    pub current_content: String,
    pub incoming_content: String,
    /// Content of the `|||||||` section for diff3-style conflicts.
    pub base_content: Option<String>,
    pub current_label: Option<String>,
    pub incoming_label: Option<String>,
}

impl MarkerRegion {
    /// Byte range covered by the region, marker lines inclusive.
    pub fn span(&self) -> Range<usize> {
        self.start..self.region_end
    }

    /// The text that replaces the region for `choice`.
    pub fn replacement(&self, choice: &ResolutionChoice) -> String {
        match choice {
            ResolutionChoice::Current => self.current_content.clone(),
            ResolutionChoice::Incoming => self.incoming_content.clone(),
            ResolutionChoice::Both => {
                let mut both = self.current_content.clone();
                if !both.is_empty() && !both.ends_with('\n') {
                    both.push('\n');
                }
                both.push_str(&self.incoming_content);
                both
            }
            ResolutionChoice::Custom(text) => text.clone(),
        }
    }

    /// [`replacement`](Self::replacement) for the region as it sits in
    /// `text`. When the end marker line was terminated, a non-empty
    /// replacement is terminated too so it cannot run into the next line.
    pub fn replacement_in(&self, text: &str, choice: &ResolutionChoice) -> String {
        let mut replacement = self.replacement(choice);
        let terminated = text
            .get(..self.region_end)
            .is_some_and(|head| head.ends_with('\n'));
        if terminated && !replacement.is_empty() && !replacement.ends_with('\n') {
            replacement.push('\n');
        }
        replacement
    }
}

/// Positional pairing of one current cell with one incoming cell inside a
/// cell-level region. The shorter side is padded with `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPair {
    pub current: Option<usize>,
    pub incoming: Option<usize>,
}

/// A cell-level marker region: three marker cells and the cells between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMarkerRegion {
    pub start_cell: usize,
    pub separator_cell: usize,
    pub end_cell: usize,
    pub current_label: Option<String>,
    pub incoming_label: Option<String>,
    pub pairs: Vec<CellPair>,
}

impl CellMarkerRegion {
    pub fn current_cells(&self) -> Range<usize> {
        self.start_cell + 1..self.separator_cell
    }

    pub fn incoming_cells(&self) -> Range<usize> {
        self.separator_cell + 1..self.end_cell
    }

    /// Whether `index` is one of the three marker cells.
    pub fn is_marker_cell(&self, index: usize) -> bool {
        index == self.start_cell || index == self.separator_cell || index == self.end_cell
    }
}

// ---------------------------------------------------------------------------
// Marker lines
// ---------------------------------------------------------------------------

fn marker_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(<{7}|\|{7}|={7}|>{7})(?:[ \t]+(.*?))?[ \t]*$")
            .expect("marker line pattern is valid")
    })
}

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z][^<>]*>").expect("html tag pattern is valid"))
}

/// Classify one line (terminator optional). Returns the marker kind and the
/// trailing label, if any.
pub fn classify_line(line: &str) -> Option<(MarkerKind, Option<String>)> {
    let line = line.trim_end_matches(&['\n', '\r'][..]);
    let caps = marker_line_re().captures(line)?;
    let kind = match caps.get(1)?.as_str().as_bytes()[0] {
        b'<' => MarkerKind::Start,
        b'|' => MarkerKind::Base,
        b'=' => MarkerKind::Separator,
        _ => MarkerKind::End,
    };
    let label = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    // A separator never carries a label; "======= x" is ordinary text.
    if kind == MarkerKind::Separator && label.is_some() {
        return None;
    }
    Some((kind, label))
}

// ---------------------------------------------------------------------------
// Raw regions
// ---------------------------------------------------------------------------

enum ScanState {
    Idle,
    Current {
        start: usize,
        start_line: usize,
        label: Option<String>,
        body: usize,
    },
    Base {
        start: usize,
        start_line: usize,
        label: Option<String>,
        current: Range<usize>,
        body: usize,
    },
    Incoming {
        start: usize,
        start_line: usize,
        label: Option<String>,
        current: Range<usize>,
        base: Option<Range<usize>>,
        separator: usize,
        separator_line: usize,
        body: usize,
    },
}

/// Find the first complete region at or after byte offset `from`.
///
/// `from` must lie on a line boundary. Returns `Ok(None)` when no complete
/// start/separator/end triple exists; a second start marker inside an open
/// region is rejected as [`MarkerError::NestedRegion`].
pub fn extract_region_from(text: &str, from: usize) -> Result<Option<MarkerRegion>, MarkerError> {
    let Some(tail) = text.get(from..) else {
        return Ok(None);
    };
    let first_line = text[..from].matches('\n').count();

    let mut state = ScanState::Idle;
    let mut offset = from;

    for (n, line) in tail.split_inclusive('\n').enumerate() {
        let line_no = first_line + n;
        let line_start = offset;
        let line_end = offset + line.len();
        offset = line_end;

        let Some((kind, label)) = classify_line(line) else {
            continue;
        };

        state = match (state, kind) {
            (ScanState::Idle, MarkerKind::Start) => ScanState::Current {
                start: line_start,
                start_line: line_no,
                label,
                body: line_end,
            },
            (ScanState::Idle, _) => ScanState::Idle,

            (ScanState::Current { .. }, MarkerKind::Start)
            | (ScanState::Base { .. }, MarkerKind::Start)
            | (ScanState::Incoming { .. }, MarkerKind::Start) => {
                return Err(MarkerError::NestedRegion { line: line_no });
            }

            (
                ScanState::Current {
                    start,
                    start_line,
                    label: start_label,
                    body,
                },
                MarkerKind::Base,
            ) => ScanState::Base {
                start,
                start_line,
                label: start_label,
                current: body..line_start,
                body: line_end,
            },
            (
                ScanState::Current {
                    start,
                    start_line,
                    label: start_label,
                    body,
                },
                MarkerKind::Separator,
            ) => ScanState::Incoming {
                start,
                start_line,
                label: start_label,
                current: body..line_start,
                base: None,
                separator: line_start,
                separator_line: line_no,
                body: line_end,
            },
            (
                ScanState::Base {
                    start,
                    start_line,
                    label: start_label,
                    current,
                    body,
                },
                MarkerKind::Separator,
            ) => ScanState::Incoming {
                start,
                start_line,
                label: start_label,
                current,
                base: Some(body..line_start),
                separator: line_start,
                separator_line: line_no,
                body: line_end,
            },
            // End marker before any separator: not a usable region.
            (ScanState::Current { .. }, MarkerKind::End)
            | (ScanState::Base { .. }, MarkerKind::End) => {
                debug!(line = line_no, "end marker without separator, skipping");
                ScanState::Idle
            }
            (s @ ScanState::Base { .. }, MarkerKind::Base) => s,

            (
                ScanState::Incoming {
                    start,
                    start_line,
                    label: start_label,
                    current,
                    base,
                    separator,
                    separator_line,
                    body,
                },
                MarkerKind::End,
            ) => {
                return Ok(Some(MarkerRegion {
                    start,
                    separator,
                    end: line_start,
                    region_end: line_end,
                    start_line,
                    separator_line,
                    end_line: line_no,
                    current_content: text[current].to_string(),
                    incoming_content: text[body..line_start].to_string(),
                    base_content: base.map(|r| text[r].to_string()),
                    current_label: start_label,
                    incoming_label: label,
                }));
            }
            (s @ ScanState::Incoming { .. }, _) => s,
        };
    }

    Ok(None)
}

/// Find the first complete region in `text`.
pub fn extract_region(text: &str) -> Result<Option<MarkerRegion>, MarkerError> {
    extract_region_from(text, 0)
}

/// Every complete region in document order.
pub fn locate_regions(text: &str) -> Result<Vec<MarkerRegion>, MarkerError> {
    let mut regions = Vec::new();
    let mut from = 0;
    while let Some(region) = extract_region_from(text, from)? {
        from = region.region_end;
        regions.push(region);
    }
    Ok(regions)
}

/// Whether `text` contains at least one marker region. Nested regions count.
pub fn has_conflict_markers(text: &str) -> bool {
    !matches!(extract_region(text), Ok(None))
}

/// Resolve every region in `text` with the same choice.
///
/// Regions are replaced one at a time, left to right; scanning resumes after
/// the inserted replacement so custom text is never rescanned.
pub fn resolve(text: &str, choice: &ResolutionChoice) -> Result<String, MarkerError> {
    let mut out = text.to_string();
    let mut from = 0;
    while let Some(region) = extract_region_from(&out, from)? {
        let replacement = region.replacement_in(&out, choice);
        from = region.start + replacement.len();
        out.replace_range(region.span(), &replacement);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Cell regions
// ---------------------------------------------------------------------------

/// Role of a cell whose entire content is one marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerRole {
    Start,
    Separator,
    End,
}

/// Strip HTML tags, common entities and markdown decoration.
fn strip_styling(source: &str) -> String {
    let without_tags = html_tag_re().replace_all(source, "");
    let decoded = without_tags
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");

    let mut text = decoded.trim().trim_start_matches(&['#', ' '][..]).trim();
    loop {
        let peeled = ["**", "__", "*", "_", "`"].iter().find_map(|wrap| {
            text.strip_prefix(wrap)
                .and_then(|t| t.strip_suffix(wrap))
                .filter(|t| !t.is_empty())
        });
        match peeled {
            Some(inner) => text = inner.trim(),
            None => break,
        }
    }
    text.to_string()
}

/// If the cell is a marker cell, its role and label.
pub fn cell_marker_role(cell: &Cell) -> Option<(MarkerRole, Option<String>)> {
    let text = strip_styling(&cell.source_text());
    if text.contains('\n') {
        return None;
    }
    let (kind, label) = classify_line(&text)?;
    let role = match kind {
        MarkerKind::Start => MarkerRole::Start,
        MarkerKind::Separator => MarkerRole::Separator,
        MarkerKind::End => MarkerRole::End,
        MarkerKind::Base => return None,
    };
    Some((role, label))
}

/// Locate cell-level regions in order. Incomplete triples are skipped.
pub fn locate_cell_regions(cells: &[Cell]) -> Result<Vec<CellMarkerRegion>, MarkerError> {
    let mut regions = Vec::new();
    let mut open: Option<(usize, Option<String>)> = None;
    let mut separator: Option<usize> = None;

    for (idx, cell) in cells.iter().enumerate() {
        let Some((role, label)) = cell_marker_role(cell) else {
            continue;
        };
        match (role, open.as_ref(), separator) {
            (MarkerRole::Start, None, _) => {
                open = Some((idx, label));
                separator = None;
            }
            (MarkerRole::Start, Some(_), _) => {
                return Err(MarkerError::NestedRegion { line: idx });
            }
            (MarkerRole::Separator, Some(_), None) => separator = Some(idx),
            (MarkerRole::End, Some(_), None) => {
                debug!(cell = idx, "end marker cell without separator, skipping");
                open = None;
            }
            (MarkerRole::End, Some(_), Some(sep)) => {
                if let Some((start, current_label)) = open.take() {
                    regions.push(build_cell_region(start, sep, idx, current_label, label));
                }
                separator = None;
            }
            _ => {}
        }
    }

    Ok(regions)
}

fn build_cell_region(
    start: usize,
    separator: usize,
    end: usize,
    current_label: Option<String>,
    incoming_label: Option<String>,
) -> CellMarkerRegion {
    let current: Vec<usize> = (start + 1..separator).collect();
    let incoming: Vec<usize> = (separator + 1..end).collect();
    let pairs = (0..current.len().max(incoming.len()))
        .map(|i| CellPair {
            current: current.get(i).copied(),
            incoming: incoming.get(i).copied(),
        })
        .collect();

    CellMarkerRegion {
        start_cell: start,
        separator_cell: separator,
        end_cell: end,
        current_label,
        incoming_label,
        pairs,
    }
}
