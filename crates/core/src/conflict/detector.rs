//! Semantic conflict classification.
//!
//! Given the three parsed versions of a notebook and their cell alignment,
//! the detector walks every [`CellMapping`] and compares the cells field by
//! field against base. No textual markers are involved: this is how a
//! notebook that git merged "cleanly" into broken JSON, or one where both
//! branches touched the same cell, gets reported.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AlignmentConfig;
use crate::conflict::aligner::{align, detect_reordering, CellMapping};
use crate::conflict::markers::has_conflict_markers;
use crate::models::{MergeInput, NotebookSemanticConflict};
use crate::notebook::{canonical_json, Cell, Notebook};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a semantic conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SemanticConflictKind {
    /// Cell exists on current and/or incoming but not in base.
    CellAdded,
    /// Cell removed on exactly one branch.
    CellDeleted,
    /// Cell source differs between the branches.
    CellModified,
    /// The branches disagree on cell order (notebook-scoped).
    CellReordered,
    /// Cell or notebook metadata changed differently on both branches.
    MetadataChanged,
    /// Cell outputs differ between the branches.
    OutputsChanged,
    /// Execution counters differ between the branches.
    ExecutionCountChanged,
}

impl std::fmt::Display for SemanticConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CellAdded => write!(f, "cell-added"),
            Self::CellDeleted => write!(f, "cell-deleted"),
            Self::CellModified => write!(f, "cell-modified"),
            Self::CellReordered => write!(f, "cell-reordered"),
            Self::MetadataChanged => write!(f, "metadata-changed"),
            Self::OutputsChanged => write!(f, "outputs-changed"),
            Self::ExecutionCountChanged => write!(f, "execution-count-changed"),
        }
    }
}

/// A semantic conflict on one cell mapping, or on the whole notebook when all
/// indices are `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SemanticConflict {
    pub kind: SemanticConflictKind,
    pub base_index: Option<usize>,
    pub current_index: Option<usize>,
    pub incoming_index: Option<usize>,
    pub base_cell: Option<Cell>,
    pub current_cell: Option<Cell>,
    pub incoming_cell: Option<Cell>,
    /// False only for additions made on a single branch.
    pub conflicting: bool,
    pub description: String,
}

impl SemanticConflict {
    fn notebook_scoped(kind: SemanticConflictKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            base_index: None,
            current_index: None,
            incoming_index: None,
            base_cell: None,
            current_cell: None,
            incoming_cell: None,
            conflicting: true,
            description: description.into(),
        }
    }

    /// Whether the conflict concerns the notebook as a whole.
    pub fn is_notebook_scoped(&self) -> bool {
        self.base_index.is_none() && self.current_index.is_none() && self.incoming_index.is_none()
    }
}

/// The cells of one mapping, looked up in their notebooks.
struct MappedCells<'a> {
    mapping: &'a CellMapping,
    base: Option<&'a Cell>,
    current: Option<&'a Cell>,
    incoming: Option<&'a Cell>,
}

impl MappedCells<'_> {
    fn conflict(
        &self,
        kind: SemanticConflictKind,
        conflicting: bool,
        description: impl Into<String>,
    ) -> SemanticConflict {
        SemanticConflict {
            kind,
            base_index: self.mapping.base_index,
            current_index: self.mapping.current_index,
            incoming_index: self.mapping.incoming_index,
            base_cell: self.base.cloned(),
            current_cell: self.current.cloned(),
            incoming_cell: self.incoming.cloned(),
            conflicting,
            description: description.into(),
        }
    }

    /// Position used in descriptions (1-indexed, resolved-side first).
    fn label(&self) -> usize {
        self.mapping
            .current_index
            .or(self.mapping.incoming_index)
            .or(self.mapping.base_index)
            .map_or(0, |i| i + 1)
    }
}

/// Both branches disagree, and at least one of them moved away from base.
fn diverged<T: PartialEq>(base: Option<&T>, current: &T, incoming: &T) -> bool {
    current != incoming && base.map_or(true, |b| b != current || b != incoming)
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless semantic conflict detector.
pub struct SemanticConflictDetector;

impl SemanticConflictDetector {
    /// Parse the three versions, align them and classify the differences.
    ///
    /// A version that fails to parse is treated as absent. Returns `None`
    /// (not applicable) when fewer than two versions parse or when neither
    /// current nor incoming is available, so the caller can fall back to
    /// textual handling.
    pub fn detect(input: &MergeInput, config: &AlignmentConfig) -> Option<NotebookSemanticConflict> {
        info!(path = %input.file_path, "detecting semantic conflicts");

        let base = parse_version("base", input.base.as_deref());
        let current = parse_version("current", input.current.as_deref());
        let incoming = parse_version("incoming", input.incoming.as_deref());

        let parsed = [base.is_some(), current.is_some(), incoming.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if parsed < 2 || (current.is_none() && incoming.is_none()) {
            info!(
                path = %input.file_path,
                parsed,
                "semantic detection not applicable"
            );
            return None;
        }

        let mappings = align(
            base.as_ref().map(|n| n.cells.as_slice()),
            current.as_ref().map(|n| n.cells.as_slice()),
            incoming.as_ref().map(|n| n.cells.as_slice()),
            config,
        );
        let conflicts =
            Self::classify(&mappings, base.as_ref(), current.as_ref(), incoming.as_ref());

        let has_textual_markers = input
            .working_copy
            .as_deref()
            .is_some_and(|bytes| has_conflict_markers(&String::from_utf8_lossy(bytes)));

        info!(
            path = %input.file_path,
            conflicts = conflicts.len(),
            has_textual_markers,
            "semantic detection complete"
        );

        Some(NotebookSemanticConflict {
            file_path: input.file_path.clone(),
            has_textual_markers,
            conflicts,
            mappings,
            base,
            current,
            incoming,
            current_branch: input.current_branch.clone(),
            incoming_branch: input.incoming_branch.clone(),
        })
    }

    /// Classify every mapping. Output follows mapping order, then the
    /// notebook-scoped conflicts (metadata, reordering).
    pub fn classify(
        mappings: &[CellMapping],
        base: Option<&Notebook>,
        current: Option<&Notebook>,
        incoming: Option<&Notebook>,
    ) -> Vec<SemanticConflict> {
        let mut conflicts = Vec::new();
        for mapping in mappings {
            let cells = MappedCells {
                mapping,
                base: cell_at(base, mapping.base_index),
                current: cell_at(current, mapping.current_index),
                incoming: cell_at(incoming, mapping.incoming_index),
            };
            classify_mapping(&cells, &mut conflicts);
        }

        if let (Some(cur), Some(inc)) = (current, incoming) {
            let base_meta = base.map(|b| canonical_json(&b.metadata));
            let cur_meta = canonical_json(&cur.metadata);
            let inc_meta = canonical_json(&inc.metadata);
            let both_changed = base_meta
                .as_ref()
                .map_or(true, |b| *b != cur_meta && *b != inc_meta);
            if cur_meta != inc_meta && both_changed {
                debug!("notebook metadata changed on both branches");
                conflicts.push(SemanticConflict::notebook_scoped(
                    SemanticConflictKind::MetadataChanged,
                    "Notebook metadata changed on both branches",
                ));
            }
        }

        if detect_reordering(mappings) {
            debug!("cell order differs between versions");
            conflicts.push(SemanticConflict::notebook_scoped(
                SemanticConflictKind::CellReordered,
                "Cells were reordered",
            ));
        }

        conflicts
    }
}

fn cell_at(notebook: Option<&Notebook>, index: Option<usize>) -> Option<&Cell> {
    notebook?.cells.get(index?)
}

fn parse_version(side: &str, blob: Option<&str>) -> Option<Notebook> {
    let blob = blob?;
    match Notebook::parse(blob) {
        Ok(nb) => Some(nb),
        Err(e) => {
            warn!(side, error = %e, "version failed to parse, treating as absent");
            None
        }
    }
}

fn classify_mapping(cells: &MappedCells<'_>, out: &mut Vec<SemanticConflict>) {
    let n = cells.label();
    match (cells.base, cells.current, cells.incoming) {
        (None, Some(_), None) => out.push(cells.conflict(
            SemanticConflictKind::CellAdded,
            false,
            format!("Cell {n} added in current"),
        )),
        (None, None, Some(_)) => out.push(cells.conflict(
            SemanticConflictKind::CellAdded,
            false,
            format!("Cell {n} added in incoming"),
        )),
        (None, Some(cur), Some(inc)) => {
            if cur.same_content(inc) {
                compare_fields(cells, None, cur, inc, out);
            } else {
                out.push(cells.conflict(
                    SemanticConflictKind::CellAdded,
                    true,
                    format!("Cell {n} added on both branches with different content"),
                ));
            }
        }
        (Some(_), None, Some(_)) => out.push(cells.conflict(
            SemanticConflictKind::CellDeleted,
            true,
            format!("Cell {n} deleted in current but kept in incoming"),
        )),
        (Some(_), Some(_), None) => out.push(cells.conflict(
            SemanticConflictKind::CellDeleted,
            true,
            format!("Cell {n} deleted in incoming but kept in current"),
        )),
        (Some(b), Some(cur), Some(inc)) => compare_fields(cells, Some(b), cur, inc, out),
        // Deleted on both branches, or nothing at all.
        (Some(_), None, None) | (None, None, None) => {}
    }
}

fn compare_fields(
    cells: &MappedCells<'_>,
    base: Option<&Cell>,
    cur: &Cell,
    inc: &Cell,
    out: &mut Vec<SemanticConflict>,
) {
    let n = cells.label();

    let source = |c: &Cell| (c.cell_type, c.source_text());
    if diverged(base.map(source).as_ref(), &source(cur), &source(inc)) {
        out.push(cells.conflict(
            SemanticConflictKind::CellModified,
            true,
            format!("Cell {n} source differs between branches"),
        ));
    }

    if cur.has_execution_count() && inc.has_execution_count() {
        let base_count = base.map(|b| b.execution_count);
        if diverged(base_count.as_ref(), &cur.execution_count, &inc.execution_count) {
            out.push(cells.conflict(
                SemanticConflictKind::ExecutionCountChanged,
                true,
                format!(
                    "Cell {n} execution count differs (current: {}, incoming: {})",
                    fmt_count(cur.execution_count),
                    fmt_count(inc.execution_count)
                ),
            ));
        }
    }

    let base_outputs = base.map(Cell::outputs_canonical);
    if diverged(
        base_outputs.as_ref(),
        &cur.outputs_canonical(),
        &inc.outputs_canonical(),
    ) {
        out.push(cells.conflict(
            SemanticConflictKind::OutputsChanged,
            true,
            format!("Cell {n} outputs differ between branches"),
        ));
    }

    let cur_meta = cur.metadata_canonical();
    let inc_meta = inc.metadata_canonical();
    let both_changed = base
        .map(Cell::metadata_canonical)
        .map_or(true, |b| b != cur_meta && b != inc_meta);
    if cur_meta != inc_meta && both_changed {
        out.push(cells.conflict(
            SemanticConflictKind::MetadataChanged,
            true,
            format!("Cell {n} metadata changed on both branches"),
        ));
    }
}

fn fmt_count(count: Option<i64>) -> String {
    count.map_or_else(|| "none".to_string(), |c| c.to_string())
}
