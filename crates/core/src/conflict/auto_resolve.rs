//! Automatic resolution of low-value semantic conflicts.
//!
//! Execution counters, kernel metadata and (optionally) outputs and
//! whitespace-only edits rarely need a human decision. The policy engine
//! clears or settles them on a copy of one side and hands back whatever is
//! left for the user.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::AutoResolveSettings;
use crate::conflict::detector::{SemanticConflict, SemanticConflictKind};
use crate::models::AutoResolveResult;
use crate::notebook::{Cell, CellType, Notebook, KERNEL_METADATA_KEYS};

/// The version the resolved notebook is copied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Current,
    Incoming,
}

impl Side {
    fn index_of(self, conflict: &SemanticConflict) -> Option<usize> {
        match self {
            Self::Current => conflict.current_index,
            Self::Incoming => conflict.incoming_index,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Incoming => "incoming",
        }
    }
}

/// Apply the enabled policies to `conflicts`.
///
/// The resolved notebook is a copy of `current`, or of `incoming` when the
/// file is missing on the current side; every per-cell change is made at
/// that side's index. Returns `None` when neither side is present.
pub fn apply_auto_resolutions(
    conflicts: &[SemanticConflict],
    _base: Option<&Notebook>,
    current: Option<&Notebook>,
    incoming: Option<&Notebook>,
    settings: &AutoResolveSettings,
) -> Option<AutoResolveResult> {
    let (mut resolved, side) = match (current, incoming) {
        (Some(nb), _) => (nb.clone(), Side::Current),
        (None, Some(nb)) => (nb.clone(), Side::Incoming),
        (None, None) => {
            debug!("no current or incoming version, nothing to auto-resolve");
            return None;
        }
    };

    let mut remaining = Vec::new();
    let mut descriptions = Vec::new();
    let mut kernel_auto_resolved = false;

    for conflict in conflicts {
        let index = side.index_of(conflict);

        if settings.auto_resolve_execution_count && conflict.conflicting {
            if let Some(cell) = index.and_then(|i| resolved.cells.get_mut(i)) {
                if cell.has_execution_count() {
                    cell.execution_count = None;
                }
            }
        }

        let label = cell_label(index, conflict);
        let outcome = match conflict.kind {
            SemanticConflictKind::ExecutionCountChanged if settings.auto_resolve_execution_count => {
                Some(format!("Cleared execution count of {label}"))
            }
            SemanticConflictKind::MetadataChanged
                if conflict.is_notebook_scoped()
                    && settings.auto_resolve_kernel_version
                    && only_kernel_metadata_differs(current, incoming) =>
            {
                kernel_auto_resolved = true;
                Some(format!("Kept kernel metadata from {}", side.name()))
            }
            SemanticConflictKind::OutputsChanged
                if settings.strip_outputs && same_source(conflict) =>
            {
                if let Some(cell) = index.and_then(|i| resolved.cells.get_mut(i)) {
                    clear_outputs(cell);
                }
                Some(format!("Cleared conflicting outputs of {label}"))
            }
            SemanticConflictKind::CellModified
                if settings.auto_resolve_whitespace && whitespace_only(conflict) =>
            {
                Some(format!(
                    "Whitespace-only edit to {label}, kept {}",
                    side.name()
                ))
            }
            _ => None,
        };

        match outcome {
            Some(description) => {
                debug!(kind = %conflict.kind, %description, "auto-resolved");
                descriptions.push(description);
            }
            None => remaining.push(conflict.clone()),
        }
    }

    if settings.strip_outputs {
        for conflict in &remaining {
            if let Some(cell) = side.index_of(conflict).and_then(|i| resolved.cells.get_mut(i)) {
                clear_outputs(cell);
            }
        }
    }

    info!(
        side = side.name(),
        auto_resolved = descriptions.len(),
        remaining = remaining.len(),
        kernel_auto_resolved,
        "auto-resolution complete"
    );

    Some(AutoResolveResult {
        resolved_notebook: resolved,
        remaining_conflicts: remaining,
        auto_resolved_count: descriptions.len(),
        descriptions,
        kernel_auto_resolved,
    })
}

/// One-based cell number for descriptions. Falls back to the other
/// versions' positions when the resolved side has no such cell.
fn cell_label(index: Option<usize>, conflict: &SemanticConflict) -> String {
    index
        .or(conflict.current_index)
        .or(conflict.incoming_index)
        .or(conflict.base_index)
        .map_or_else(|| "a cell".to_string(), |i| format!("cell {}", i + 1))
}

fn clear_outputs(cell: &mut Cell) {
    if cell.cell_type == CellType::Code {
        cell.outputs = Some(Vec::new());
    }
}

fn same_source(conflict: &SemanticConflict) -> bool {
    match (&conflict.current_cell, &conflict.incoming_cell) {
        (Some(cur), Some(inc)) => cur.same_content(inc),
        _ => false,
    }
}

/// Trailing whitespace per line and trailing blank lines removed.
fn normalize_whitespace(source: &str) -> String {
    let lines: Vec<&str> = source.lines().map(str::trim_end).collect();
    let keep = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
    lines[..keep].join("\n")
}

fn whitespace_only(conflict: &SemanticConflict) -> bool {
    match (&conflict.current_cell, &conflict.incoming_cell) {
        (Some(cur), Some(inc)) => {
            cur.cell_type == inc.cell_type
                && normalize_whitespace(&cur.source_text())
                    == normalize_whitespace(&inc.source_text())
        }
        _ => false,
    }
}

/// Whether current and incoming metadata differ only in kernel keys.
fn only_kernel_metadata_differs(
    current: Option<&Notebook>,
    incoming: Option<&Notebook>,
) -> bool {
    let (Some(cur), Some(inc)) = (current, incoming) else {
        return false;
    };
    let keys: BTreeSet<&String> = cur.metadata.keys().chain(inc.metadata.keys()).collect();
    let differing: Vec<&&String> = keys
        .iter()
        .filter(|k| cur.metadata.get(k.as_str()) != inc.metadata.get(k.as_str()))
        .collect();
    !differing.is_empty()
        && differing
            .iter()
            .all(|k| KERNEL_METADATA_KEYS.contains(&k.as_str()))
}
