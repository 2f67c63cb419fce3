//! Detection of conflict markers left in a working-copy notebook.
//!
//! A file with markers is in one of two states. Either the markers broke the
//! JSON and the file has to be treated as text, or the file still parses and
//! the markers live inside it: as whole marker cells, inside a cell's
//! source, inside outputs, or inside metadata string values.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::conflict::markers::{
    extract_region_from, has_conflict_markers, locate_cell_regions, CellMarkerRegion,
    MarkerRegion,
};
use crate::models::NotebookConflict;
use crate::notebook::{CellType, Notebook};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One resolvable textual conflict. Each entry takes one resolution choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TextualConflict {
    /// A region in a file that no longer parses.
    RawRegion { region: MarkerRegion },
    /// Marker cells surrounding current and incoming cells.
    CellRegion { region: CellMarkerRegion },
    /// Marker regions inside one cell's source.
    InlineSource {
        #[serde(rename = "cellIndex")]
        cell_index: usize,
        #[serde(rename = "cellType")]
        cell_type: CellType,
        regions: Vec<MarkerRegion>,
    },
    /// Outputs whose text contains markers. These are cleared on resolution.
    InlineOutputs {
        #[serde(rename = "cellIndex")]
        cell_index: usize,
        #[serde(rename = "outputIndices")]
        output_indices: Vec<usize>,
    },
}

impl TextualConflict {
    /// Whether the conflict consumes a resolution choice.
    pub fn needs_choice(&self) -> bool {
        !matches!(self, Self::InlineOutputs { .. })
    }
}

/// A metadata string value containing markers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataConflict {
    /// `None` for notebook-level metadata.
    pub cell_index: Option<usize>,
    /// Dotted key path inside the metadata object.
    pub path: String,
    pub regions: Vec<MarkerRegion>,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Every complete region of `text` in order. A nested region ends the scan
/// with a warning instead of failing.
pub fn regions_lenient(text: &str) -> Vec<MarkerRegion> {
    let mut regions = Vec::new();
    let mut from = 0;
    loop {
        match extract_region_from(text, from) {
            Ok(Some(region)) => {
                from = region.region_end;
                regions.push(region);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, found = regions.len(), "stopping marker scan");
                break;
            }
        }
    }
    regions
}

/// Scan a working-copy notebook for textual conflicts.
///
/// Returns `None` when nothing was found.
pub fn detect_textual_conflicts(file_path: &str, raw: &str) -> Option<NotebookConflict> {
    info!(path = %file_path, bytes = raw.len(), "scanning for textual conflicts");

    let (conflicts, metadata_conflicts) = match Notebook::parse(raw) {
        Ok(notebook) => structured_conflicts(&notebook),
        Err(e) => {
            debug!(path = %file_path, error = %e, "notebook does not parse, scanning raw text");
            let conflicts = regions_lenient(raw)
                .into_iter()
                .map(|region| TextualConflict::RawRegion { region })
                .collect();
            (conflicts, Vec::new())
        }
    };

    if conflicts.is_empty() && metadata_conflicts.is_empty() {
        debug!(path = %file_path, "no textual conflicts");
        return None;
    }

    info!(
        path = %file_path,
        conflicts = conflicts.len(),
        metadata_conflicts = metadata_conflicts.len(),
        "textual conflicts found"
    );

    Some(NotebookConflict {
        file_path: file_path.to_string(),
        raw_content: raw.to_string(),
        conflicts,
        metadata_conflicts,
    })
}

/// Conflicts inside a notebook that still parses.
pub(crate) fn structured_conflicts(
    notebook: &Notebook,
) -> (Vec<TextualConflict>, Vec<MetadataConflict>) {
    let cell_regions = locate_cell_regions(&notebook.cells).unwrap_or_else(|e| {
        warn!(error = %e, "nested marker cells, ignoring cell-level regions");
        Vec::new()
    });

    let mut conflicts = Vec::new();
    let mut metadata_conflicts = Vec::new();
    let mut pending = cell_regions.into_iter().peekable();

    for (idx, cell) in notebook.cells.iter().enumerate() {
        if let Some(region) = pending.next_if(|r| r.start_cell == idx) {
            conflicts.push(TextualConflict::CellRegion { region });
        }

        let source = cell.source_text();
        let regions = regions_lenient(&source);
        if !regions.is_empty() {
            conflicts.push(TextualConflict::InlineSource {
                cell_index: idx,
                cell_type: cell.cell_type,
                regions,
            });
        }

        let output_indices: Vec<usize> = cell
            .outputs()
            .iter()
            .enumerate()
            .filter(|(_, output)| {
                output
                    .text_payloads()
                    .iter()
                    .any(|text| has_conflict_markers(text))
            })
            .map(|(i, _)| i)
            .collect();
        if !output_indices.is_empty() {
            conflicts.push(TextualConflict::InlineOutputs {
                cell_index: idx,
                output_indices,
            });
        }

        collect_metadata(Some(idx), &cell.metadata, &mut metadata_conflicts);
    }

    collect_metadata(None, &notebook.metadata, &mut metadata_conflicts);
    (conflicts, metadata_conflicts)
}

fn collect_metadata(
    cell_index: Option<usize>,
    metadata: &Map<String, Value>,
    out: &mut Vec<MetadataConflict>,
) {
    for (key, value) in metadata {
        walk_value(cell_index, key.clone(), value, out);
    }
}

fn walk_value(cell_index: Option<usize>, path: String, value: &Value, out: &mut Vec<MetadataConflict>) {
    match value {
        Value::String(s) => {
            let regions = regions_lenient(s);
            if !regions.is_empty() {
                out.push(MetadataConflict {
                    cell_index,
                    path,
                    regions,
                });
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk_value(cell_index, format!("{path}.{i}"), item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                walk_value(cell_index, format!("{path}.{key}"), item, out);
            }
        }
        _ => {}
    }
}
