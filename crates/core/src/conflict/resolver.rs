//! Conflict resolution actions.
//!
//! The [`ConflictResolver`] applies one [`ResolutionChoice`] per textual
//! conflict to a working-copy notebook and produces the resolved file
//! content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conflict::markers::{extract_region_from, resolve, CellMarkerRegion, ResolutionChoice};
use crate::conflict::textual::{structured_conflicts, TextualConflict};
use crate::errors::{MarkerError, ResolveError};
use crate::notebook::{Cell, CellType, Notebook};

/// The caller's decisions for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolutions {
    /// One choice per conflict that takes one
    /// ([`TextualConflict::needs_choice`]), in order. Output conflicts take
    /// no choice, so `NotebookConflict::choices_needed` is the expected length.
    pub choices: Vec<ResolutionChoice>,
    /// Applied to every metadata string value that contains markers.
    #[serde(default = "default_metadata_choice")]
    pub metadata: ResolutionChoice,
}

fn default_metadata_choice() -> ResolutionChoice {
    ResolutionChoice::Current
}

impl Resolutions {
    /// The same choice for `count` conflicts and for metadata.
    pub fn uniform(choice: ResolutionChoice, count: usize) -> Self {
        Self {
            choices: vec![choice.clone(); count],
            metadata: choice,
        }
    }

    fn choice(&self, index: usize) -> Result<&ResolutionChoice, ResolveError> {
        self.choices.get(index).ok_or(ResolveError::MissingChoice {
            index,
            available: self.choices.len(),
        })
    }
}

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve every conflict in `raw` and return the new file content.
    ///
    /// A file that parses is rewritten structurally and re-serialized. A file
    /// broken by raw markers is resolved as text; if the result then parses
    /// it is re-serialized as well, otherwise the text is returned as is.
    pub fn apply(raw: &str, resolutions: &Resolutions) -> Result<String, ResolveError> {
        info!(
            bytes = raw.len(),
            choices = resolutions.choices.len(),
            "applying conflict resolutions"
        );
        match Notebook::parse(raw) {
            Ok(notebook) => Self::apply_structured(notebook, resolutions),
            Err(e) => {
                debug!(error = %e, "resolving as raw text");
                Self::apply_raw(raw, resolutions)
            }
        }
    }

    fn apply_raw(raw: &str, resolutions: &Resolutions) -> Result<String, ResolveError> {
        let mut out = raw.to_string();
        let mut from = 0;
        let mut index = 0;
        while let Some(region) = extract_region_from(&out, from)? {
            let replacement = region.replacement_in(&out, resolutions.choice(index)?);
            debug!(index, line = region.start_line, "resolving raw region");
            from = region.start + replacement.len();
            out.replace_range(region.span(), &replacement);
            index += 1;
        }

        match Notebook::parse(&out) {
            Ok(notebook) => {
                info!(regions = index, "raw resolution produced a valid notebook");
                serialize(&notebook)
            }
            Err(e) => {
                warn!(regions = index, error = %e, "resolved text is not a valid notebook");
                Ok(out)
            }
        }
    }

    fn apply_structured(
        mut notebook: Notebook,
        resolutions: &Resolutions,
    ) -> Result<String, ResolveError> {
        let (conflicts, metadata_conflicts) = structured_conflicts(&notebook);

        let mut dropped = vec![false; notebook.cells.len()];
        let mut inserted: BTreeMap<usize, Cell> = BTreeMap::new();

        // Output conflicts take no choice, so choices are counted separately.
        let mut slot = 0;
        for conflict in &conflicts {
            match conflict {
                TextualConflict::CellRegion { region } => {
                    let choice = resolutions.choice(slot)?;
                    slot += 1;
                    debug!(start = region.start_cell, "resolving cell region");
                    let custom = plan_cell_region(&notebook.cells, region, choice, &mut dropped);
                    if let Some(cell) = custom {
                        inserted.insert(region.start_cell, cell);
                    }
                }
                TextualConflict::InlineSource { cell_index, .. } => {
                    let choice = resolutions.choice(slot)?;
                    slot += 1;
                    if let Some(cell) = notebook.cells.get_mut(*cell_index) {
                        let text = resolve(&cell.source_text(), choice)?;
                        cell.source = cell.source.with_text(&text);
                    }
                }
                TextualConflict::InlineOutputs { cell_index, .. } => {
                    if let Some(cell) = notebook.cells.get_mut(*cell_index) {
                        debug!(cell = cell_index, "clearing outputs with markers");
                        cell.outputs = Some(Vec::new());
                    }
                }
                TextualConflict::RawRegion { .. } => {}
            }
        }

        if !metadata_conflicts.is_empty() {
            let mut resolved = 0;
            for value in notebook.metadata.values_mut() {
                resolved += resolve_strings(value, &resolutions.metadata)?;
            }
            for cell in &mut notebook.cells {
                for value in cell.metadata.values_mut() {
                    resolved += resolve_strings(value, &resolutions.metadata)?;
                }
            }
            debug!(resolved, "metadata values resolved");
        }

        let cells = std::mem::take(&mut notebook.cells);
        for (idx, cell) in cells.into_iter().enumerate() {
            if let Some(custom) = inserted.remove(&idx) {
                notebook.cells.push(custom);
            }
            if !dropped[idx] {
                notebook.cells.push(cell);
            }
        }

        info!(
            conflicts = conflicts.len(),
            cells = notebook.cells.len(),
            "structured resolution complete"
        );
        serialize(&notebook)
    }
}

/// Mark the cells a cell-region choice removes. Returns the replacement cell
/// for a custom choice.
fn plan_cell_region(
    cells: &[Cell],
    region: &CellMarkerRegion,
    choice: &ResolutionChoice,
    dropped: &mut [bool],
) -> Option<Cell> {
    for idx in [region.start_cell, region.separator_cell, region.end_cell] {
        dropped[idx] = true;
    }
    let (keep_current, keep_incoming) = match choice {
        ResolutionChoice::Current => (true, false),
        ResolutionChoice::Incoming => (false, true),
        ResolutionChoice::Both => (true, true),
        ResolutionChoice::Custom(_) => (false, false),
    };
    for idx in region.current_cells() {
        dropped[idx] |= !keep_current;
    }
    for idx in region.incoming_cells() {
        dropped[idx] |= !keep_incoming;
    }

    let ResolutionChoice::Custom(text) = choice else {
        return None;
    };
    let cell_type = region
        .current_cells()
        .chain(region.incoming_cells())
        .find_map(|idx| cells.get(idx).map(|c| c.cell_type))
        .unwrap_or(CellType::Code);
    Some(Cell::new(cell_type, text))
}

/// Resolve markers in every string inside `value`. Returns how many strings
/// changed.
fn resolve_strings(value: &mut Value, choice: &ResolutionChoice) -> Result<usize, MarkerError> {
    match value {
        Value::String(s) => {
            let resolved = resolve(s, choice)?;
            if resolved == *s {
                return Ok(0);
            }
            *s = resolved;
            Ok(1)
        }
        Value::Array(items) => items.iter_mut().map(|v| resolve_strings(v, choice)).sum(),
        Value::Object(map) => map.values_mut().map(|v| resolve_strings(v, choice)).sum(),
        _ => Ok(0),
    }
}

fn serialize(notebook: &Notebook) -> Result<String, ResolveError> {
    notebook
        .to_json_string()
        .map_err(|e| ResolveError::Serialize(e.to_string()))
}
