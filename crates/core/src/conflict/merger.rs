//! Cell-level three-way merge engine.
//!
//! Walks the cell mappings of a [`NotebookSemanticConflict`] and builds one
//! merged notebook. Fields only one branch touched are taken from that
//! branch. Sources both branches edited go through a line-based three-way
//! merge with `diffy`; if that still conflicts, the caller's choice for the
//! mapping decides.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::conflict::markers::ResolutionChoice;
use crate::models::NotebookSemanticConflict;
use crate::notebook::{Cell, Notebook};

/// Stateless semantic merge engine.
pub struct SemanticMerger;

impl SemanticMerger {
    /// Merge the versions described by `conflict`.
    ///
    /// `choices` is keyed by position in `conflict.mappings`; a missing entry
    /// means [`ResolutionChoice::Current`]. Returns `None` when neither
    /// current nor incoming is present.
    pub fn merge(
        conflict: &NotebookSemanticConflict,
        choices: &BTreeMap<usize, ResolutionChoice>,
    ) -> Option<Notebook> {
        let template = conflict.current.as_ref().or(conflict.incoming.as_ref())?;
        info!(
            path = %conflict.file_path,
            mappings = conflict.mappings.len(),
            choices = choices.len(),
            "performing semantic merge"
        );

        let mut cells = Vec::new();
        for (pos, mapping) in conflict.mappings.iter().enumerate() {
            let choice = choices.get(&pos).unwrap_or(&ResolutionChoice::Current);
            let base = cell_at(conflict.base.as_ref(), mapping.base_index);
            let current = cell_at(conflict.current.as_ref(), mapping.current_index);
            let incoming = cell_at(conflict.incoming.as_ref(), mapping.incoming_index);

            match (base, current, incoming) {
                (Some(b), Some(c), Some(i)) => cells.push(merge_cell(b, c, i, choice)),
                (None, Some(c), None) => cells.push(c.clone()),
                (None, None, Some(i)) => cells.push(i.clone()),
                (None, Some(c), Some(i)) => {
                    if c.same_content(i) {
                        debug!(pos, "identical additions collapse");
                        cells.push(c.clone());
                    } else {
                        cells.extend(pick_cells(c, i, choice));
                    }
                }
                (Some(b), Some(c), None) => {
                    if c.same_content(b) {
                        debug!(pos, "incoming deleted an unchanged cell");
                    } else {
                        cells.extend(resolve_deletion(c, false, choice));
                    }
                }
                (Some(b), None, Some(i)) => {
                    if i.same_content(b) {
                        debug!(pos, "current deleted an unchanged cell");
                    } else {
                        cells.extend(resolve_deletion(i, true, choice));
                    }
                }
                (Some(_), None, None) | (None, None, None) => {}
            }
        }

        info!(cells = cells.len(), "semantic merge complete");
        Some(Notebook {
            cells,
            ..template.clone()
        })
    }
}

fn cell_at(notebook: Option<&Notebook>, index: Option<usize>) -> Option<&Cell> {
    notebook?.cells.get(index?)
}

/// Delete/modify: `survivor` was edited on one branch and deleted on the
/// other.
fn resolve_deletion(
    survivor: &Cell,
    deleted_on_current: bool,
    choice: &ResolutionChoice,
) -> Option<Cell> {
    match choice {
        ResolutionChoice::Current if deleted_on_current => None,
        ResolutionChoice::Incoming if !deleted_on_current => None,
        ResolutionChoice::Custom(text) => {
            let mut cell = survivor.clone();
            cell.source = cell.source.with_text(text);
            Some(cell)
        }
        _ => Some(survivor.clone()),
    }
}

/// Whole-cell decision between two versions of one cell.
fn pick_cells(current: &Cell, incoming: &Cell, choice: &ResolutionChoice) -> Vec<Cell> {
    match choice {
        ResolutionChoice::Current => vec![current.clone()],
        ResolutionChoice::Incoming => vec![incoming.clone()],
        ResolutionChoice::Both => vec![current.clone(), incoming.clone()],
        ResolutionChoice::Custom(text) => {
            let mut cell = current.clone();
            cell.source = cell.source.with_text(text);
            vec![cell]
        }
    }
}

/// The side that moved away from base; `prefer_incoming` settles the case
/// where both did, differently.
fn pick<T: PartialEq + Clone>(base: &T, current: &T, incoming: &T, prefer_incoming: bool) -> T {
    if current == base || (prefer_incoming && incoming != base) {
        incoming.clone()
    } else {
        current.clone()
    }
}

fn merge_cell(base: &Cell, current: &Cell, incoming: &Cell, choice: &ResolutionChoice) -> Cell {
    let prefer_incoming = matches!(choice, ResolutionChoice::Incoming);
    let mut merged = current.clone();

    merged.cell_type = pick(&base.cell_type, &current.cell_type, &incoming.cell_type, prefer_incoming);
    merged.metadata = pick(&base.metadata, &current.metadata, &incoming.metadata, prefer_incoming);
    merged.id = current.id.clone().or_else(|| incoming.id.clone());

    // Counter and outputs describe one execution and travel together.
    let (execution_count, outputs) = pick(
        &(base.execution_count, base.outputs.clone()),
        &(current.execution_count, current.outputs.clone()),
        &(incoming.execution_count, incoming.outputs.clone()),
        prefer_incoming,
    );
    merged.execution_count = execution_count;
    merged.outputs = outputs;

    let text = merge_source(
        &base.source_text(),
        &current.source_text(),
        &incoming.source_text(),
        choice,
    );
    merged.source = current.source.with_text(&text);
    merged
}

fn merge_source(base: &str, current: &str, incoming: &str, choice: &ResolutionChoice) -> String {
    if current == base {
        return incoming.to_string();
    }
    if incoming == base || current == incoming {
        return current.to_string();
    }

    match diffy::merge(base, current, incoming) {
        Ok(merged) => {
            debug!("clean three-way merge of cell source");
            merged
        }
        Err(_) => {
            debug!(?choice, "cell source conflicts, using choice");
            match choice {
                ResolutionChoice::Current => current.to_string(),
                ResolutionChoice::Incoming => incoming.to_string(),
                ResolutionChoice::Both if current.ends_with('\n') => format!("{current}{incoming}"),
                ResolutionChoice::Both => format!("{current}\n{incoming}"),
                ResolutionChoice::Custom(text) => text.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlignmentConfig;
    use crate::conflict::detector::SemanticConflictDetector;
    use crate::models::MergeInput;
    use crate::notebook::Output;

    fn conflict_for(
        base: Option<&Notebook>,
        current: Option<&Notebook>,
        incoming: Option<&Notebook>,
    ) -> NotebookSemanticConflict {
        let text = |nb: Option<&Notebook>| nb.map(|n| n.to_json_string().unwrap());
        let input = MergeInput {
            file_path: "nb.ipynb".into(),
            base: text(base),
            current: text(current),
            incoming: text(incoming),
            ..Default::default()
        };
        SemanticConflictDetector::detect(&input, &AlignmentConfig::default()).unwrap()
    }

    fn sources(nb: &Notebook) -> Vec<String> {
        nb.cells.iter().map(Cell::source_text).collect()
    }

    fn code(sources: &[&str]) -> Notebook {
        Notebook::new(sources.iter().map(|s| Cell::code(s)).collect())
    }

    #[test]
    fn test_edits_in_different_cells() {
        let base = code(&["a = 1", "b = 1"]);
        let current = code(&["a = 2", "b = 1"]);
        let incoming = code(&["a = 1", "b = 2"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&incoming));
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(sources(&merged), vec!["a = 2", "b = 2"]);
    }

    #[test]
    fn test_non_overlapping_edits_in_one_cell() {
        let base = code(&["line1\nline2\nline3\nline4\nline5\nline6\nline7\nline8\n"]);
        let current = code(&["LINE1\nline2\nline3\nline4\nline5\nline6\nline7\nline8\n"]);
        let incoming = code(&["line1\nline2\nline3\nline4\nline5\nline6\nline7\nLINE8\n"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&incoming));
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(
            merged.cells[0].source_text(),
            "LINE1\nline2\nline3\nline4\nline5\nline6\nline7\nLINE8\n"
        );
    }

    #[test]
    fn test_conflicting_source_uses_choice() {
        let base = code(&["print(1)", "print(2)"]);
        let current = code(&["print(10)", "print(2)"]);
        let incoming = code(&["print(20)", "print(2)"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&incoming));

        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(sources(&merged), vec!["print(10)", "print(2)"]);

        let choices = BTreeMap::from([(0, ResolutionChoice::Incoming)]);
        let merged = SemanticMerger::merge(&conflict, &choices).unwrap();
        assert_eq!(sources(&merged), vec!["print(20)", "print(2)"]);

        let choices = BTreeMap::from([(0, ResolutionChoice::Custom("print(30)".into()))]);
        let merged = SemanticMerger::merge(&conflict, &choices).unwrap();
        assert_eq!(sources(&merged), vec!["print(30)", "print(2)"]);
    }

    #[test]
    fn test_outputs_follow_the_changed_side() {
        let base = code(&["run()"]);
        let current = base.clone();
        let mut incoming = base.clone();
        incoming.cells[0].execution_count = Some(3);
        incoming.cells[0].outputs = Some(vec![Output::stdout("ok\n")]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&incoming));
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(merged.cells[0].execution_count, Some(3));
        assert_eq!(merged.cells[0].outputs().len(), 1);
    }

    #[test]
    fn test_deletions() {
        let base = code(&["keep()", "unchanged()"]);
        let current = code(&["keep()"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&base));
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(sources(&merged), vec!["keep()"]);

        // Delete on current, modify on incoming.
        let incoming = code(&["keep()", "unchanged(1)"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&incoming));
        let pos = conflict
            .mappings
            .iter()
            .position(|m| m.base_index == Some(1))
            .unwrap();
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(sources(&merged), vec!["keep()"]);

        let choices = BTreeMap::from([(pos, ResolutionChoice::Incoming)]);
        let merged = SemanticMerger::merge(&conflict, &choices).unwrap();
        assert_eq!(sources(&merged), vec!["keep()", "unchanged(1)"]);
    }

    #[test]
    fn test_additions() {
        let base = code(&["a"]);
        let current = code(&["a", "same_new()"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&current));
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(sources(&merged), vec!["a", "same_new()"]);

        let current = code(&["a", "alpha_feature()"]);
        let incoming = code(&["a", "zulu_report(7, 9)"]);
        let conflict = conflict_for(Some(&base), Some(&current), Some(&incoming));
        let both: BTreeMap<usize, ResolutionChoice> = conflict
            .mappings
            .iter()
            .enumerate()
            .filter(|(_, m)| m.base_index.is_none())
            .map(|(pos, _)| (pos, ResolutionChoice::Both))
            .collect();
        let merged = SemanticMerger::merge(&conflict, &both).unwrap();
        assert_eq!(merged.cells.len(), 3);
        assert_eq!(merged.cells[0].source_text(), "a");
    }

    #[test]
    fn test_metadata_from_current() {
        let base = code(&["a"]);
        let mut current = base.clone();
        current.metadata.insert("title".into(), "mine".into());
        let conflict = conflict_for(Some(&base), Some(&current), Some(&base));
        let merged = SemanticMerger::merge(&conflict, &BTreeMap::new()).unwrap();
        assert_eq!(merged.metadata["title"], "mine");
    }
}
