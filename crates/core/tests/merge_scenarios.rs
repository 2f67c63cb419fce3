//! End-to-end tests for notebook merge conflict handling.
//!
//! These tests drive the public API the way a git merge driver would:
//! - serialized notebooks for base, current and incoming
//! - a working copy with or without conflict markers
//! - auto-resolution followed by applying user choices
//!
//! No git repository is involved; every version is built in memory.

use std::collections::BTreeMap;

use nbmerge_core::conflict::markers::has_conflict_markers;
use nbmerge_core::conflict::{ResolutionChoice, SemanticConflictKind, TextualConflict};
use nbmerge_core::diff::{line_diff, RowKind, SpanKind};
use nbmerge_core::{
    apply_auto_resolutions, detect_semantic_conflicts, detect_textual_conflicts,
    AlignmentConfig, AutoResolveSettings, Cell, ConflictResolver, MergeConfig, MergeInput,
    Notebook, Output, Resolutions, SemanticMerger,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn notebook(sources: &[&str]) -> Notebook {
    let mut nb = Notebook::new(sources.iter().map(|s| Cell::code(s)).collect());
    nb.metadata.insert(
        "kernelspec".into(),
        serde_json::json!({"display_name": "Python 3", "language": "python", "name": "python3"}),
    );
    nb
}

fn serialized(nb: &Notebook) -> String {
    nb.to_json_string().expect("notebook serializes")
}

fn input(
    base: Option<&Notebook>,
    current: Option<&Notebook>,
    incoming: Option<&Notebook>,
) -> MergeInput {
    MergeInput {
        file_path: "analysis.ipynb".into(),
        base: base.map(serialized),
        current: current.map(serialized),
        incoming: incoming.map(serialized),
        current_branch: Some("main".into()),
        incoming_branch: Some("feature/plots".into()),
        working_copy: None,
    }
}

// ===========================================================================
// Semantic detection
// ===========================================================================

#[test]
fn test_same_cell_edited_on_both_branches() {
    let base = notebook(&["print(1)", "print(2)"]);
    let current = notebook(&["print(10)", "print(2)"]);
    let incoming = notebook(&["print(20)", "print(2)"]);

    let result = detect_semantic_conflicts(
        &input(Some(&base), Some(&current), Some(&incoming)),
        &AlignmentConfig::default(),
    )
    .expect("three versions parse");

    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.kind, SemanticConflictKind::CellModified);
    assert_eq!(conflict.base_index, Some(0));
    assert_eq!(conflict.current_index, Some(0));
    assert_eq!(conflict.incoming_index, Some(0));
    assert_eq!(result.current_branch.as_deref(), Some("main"));
    assert!(!result.has_textual_markers);
}

#[test]
fn test_alignment_covers_every_cell() {
    let base = notebook(&["a = 1", "b = 2", "c = 3", "d = 4"]);
    let current = notebook(&["intro()", "a = 1", "c = 3", "d = 40"]);
    let incoming = notebook(&["b = 2", "a = 1", "d = 4", "e = 5"]);

    let result = detect_semantic_conflicts(
        &input(Some(&base), Some(&current), Some(&incoming)),
        &AlignmentConfig::default(),
    )
    .unwrap();

    let mut seen_base: Vec<usize> = result.mappings.iter().filter_map(|m| m.base_index).collect();
    let mut seen_current: Vec<usize> =
        result.mappings.iter().filter_map(|m| m.current_index).collect();
    let mut seen_incoming: Vec<usize> =
        result.mappings.iter().filter_map(|m| m.incoming_index).collect();
    seen_base.sort_unstable();
    seen_current.sort_unstable();
    seen_incoming.sort_unstable();
    assert_eq!(seen_base, vec![0, 1, 2, 3]);
    assert_eq!(seen_current, vec![0, 1, 2, 3]);
    assert_eq!(seen_incoming, vec![0, 1, 2, 3]);

    assert!(result
        .conflicts
        .iter()
        .any(|c| c.kind == SemanticConflictKind::CellReordered));
}

#[test]
fn test_unparseable_versions_are_not_applicable() {
    let base = notebook(&["x = 1"]);
    let mut merge_input = input(Some(&base), None, None);
    merge_input.current = Some("{\"cells\": ".into());
    assert!(detect_semantic_conflicts(&merge_input, &AlignmentConfig::default()).is_none());
}

// ===========================================================================
// Auto-resolution
// ===========================================================================

#[test]
fn test_delete_modify_regression() {
    let mut base = notebook(&["load()"]);
    base.cells[0].execution_count = Some(1);
    let mut incoming = base.clone();
    incoming.cells[0].execution_count = Some(9);

    let result = detect_semantic_conflicts(
        &input(Some(&base), None, Some(&incoming)),
        &AlignmentConfig::default(),
    )
    .unwrap();
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].kind, SemanticConflictKind::CellDeleted);

    let resolved = result
        .auto_resolve(&AutoResolveSettings::default())
        .expect("incoming is present");
    assert_eq!(resolved.resolved_notebook.cells[0].execution_count, None);
    assert_eq!(resolved.remaining_conflicts.len(), 1);
}

#[test]
fn test_auto_resolution_is_idempotent() {
    let mut base = notebook(&["a = 1", "plot()"]);
    base.cells[1].execution_count = Some(2);
    let mut current = notebook(&["a = 2", "plot()"]);
    current.cells[1].execution_count = Some(5);
    current.cells[1].outputs = Some(vec![Output::stdout("figure 1\n")]);
    let mut incoming = notebook(&["a = 3", "plot()"]);
    incoming.cells[1].execution_count = Some(7);
    incoming.cells[1].outputs = Some(vec![Output::stdout("figure 2\n")]);

    let result = detect_semantic_conflicts(
        &input(Some(&base), Some(&current), Some(&incoming)),
        &AlignmentConfig::default(),
    )
    .unwrap();

    let settings = AutoResolveSettings {
        strip_outputs: true,
        ..AutoResolveSettings::default()
    };
    let run = || {
        apply_auto_resolutions(
            &result.conflicts,
            result.base.as_ref(),
            result.current.as_ref(),
            result.incoming.as_ref(),
            &settings,
        )
        .unwrap()
    };
    let first = run();
    let second = run();

    assert_eq!(
        serialized(&first.resolved_notebook),
        serialized(&second.resolved_notebook)
    );
    assert_eq!(first.remaining_conflicts, second.remaining_conflicts);
    assert_eq!(first.auto_resolved_count, 2);
    assert!(first.resolved_notebook.cells[1].outputs().is_empty());
    assert_eq!(
        first
            .remaining_conflicts
            .iter()
            .map(|c| c.kind)
            .collect::<Vec<_>>(),
        vec![SemanticConflictKind::CellModified]
    );
}

// ===========================================================================
// Textual conflicts
// ===========================================================================

#[test]
fn test_markers_that_break_json() {
    let current = notebook(&["x = 1"]);
    let incoming = notebook(&["x = 2"]);
    let ours = serialized(&current);
    let theirs = serialized(&incoming);

    // Splice the two serializations the way git would around the one
    // differing line.
    let ours_line = ours.lines().find(|l| l.contains("x = 1")).unwrap();
    let theirs_line = theirs.lines().find(|l| l.contains("x = 2")).unwrap();
    let working = ours.replace(
        &format!("{ours_line}\n"),
        &format!("<<<<<<< HEAD\n{ours_line}\n=======\n{theirs_line}\n>>>>>>> feature/plots\n"),
    );
    assert!(Notebook::parse(&working).is_err());

    let found = detect_textual_conflicts("analysis.ipynb", &working).expect("markers found");
    assert_eq!(found.conflicts.len(), 1);
    assert!(matches!(found.conflicts[0], TextualConflict::RawRegion { .. }));

    let out = ConflictResolver::apply(&working, &Resolutions::uniform(ResolutionChoice::Incoming, 1))
        .unwrap();
    assert!(!has_conflict_markers(&out));
    assert_eq!(out, theirs);
}

#[test]
fn test_marker_cells_in_valid_notebook() {
    let nb = Notebook::new(vec![
        Cell::code("setup()"),
        Cell::markdown("<div class=\"conflict\">&lt;&lt;&lt;&lt;&lt;&lt;&lt; HEAD</div>"),
        Cell::code("train(lr=0.1)"),
        Cell::markdown("<div>=======</div>"),
        Cell::code("train(lr=0.01)"),
        Cell::markdown("<div>&gt;&gt;&gt;&gt;&gt;&gt;&gt; feature/plots</div>"),
    ]);
    let working = serialized(&nb);

    let found = detect_textual_conflicts("analysis.ipynb", &working).unwrap();
    assert_eq!(found.choices_needed(), 1);

    let out = ConflictResolver::apply(&working, &Resolutions::uniform(ResolutionChoice::Both, 1))
        .unwrap();
    let resolved = Notebook::parse(&out).unwrap();
    let sources: Vec<String> = resolved.cells.iter().map(Cell::source_text).collect();
    assert_eq!(sources, vec!["setup()", "train(lr=0.1)", "train(lr=0.01)"]);
}

#[test]
fn test_output_markers_before_source_markers() {
    let mut plot = Cell::code("plot()");
    plot.outputs = Some(vec![Output::stdout(
        "<<<<<<< HEAD\nfigure 1\n=======\nfigure 2\n>>>>>>> feature/plots\n",
    )]);
    let train = Cell::code(
        "<<<<<<< HEAD\ntrain(lr=0.1)\n=======\ntrain(lr=0.01)\n>>>>>>> feature/plots\n",
    );
    let working = serialized(&Notebook::new(vec![plot, train]));

    let found = detect_textual_conflicts("analysis.ipynb", &working).unwrap();
    assert_eq!(found.conflicts.len(), 2);
    assert!(matches!(found.conflicts[0], TextualConflict::InlineOutputs { cell_index: 0, .. }));
    assert_eq!(found.choices_needed(), 1);

    let resolutions = Resolutions::uniform(ResolutionChoice::Incoming, found.choices_needed());
    let out = ConflictResolver::apply(&working, &resolutions).expect("one choice is enough");
    let resolved = Notebook::parse(&out).unwrap();
    assert!(resolved.cells[0].outputs().is_empty());
    assert_eq!(resolved.cells[1].source_text(), "train(lr=0.01)\n");
    assert!(!has_conflict_markers(&out));
}

#[test]
fn test_custom_source_without_newline() {
    let cell = Cell::code("<<<<<<< HEAD\nx = 1\n=======\nx = 2\n>>>>>>> feature/plots\nprint(x)\n");
    let working = serialized(&Notebook::new(vec![cell]));

    let found = detect_textual_conflicts("analysis.ipynb", &working).unwrap();
    let resolutions =
        Resolutions::uniform(ResolutionChoice::Custom("x = 42".into()), found.choices_needed());
    let out = ConflictResolver::apply(&working, &resolutions).unwrap();
    let resolved = Notebook::parse(&out).unwrap();
    assert_eq!(resolved.cells[0].source_text(), "x = 42\nprint(x)\n");
}

#[test]
fn test_working_copy_markers_flag_semantic_result() {
    let base = notebook(&["x = 1"]);
    let mut merge_input = input(Some(&base), Some(&base), Some(&base));
    merge_input.working_copy = Some(b"<<<<<<< HEAD\na\n=======\nb\n>>>>>>> other\n".to_vec());
    let result = detect_semantic_conflicts(&merge_input, &AlignmentConfig::default()).unwrap();
    assert!(result.has_textual_markers);
}

// ===========================================================================
// Semantic merge
// ===========================================================================

#[test]
fn test_semantic_merge_combines_branches() {
    let base = notebook(&["import numpy as np", "a = np.zeros(3)", "print(a)"]);
    let current = notebook(&["import numpy as np", "a = np.ones(3)", "print(a)"]);
    let incoming = notebook(&["import numpy as np", "a = np.zeros(3)", "print(a)", "a.sum()"]);

    let result = detect_semantic_conflicts(
        &input(Some(&base), Some(&current), Some(&incoming)),
        &AlignmentConfig::default(),
    )
    .unwrap();
    let merged = SemanticMerger::merge(&result, &BTreeMap::new()).unwrap();
    let sources: Vec<String> = merged.cells.iter().map(Cell::source_text).collect();
    assert_eq!(
        sources,
        vec!["import numpy as np", "a = np.ones(3)", "print(a)", "a.sum()"]
    );
    assert_eq!(merged.metadata, current.metadata);
}

// ===========================================================================
// Diff and configuration
// ===========================================================================

#[test]
fn test_line_diff_of_modified_line() {
    let diff = line_diff("a\nb\nc", "a\nx\nc");
    let kinds: Vec<RowKind> = diff.left.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RowKind::Unchanged, RowKind::Modified, RowKind::Unchanged]);

    let left_inline = diff.left[1].inline.as_ref().unwrap();
    let right_inline = diff.right[1].inline.as_ref().unwrap();
    assert!(left_inline
        .iter()
        .any(|s| s.kind == SpanKind::Removed && s.text == "b"));
    assert!(right_inline
        .iter()
        .any(|s| s.kind == SpanKind::Added && s.text == "x"));
}

#[test]
fn test_config_from_toml() {
    let config = MergeConfig::from_toml_str(
        r#"
[auto_resolve]
strip_outputs = true

[alignment]
similarity_threshold = 0.8
"#,
    )
    .unwrap();
    assert!(config.auto_resolve.strip_outputs);
    assert!(config.auto_resolve.auto_resolve_execution_count);
    assert_eq!(config.alignment.similarity_threshold, 0.8);
    assert!(config.validate().is_ok());
}
