//! nbmerge core library.
//!
//! This crate provides the foundational components for resolving three-way
//! merge conflicts in Jupyter notebooks: the notebook model, line and token
//! diffs, cell alignment, conflict marker handling, semantic conflict
//! detection, automatic resolution and the resolution applier.

pub mod config;
pub mod conflict;
pub mod diff;
pub mod errors;
pub mod models;
pub mod notebook;

// Re-exports for convenience.
pub use config::{AlignmentConfig, AutoResolveSettings, MergeConfig};
pub use conflict::{
    apply_auto_resolutions, detect_textual_conflicts, ConflictResolver, Resolutions,
    SemanticConflictDetector, SemanticMerger,
};
pub use errors::CoreError;
pub use models::{AutoResolveResult, MergeInput, NotebookConflict, NotebookSemanticConflict};
pub use notebook::{Cell, CellType, Notebook, Output};

/// Semantic conflicts between the versions in `input`, or `None` when fewer
/// than two versions parse.
pub fn detect_semantic_conflicts(
    input: &MergeInput,
    config: &AlignmentConfig,
) -> Option<NotebookSemanticConflict> {
    SemanticConflictDetector::detect(input, config)
}
