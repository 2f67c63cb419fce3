//! Domain model types handed to and returned from the merge core.
//!
//! These types bridge the git collaborator that supplies the staged versions
//! and the presentation layer that renders conflicts.

use serde::{Deserialize, Serialize};

use crate::config::AutoResolveSettings;
use crate::conflict::aligner::CellMapping;
use crate::conflict::auto_resolve::apply_auto_resolutions;
use crate::conflict::detector::{SemanticConflict, SemanticConflictKind};
use crate::conflict::textual::{MetadataConflict, TextualConflict};
use crate::notebook::Notebook;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// The versions of one conflicted file, as read from the git index.
///
/// Any version may be missing: the file may not exist on that side, or the
/// stage may not be available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeInput {
    pub file_path: String,
    pub base: Option<String>,
    pub current: Option<String>,
    pub incoming: Option<String>,
    pub current_branch: Option<String>,
    pub incoming_branch: Option<String>,
    /// The bytes of the file as it sits in the working tree.
    pub working_copy: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Textual conflicts
// ---------------------------------------------------------------------------

/// Conflict markers found in a working-copy notebook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookConflict {
    pub file_path: String,
    pub raw_content: String,
    pub conflicts: Vec<TextualConflict>,
    pub metadata_conflicts: Vec<MetadataConflict>,
}

impl NotebookConflict {
    /// Number of resolution choices the conflict list expects.
    /// `Resolutions::choices` is indexed over the conflicts that need one, so
    /// output conflicts are skipped.
    pub fn choices_needed(&self) -> usize {
        self.conflicts.iter().filter(|c| c.needs_choice()).count()
    }
}

// ---------------------------------------------------------------------------
// Semantic conflicts
// ---------------------------------------------------------------------------

/// Result of comparing the three parsed versions of a notebook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookSemanticConflict {
    pub file_path: String,
    pub has_textual_markers: bool,
    pub conflicts: Vec<SemanticConflict>,
    pub mappings: Vec<CellMapping>,
    pub base: Option<Notebook>,
    pub current: Option<Notebook>,
    pub incoming: Option<Notebook>,
    pub current_branch: Option<String>,
    pub incoming_branch: Option<String>,
}

impl NotebookSemanticConflict {
    /// Conflicts that need a decision (everything but one-sided additions).
    pub fn conflicting(&self) -> impl Iterator<Item = &SemanticConflict> {
        self.conflicts.iter().filter(|c| c.conflicting)
    }

    pub fn count_of(&self, kind: SemanticConflictKind) -> usize {
        self.conflicts.iter().filter(|c| c.kind == kind).count()
    }

    /// Run the auto-resolution policy over this conflict set.
    pub fn auto_resolve(&self, settings: &AutoResolveSettings) -> Option<AutoResolveResult> {
        apply_auto_resolutions(
            &self.conflicts,
            self.base.as_ref(),
            self.current.as_ref(),
            self.incoming.as_ref(),
            settings,
        )
    }
}

// ---------------------------------------------------------------------------
// Auto-resolution
// ---------------------------------------------------------------------------

/// Outcome of [`apply_auto_resolutions`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoResolveResult {
    /// Copy of current (or incoming when current is absent) with the
    /// automatic fixes applied.
    pub resolved_notebook: Notebook,
    pub remaining_conflicts: Vec<SemanticConflict>,
    pub auto_resolved_count: usize,
    pub descriptions: Vec<String>,
    pub kernel_auto_resolved: bool,
}

impl AutoResolveResult {
    pub fn is_fully_resolved(&self) -> bool {
        self.remaining_conflicts.iter().all(|c| !c.conflicting)
    }
}
