//! Conflict detection, three-way merging, and resolution management.
//!
//! The conflict subsystem is responsible for:
//! 1. **Alignment** -- matching cells across base, current and incoming.
//! 2. **Detection** -- finding textual markers and semantic divergence.
//! 3. **Auto-resolution** -- settling low-value conflicts by policy.
//! 4. **Resolution** -- applying user choices and merging cell by cell.

pub mod aligner;
pub mod auto_resolve;
pub mod detector;
pub mod markers;
pub mod merger;
pub mod resolver;
pub mod textual;

pub use aligner::{align, detect_reordering, CellMapping};
pub use auto_resolve::apply_auto_resolutions;
pub use detector::{SemanticConflict, SemanticConflictDetector, SemanticConflictKind};
pub use markers::{has_conflict_markers, resolve, MarkerRegion, ResolutionChoice};
pub use merger::SemanticMerger;
pub use resolver::{ConflictResolver, Resolutions};
pub use textual::{detect_textual_conflicts, MetadataConflict, TextualConflict};
