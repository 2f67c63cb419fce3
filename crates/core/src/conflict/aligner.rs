//! Three-way cell alignment.
//!
//! Cells are matched across base, current and incoming so that each logical
//! cell ends up in exactly one [`CellMapping`]. Matching is pairwise and
//! greedy, which keeps it deterministic and easy to explain:
//!
//! 1. **Exact pass** -- same cell type and same normalised source. Candidate
//!    pairs are taken closest-first (smallest index distance), ties going to
//!    the lower left index and then the lower right index. This is what
//!    decides between duplicate cells.
//! 2. **Fuzzy pass** -- remaining cells of the same type whose token
//!    similarity reaches the configured threshold. Candidates are limited to
//!    the window between the neighbouring matches so an edited cell never
//!    jumps over an anchored one.
//!
//! Base is matched against current and against incoming; cells that neither
//! side shares with base are then matched between current and incoming.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::config::AlignmentConfig;
use crate::diff::similarity;
use crate::notebook::{Cell, CellType};

/// Correlates at most one cell index from each version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMapping {
    pub base_index: Option<usize>,
    pub current_index: Option<usize>,
    pub incoming_index: Option<usize>,
    /// 1.0 for exact matches, the similarity for fuzzy ones.
    pub confidence: f64,
}

impl CellMapping {
    /// First defined index among base, current and incoming.
    pub fn anchor_position(&self) -> usize {
        self.base_index
            .or(self.current_index)
            .or(self.incoming_index)
            .unwrap_or(usize::MAX)
    }

    fn sort_key(&self) -> (usize, bool, usize, usize) {
        (
            self.anchor_position(),
            // Inserted cells sort before the base cell sharing their anchor.
            self.base_index.is_some(),
            self.current_index.unwrap_or(usize::MAX),
            self.incoming_index.unwrap_or(usize::MAX),
        )
    }
}

/// A matched pair of positions and its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PairMatch {
    left: usize,
    right: usize,
    confidence: f64,
}

/// Match two cell lists. Positions are indices into the given slices.
fn match_cells(left: &[&Cell], right: &[&Cell], threshold: f64) -> Vec<PairMatch> {
    let left_src: Vec<String> = left.iter().map(|c| c.source_text()).collect();
    let right_src: Vec<String> = right.iter().map(|c| c.source_text()).collect();

    let mut by_content: HashMap<(CellType, &str), Vec<usize>> = HashMap::new();
    for (j, cell) in right.iter().enumerate() {
        by_content
            .entry((cell.cell_type, right_src[j].as_str()))
            .or_default()
            .push(j);
    }

    // left position -> (right position, confidence)
    let mut matched: BTreeMap<usize, (usize, f64)> = BTreeMap::new();
    let mut taken = vec![false; right.len()];

    // Exact pass: closest pairs first, ties to the lower left then right index.
    let mut exact: Vec<(usize, usize, usize)> = Vec::new();
    for (i, cell) in left.iter().enumerate() {
        if let Some(candidates) = by_content.get(&(cell.cell_type, left_src[i].as_str())) {
            exact.extend(candidates.iter().map(|&j| (i.abs_diff(j), i, j)));
        }
    }
    exact.sort_unstable();
    for (_, i, j) in exact {
        if taken[j] || matched.contains_key(&i) {
            continue;
        }
        taken[j] = true;
        matched.insert(i, (j, 1.0));
    }

    // Fuzzy pass.
    for (i, cell) in left.iter().enumerate() {
        if matched.contains_key(&i) {
            continue;
        }
        let prev = matched.range(..i).next_back().map(|(_, &(j, _))| j);
        let next = matched.range(i + 1..).next().map(|(_, &(j, _))| j);
        let window = match (prev, next) {
            (Some(p), Some(n)) if p < n => p + 1..n,
            (Some(p), None) => p + 1..right.len(),
            (None, Some(n)) => 0..n,
            _ => 0..right.len(),
        };

        let mut best: Option<(f64, usize)> = None;
        for j in window {
            if taken[j] || right[j].cell_type != cell.cell_type {
                continue;
            }
            let score = similarity(&left_src[i], &right_src[j]);
            if score < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, best_j)) => {
                    score > best_score
                        || (score == best_score && i.abs_diff(j) < i.abs_diff(best_j))
                }
            };
            if better {
                best = Some((score, j));
            }
        }

        if let Some((score, j)) = best {
            debug!(left = i, right = j, score, "fuzzy cell match");
            taken[j] = true;
            matched.insert(i, (j, score));
        }
    }

    matched
        .into_iter()
        .map(|(left, (right, confidence))| PairMatch {
            left,
            right,
            confidence,
        })
        .collect()
}

fn refs(cells: Option<&[Cell]>) -> Vec<&Cell> {
    cells.map(|c| c.iter().collect()).unwrap_or_default()
}

/// Align the three versions. Absent versions contribute no cells.
///
/// Every cell index of every present version appears in exactly one of the
/// returned mappings, which are sorted into presentation order.
pub fn align(
    base: Option<&[Cell]>,
    current: Option<&[Cell]>,
    incoming: Option<&[Cell]>,
    config: &AlignmentConfig,
) -> Vec<CellMapping> {
    let threshold = config.similarity_threshold;
    let base_cells = refs(base);
    let current_cells = refs(current);
    let incoming_cells = refs(incoming);

    let base_current: HashMap<usize, (usize, f64)> =
        match_cells(&base_cells, &current_cells, threshold)
            .into_iter()
            .map(|m| (m.left, (m.right, m.confidence)))
            .collect();
    let base_incoming: HashMap<usize, (usize, f64)> =
        match_cells(&base_cells, &incoming_cells, threshold)
            .into_iter()
            .map(|m| (m.left, (m.right, m.confidence)))
            .collect();

    let mut mappings = Vec::new();
    let mut current_used = vec![false; current_cells.len()];
    let mut incoming_used = vec![false; incoming_cells.len()];

    for b in 0..base_cells.len() {
        let cur = base_current.get(&b).copied();
        let inc = base_incoming.get(&b).copied();
        if let Some((c, _)) = cur {
            current_used[c] = true;
        }
        if let Some((i, _)) = inc {
            incoming_used[i] = true;
        }
        let confidence = [cur, inc]
            .iter()
            .flatten()
            .map(|&(_, conf)| conf)
            .fold(1.0, f64::min);
        mappings.push(CellMapping {
            base_index: Some(b),
            current_index: cur.map(|(c, _)| c),
            incoming_index: inc.map(|(i, _)| i),
            confidence,
        });
    }

    // Cells added relative to base: pair them up between current and incoming.
    let current_rest: Vec<usize> = (0..current_cells.len())
        .filter(|&c| !current_used[c])
        .collect();
    let incoming_rest: Vec<usize> = (0..incoming_cells.len())
        .filter(|&i| !incoming_used[i])
        .collect();
    let current_rest_cells: Vec<&Cell> = current_rest.iter().map(|&c| current_cells[c]).collect();
    let incoming_rest_cells: Vec<&Cell> =
        incoming_rest.iter().map(|&i| incoming_cells[i]).collect();

    for m in match_cells(&current_rest_cells, &incoming_rest_cells, threshold) {
        let c = current_rest[m.left];
        let i = incoming_rest[m.right];
        current_used[c] = true;
        incoming_used[i] = true;
        mappings.push(CellMapping {
            base_index: None,
            current_index: Some(c),
            incoming_index: Some(i),
            confidence: m.confidence,
        });
    }

    for c in current_rest.into_iter().filter(|&c| !current_used[c]) {
        mappings.push(CellMapping {
            base_index: None,
            current_index: Some(c),
            incoming_index: None,
            confidence: 1.0,
        });
    }
    for i in incoming_rest.into_iter().filter(|&i| !incoming_used[i]) {
        mappings.push(CellMapping {
            base_index: None,
            current_index: None,
            incoming_index: Some(i),
            confidence: 1.0,
        });
    }

    mappings.sort_by_key(CellMapping::sort_key);
    debug!(
        base = base_cells.len(),
        current = current_cells.len(),
        incoming = incoming_cells.len(),
        mappings = mappings.len(),
        "cells aligned"
    );
    mappings
}

/// True when two versions disagree on the relative order of cells they share.
pub fn detect_reordering(mappings: &[CellMapping]) -> bool {
    type Side = fn(&CellMapping) -> Option<usize>;
    let sides: [(Side, Side); 3] = [
        (|m: &CellMapping| m.base_index, |m: &CellMapping| m.current_index),
        (|m: &CellMapping| m.base_index, |m: &CellMapping| m.incoming_index),
        (|m: &CellMapping| m.current_index, |m: &CellMapping| m.incoming_index),
    ];

    sides.iter().any(|(first, second)| {
        let mut shared: Vec<(usize, usize)> = mappings
            .iter()
            .filter_map(|m| Some((first(m)?, second(m)?)))
            .collect();
        shared.sort_unstable();
        shared.windows(2).any(|w| w[1].1 < w[0].1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(sources: &[&str]) -> Vec<Cell> {
        sources.iter().map(|s| Cell::code(s)).collect()
    }

    fn cfg() -> AlignmentConfig {
        AlignmentConfig::default()
    }

    fn triple(m: &CellMapping) -> (Option<usize>, Option<usize>, Option<usize>) {
        (m.base_index, m.current_index, m.incoming_index)
    }

    fn assert_complete(
        mappings: &[CellMapping],
        base: Option<&[Cell]>,
        current: Option<&[Cell]>,
        incoming: Option<&[Cell]>,
    ) {
        let sides: [(Option<&[Cell]>, fn(&CellMapping) -> Option<usize>); 3] = [
            (base, |m: &CellMapping| m.base_index),
            (current, |m: &CellMapping| m.current_index),
            (incoming, |m: &CellMapping| m.incoming_index),
        ];
        for (cells, get) in sides {
            let len = cells.map_or(0, <[Cell]>::len);
            let mut seen: Vec<usize> = mappings.iter().filter_map(get).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..len).collect::<Vec<_>>());
        }
        for m in mappings {
            assert!(triple(m) != (None, None, None));
            assert!((0.0..=1.0).contains(&m.confidence));
        }
    }

    #[test]
    fn test_identical_versions_align_one_to_one() {
        let v = cells(&["a", "b", "c"]);
        let mappings = align(Some(&v), Some(&v), Some(&v), &cfg());
        assert_eq!(mappings.len(), 3);
        for (k, m) in mappings.iter().enumerate() {
            assert_eq!(triple(m), (Some(k), Some(k), Some(k)));
            assert_eq!(m.confidence, 1.0);
        }
        assert!(!detect_reordering(&mappings));
    }

    #[test]
    fn test_modified_cells_match_fuzzily() {
        let base = cells(&["print(1)", "print(2)"]);
        let current = cells(&["print(10)", "print(2)"]);
        let incoming = cells(&["print(20)", "print(2)"]);
        let mappings = align(Some(&base), Some(&current), Some(&incoming), &cfg());
        assert_eq!(mappings.len(), 2);
        assert_eq!(triple(&mappings[0]), (Some(0), Some(0), Some(0)));
        assert_eq!(mappings[0].confidence, 0.75);
        assert_eq!(triple(&mappings[1]), (Some(1), Some(1), Some(1)));
    }

    #[test]
    fn test_insertions_and_deletions() {
        let base = cells(&["a", "b", "c"]);
        let current = cells(&["x", "a", "c"]);
        let incoming = cells(&["a", "b", "c", "import numpy"]);
        let mappings = align(Some(&base), Some(&current), Some(&incoming), &cfg());
        assert_complete(&mappings, Some(&base), Some(&current), Some(&incoming));

        let order: Vec<_> = mappings.iter().map(triple).collect();
        assert_eq!(
            order,
            vec![
                (None, Some(0), None),
                (Some(0), Some(1), Some(0)),
                (Some(1), None, Some(1)),
                (Some(2), Some(2), Some(2)),
                (None, None, Some(3)),
            ]
        );
    }

    #[test]
    fn test_both_sides_add_similar_cells() {
        let base = cells(&["a"]);
        let current = cells(&["a", "df.head(10)"]);
        let incoming = cells(&["a", "df.head(20)"]);
        let mappings = align(Some(&base), Some(&current), Some(&incoming), &cfg());
        assert_eq!(mappings.len(), 2);
        assert_eq!(triple(&mappings[1]), (None, Some(1), Some(1)));
    }

    #[test]
    fn test_duplicate_content_prefers_closest_position() {
        // The first "dup" was deleted; the surviving one is the trailing cell.
        let base = cells(&["dup", "a", "b", "c", "dup"]);
        let current = cells(&["a", "b", "c", "dup"]);
        let mappings = align(Some(&base), Some(&current), None, &cfg());
        assert_complete(&mappings, Some(&base), Some(&current), None);

        let first = mappings.iter().find(|m| m.base_index == Some(0)).unwrap();
        assert_eq!(first.current_index, None);
        let last = mappings.iter().find(|m| m.base_index == Some(4)).unwrap();
        assert_eq!(last.current_index, Some(3));
        assert!(!detect_reordering(&mappings));
    }

    #[test]
    fn test_duplicate_tie_goes_to_lower_index() {
        let base = cells(&["q", "dup"]);
        let current = cells(&["dup", "w", "dup"]);
        let mappings = align(Some(&base), Some(&current), None, &cfg());
        let dup = mappings.iter().find(|m| m.base_index == Some(1)).unwrap();
        // |0 - 1| == |2 - 1|
        assert_eq!(dup.current_index, Some(0));
    }

    #[test]
    fn test_cell_type_must_match() {
        let base = vec![Cell::markdown("notes")];
        let current = vec![Cell::code("notes")];
        let mappings = align(Some(&base), Some(&current), None, &cfg());
        assert_eq!(mappings.len(), 2);
    }

    #[test]
    fn test_absent_versions() {
        let current = cells(&["a", "b"]);
        let mappings = align(None, Some(&current), None, &cfg());
        assert_eq!(mappings.len(), 2);
        assert_complete(&mappings, None, Some(&current), None);

        let mappings = align(None, None, None, &cfg());
        assert!(mappings.is_empty());
    }

    #[test]
    fn test_alignment_is_complete_for_assorted_inputs() {
        let samples: Vec<Vec<Cell>> = vec![
            cells(&[]),
            cells(&["a"]),
            cells(&["a", "a", "a"]),
            cells(&["b", "a", "c", "a"]),
            cells(&["print(1)", "print(2)", "print(3)"]),
            cells(&["c", "b", "a"]),
        ];
        for base in &samples {
            for current in &samples {
                for incoming in &samples {
                    let mappings = align(Some(base), Some(current), Some(incoming), &cfg());
                    assert_complete(&mappings, Some(base), Some(current), Some(incoming));
                }
            }
        }
    }

    #[test]
    fn test_detect_reordering() {
        let base = cells(&["a", "b", "c"]);
        let current = cells(&["c", "a", "b"]);
        let mappings = align(Some(&base), Some(&current), Some(&base), &cfg());
        assert!(detect_reordering(&mappings));

        let inserted = cells(&["a", "new", "b", "c"]);
        let mappings = align(Some(&base), Some(&inserted), Some(&base), &cfg());
        assert!(!detect_reordering(&mappings));
    }

    #[test]
    fn test_anchor_position_priority() {
        let m = CellMapping {
            base_index: None,
            current_index: Some(4),
            incoming_index: Some(2),
            confidence: 1.0,
        };
        assert_eq!(m.anchor_position(), 4);
        let m = CellMapping {
            base_index: None,
            current_index: None,
            incoming_index: Some(2),
            confidence: 1.0,
        };
        assert_eq!(m.anchor_position(), 2);
    }
}
