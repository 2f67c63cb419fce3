//! Longest-common-subsequence line and token diffing.
//!
//! The line diff produces two aligned columns (`left` for the old text,
//! `right` for the new one) so a side-by-side view can render row `i` of both
//! columns next to each other. Lines keep their terminators, so joining the
//! non-placeholder rows of a column reconstructs that column's input exactly.

use serde::Serialize;

/// Above this many table cells [`similarity`] compares lines instead of tokens.
const MAX_TOKEN_TABLE: usize = 250_000;

/// Kind of a row in one column of a line diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Unchanged,
    Added,
    Removed,
    Modified,
    /// Filler opposite an added or removed line.
    Placeholder,
}

/// Kind of an inline span in a token diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Unchanged,
    Added,
    Removed,
}

/// A run of tokens sharing one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineSpan {
    pub kind: SpanKind,
    pub text: String,
}

/// One row of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRow {
    pub kind: RowKind,
    /// The line including its terminator; empty for placeholders.
    pub content: String,
    /// 1-indexed line number in this column's input.
    pub line_number: Option<usize>,
    /// Token-level highlighting, present on `Modified` rows only.
    pub inline: Option<Vec<InlineSpan>>,
}

impl DiffRow {
    fn line(kind: RowKind, content: &str, line_number: usize) -> Self {
        Self {
            kind,
            content: content.to_string(),
            line_number: Some(line_number),
            inline: None,
        }
    }

    fn placeholder() -> Self {
        Self {
            kind: RowKind::Placeholder,
            content: String::new(),
            line_number: None,
            inline: None,
        }
    }

    /// The line without its terminator.
    pub fn text(&self) -> &str {
        self.content.trim_end_matches(&['\n', '\r'][..])
    }
}

/// Two aligned columns; `left.len() == right.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineDiff {
    pub left: Vec<DiffRow>,
    pub right: Vec<DiffRow>,
}

impl LineDiff {
    /// True when every row is unchanged.
    pub fn is_identical(&self) -> bool {
        self.left.iter().all(|r| r.kind == RowKind::Unchanged)
    }
}

// ---------------------------------------------------------------------------
// LCS
// ---------------------------------------------------------------------------

/// Index pairs `(i, j)` with `a[i] == b[j]` forming a longest common
/// subsequence. When a pair matches, the diagonal is always taken.
fn lcs_pairs<T: PartialEq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[0] as usize);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

fn lcs_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    // Two-row variant; only the length is needed.
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Line diff
// ---------------------------------------------------------------------------

/// Split text into lines, keeping terminators.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Compute an aligned line diff of `old` against `new`.
pub fn line_diff(old: &str, new: &str) -> LineDiff {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let pairs = lcs_pairs(&old_lines, &new_lines);

    let mut left = Vec::new();
    let mut right = Vec::new();
    let (mut i, mut j, mut k) = (0, 0, 0);

    while i < old_lines.len() || j < new_lines.len() {
        let next = pairs.get(k).copied();

        if next == Some((i, j)) {
            left.push(DiffRow::line(RowKind::Unchanged, old_lines[i], i + 1));
            right.push(DiffRow::line(RowKind::Unchanged, new_lines[j], j + 1));
            i += 1;
            j += 1;
            k += 1;
            continue;
        }

        let old_pending = i < old_lines.len() && next.map_or(true, |(pi, _)| pi != i);
        let new_pending = j < new_lines.len() && next.map_or(true, |(_, pj)| pj != j);

        if old_pending && new_pending {
            let (old_spans, new_spans) = token_diff(old_lines[i], new_lines[j]);
            let mut l = DiffRow::line(RowKind::Modified, old_lines[i], i + 1);
            l.inline = Some(old_spans);
            let mut r = DiffRow::line(RowKind::Modified, new_lines[j], j + 1);
            r.inline = Some(new_spans);
            left.push(l);
            right.push(r);
            i += 1;
            j += 1;
        } else if old_pending {
            left.push(DiffRow::line(RowKind::Removed, old_lines[i], i + 1));
            right.push(DiffRow::placeholder());
            i += 1;
        } else {
            left.push(DiffRow::placeholder());
            right.push(DiffRow::line(RowKind::Added, new_lines[j], j + 1));
            j += 1;
        }
    }

    LineDiff { left, right }
}

// ---------------------------------------------------------------------------
// Token diff
// ---------------------------------------------------------------------------

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Split into tokens: runs of word characters, and every other character on
/// its own. Concatenating the tokens yields the input.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        if is_word_char(c) {
            word_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = word_start.take() {
            tokens.push(&text[start..idx]);
        }
        tokens.push(&text[idx..idx + c.len_utf8()]);
    }
    if let Some(start) = word_start {
        tokens.push(&text[start..]);
    }
    tokens
}

fn push_span(spans: &mut Vec<InlineSpan>, kind: SpanKind, text: &str) {
    match spans.last_mut() {
        Some(last) if last.kind == kind => last.text.push_str(text),
        _ => spans.push(InlineSpan {
            kind,
            text: text.to_string(),
        }),
    }
}

/// Token-level diff of two lines: spans for the old line (unchanged/removed)
/// and for the new line (unchanged/added).
pub fn token_diff(old: &str, new: &str) -> (Vec<InlineSpan>, Vec<InlineSpan>) {
    let old_tokens = tokenize(old);
    let new_tokens = tokenize(new);
    let pairs = lcs_pairs(&old_tokens, &new_tokens);

    let mut old_spans = Vec::new();
    let mut new_spans = Vec::new();
    let (mut i, mut j) = (0, 0);

    for (pi, pj) in pairs.into_iter().chain(std::iter::once((
        old_tokens.len(),
        new_tokens.len(),
    ))) {
        while i < pi {
            push_span(&mut old_spans, SpanKind::Removed, old_tokens[i]);
            i += 1;
        }
        while j < pj {
            push_span(&mut new_spans, SpanKind::Added, new_tokens[j]);
            j += 1;
        }
        if pi < old_tokens.len() {
            push_span(&mut old_spans, SpanKind::Unchanged, old_tokens[pi]);
            push_span(&mut new_spans, SpanKind::Unchanged, new_tokens[pj]);
            i += 1;
            j += 1;
        }
    }

    (old_spans, new_spans)
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Dice similarity `2·LCS / (|a| + |b|)` in [0, 1], measured over tokens
/// (over lines for very large inputs).
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let a_tokens = tokenize(a);
    let b_tokens = tokenize(b);
    if a_tokens.len().saturating_mul(b_tokens.len()) <= MAX_TOKEN_TABLE {
        return dice(lcs_len(&a_tokens, &b_tokens), a_tokens.len(), b_tokens.len());
    }

    let a_lines = split_lines(a);
    let b_lines = split_lines(b);
    if a_lines.len().saturating_mul(b_lines.len()) <= MAX_TOKEN_TABLE {
        return dice(lcs_len(&a_lines, &b_lines), a_lines.len(), b_lines.len());
    }
    0.0
}

fn dice(common: usize, a_len: usize, b_len: usize) -> f64 {
    if a_len + b_len == 0 {
        return 1.0;
    }
    (2 * common) as f64 / (a_len + b_len) as f64
}
