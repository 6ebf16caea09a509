// source.rs — Source store and text edits
//
// Holds the current text of every open file and applies edits to it. Each
// applied batch reports the byte ranges it changed in both the old and the
// new text, which the session maps to dirtied graph nodes.
//
// Preconditions: edit ranges are given in the coordinates of the text before
//   the batch.
// Postconditions: a rejected batch leaves the text unchanged.
// Failure modes: `SourceError` for unknown files, out-of-bounds or
//   overlapping ranges, and ranges splitting a UTF-8 character.
// Side effects: none.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use thiserror::Error;

use crate::id::{FileId, IdAllocator};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("unknown file {0}")]
    UnknownFile(FileId),
    #[error("edit range {start}..{end} is out of bounds for a text of {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("edit ranges {first:?} and {second:?} overlap")]
    Overlapping {
        first: Range<usize>,
        second: Range<usize>,
    },
    #[error("byte offset {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

/// Replace `range` (old coordinates) with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub replacement: String,
}

impl TextEdit {
    pub fn new(range: Range<usize>, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at..at, text)
    }
}

/// One changed region, before and after the edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedRange {
    pub old: Range<usize>,
    pub new: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: Arc<str>,
}

#[derive(Debug, Default)]
pub struct SourceStore {
    ids: IdAllocator,
    files: BTreeMap<FileId, SourceFile>,
}

impl SourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new file and return its id.
    pub fn add(&mut self, name: impl Into<String>, text: impl Into<Arc<str>>) -> FileId {
        let id = self.ids.alloc_file();
        self.files.insert(
            id,
            SourceFile {
                name: name.into(),
                text: text.into(),
            },
        );
        id
    }

    pub fn get(&self, file: FileId) -> Option<&SourceFile> {
        self.files.get(&file)
    }

    pub fn text(&self, file: FileId) -> Result<Arc<str>, SourceError> {
        self.get(file)
            .map(|f| f.text.clone())
            .ok_or(SourceError::UnknownFile(file))
    }

    pub fn name(&self, file: FileId) -> Option<&str> {
        self.get(file).map(|f| f.name.as_str())
    }

    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.files.keys().copied()
    }

    pub fn find(&self, name: &str) -> Option<FileId> {
        self.files
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(&id, _)| id)
    }

    /// Apply a batch of non-overlapping edits atomically.
    pub fn apply(&mut self, file: FileId, edits: &[TextEdit]) -> Result<Vec<ChangedRange>, SourceError> {
        let entry = self.files.get_mut(&file).ok_or(SourceError::UnknownFile(file))?;
        let (text, changes) = apply_edits(&entry.text, edits)?;
        entry.text = text.into();
        Ok(changes)
    }

    /// Replace the whole text, reporting the single region that differs.
    pub fn replace(&mut self, file: FileId, text: impl Into<Arc<str>>) -> Result<Vec<ChangedRange>, SourceError> {
        let entry = self.files.get_mut(&file).ok_or(SourceError::UnknownFile(file))?;
        let text = text.into();
        let changes = diff_ranges(&entry.text, &text).into_iter().collect();
        entry.text = text;
        Ok(changes)
    }
}

/// Apply `edits` to `text`. Edits may arrive in any order.
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> Result<(String, Vec<ChangedRange>), SourceError> {
    let mut sorted: Vec<&TextEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| (e.range.start, e.range.end));

    for edit in &sorted {
        let Range { start, end } = edit.range;
        if start > end || end > text.len() {
            return Err(SourceError::OutOfBounds {
                start,
                end,
                len: text.len(),
            });
        }
        for offset in [start, end] {
            if !text.is_char_boundary(offset) {
                return Err(SourceError::NotCharBoundary(offset));
            }
        }
    }
    for pair in sorted.windows(2) {
        if pair[0].range.end > pair[1].range.start {
            return Err(SourceError::Overlapping {
                first: pair[0].range.clone(),
                second: pair[1].range.clone(),
            });
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut changes = Vec::with_capacity(sorted.len());
    let mut cursor = 0;
    for edit in sorted {
        out.push_str(&text[cursor..edit.range.start]);
        let new_start = out.len();
        out.push_str(&edit.replacement);
        changes.push(ChangedRange {
            old: edit.range.clone(),
            new: new_start..out.len(),
        });
        cursor = edit.range.end;
    }
    out.push_str(&text[cursor..]);
    Ok((out, changes))
}

/// The smallest region outside a common prefix and suffix.
pub fn diff_ranges(old: &str, new: &str) -> Option<ChangedRange> {
    if old == new {
        return None;
    }
    let mut prefix = old
        .bytes()
        .zip(new.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    while !old.is_char_boundary(prefix) || !new.is_char_boundary(prefix) {
        prefix -= 1;
    }
    let max_suffix = old.len().min(new.len()) - prefix;
    let mut suffix = old
        .bytes()
        .rev()
        .zip(new.bytes().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    while !old.is_char_boundary(old.len() - suffix) || !new.is_char_boundary(new.len() - suffix) {
        suffix -= 1;
    }
    Some(ChangedRange {
        old: prefix..old.len() - suffix,
        new: prefix..new.len() - suffix,
    })
}

/// Byte offset to 1-based (line, column) conversion.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { line_starts }
    }

    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset).max(1) - 1;
        (line + 1, offset - self.line_starts[line] + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_apply_in_old_coordinates() {
        let (text, changes) = apply_edits(
            "let a = 1;",
            &[TextEdit::new(8..9, "42"), TextEdit::new(4..5, "bb")],
        )
        .unwrap();
        assert_eq!(text, "let bb = 42;");
        assert_eq!(
            changes,
            vec![
                ChangedRange { old: 4..5, new: 4..6 },
                ChangedRange { old: 8..9, new: 9..11 },
            ]
        );
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(matches!(
            apply_edits("abc", &[TextEdit::new(2..5, "")]),
            Err(SourceError::OutOfBounds { .. })
        ));
        assert!(matches!(
            apply_edits("abcdef", &[TextEdit::new(0..3, ""), TextEdit::new(2..4, "")]),
            Err(SourceError::Overlapping { .. })
        ));
        assert_eq!(
            apply_edits("é", &[TextEdit::insert(1, "x")]).unwrap_err(),
            SourceError::NotCharBoundary(1)
        );
    }

    #[test]
    fn rejected_batches_leave_text_alone() {
        let mut store = SourceStore::new();
        let file = store.add("a.em", "let a = 1;");
        assert!(store.apply(file, &[TextEdit::new(0..100, "")]).is_err());
        assert_eq!(&*store.text(file).unwrap(), "let a = 1;");
    }

    #[test]
    fn replace_reports_the_differing_region() {
        let change = diff_ranges("fn f() { 1; }", "fn f() { 22; }").unwrap();
        assert_eq!(change.old, 9..10);
        assert_eq!(change.new, 9..11);
        assert_eq!(diff_ranges("same", "same"), None);
    }

    #[test]
    fn diff_handles_repeated_characters() {
        let change = diff_ranges("aaa", "aaaa").unwrap();
        assert_eq!(change.old, 3..3);
        assert_eq!(change.new, 3..4);
    }

    #[test]
    fn line_index_is_one_based() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.line_col(0), (1, 1));
        assert_eq!(index.line_col(4), (2, 2));
        assert_eq!(index.line_col(6), (3, 1));
    }
}
