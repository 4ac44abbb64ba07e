//! Bookkeeping arrays of the kernel cache.
//!
//! Five parallel tables relate documents, physical line slots and columns:
//!
//! - `doc_to_line[doc]` / `line_to_doc[line]`: bijection on cached documents
//! - `occupied[line]`: whether the slot is in use
//! - `lru[line]`: logical time of the last access
//! - `active_to_doc[col]` / `doc_to_active[doc]`: bijection between line
//!   columns and the documents still in the solver's active set
//!
//! Every mutator is crate-private. The allocator, fetcher, filler and
//! shrinker are the only code allowed to change the tables, so the
//! invariants checked by [`IndexTables::validate`] hold between operations.

use crate::error::CacheError;
use crate::types::{ColumnId, DocId, LineId};

/// Document/line/column index tables.
#[derive(Debug, Clone)]
pub struct IndexTables {
    doc_to_line: Vec<Option<LineId>>,
    line_to_doc: Vec<Option<DocId>>,
    occupied: Vec<bool>,
    lru: Vec<i64>,
    active_to_doc: Vec<DocId>,
    doc_to_active: Vec<Option<ColumnId>>,
}

impl IndexTables {
    /// Empty tables for `totdoc` documents, all of them active.
    pub(crate) fn new(totdoc: usize) -> Self {
        Self {
            doc_to_line: vec![None; totdoc],
            line_to_doc: vec![None; totdoc],
            occupied: vec![false; totdoc],
            lru: vec![0; totdoc],
            active_to_doc: (0..totdoc).collect(),
            doc_to_active: (0..totdoc).map(|d| Some(ColumnId(d))).collect(),
        }
    }

    /// Number of documents the tables cover.
    #[inline]
    pub fn totdoc(&self) -> usize {
        self.doc_to_line.len()
    }

    /// Number of active documents, i.e. the width of every cache line.
    #[inline]
    pub fn activenum(&self) -> usize {
        self.active_to_doc.len()
    }

    /// Line holding the row of `doc`, if cached.
    #[inline]
    pub fn line_of(&self, doc: DocId) -> Option<LineId> {
        self.doc_to_line[doc]
    }

    /// Document whose row occupies `line`.
    #[inline]
    pub fn doc_of(&self, line: LineId) -> Option<DocId> {
        self.line_to_doc[line.0]
    }

    /// Whether slot `line` is in use.
    #[inline]
    pub fn is_occupied(&self, line: LineId) -> bool {
        self.occupied[line.0]
    }

    /// Timestamp of the last access to `line`.
    #[inline]
    pub fn lru(&self, line: LineId) -> i64 {
        self.lru[line.0]
    }

    /// Column of `doc` inside every line, or `None` once it was shrunk away.
    #[inline]
    pub fn column_of(&self, doc: DocId) -> Option<ColumnId> {
        self.doc_to_active[doc]
    }

    /// Document stored at `column`.
    #[inline]
    pub fn doc_at(&self, column: ColumnId) -> DocId {
        self.active_to_doc[column.0]
    }

    /// Active documents in column order.
    #[inline]
    pub fn active_docs(&self) -> &[DocId] {
        &self.active_to_doc
    }

    pub(crate) fn first_free(&self, limit: usize) -> Option<LineId> {
        self.occupied[..limit].iter().position(|&o| !o).map(LineId)
    }

    pub(crate) fn set_occupied(&mut self, line: LineId, occupied: bool) {
        self.occupied[line.0] = occupied;
    }

    pub(crate) fn stamp(&mut self, line: LineId, time: i64) {
        self.lru[line.0] = time;
    }

    /// Occupied, mapped line with the smallest stamp among `0..limit`.
    /// Ties go to the lowest slot.
    pub(crate) fn least_recent(&self, limit: usize) -> Option<LineId> {
        (0..limit)
            .filter(|&l| self.occupied[l] && self.line_to_doc[l].is_some())
            .min_by_key(|&l| self.lru[l])
            .map(LineId)
    }

    pub(crate) fn bind(&mut self, doc: DocId, line: LineId) {
        self.doc_to_line[doc] = Some(line);
        self.line_to_doc[line.0] = Some(doc);
    }

    /// Drop the mapping of `line` in both directions.
    pub(crate) fn unbind(&mut self, line: LineId) -> Option<DocId> {
        let doc = self.line_to_doc[line.0].take();
        if let Some(d) = doc {
            self.doc_to_line[d] = None;
        }
        doc
    }

    pub(crate) fn lru_mut(&mut self, limit: usize) -> &mut [i64] {
        &mut self.lru[..limit]
    }

    /// Replace the active set with the active documents passing `keep`,
    /// in document order.
    pub(crate) fn rebuild_active(&mut self, keep: &[bool]) {
        self.active_to_doc.clear();
        for (doc, slot) in self.doc_to_active.iter_mut().enumerate() {
            if keep[doc] && slot.is_some() {
                *slot = Some(ColumnId(self.active_to_doc.len()));
                self.active_to_doc.push(doc);
            } else {
                *slot = None;
            }
        }
    }

    /// Check every table invariant for lines `0..max_elems`.
    pub fn validate(&self, max_elems: usize, elems: usize) -> Result<(), CacheError> {
        let bad = |msg: String| Err(CacheError::Inconsistent(msg));

        for (doc, line) in self.doc_to_line.iter().enumerate() {
            if let Some(line) = line {
                if line.0 >= max_elems {
                    return bad(format!("doc {} maps to line {} >= {}", doc, line.0, max_elems));
                }
                if !self.occupied[line.0] {
                    return bad(format!("doc {} maps to free line {}", doc, line.0));
                }
                if self.line_to_doc[line.0] != Some(doc) {
                    return bad(format!("line {} does not map back to doc {}", line.0, doc));
                }
            }
        }
        for (line, doc) in self.line_to_doc.iter().enumerate() {
            if let Some(doc) = doc {
                if self.doc_to_line[*doc] != Some(LineId(line)) {
                    return bad(format!("doc {} does not map back to line {}", doc, line));
                }
            }
        }

        let occupied = self.occupied.iter().filter(|&&o| o).count();
        if occupied != elems {
            return bad(format!("{} occupied lines but elems = {}", occupied, elems));
        }
        if elems > max_elems {
            return bad(format!("elems {} exceeds max_elems {}", elems, max_elems));
        }

        for (col, &doc) in self.active_to_doc.iter().enumerate() {
            if self.doc_to_active[doc] != Some(ColumnId(col)) {
                return bad(format!("active column {} does not map back from doc {}", col, doc));
            }
            if col > 0 && self.active_to_doc[col - 1] >= doc {
                return bad(format!("active set not ascending at column {}", col));
            }
        }
        let active = self.doc_to_active.iter().filter(|c| c.is_some()).count();
        if active != self.active_to_doc.len() {
            return bad(format!(
                "{} docs marked active but activenum = {}",
                active,
                self.active_to_doc.len()
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tables_are_empty_with_identity_active_set() {
        let t = IndexTables::new(4);
        assert_eq!(t.totdoc(), 4);
        assert_eq!(t.activenum(), 4);
        for d in 0..4 {
            assert_eq!(t.line_of(d), None);
            assert_eq!(t.column_of(d), Some(ColumnId(d)));
            assert_eq!(t.doc_at(ColumnId(d)), d);
        }
        assert!(t.validate(4, 0).is_ok());
    }

    #[test]
    fn bind_and_unbind_keep_both_directions() {
        let mut t = IndexTables::new(3);
        t.set_occupied(LineId(1), true);
        t.bind(2, LineId(1));
        assert_eq!(t.line_of(2), Some(LineId(1)));
        assert_eq!(t.doc_of(LineId(1)), Some(2));
        assert!(t.validate(3, 1).is_ok());

        assert_eq!(t.unbind(LineId(1)), Some(2));
        assert_eq!(t.line_of(2), None);
        t.set_occupied(LineId(1), false);
        assert!(t.validate(3, 0).is_ok());
    }

    #[test]
    fn least_recent_prefers_lowest_slot_on_ties() {
        let mut t = IndexTables::new(3);
        for (doc, line) in [(0, 0), (1, 1), (2, 2)] {
            t.set_occupied(LineId(line), true);
            t.bind(doc, LineId(line));
        }
        t.stamp(LineId(0), 5);
        t.stamp(LineId(1), 3);
        t.stamp(LineId(2), 3);
        assert_eq!(t.least_recent(3), Some(LineId(1)));
        // Only slots below the limit are candidates.
        assert_eq!(t.least_recent(1), Some(LineId(0)));
    }

    #[test]
    fn rebuild_active_drops_unkept_and_inactive_docs() {
        let mut t = IndexTables::new(5);
        t.rebuild_active(&[true, false, true, true, true]);
        assert_eq!(t.active_docs(), &[0, 2, 3, 4]);
        t.rebuild_active(&[true, true, true, false, true]);
        // Doc 1 stays inactive even though it is now kept.
        assert_eq!(t.active_docs(), &[0, 2, 4]);
        assert_eq!(t.column_of(4), Some(ColumnId(2)));
        assert_eq!(t.column_of(3), None);
        assert!(t.validate(5, 0).is_ok());
    }

    #[test]
    fn validate_reports_broken_bijection() {
        let mut t = IndexTables::new(2);
        t.set_occupied(LineId(0), true);
        t.doc_to_line[1] = Some(LineId(0));
        assert!(matches!(
            t.validate(2, 1),
            Err(CacheError::Inconsistent(_))
        ));
    }
}
