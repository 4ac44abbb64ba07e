//! Mirroring the solver's shrinking heuristic in the cache layout.
//!
//! When documents leave the active set their columns are squeezed out of
//! every line. The compaction is one forward pass over the buffer: line `L`
//! moves from offset `L * old_width` to `L * new_width`, which never
//! overtakes unread data, so it runs in place.

use tracing::debug;

use crate::cache::{lines_for, KernelCache};
use crate::types::DocId;

impl KernelCache {
    /// Drop up to `num_to_remove` active documents for which `keep` is false.
    ///
    /// The active list is scanned in column order and the first
    /// `num_to_remove` rejected documents are removed. Cached rows survive
    /// with their remaining columns; rows of removed documents stay cached
    /// too. Returns the number of documents removed.
    pub fn shrink<F>(&mut self, keep: F, num_to_remove: usize) -> usize
    where
        F: Fn(DocId) -> bool,
    {
        let totdoc = self.totdoc();
        let mut kept = vec![true; totdoc];
        let mut removed = 0;
        for &doc in self.tables.active_docs() {
            if removed >= num_to_remove {
                break;
            }
            if !keep(doc) {
                kept[doc] = false;
                removed += 1;
            }
        }
        if removed == 0 {
            return 0;
        }

        let keep_column: Vec<bool> = self
            .tables
            .active_docs()
            .iter()
            .map(|&doc| kept[doc])
            .collect();
        let old_width = keep_column.len();
        let mut to = 0;
        for line in 0..self.max_elems {
            let base = line * old_width;
            for (col, &keep_col) in keep_column.iter().enumerate() {
                if keep_col {
                    self.buffer[to] = self.buffer[base + col];
                    to += 1;
                }
            }
        }

        self.tables.rebuild_active(&kept);
        let activenum = self.activenum();
        self.max_elems = lines_for(self.buffer.len(), activenum, totdoc);

        debug!(
            removed,
            activenum,
            max_elems = self.max_elems,
            "shrunk kernel cache"
        );
        debug_assert!(self.validate().is_ok(), "{:?}", self.validate());
        removed
    }
}
