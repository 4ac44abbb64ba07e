//! Reading kernel rows through the cache.
//!
//! Fetching never allocates a line. A cached row is served from its line for
//! every column that is still active and computed for the rest; an uncached
//! row is computed entirely. Callers that want a row stored use
//! [`KernelCache::cache_row`] or [`KernelCache::cache_rows`] first.

use crate::cache::{mirror_doc, KernelCache};
use crate::kernel::Kernel;
use crate::types::{CacheElem, DocId};

impl KernelCache {
    /// Return row `doc` of the kernel matrix, indexed by document id.
    ///
    /// With `full_line` (or no column list) the values for documents
    /// `0..num_vectors` are produced; otherwise only the listed columns, in
    /// order. All other entries of the returned vector (length `totdoc`)
    /// are zero.
    pub fn get_row<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        doc: DocId,
        wanted_columns: Option<&[DocId]>,
        full_line: bool,
    ) -> Vec<CacheElem> {
        let mut out = vec![0.0; self.totdoc()];
        self.get_row_into(kernel, doc, wanted_columns, full_line, &mut out);
        out
    }

    /// Like [`get_row`](Self::get_row), writing into `out[column]` and
    /// leaving unrequested entries untouched.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than `totdoc`.
    pub fn get_row_into<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        doc: DocId,
        wanted_columns: Option<&[DocId]>,
        full_line: bool,
        out: &mut [CacheElem],
    ) {
        assert!(
            out.len() >= self.totdoc(),
            "row buffer of {} entries is shorter than totdoc {}",
            out.len(),
            self.totdoc()
        );
        match wanted_columns {
            Some(columns) if !full_line => {
                self.scatter_row(kernel, doc, columns.iter().copied(), out)
            }
            _ => {
                let n = self.num_vectors;
                self.scatter_row(kernel, doc, 0..n, out)
            }
        }
    }

    fn scatter_row<K, I>(&mut self, kernel: &K, doc: DocId, columns: I, out: &mut [CacheElem])
    where
        K: Kernel + ?Sized,
        I: Iterator<Item = DocId>,
    {
        let n = self.num_vectors;
        let doc = mirror_doc(doc, n);

        let Some(line) = self.tables.line_of(doc) else {
            self.stats.misses += 1;
            for j in columns {
                out[j] = kernel.compute(doc, mirror_doc(j, n));
            }
            return;
        };

        self.stamp(line);
        self.stats.hits += 1;
        let row = &self.buffer[self.line_range(line)];
        for j in columns {
            out[j] = match self.tables.column_of(j) {
                Some(col) => row[col.index()],
                // Shrunk away: not stored in any line.
                None => kernel.compute(doc, mirror_doc(j, n)),
            };
        }
    }
}
