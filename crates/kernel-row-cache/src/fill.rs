//! Filling cache lines, one row at a time or several across worker threads.
//!
//! A row is filled column by column over the active set. Where the row of
//! the column's document is already cached, the value is copied from that
//! row (the kernel is symmetric); everything else is computed.
//!
//! The parallel path splits the work in two phases:
//!
//! 1. On the calling thread, every requested row gets a line through
//!    [`KernelCache::allocate_or_evict`] semantics. All table mutations
//!    (occupancy, stamps, mappings) happen here.
//! 2. The buffer is split into disjoint line slices. Lines being filled go to
//!    the workers as `&mut [f64]`; all other lines become read-only copy
//!    sources. The workers only read the tables, so no locking is needed.

use tracing::{trace, warn};

use crate::cache::{mirror_doc, KernelCache};
use crate::kernel::Kernel;
use crate::tables::IndexTables;
use crate::types::{CacheElem, DocId, LineId};

/// A freshly claimed line waiting for its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FillJob {
    doc: DocId,
    line: LineId,
}

/// Split `buffer` into the lines named by `jobs` (mutable, in job order)
/// and every other line of `0..slots` (shared, indexed by slot).
#[allow(clippy::type_complexity)]
fn split_lines<'b>(
    buffer: &'b mut [CacheElem],
    width: usize,
    slots: usize,
    jobs: &[FillJob],
) -> (Vec<(DocId, &'b mut [CacheElem])>, Vec<Option<&'b [CacheElem]>>) {
    let mut target_of = vec![None; slots];
    for (pos, job) in jobs.iter().enumerate() {
        target_of[job.line.index()] = Some(pos);
    }

    let mut targets: Vec<Option<(DocId, &'b mut [CacheElem])>> =
        jobs.iter().map(|_| None).collect();
    let mut sources = vec![None; slots];

    if width == 0 {
        for (slot, job) in targets.iter_mut().zip(jobs) {
            *slot = Some((job.doc, Default::default()));
        }
    } else {
        for (slot, line) in buffer[..slots * width].chunks_mut(width).enumerate() {
            match target_of[slot] {
                Some(pos) => targets[pos] = Some((jobs[pos].doc, line)),
                None => sources[slot] = Some(&*line),
            }
        }
    }

    (targets.into_iter().flatten().collect(), sources)
}

/// Compute every active column of row `m` into `line`.
fn fill_line<K: Kernel + ?Sized>(
    kernel: &K,
    tables: &IndexTables,
    sources: &[Option<&[CacheElem]>],
    num_vectors: usize,
    m: DocId,
    line: &mut [CacheElem],
) {
    let own_column = tables.column_of(m);
    for (value, &k) in line.iter_mut().zip(tables.active_docs()) {
        let copied = own_column.and_then(|col| {
            let src = tables.line_of(k)?;
            sources[src.index()].map(|row| row[col.index()])
        });
        *value = match copied {
            Some(v) => v,
            None => kernel.compute(m, mirror_doc(k, num_vectors)),
        };
    }
}

fn fill_chunk<K: Kernel + ?Sized>(
    kernel: &K,
    tables: &IndexTables,
    sources: &[Option<&[CacheElem]>],
    num_vectors: usize,
    chunk: &mut [(DocId, &mut [CacheElem])],
) {
    for (doc, line) in chunk.iter_mut() {
        fill_line(kernel, tables, sources, num_vectors, *doc, line);
    }
}

/// Start a pool with `num_threads - 1` helpers; the caller is the last worker.
#[cfg(feature = "rayon")]
pub(crate) fn build_pool(num_threads: usize) -> Option<rayon::ThreadPool> {
    if num_threads < 2 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads - 1)
        .thread_name(|i| format!("kernel-fill-{}", i))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(%err, num_threads, "could not start fill workers, caching rows serially");
            None
        }
    }
}

impl KernelCache {
    /// Compute and store row `doc` unless it is already cached.
    ///
    /// Returns whether the row is cached afterwards. When no line can be
    /// freed the row stays uncached and later fetches compute it on demand.
    pub fn cache_row<K: Kernel + ?Sized>(&mut self, kernel: &K, doc: DocId) -> bool {
        let m = self.mirror(doc);
        if self.tables.line_of(m).is_some() {
            return true;
        }
        let Some(line) = self.claim_line(m) else {
            warn!(doc = m, "kernel cache full, increase cache size");
            return false;
        };
        self.fill_jobs(kernel, &[FillJob { doc: m, line }], 0, 1);
        true
    }

    /// Cache every row in `rows`, using the worker pool when the cache was
    /// configured with two or more threads.
    ///
    /// Both paths leave identical cache contents for a symmetric kernel.
    pub fn cache_rows<K: Kernel + ?Sized>(&mut self, kernel: &K, rows: &[DocId]) {
        #[cfg(feature = "rayon")]
        {
            if self.pool.is_some() {
                let jobs = self.claim_batch(rows);
                if jobs.is_empty() {
                    return;
                }
                let workers = self.num_threads;
                let (mut helpers, mut step) = (workers - 1, jobs.len() / workers);
                if step == 0 {
                    helpers = jobs.len() - 1;
                    step = 1;
                }
                self.fill_jobs(kernel, &jobs, helpers, step);
                return;
            }
        }
        for &row in rows {
            self.cache_row(kernel, row);
        }
    }

    /// Claim lines for every uncached row of a batch.
    ///
    /// A line reclaimed by a later row of the same batch only needs to be
    /// filled once, for that later row.
    #[cfg_attr(not(feature = "rayon"), allow(dead_code))]
    fn claim_batch(&mut self, rows: &[DocId]) -> Vec<FillJob> {
        let mut jobs: Vec<FillJob> = Vec::with_capacity(rows.len());
        let mut pending = vec![None; self.max_elems];
        for &row in rows {
            let m = self.mirror(row);
            if self.tables.line_of(m).is_some() {
                continue;
            }
            let Some(line) = self.claim_line(m) else {
                warn!(doc = m, "kernel cache full, increase cache size");
                continue;
            };
            match pending[line.index()] {
                Some(pos) => {
                    let job: &mut FillJob = &mut jobs[pos];
                    trace!(evicted = job.doc, doc = m, "line reclaimed within batch");
                    job.doc = m;
                }
                None => {
                    pending[line.index()] = Some(jobs.len());
                    jobs.push(FillJob { doc: m, line });
                }
            }
        }
        jobs
    }

    /// Fill the lines of `jobs`: `helpers` chunks of `step` jobs go to the
    /// pool, the calling thread fills the remainder.
    fn fill_jobs<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        jobs: &[FillJob],
        helpers: usize,
        step: usize,
    ) {
        let width = self.activenum();
        let slots = self.max_elems;
        let num_vectors = self.num_vectors;
        let tables = &self.tables;
        let (mut targets, sources) = split_lines(&mut self.buffer, width, slots, jobs);
        let sources = sources.as_slice();

        let (spawned, leftover) = targets.split_at_mut(helpers * step);
        #[cfg(feature = "rayon")]
        {
            if let Some(pool) = self.pool.as_ref().filter(|_| !spawned.is_empty()) {
                pool.in_place_scope(|s| {
                    for chunk in spawned.chunks_mut(step) {
                        s.spawn(move |_| fill_chunk(kernel, tables, sources, num_vectors, chunk));
                    }
                    fill_chunk(kernel, tables, sources, num_vectors, leftover);
                });
                self.stats.rows_cached += jobs.len() as u64;
                return;
            }
        }
        fill_chunk(kernel, tables, sources, num_vectors, spawned);
        fill_chunk(kernel, tables, sources, num_vectors, leftover);
        self.stats.rows_cached += jobs.len() as u64;
    }
}
