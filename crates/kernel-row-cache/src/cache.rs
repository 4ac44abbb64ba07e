//! LRU kernel-row cache in the SVMLight layout.
//!
//! All rows live in one flat buffer. Line `L` occupies
//! `buffer[L * activenum .. (L + 1) * activenum]` and column `c` of a line is
//! the kernel value against the `c`-th active document. When the solver
//! shrinks its active set the lines get narrower and more of them fit, so the
//! line capacity `max_elems = buffer_len / activenum` grows over a run.
//!
//! Eviction scans the stamps of all lines for the oldest one. With at most
//! `totdoc` lines this is cheaper than the row fills it saves.
//!
//! Row fetching, filling and shrinking are further `impl KernelCache`
//! blocks in their own modules; this one owns the storage, the clock and
//! line allocation.

use std::ops::Range;

use tracing::{debug, info, trace};

use crate::error::CacheError;
use crate::tables::IndexTables;
use crate::types::{CacheElem, CacheParameter, DocId, LineId};

/// Counters describing how the cache has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Row fetches served from a cached line.
    pub hits: u64,
    /// Row fetches computed without a cached line.
    pub misses: u64,
    /// Rows written into a line.
    pub rows_cached: u64,
    /// Lines freed by LRU eviction.
    pub evictions: u64,
    /// Row requests that found no line, even after eviction.
    pub cache_full: u64,
}

impl CacheStats {
    /// Fraction of row fetches that hit the cache, 0.0 before any fetch.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Map a mirrored regression document onto its real example.
///
/// Documents `num_vectors..2 * num_vectors` are the negative-constraint
/// copies of `0..num_vectors` in reverse order.
#[inline]
pub(crate) fn mirror_doc(doc: DocId, num_vectors: usize) -> DocId {
    if doc >= num_vectors {
        2 * num_vectors - 1 - doc
    } else {
        doc
    }
}

/// Number of lines of `width` elements that fit, capped at `totdoc`.
#[inline]
pub(crate) fn lines_for(buffer_len: usize, width: usize, totdoc: usize) -> usize {
    if width == 0 {
        totdoc
    } else {
        (buffer_len / width).min(totdoc)
    }
}

/// Kernel-row cache for one training run.
#[derive(Debug)]
pub struct KernelCache {
    pub(crate) tables: IndexTables,
    pub(crate) buffer: Vec<CacheElem>,
    pub(crate) num_vectors: usize,
    pub(crate) max_elems: usize,
    pub(crate) elems: usize,
    pub(crate) time: i64,
    pub(crate) stats: CacheStats,
    capacity_bytes: usize,
    regression_doubling: bool,
    pub(crate) num_threads: usize,
    #[cfg(feature = "rayon")]
    pub(crate) pool: Option<rayon::ThreadPool>,
}

impl KernelCache {
    /// Create a cache for a kernel with `num_vectors` rows.
    ///
    /// The budget is `param.cache_size` MB, raised to the 10 MB minimum.
    /// With `regression_doubling` the cache covers `2 * num_vectors`
    /// documents.
    pub fn new(num_vectors: usize, param: &CacheParameter) -> Result<Self, CacheError> {
        param.validate()?;
        let mut cache = Self::with_capacity_bytes(
            num_vectors,
            param.capacity_bytes(),
            param.regression_doubling,
        )?;
        cache.set_num_threads(param.num_threads);
        Ok(cache)
    }

    /// Create a cache with an exact byte budget and the serial fill path.
    ///
    /// Unlike [`new`](Self::new) no minimum size is applied, which makes
    /// small caches possible.
    pub fn with_capacity_bytes(
        num_vectors: usize,
        capacity_bytes: usize,
        regression_doubling: bool,
    ) -> Result<Self, CacheError> {
        if num_vectors == 0 {
            return Err(CacheError::EmptyProblem);
        }
        let totdoc = if regression_doubling {
            2 * num_vectors
        } else {
            num_vectors
        };

        let elem_size = std::mem::size_of::<CacheElem>();
        let buffer_len = ((capacity_bytes / elem_size) as u64)
            .min((totdoc as u64).saturating_mul(totdoc as u64));
        // Line offsets must fit the signed index type.
        let buffer_len = i64::try_from(buffer_len)
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(CacheError::BufferTooLarge {
                elements: buffer_len,
            })?;

        let max_elems = lines_for(buffer_len, totdoc, totdoc);
        if max_elems == 0 {
            return Err(CacheError::ZeroCapacity {
                bytes: capacity_bytes,
                line_len: totdoc,
            });
        }

        info!(
            size_mb = buffer_len * elem_size / 1024 / 1024,
            bytes = buffer_len * elem_size,
            totdoc,
            max_elems,
            "using a kernel cache"
        );

        Ok(Self {
            tables: IndexTables::new(totdoc),
            buffer: vec![0.0; buffer_len],
            num_vectors,
            max_elems,
            elems: 0,
            time: 0,
            stats: CacheStats::default(),
            capacity_bytes,
            regression_doubling,
            num_threads: 1,
            #[cfg(feature = "rayon")]
            pool: None,
        })
    }

    /// Choose the worker count for [`cache_rows`](Self::cache_rows).
    ///
    /// 0 or 1 selects the serial path. If the worker pool cannot be started
    /// the cache logs a warning and keeps filling serially.
    pub fn set_num_threads(&mut self, num_threads: usize) {
        self.num_threads = num_threads;
        #[cfg(feature = "rayon")]
        {
            self.pool = crate::fill::build_pool(num_threads);
        }
    }

    /// Worker count requested for row filling.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    // ─── Accessors ──────────────────────────────────────────────────

    /// Number of documents, doubled under regression doubling.
    #[inline]
    pub fn totdoc(&self) -> usize {
        self.tables.totdoc()
    }

    /// Number of real examples the kernel is evaluated on.
    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    /// Number of active documents (the width of every line).
    #[inline]
    pub fn activenum(&self) -> usize {
        self.tables.activenum()
    }

    /// Current line capacity.
    #[inline]
    pub fn max_elems(&self) -> usize {
        self.max_elems
    }

    /// Number of occupied lines.
    #[inline]
    pub fn elems(&self) -> usize {
        self.elems
    }

    /// Size of the backing buffer in elements.
    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Current value of the LRU clock.
    #[inline]
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Read-only view of the bookkeeping tables.
    #[inline]
    pub fn tables(&self) -> &IndexTables {
        &self.tables
    }

    /// Usage counters.
    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Zero the usage counters.
    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Whether the row of `doc` is cached.
    #[inline]
    pub fn is_cached(&self, doc: DocId) -> bool {
        self.tables.line_of(self.mirror(doc)).is_some()
    }

    /// Whether a line can be allocated without evicting.
    #[inline]
    pub fn space_available(&self) -> bool {
        self.elems < self.max_elems
    }

    /// Cached values of `doc`'s row in active-column order, without touching
    /// its LRU stamp.
    pub fn cached_row(&self, doc: DocId) -> Option<&[CacheElem]> {
        let line = self.tables.line_of(self.mirror(doc))?;
        Some(&self.buffer[self.line_range(line)])
    }

    #[inline]
    pub(crate) fn mirror(&self, doc: DocId) -> DocId {
        mirror_doc(doc, self.num_vectors)
    }

    /// Flat buffer range of `line` under the current width.
    #[inline]
    pub(crate) fn line_range(&self, line: LineId) -> Range<usize> {
        let width = self.activenum();
        let start = line.0 * width;
        start..start + width
    }

    // ─── LRU clock ──────────────────────────────────────────────────

    /// Advance the clock to the solver's iteration counter.
    ///
    /// The clock never moves backwards; earlier values are ignored.
    pub fn set_time(&mut self, time: i64) {
        self.time = self.time.max(time);
    }

    #[inline]
    fn tick(&mut self) -> i64 {
        self.time += 1;
        self.time
    }

    #[inline]
    pub(crate) fn stamp(&mut self, line: LineId) {
        let now = self.tick();
        self.tables.stamp(line, now);
    }

    /// Mark `doc`'s row as just used so it is not evicted next.
    ///
    /// Returns whether the row was cached.
    pub fn touch(&mut self, doc: DocId) -> bool {
        match self.tables.line_of(self.mirror(doc)) {
            Some(line) => {
                self.stamp(line);
                true
            }
            None => false,
        }
    }

    /// Subtract the largest stamp from every stamp and rebase the clock by
    /// the same amount, keeping the relative order of all lines.
    pub fn reset_lru(&mut self) {
        let stamps = self.tables.lru_mut(self.max_elems);
        let max = stamps.iter().copied().fold(0, i64::max);
        for s in stamps.iter_mut() {
            *s -= max;
        }
        self.time -= max;
    }

    // ─── Line allocation ────────────────────────────────────────────

    /// Take the first free slot, or `None` once `max_elems` lines are in use.
    pub fn allocate_line(&mut self) -> Option<LineId> {
        if !self.space_available() {
            return None;
        }
        let line = self.tables.first_free(self.max_elems)?;
        self.tables.set_occupied(line, true);
        self.elems += 1;
        Some(line)
    }

    /// Free the least recently used line. Returns whether one was freed.
    pub fn evict_lru(&mut self) -> bool {
        let Some(line) = self.tables.least_recent(self.max_elems) else {
            return false;
        };
        self.tables.set_occupied(line, false);
        self.elems -= 1;
        let doc = self.tables.unbind(line);
        self.stats.evictions += 1;
        trace!(line = line.0, ?doc, "evicted kernel row");
        true
    }

    /// Get a line for `doc`, evicting the LRU line if the cache is full.
    ///
    /// The returned line is stamped as most recently used and must be filled
    /// by the caller. A doc that is already cached gets its own line back.
    /// `None` means no line could be freed.
    pub fn allocate_or_evict(&mut self, doc: DocId) -> Option<&mut [CacheElem]> {
        let line = self.claim_line(self.mirror(doc))?;
        let range = self.line_range(line);
        Some(&mut self.buffer[range])
    }

    pub(crate) fn claim_line(&mut self, doc: DocId) -> Option<LineId> {
        if let Some(line) = self.tables.line_of(doc) {
            self.stamp(line);
            return Some(line);
        }
        let mut line = self.allocate_line();
        if line.is_none() && self.evict_lru() {
            line = self.allocate_line();
        }
        match line {
            Some(line) => {
                self.tables.bind(doc, line);
                self.stamp(line);
                Some(line)
            }
            None => {
                self.stats.cache_full += 1;
                None
            }
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Drop every cached row and restore the full active set, keeping the
    /// byte budget and worker settings.
    pub fn reset(&mut self) {
        let totdoc = self.totdoc();
        self.tables = IndexTables::new(totdoc);
        self.max_elems = lines_for(self.buffer.len(), totdoc, totdoc);
        self.elems = 0;
        self.time = 0;
        debug!(totdoc, max_elems = self.max_elems, "kernel cache reset");
    }

    /// Rebuild the cache, empty, with a budget of `cache_size` MB.
    ///
    /// The 10 MB minimum applies as in [`new`](Self::new).
    pub fn resize(&mut self, cache_size: f64) -> Result<(), CacheError> {
        let param = CacheParameter {
            cache_size,
            regression_doubling: self.regression_doubling,
            num_threads: self.num_threads,
        };
        param.validate()?;
        if param.capacity_bytes() == self.capacity_bytes {
            self.reset();
            return Ok(());
        }
        let mut fresh = Self::with_capacity_bytes(
            self.num_vectors,
            param.capacity_bytes(),
            self.regression_doubling,
        )?;
        fresh.num_threads = self.num_threads;
        #[cfg(feature = "rayon")]
        {
            fresh.pool = self.pool.take();
        }
        fresh.stats = self.stats;
        *self = fresh;
        Ok(())
    }

    /// Release the cache at the end of a training run.
    pub fn cleanup(self) {
        debug!(
            elems = self.elems,
            hits = self.stats.hits,
            misses = self.stats.misses,
            "kernel cache released"
        );
    }

    /// Check the occupancy, bijection and capacity invariants.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_elems > self.totdoc() {
            return Err(CacheError::Inconsistent(format!(
                "max_elems {} exceeds totdoc {}",
                self.max_elems,
                self.totdoc()
            )));
        }
        if self.max_elems * self.activenum() > self.buffer.len() {
            return Err(CacheError::Inconsistent(format!(
                "{} lines of {} do not fit a buffer of {}",
                self.max_elems,
                self.activenum(),
                self.buffer.len()
            )));
        }
        self.tables.validate(self.max_elems, self.elems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ELEM: usize = std::mem::size_of::<CacheElem>();

    /// Cache over `totdoc` docs with room for exactly `lines` full lines.
    fn cache_with_lines(totdoc: usize, lines: usize) -> KernelCache {
        KernelCache::with_capacity_bytes(totdoc, lines * totdoc * ELEM, false).unwrap()
    }

    #[test]
    fn init_sizes_buffer_and_lines() {
        let cache = cache_with_lines(4, 2);
        assert_eq!(cache.totdoc(), 4);
        assert_eq!(cache.activenum(), 4);
        assert_eq!(cache.buffer_len(), 8);
        assert_eq!(cache.max_elems(), 2);
        assert_eq!(cache.elems(), 0);
        assert_eq!(cache.time(), 0);
        assert!(cache.validate().is_ok());
    }

    #[test]
    fn buffer_is_capped_at_full_matrix() {
        let cache = KernelCache::with_capacity_bytes(3, 1 << 20, false).unwrap();
        assert_eq!(cache.buffer_len(), 9);
        assert_eq!(cache.max_elems(), 3);
    }

    #[test]
    fn regression_doubling_doubles_documents() {
        let cache = KernelCache::with_capacity_bytes(3, 1 << 20, true).unwrap();
        assert_eq!(cache.totdoc(), 6);
        assert_eq!(cache.num_vectors(), 3);
        assert_eq!(cache.buffer_len(), 36);
        assert_eq!(mirror_doc(5, 3), 0);
        assert_eq!(mirror_doc(3, 3), 2);
        assert_eq!(mirror_doc(2, 3), 2);
    }

    #[test]
    fn misconfiguration_is_an_error() {
        assert!(matches!(
            KernelCache::with_capacity_bytes(0, 1024, false),
            Err(CacheError::EmptyProblem)
        ));
        assert!(matches!(
            KernelCache::with_capacity_bytes(4, 3 * ELEM, false),
            Err(CacheError::ZeroCapacity { line_len: 4, .. })
        ));
    }

    #[test]
    fn new_applies_minimum_size() {
        let param = CacheParameter {
            cache_size: 0.5,
            ..Default::default()
        };
        let cache = KernelCache::new(2000, &param).unwrap();
        assert_eq!(cache.buffer_len(), 10 * 1024 * 1024 / ELEM);
        assert_eq!(cache.max_elems(), 10 * 1024 * 1024 / ELEM / 2000);
    }

    #[test]
    fn allocate_line_respects_max_elems() {
        let mut cache = cache_with_lines(4, 2);
        assert_eq!(cache.allocate_line(), Some(LineId(0)));
        assert_eq!(cache.allocate_line(), Some(LineId(1)));
        assert!(!cache.space_available());
        assert_eq!(cache.allocate_line(), None);
        assert_eq!(cache.elems(), 2);
    }

    #[test]
    fn evict_picks_oldest_stamp() {
        let mut cache = cache_with_lines(4, 2);
        assert!(!cache.evict_lru());

        assert!(cache.allocate_or_evict(0).is_some());
        assert!(cache.allocate_or_evict(1).is_some());
        assert!(cache.touch(0));

        assert!(cache.evict_lru());
        assert!(cache.is_cached(0));
        assert!(!cache.is_cached(1));
        assert_eq!(cache.elems(), 1);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.validate().is_ok());
    }

    #[test]
    fn allocate_or_evict_reuses_lru_line() {
        let mut cache = cache_with_lines(4, 2);
        cache.allocate_or_evict(0).unwrap().fill(1.0);
        cache.allocate_or_evict(1).unwrap().fill(2.0);
        let line = cache.allocate_or_evict(2).unwrap();
        assert_eq!(line.len(), 4);

        assert!(!cache.is_cached(0));
        assert!(cache.is_cached(1));
        assert!(cache.is_cached(2));
        assert_eq!(cache.tables().line_of(2), Some(LineId(0)));
        assert_eq!(cache.tables().doc_of(LineId(0)), Some(2));
        assert!(cache.validate().is_ok());
    }

    #[test]
    fn allocate_or_evict_returns_existing_line_for_cached_doc() {
        let mut cache = cache_with_lines(4, 2);
        cache.allocate_or_evict(3).unwrap().fill(7.0);
        let again = cache.allocate_or_evict(3).unwrap();
        assert!(again.iter().all(|&v| v == 7.0));
        assert_eq!(cache.elems(), 1);
    }

    #[test]
    fn touch_and_set_time_only_move_forward() {
        let mut cache = cache_with_lines(4, 2);
        assert!(!cache.touch(1));
        cache.allocate_or_evict(1).unwrap();
        cache.set_time(10);
        assert!(cache.touch(1));
        assert_eq!(cache.tables().lru(LineId(0)), 11);
        cache.set_time(3);
        assert_eq!(cache.time(), 11);
    }

    #[test]
    fn reset_lru_preserves_order() {
        let mut cache = cache_with_lines(4, 2);
        cache.allocate_or_evict(0).unwrap();
        cache.set_time(100);
        cache.allocate_or_evict(1).unwrap();
        let (a, b) = (cache.tables().lru(LineId(0)), cache.tables().lru(LineId(1)));
        assert!(a < b);

        cache.reset_lru();
        let (a2, b2) = (cache.tables().lru(LineId(0)), cache.tables().lru(LineId(1)));
        assert_eq!(b2, 0);
        assert_eq!(b2 - a2, b - a);
        assert_eq!(cache.time(), 0);

        // The next access is newer than everything stamped before the reset.
        cache.touch(0);
        assert!(cache.tables().lru(LineId(0)) > b2);
    }

    #[test]
    fn reset_and_resize_empty_the_cache() {
        let mut cache = KernelCache::with_capacity_bytes(50, 1 << 20, false).unwrap();
        cache.allocate_or_evict(3).unwrap();
        cache.reset();
        assert_eq!(cache.elems(), 0);
        assert!(!cache.is_cached(3));

        cache.allocate_or_evict(3).unwrap();
        cache.resize(12.0).unwrap();
        assert_eq!(cache.elems(), 0);
        assert_eq!(cache.buffer_len(), 50 * 50);
        assert!(cache.resize(-1.0).is_err());
        cache.cleanup();
    }

    #[test]
    fn hit_rate_counts_fetches() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
