//! A kernel paired with its row cache.
//!
//! This is the handle an outer trainer keeps for one training run: every
//! row request goes through the cache, and the kernel is only evaluated for
//! entries the cache cannot supply.

use crate::cache::{mirror_doc, CacheStats, KernelCache};
use crate::error::CacheError;
use crate::kernel::Kernel;
use crate::types::{CacheElem, CacheParameter, DocId};

/// Kernel collaborator plus the cache of its rows.
#[derive(Debug)]
pub struct CachedKernel<K> {
    kernel: K,
    cache: KernelCache,
}

impl<K: Kernel> CachedKernel<K> {
    /// Wrap `kernel`, which covers `num_vectors` examples.
    pub fn new(kernel: K, num_vectors: usize, param: &CacheParameter) -> Result<Self, CacheError> {
        let cache = KernelCache::new(num_vectors, param)?;
        Ok(Self { kernel, cache })
    }

    /// Pair `kernel` with an existing cache.
    pub fn with_cache(kernel: K, cache: KernelCache) -> Self {
        Self { kernel, cache }
    }

    /// The wrapped kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// The row cache.
    pub fn cache(&self) -> &KernelCache {
        &self.cache
    }

    /// Mutable access to the row cache, e.g. for [`KernelCache::set_time`].
    pub fn cache_mut(&mut self) -> &mut KernelCache {
        &mut self.cache
    }

    /// Usage counters of the cache.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Single kernel entry, bypassing the cache. Mirrored documents are
    /// mapped onto their real examples.
    pub fn evaluate(&self, i: DocId, j: DocId) -> f64 {
        let n = self.cache.num_vectors();
        self.kernel.compute(mirror_doc(i, n), mirror_doc(j, n))
    }

    /// See [`KernelCache::get_row`].
    pub fn get_row(
        &mut self,
        doc: DocId,
        wanted_columns: Option<&[DocId]>,
        full_line: bool,
    ) -> Vec<CacheElem> {
        self.cache.get_row(&self.kernel, doc, wanted_columns, full_line)
    }

    /// See [`KernelCache::get_row_into`].
    pub fn get_row_into(
        &mut self,
        doc: DocId,
        wanted_columns: Option<&[DocId]>,
        full_line: bool,
        out: &mut [CacheElem],
    ) {
        self.cache
            .get_row_into(&self.kernel, doc, wanted_columns, full_line, out)
    }

    /// See [`KernelCache::cache_row`].
    pub fn cache_row(&mut self, doc: DocId) -> bool {
        self.cache.cache_row(&self.kernel, doc)
    }

    /// See [`KernelCache::cache_rows`].
    pub fn cache_rows(&mut self, rows: &[DocId]) {
        self.cache.cache_rows(&self.kernel, rows)
    }

    /// See [`KernelCache::shrink`].
    pub fn shrink<F: Fn(DocId) -> bool>(&mut self, keep: F, num_to_remove: usize) -> usize {
        self.cache.shrink(keep, num_to_remove)
    }

    /// See [`KernelCache::touch`].
    pub fn touch(&mut self, doc: DocId) -> bool {
        self.cache.touch(doc)
    }

    /// Split into kernel and cache.
    pub fn into_parts(self) -> (K, KernelCache) {
        (self.kernel, self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SparseKernel;
    use crate::types::{KernelParameter, KernelType, SvmNode};

    fn make_nodes(pairs: &[(i32, f64)]) -> Vec<SvmNode> {
        pairs.iter().map(|&(i, v)| SvmNode { index: i, value: v }).collect()
    }

    fn data() -> Vec<Vec<SvmNode>> {
        vec![
            make_nodes(&[(1, 1.0)]),
            make_nodes(&[(1, 2.0), (2, 0.5)]),
            make_nodes(&[(2, -1.0)]),
        ]
    }

    #[test]
    fn rows_match_direct_evaluation() {
        let x = data();
        let param = KernelParameter {
            kernel_type: KernelType::Rbf,
            gamma: 0.5,
            ..Default::default()
        };
        let kernel = SparseKernel::new(&x, &param);
        let mut ck = CachedKernel::new(kernel, x.len(), &CacheParameter::default()).unwrap();

        ck.cache_rows(&[0, 2]);
        assert!(ck.cache().is_cached(0));
        for i in 0..3 {
            let row = ck.get_row(i, None, true);
            for (j, &v) in row.iter().enumerate() {
                assert!((v - ck.evaluate(i, j)).abs() < 1e-15, "({},{})", i, j);
            }
        }
        assert_eq!(ck.stats().hits, 2);
        assert_eq!(ck.stats().misses, 1);
    }

    #[test]
    fn regression_handle_mirrors_documents() {
        let x = data();
        let kernel = SparseKernel::new(
            &x,
            &KernelParameter {
                kernel_type: KernelType::Linear,
                ..Default::default()
            },
        );
        let param = CacheParameter {
            regression_doubling: true,
            ..Default::default()
        };
        let mut ck = CachedKernel::new(kernel, x.len(), &param).unwrap();
        assert_eq!(ck.cache().totdoc(), 6);
        assert_eq!(ck.evaluate(5, 4), ck.evaluate(0, 1));

        assert!(ck.cache_row(4));
        assert!(ck.cache().is_cached(1));
        let row = ck.get_row(1, Some(&[3, 5]), false);
        assert_eq!(row[3], ck.evaluate(1, 2));
        assert_eq!(row[5], ck.evaluate(1, 0));
        let (_, cache) = ck.into_parts();
        cache.cleanup();
    }
}
