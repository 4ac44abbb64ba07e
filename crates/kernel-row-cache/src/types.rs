//! Shared identifiers and configuration for the kernel-row cache.

use crate::error::CacheError;

/// Document (training example) index, `0..totdoc`.
///
/// Under regression doubling the upper half of the range names the mirrored
/// negative-constraint copies of the real examples.
pub type DocId = usize;

/// Element type stored in cache lines.
pub type CacheElem = f64;

/// Smallest cache budget the cache accepts, in MB. Smaller requests are raised.
pub const MIN_CACHE_SIZE_MB: f64 = 10.0;

/// Physical cache-line slot in the backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(pub(crate) usize);

impl LineId {
    /// Slot number, `0..max_elems`.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Column position inside a cache line, i.e. a rank in the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub(crate) usize);

impl ColumnId {
    /// Position in `0..activenum`.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Parameters controlling one cache instance.
///
/// Default values match the classic SVMLight setup: 10 MB, no regression
/// doubling and the serial fill path.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheParameter {
    /// Cache memory size in MB. Values below [`MIN_CACHE_SIZE_MB`] are raised.
    pub cache_size: f64,
    /// Double the logical document count (ε-SVR / ν-SVR style duplicates).
    pub regression_doubling: bool,
    /// Worker threads for filling rows. 0 or 1 selects the serial path.
    pub num_threads: usize,
}

impl Default for CacheParameter {
    fn default() -> Self {
        Self {
            cache_size: MIN_CACHE_SIZE_MB,
            regression_doubling: false,
            num_threads: 1,
        }
    }
}

impl CacheParameter {
    /// Validate parameter values.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.cache_size.is_finite() {
            return Err(CacheError::InvalidParameter(
                "cache_size is not finite".into(),
            ));
        }
        if self.cache_size < 0.0 {
            return Err(CacheError::InvalidParameter("cache_size < 0".into()));
        }
        Ok(())
    }

    /// Cache size actually used, after applying the 10 MB floor.
    pub fn effective_cache_size(&self) -> f64 {
        self.cache_size.max(MIN_CACHE_SIZE_MB)
    }

    /// Byte budget derived from [`effective_cache_size`](Self::effective_cache_size).
    pub fn capacity_bytes(&self) -> usize {
        (self.effective_cache_size() * 1048576.0) as usize
    }

    /// Whether [`num_threads`](Self::num_threads) selects the worker pool.
    pub fn is_parallel(&self) -> bool {
        self.num_threads >= 2
    }
}

/// Type of the stock sparse kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelType {
    /// `K(x,y) = x·y`
    Linear,
    /// `K(x,y) = (γ·x·y + coef0)^degree`
    Polynomial,
    /// `K(x,y) = exp(-γ·‖x-y‖²)`
    Rbf,
    /// `K(x,y) = tanh(γ·x·y + coef0)`
    Sigmoid,
}

/// A single sparse feature: `index:value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvmNode {
    /// 1-based feature index.
    pub index: i32,
    /// Feature value.
    pub value: f64,
}

/// Parameters of the stock sparse kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelParameter {
    /// Kernel function type.
    pub kernel_type: KernelType,
    /// Degree for polynomial kernel.
    pub degree: i32,
    /// γ parameter for RBF, polynomial, and sigmoid kernels.
    pub gamma: f64,
    /// Independent term in polynomial and sigmoid kernels.
    pub coef0: f64,
}

impl Default for KernelParameter {
    fn default() -> Self {
        Self {
            kernel_type: KernelType::Rbf,
            degree: 3,
            gamma: 1.0,
            coef0: 0.0,
        }
    }
}

impl KernelParameter {
    /// Validate parameter values.
    pub fn validate(&self) -> Result<(), CacheError> {
        if matches!(
            self.kernel_type,
            KernelType::Polynomial | KernelType::Rbf | KernelType::Sigmoid
        ) && self.gamma < 0.0
        {
            return Err(CacheError::InvalidParameter("gamma < 0".into()));
        }

        if self.kernel_type == KernelType::Polynomial && self.degree < 0 {
            return Err(CacheError::InvalidParameter(
                "degree of polynomial kernel < 0".into(),
            ));
        }

        Ok(())
    }
}
