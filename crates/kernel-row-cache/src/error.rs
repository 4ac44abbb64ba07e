/// Errors returned by kernel-row-cache operations.
///
/// Only misconfiguration is reported this way. A full cache is not an error:
/// rows that cannot be stored are computed on demand instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cache parameter failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The kernel has no rows to cache.
    #[error("kernel has zero rows")]
    EmptyProblem,

    /// The byte budget cannot hold even one line of `line_len` elements.
    #[error("cache of {bytes} bytes cannot hold a single line of {line_len} elements")]
    ZeroCapacity {
        /// Configured budget in bytes.
        bytes: usize,
        /// Elements per line at construction time.
        line_len: usize,
    },

    /// The backing buffer would overflow the signed line-offset type.
    #[error("cache buffer of {elements} elements exceeds the addressable range")]
    BufferTooLarge {
        /// Requested number of kernel elements.
        elements: u64,
    },

    /// The bookkeeping tables disagree with each other.
    #[error("inconsistent cache state: {0}")]
    Inconsistent(String),
}
