//! # kernel-row-cache
//!
//! The kernel-row cache of SVMLight-style decomposition trainers (SVM and
//! SVR). During training the optimizer keeps asking for rows of an N×N
//! kernel matrix that is too large to materialize. This crate stores a
//! bounded number of those rows, evicts the least recently used one when
//! full, follows the solver's shrinking active set, and fills several
//! missing rows at once across worker threads.
//!
//! ```
//! use kernel_row_cache::{CacheParameter, KernelCache};
//!
//! let kernel = |i: usize, j: usize| ((i + 1) * (j + 1)) as f64;
//! let mut cache = KernelCache::new(100, &CacheParameter::default()).unwrap();
//!
//! cache.cache_rows(&kernel, &[3, 7]);
//! let row = cache.get_row(&kernel, 3, None, true);
//! assert_eq!(row[7], 32.0);
//! assert_eq!(cache.stats().hits, 1);
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): fill rows on a worker pool when more than one
//!   thread is configured. Without it [`KernelCache::cache_rows`] always
//!   runs on the calling thread.

pub mod types;
pub mod error;
pub mod kernel;
pub mod tables;
pub mod cache;
mod fetch;
mod fill;
mod shrink;
pub mod cached;

pub use cache::{CacheStats, KernelCache};
pub use cached::CachedKernel;
pub use error::CacheError;
pub use kernel::{Kernel, SparseKernel};
pub use tables::IndexTables;
pub use types::*;
