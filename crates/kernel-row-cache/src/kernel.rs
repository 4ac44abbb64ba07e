//! Kernel collaborator consumed by the cache.
//!
//! The cache never looks at features. It only asks a [`Kernel`] for single
//! matrix entries `K(i, j)` and stores whole rows of them. [`SparseKernel`] is
//! a ready-made implementation over sparse feature vectors; closures work too.

use crate::types::{DocId, KernelParameter, KernelType, SvmNode};

/// Source of kernel matrix entries.
///
/// Implementations must be pure and symmetric: `compute(i, j)` always returns
/// the same value as `compute(j, i)`. The cache relies on symmetry to copy
/// entries between cached rows instead of recomputing them, and on `Sync` to
/// evaluate from several fill workers at once.
pub trait Kernel: Sync {
    /// Evaluate `K(x[i], x[j])`. Indices are real example ids.
    fn compute(&self, i: DocId, j: DocId) -> f64;
}

impl<F> Kernel for F
where
    F: Fn(DocId, DocId) -> f64 + Sync,
{
    #[inline]
    fn compute(&self, i: DocId, j: DocId) -> f64 {
        self(i, j)
    }
}

/// Integer power by squaring. Negative exponents yield 1.0.
#[inline]
fn powi(base: f64, times: i32) -> f64 {
    let mut tmp = base;
    let mut ret = 1.0;
    let mut t = times;
    while t > 0 {
        if t % 2 == 1 {
            ret *= tmp;
        }
        tmp *= tmp;
        t /= 2;
    }
    ret
}

/// Merge-based dot product of two index-sorted sparse vectors.
#[inline]
fn dot(x: &[SvmNode], y: &[SvmNode]) -> f64 {
    let (mut ix, mut iy) = (0, 0);
    let mut sum = 0.0;
    while ix < x.len() && iy < y.len() {
        match x[ix].index.cmp(&y[iy].index) {
            std::cmp::Ordering::Equal => {
                sum += x[ix].value * y[iy].value;
                ix += 1;
                iy += 1;
            }
            std::cmp::Ordering::Greater => iy += 1,
            std::cmp::Ordering::Less => ix += 1,
        }
    }
    sum
}

/// Kernel over borrowed sparse vectors.
///
/// Squared norms are precomputed for RBF so each entry costs one sparse dot
/// product: `‖x_i - x_j‖² = sq[i] + sq[j] - 2·x_i·x_j`.
pub struct SparseKernel<'a> {
    x: &'a [Vec<SvmNode>],
    x_square: Option<Vec<f64>>,
    param: KernelParameter,
}

impl<'a> SparseKernel<'a> {
    /// Create a kernel over `x`. Each vector must be sorted by feature index.
    pub fn new(x: &'a [Vec<SvmNode>], param: &KernelParameter) -> Self {
        let x_square = (param.kernel_type == KernelType::Rbf)
            .then(|| x.iter().map(|xi| dot(xi, xi)).collect());
        Self {
            x,
            x_square,
            param: param.clone(),
        }
    }

    /// Number of examples this kernel covers.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether the kernel covers no examples.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

impl Kernel for SparseKernel<'_> {
    fn compute(&self, i: DocId, j: DocId) -> f64 {
        let p = &self.param;
        let (xi, xj) = (self.x[i].as_slice(), self.x[j].as_slice());
        match p.kernel_type {
            KernelType::Linear => dot(xi, xj),
            KernelType::Polynomial => powi(p.gamma * dot(xi, xj) + p.coef0, p.degree),
            KernelType::Rbf => {
                let dist = match &self.x_square {
                    Some(sq) => sq[i] + sq[j] - 2.0 * dot(xi, xj),
                    None => dot(xi, xi) + dot(xj, xj) - 2.0 * dot(xi, xj),
                };
                (-p.gamma * dist).exp()
            }
            KernelType::Sigmoid => (p.gamma * dot(xi, xj) + p.coef0).tanh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nodes(pairs: &[(i32, f64)]) -> Vec<SvmNode> {
        pairs
            .iter()
            .map(|&(index, value)| SvmNode { index, value })
            .collect()
    }

    fn kernel_of(kernel_type: KernelType) -> KernelParameter {
        KernelParameter {
            kernel_type,
            gamma: 0.5,
            coef0: 1.0,
            degree: 2,
        }
    }

    #[test]
    fn powi_basic() {
        assert_eq!(powi(2.0, 10), 1024.0);
        assert_eq!(powi(3.0, 0), 1.0);
        assert_eq!(powi(2.0, -1), 1.0);
    }

    #[test]
    fn dot_skips_unmatched_indices() {
        let x = make_nodes(&[(1, 1.0), (3, 2.0), (5, 3.0)]);
        let y = make_nodes(&[(1, 4.0), (2, 5.0), (5, 6.0)]);
        assert_eq!(dot(&x, &y), 22.0);
        assert_eq!(dot(&x, &[]), 0.0);
    }

    #[test]
    fn closures_are_kernels() {
        let k = |i: DocId, j: DocId| (i * j) as f64;
        assert_eq!(Kernel::compute(&k, 3, 4), 12.0);
    }

    #[test]
    fn rbf_self_kernel_is_one() {
        let data = vec![make_nodes(&[(1, 3.0), (5, -2.0)]), make_nodes(&[(2, 1.0)])];
        let kern = SparseKernel::new(&data, &kernel_of(KernelType::Rbf));
        assert!((kern.compute(0, 0) - 1.0).abs() < 1e-15);
        // ‖x0 - x1‖² = 9 + 4 + 1 = 14
        assert!((kern.compute(0, 1) - (-0.5f64 * 14.0).exp()).abs() < 1e-15);
    }

    #[test]
    fn every_kernel_type_is_symmetric() {
        let data = vec![
            make_nodes(&[(1, 0.5), (3, -1.0)]),
            make_nodes(&[(1, -0.25), (2, 0.75)]),
            make_nodes(&[(2, 1.0), (3, 0.5)]),
        ];
        for kt in [
            KernelType::Linear,
            KernelType::Polynomial,
            KernelType::Rbf,
            KernelType::Sigmoid,
        ] {
            let kern = SparseKernel::new(&data, &kernel_of(kt));
            for i in 0..data.len() {
                for j in 0..data.len() {
                    assert_eq!(
                        kern.compute(i, j).to_bits(),
                        kern.compute(j, i).to_bits(),
                        "{:?} asymmetric at ({},{})",
                        kt,
                        i,
                        j
                    );
                }
            }
        }
    }

    #[test]
    fn polynomial_matches_closed_form() {
        let data = vec![make_nodes(&[(1, 1.0), (2, 2.0)]), make_nodes(&[(1, 3.0), (2, 4.0)])];
        let kern = SparseKernel::new(&data, &kernel_of(KernelType::Polynomial));
        // (0.5 * 11 + 1)^2 = 42.25
        assert!((kern.compute(0, 1) - 42.25).abs() < 1e-12);
        assert_eq!(kern.len(), 2);
    }
}
