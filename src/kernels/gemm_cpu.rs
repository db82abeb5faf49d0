//! CPU dense GEMM for `f64` matrices.
//!
//! Three implementations with increasing optimisation level:
//! 1. `matmul_naive`: scalar triple loop, reference for tests
//! 2. `matmul`: ndarray's blocked `dot`
//! 3. `matmul_parallel`: rayon row parallelism over `dot` per row

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

// ──────────────────────────────────────────────────────────────
// 1. Naive scalar implementation (reference / testing)
// ──────────────────────────────────────────────────────────────

/// Naive `a · b` with `a: [m × k]`, `b: [k × n]`.
pub fn matmul_naive(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Array2<f64> {
    assert_eq!(a.ncols(), b.nrows());

    let (m, k, n) = (a.nrows(), a.ncols(), b.ncols());
    let mut out = Array2::zeros((m, n));
    for r in 0..m {
        for c in 0..n {
            let mut acc = 0.0f64;
            for i in 0..k {
                acc += a[[r, i]] * b[[i, c]];
            }
            out[[r, c]] = acc;
        }
    }
    out
}

// ──────────────────────────────────────────────────────────────
// 2. Blocked single-threaded implementation
// ──────────────────────────────────────────────────────────────

/// Single-threaded `a · b`.
pub fn matmul(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Array2<f64> {
    assert_eq!(a.ncols(), b.nrows());
    a.dot(&b)
}

// ──────────────────────────────────────────────────────────────
// 3. Parallel implementation (rayon)
// ──────────────────────────────────────────────────────────────

/// Parallel `a · b`, distributing output rows across threads.
pub fn matmul_parallel(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Array2<f64> {
    assert_eq!(a.ncols(), b.nrows());

    let (m, n) = (a.nrows(), b.ncols());
    let rows: Vec<Array1<f64>> = (0..m)
        .into_par_iter()
        .map(|r| a.row(r).dot(&b))
        .collect();

    let mut out = Array2::zeros((m, n));
    for (r, row) in rows.iter().enumerate() {
        out.row_mut(r).assign(row);
    }
    out
}
