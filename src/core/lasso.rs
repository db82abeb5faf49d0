//! LASSO objective and classical ISTA.
//!
//! `ista` is the fixed-weight algorithm LISTA unrolls; a network left at its
//! default initialisation reproduces it iteration for iteration.

use ndarray::{Array2, ArrayView2};

use crate::core::dictionary;
use crate::core::shrink::softshrink_inplace;
use crate::error::{ListaError, Result};

/// Mean over the batch of `1/2·||x - zD||² + lmbd·||z||₁`.
pub fn lasso_cost(
    x: ArrayView2<'_, f64>,
    z: ArrayView2<'_, f64>,
    d: ArrayView2<'_, f64>,
    lmbd: f64,
) -> Result<f64> {
    check_shapes(x, d)?;
    if z.dim() != (x.nrows(), d.nrows()) {
        return Err(ListaError::shape("code z", (x.nrows(), d.nrows()), z.dim()));
    }
    let batch = x.nrows().max(1) as f64;

    let residual = &x - &z.dot(&d);
    let fit = 0.5 * residual.iter().map(|v| v * v).sum::<f64>();
    let penalty = lmbd * z.iter().map(|v| v.abs()).sum::<f64>();
    Ok((fit + penalty) / batch)
}

/// `n_iter` steps of ISTA with step size `1/L`, starting from `z0` (or 0).
///
/// ```text
/// z ← softshrink(z - (z·B - x·Dᵀ)/L, lmbd/L)
/// ```
pub fn ista(
    x: ArrayView2<'_, f64>,
    d: ArrayView2<'_, f64>,
    lmbd: f64,
    n_iter: usize,
    z0: Option<ArrayView2<'_, f64>>,
) -> Result<Array2<f64>> {
    check_shapes(x, d)?;
    if !lmbd.is_finite() || lmbd < 0.0 {
        return Err(ListaError::InvalidRegularization(lmbd));
    }

    let spectrum = dictionary::analyze(d)?;
    spectrum.ensure_nondegenerate()?;
    let l = spectrum.lipschitz;
    let t = lmbd / l;

    let mut z = match z0 {
        Some(z0) => {
            if z0.dim() != (x.nrows(), d.nrows()) {
                return Err(ListaError::shape(
                    "initial code z0",
                    (x.nrows(), d.nrows()),
                    z0.dim(),
                ));
            }
            z0.to_owned()
        }
        None => Array2::zeros((x.nrows(), d.nrows())),
    };
    let xd = x.dot(&d.t());

    for _ in 0..n_iter {
        let grad = z.dot(&spectrum.gram) - &xd;
        z.scaled_add(-1.0 / l, &grad);
        softshrink_inplace(&mut z, t);
    }
    Ok(z)
}

fn check_shapes(x: ArrayView2<'_, f64>, d: ArrayView2<'_, f64>) -> Result<()> {
    if x.ncols() != d.ncols() {
        return Err(ListaError::shape(
            "input x",
            (x.nrows(), d.ncols()),
            x.dim(),
        ));
    }
    Ok(())
}
