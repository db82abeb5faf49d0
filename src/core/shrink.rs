//! Soft-thresholding, the proximal operator of `t·||·||₁`.
//!
//! ```text
//! softshrink(v, t) = sign(v) · max(|v| - t, 0)
//! ```
//!
//! The subgradient used for differentiation is `1` on the active set
//! `|v| > t` and `0` elsewhere, including the kink `|v| = t`.

use ndarray::{Array2, ArrayView2, Zip};

/// Scalar soft-threshold.
#[inline]
pub fn softshrink_scalar(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

/// Element-wise soft-threshold.  `t == 0` is the identity.
pub fn softshrink(v: ArrayView2<'_, f64>, t: f64) -> Array2<f64> {
    if t == 0.0 {
        return v.to_owned();
    }
    v.mapv(|x| softshrink_scalar(x, t))
}

/// In-place variant of [`softshrink`].
pub fn softshrink_inplace(v: &mut Array2<f64>, t: f64) {
    if t == 0.0 {
        return;
    }
    v.mapv_inplace(|x| softshrink_scalar(x, t));
}

/// Active-set indicator: `1.0` where `|v| > t`, else `0.0`.
///
/// With `t == 0` the operator is the identity and the mask is all ones.
pub fn active_mask(v: ArrayView2<'_, f64>, t: f64) -> Array2<f64> {
    if t == 0.0 {
        return Array2::ones(v.raw_dim());
    }
    v.mapv(|x| if x.abs() > t { 1.0 } else { 0.0 })
}

/// Derivative of `softshrink(v, t)` with respect to `t`: `-sign(v)` on the
/// active set, `0` elsewhere.
pub fn threshold_derivative(v: ArrayView2<'_, f64>, t: f64) -> Array2<f64> {
    let mut out = Array2::zeros(v.raw_dim());
    Zip::from(&mut out).and(&v).for_each(|o, &x| {
        if x.abs() > t {
            *o = -x.signum();
        }
    });
    out
}
