//! Per-layer LISTA parameters.
//!
//! Layer `i` holds two matrices:
//!
//! ```text
//! Wz_i ∈ R^{n_atoms × n_atoms}      (state transition)
//! Wx_i ∈ R^{n_features × n_atoms}   (input injection)
//! ```
//!
//! and computes `softshrink(z · Wz_i + x · Wx_i, lmbd / L)`.  Before any
//! learning, every layer carries one ISTA step:
//! `Wz = I - B/L`, `Wx = Dᵀ/L`.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ListaError, Result};

/// A named, trainable matrix.
///
/// Written only by (re-)initialisation and by an external optimizer between
/// forward calls.  Every write is shape- and finiteness-checked, so the
/// network never holds a parameter of the wrong shape.
#[derive(Clone, Debug)]
pub struct Param {
    name: String,
    value: Array2<f64>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Array2<f64>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Array2<f64> {
        &self.value
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.value.view()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    /// Number of scalar entries.
    pub fn numel(&self) -> usize {
        self.value.len()
    }

    /// Replace the value wholesale.
    pub fn set(&mut self, value: Array2<f64>) -> Result<()> {
        check_matrix(&self.name, value.view(), self.shape())?;
        self.value = value;
        Ok(())
    }

    /// `value += scale · delta`, e.g. `scale = -lr` with `delta` a gradient.
    ///
    /// The result is validated before it replaces the current value.
    pub fn apply_delta(&mut self, delta: ArrayView2<'_, f64>, scale: f64) -> Result<()> {
        if delta.dim() != self.shape() {
            return Err(ListaError::shape(
                format!("update of {}", self.name),
                self.shape(),
                delta.dim(),
            ));
        }
        let mut next = self.value.clone();
        next.scaled_add(scale, &delta);
        if !next.iter().all(|v| v.is_finite()) {
            return Err(ListaError::non_finite(format!("update of {}", self.name)));
        }
        self.value = next;
        Ok(())
    }
}

/// Plain `(Wz, Wx)` pair, the warm-start and snapshot format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    /// Wz ∈ R^{n_atoms × n_atoms}
    pub wz: Array2<f64>,

    /// Wx ∈ R^{n_features × n_atoms}
    pub wx: Array2<f64>,
}

impl LayerParams {
    pub fn new(wz: Array2<f64>, wx: Array2<f64>) -> Self {
        Self { wz, wx }
    }

    /// The classical ISTA step: `Wz = I - B/L`, `Wx = Dᵀ/L`.
    ///
    /// `lipschitz` must be positive; callers check this once at construction.
    pub fn ista_default(gram: ArrayView2<'_, f64>, d: ArrayView2<'_, f64>, lipschitz: f64) -> Self {
        let n_atoms = gram.nrows();
        let wz = Array2::eye(n_atoms) - &gram.mapv(|v| v / lipschitz);
        let wx = d.t().mapv(|v| v / lipschitz);
        Self { wz, wx }
    }

    /// All zeros with the given shapes.
    pub fn zeros(n_atoms: usize, n_features: usize) -> Self {
        Self {
            wz: Array2::zeros((n_atoms, n_atoms)),
            wx: Array2::zeros((n_features, n_atoms)),
        }
    }

    /// Check shapes and finiteness against a network's dimensions.
    pub fn validate(&self, n_atoms: usize, n_features: usize, layer: usize) -> Result<()> {
        check_matrix(
            &format!("warm-start layer {layer} Wz"),
            self.wz.view(),
            (n_atoms, n_atoms),
        )?;
        check_matrix(
            &format!("warm-start layer {layer} Wx"),
            self.wx.view(),
            (n_features, n_atoms),
        )
    }
}

/// One unrolled iteration: a `(Wz, Wx)` pair of trainable parameters.
#[derive(Clone, Debug)]
pub struct Layer {
    pub wz: Param,
    pub wx: Param,

    /// Layer index (for identification).
    pub layer_idx: usize,
}

impl Layer {
    /// Wrap a validated pair, naming parameters `<net>.layers.<i>.{wz,wx}`.
    pub fn from_params(net_name: &str, layer_idx: usize, params: LayerParams) -> Self {
        Self {
            wz: Param::new(format!("{net_name}.layers.{layer_idx}.wz"), params.wz),
            wx: Param::new(format!("{net_name}.layers.{layer_idx}.wx"), params.wx),
            layer_idx,
        }
    }

    /// Copy the current values out.
    pub fn to_params(&self) -> LayerParams {
        LayerParams {
            wz: self.wz.value().clone(),
            wx: self.wx.value().clone(),
        }
    }

    pub fn param_count(&self) -> usize {
        self.wz.numel() + self.wx.numel()
    }
}

fn check_matrix(what: &str, m: ArrayView2<'_, f64>, expected: (usize, usize)) -> Result<()> {
    if m.dim() != expected {
        return Err(ListaError::shape(what, expected, m.dim()));
    }
    if !m.iter().all(|v| v.is_finite()) {
        return Err(ListaError::non_finite(what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ista_default_orthonormal() {
        let d = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let gram = d.dot(&d.t());
        let p = LayerParams::ista_default(gram.view(), d.view(), 1.0);
        // B = I, L = 1 → Wz = 0, Wx = Dᵀ
        assert_eq!(p.wz, Array2::zeros((2, 2)));
        assert_eq!(p.wx, d.t().to_owned());
    }

    #[test]
    fn test_ista_default_scaling() {
        let d = array![[2.0, 0.0], [0.0, 1.0]];
        let gram = d.dot(&d.t());
        let p = LayerParams::ista_default(gram.view(), d.view(), 4.0);
        assert_eq!(p.wz, array![[0.0, 0.0], [0.0, 0.75]]);
        assert_eq!(p.wx, array![[0.5, 0.0], [0.0, 0.25]]);
    }

    #[test]
    fn test_validate_shapes() {
        let p = LayerParams::zeros(3, 5);
        assert!(p.validate(3, 5, 0).is_ok());
        let err = p.validate(3, 4, 2).unwrap_err();
        assert_eq!(
            err,
            ListaError::shape("warm-start layer 2 Wx", (4, 3), (5, 3))
        );
    }

    #[test]
    fn test_validate_non_finite() {
        let mut p = LayerParams::zeros(2, 2);
        p.wz[[0, 1]] = f64::INFINITY;
        assert!(matches!(
            p.validate(2, 2, 0),
            Err(ListaError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_param_set_rejects_bad_shape() {
        let mut param = Param::new("w", Array2::zeros((2, 2)));
        assert!(param.set(Array2::ones((2, 3))).is_err());
        assert_eq!(param.value(), &Array2::<f64>::zeros((2, 2)));
        assert!(param.set(Array2::ones((2, 2))).is_ok());
        assert_eq!(param.value()[[1, 1]], 1.0);
    }

    #[test]
    fn test_param_apply_delta() {
        let mut param = Param::new("w", Array2::ones((2, 2)));
        let grad = Array2::from_elem((2, 2), 2.0);
        param.apply_delta(grad.view(), -0.25).unwrap();
        assert!((param.value()[[0, 0]] - 0.5).abs() < 1e-12);

        let bad = Array2::from_elem((2, 2), f64::NAN);
        assert!(param.apply_delta(bad.view(), 1.0).is_err());
        assert!((param.value()[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_layer_naming() {
        let layer = Layer::from_params("LISTA", 3, LayerParams::zeros(2, 4));
        assert_eq!(layer.wz.name(), "LISTA.layers.3.wz");
        assert_eq!(layer.wx.name(), "LISTA.layers.3.wx");
        assert_eq!(layer.param_count(), 4 + 8);
        assert_eq!(layer.to_params(), LayerParams::zeros(2, 4));
    }
}
