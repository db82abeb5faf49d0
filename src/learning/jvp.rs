//! Forward-mode Jacobian-Vector Products (JVP) through the LISTA forward pass.
//!
//! A [`Tangent`] is a perturbation direction over every differentiable input
//! of `forward`: the layer parameters, `x`, `z0` and `lmbd`.  Pushing it
//! through the layers alongside the primal values gives the directional
//! derivative of `z_hat`:
//!
//! ```text
//! duᵢ    = dzᵢ·Wzᵢ + zᵢ·dWzᵢ + dx·Wxᵢ + x·dWxᵢ
//! dzᵢ₊₁  = 1[|uᵢ| > t] ⊙ duᵢ  -  1[|uᵢ| > t] ⊙ sign(uᵢ) · dt,   dt = dlmbd / L
//! ```

use ndarray::{Array2, ArrayBase, ArrayView2, Data, Ix2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::core::layer::LayerParams;
use crate::core::lista::Lista;
use crate::core::shrink::{active_mask, threshold_derivative};
use crate::error::{ListaError, Result};
use crate::kernels::kernel_dispatch::dispatch_matmul;

/// A tangent vector for forward-mode AD.
#[derive(Clone, Debug)]
pub struct Tangent {
    /// Per-layer `(dWz, dWx)`.
    pub layers: Vec<LayerParams>,

    /// Perturbation of the input batch.
    pub x: Option<Array2<f64>>,

    /// Perturbation of the initial code.
    pub z0: Option<Array2<f64>>,

    /// Perturbation of the regularisation strength.
    pub lmbd: f64,
}

impl Tangent {
    /// The zero direction for `net`.
    pub fn zeros(net: &Lista) -> Self {
        Self {
            layers: (0..net.n_layers())
                .map(|_| LayerParams::zeros(net.n_atoms(), net.n_features()))
                .collect(),
            x: None,
            z0: None,
            lmbd: 0.0,
        }
    }

    /// A random Gaussian direction over parameters and inputs.
    ///
    /// `z0` gets a component only when `with_z0` is set.
    pub fn random(net: &Lista, batch: usize, with_z0: bool, seed: u64) -> Self {
        let (n_atoms, n_features) = (net.n_atoms(), net.n_features());
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample = |shape: (usize, usize)| -> Array2<f64> {
            Array2::from_shape_fn(shape, |_| StandardNormal.sample(&mut rng))
        };

        let layers = (0..net.n_layers())
            .map(|_| LayerParams::new(sample((n_atoms, n_atoms)), sample((n_features, n_atoms))))
            .collect();
        let x = Some(sample((batch, n_features)));
        let z0 = with_z0.then(|| sample((batch, n_atoms)));
        let lmbd = sample((1, 1))[[0, 0]];

        Self { layers, x, z0, lmbd }
    }

    /// Squared Euclidean norm over every component.
    pub fn norm_sq(&self) -> f64 {
        let sq = |m: &Array2<f64>| m.iter().map(|v| v * v).sum::<f64>();
        let params: f64 = self.layers.iter().map(|p| sq(&p.wz) + sq(&p.wx)).sum();
        params
            + self.x.as_ref().map_or(0.0, sq)
            + self.z0.as_ref().map_or(0.0, sq)
            + self.lmbd * self.lmbd
    }

    fn validate(&self, net: &Lista, x: ArrayView2<'_, f64>, has_z0: bool) -> Result<()> {
        if self.layers.len() != net.n_layers() {
            return Err(ListaError::shape(
                "tangent layers",
                (net.n_layers(), 2),
                (self.layers.len(), 2),
            ));
        }
        for (i, p) in self.layers.iter().enumerate() {
            p.validate(net.n_atoms(), net.n_features(), i)?;
        }
        if let Some(dx) = &self.x {
            if dx.dim() != x.dim() {
                return Err(ListaError::shape("tangent x", x.dim(), dx.dim()));
            }
        }
        if let Some(dz0) = &self.z0 {
            let expected = (x.nrows(), net.n_atoms());
            if !has_z0 || dz0.dim() != expected {
                return Err(ListaError::shape("tangent z0", expected, dz0.dim()));
            }
        }
        Ok(())
    }
}

/// Evaluate `z_hat` and its directional derivative along `tangent`.
///
/// Returns `(z_hat, dz_hat)`.
pub fn jvp<S>(
    net: &Lista,
    x: &ArrayBase<S, Ix2>,
    lmbd: f64,
    z0: Option<ArrayView2<'_, f64>>,
    tangent: &Tangent,
) -> Result<(Array2<f64>, Array2<f64>)>
where
    S: Data,
    S::Elem: Copy + Into<f64>,
{
    let trace = net.forward_traced(x, lmbd, z0)?;
    tangent.validate(net, trace.x.view(), trace.z0.is_some())?;

    let ctx = net.context();
    let x = trace.x.view();
    let t = trace.threshold;
    let dt = tangent.lmbd / net.lipschitz();

    let mut dz: Option<Array2<f64>> = None;
    for (i, (layer, tan)) in net.layers().iter().zip(&tangent.layers).enumerate() {
        let mut du = dispatch_matmul(x, tan.wx.view(), ctx);
        if let Some(dx) = &tangent.x {
            du += &dispatch_matmul(dx.view(), layer.wx.view(), ctx);
        }

        let z_in = trace.layer_input(i).or(trace.z0.as_ref());
        if let Some(z_in) = z_in {
            du += &dispatch_matmul(z_in.view(), tan.wz.view(), ctx);
        }
        let dz_in = if i == 0 { tangent.z0.as_ref() } else { dz.as_ref() };
        if let Some(dz_in) = dz_in {
            du += &dispatch_matmul(dz_in.view(), layer.wz.view(), ctx);
        }

        let u = trace.pre_activations[i].view();
        let mut next = du * &active_mask(u, t);
        if dt != 0.0 {
            next.scaled_add(dt, &threshold_derivative(u, t));
        }
        dz = Some(next);
    }

    let dz = dz.unwrap_or_else(|| Array2::zeros(trace.output().raw_dim()));
    Ok((trace.output().clone(), dz))
}
