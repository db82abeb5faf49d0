//! Reverse-mode derivatives (vector-Jacobian products) of the LISTA forward
//! pass.
//!
//! Given the upstream gradient `g = ∂ℓ/∂z_hat`, walk the recorded layers
//! backwards:
//!
//! ```text
//! gᵤ      = g ⊙ 1[|uᵢ| > t]
//! ∂Wxᵢ    = xᵀ · gᵤ            ∂x  += gᵤ · Wxᵢᵀ
//! ∂Wzᵢ    = zᵢᵀ · gᵤ           g    = gᵤ · Wzᵢᵀ     (zᵢ = z0 for i = 0)
//! ∂t     += Σ g ⊙ (-sign(uᵢ)) ⊙ 1[|uᵢ| > t]
//! ∂lmbd   = ∂t / L
//! ```
//!
//! The result is handed to an external optimizer; nothing here mutates the
//! network.

use ndarray::{Array2, ArrayView2};

use crate::core::layer::LayerParams;
use crate::core::lista::{ForwardTrace, Lista};
use crate::core::shrink::{active_mask, threshold_derivative};
use crate::error::{ListaError, Result};
use crate::kernels::kernel_dispatch::dispatch_matmul;
use crate::learning::jvp::Tangent;

/// Gradients of a scalar loss with respect to everything `forward` reads.
#[derive(Clone, Debug)]
pub struct Gradients {
    /// Per-layer `(∂Wz, ∂Wx)`.
    pub layers: Vec<LayerParams>,

    /// ∂ℓ/∂x.
    pub x: Array2<f64>,

    /// ∂ℓ/∂z0, present when `z0` took part in the forward pass.
    pub z0: Option<Array2<f64>>,

    /// ∂ℓ/∂lmbd.
    pub lmbd: f64,
}

impl Gradients {
    /// Parameter gradients in the order of [`Lista::parameters`]:
    /// `∂Wz₀, ∂Wx₀, ∂Wz₁, …`.
    pub fn param_grads(&self) -> impl Iterator<Item = &Array2<f64>> {
        self.layers.iter().flat_map(|g| [&g.wz, &g.wx])
    }

    /// Inner product with a tangent direction.
    pub fn dot(&self, tangent: &Tangent) -> f64 {
        let inner = |a: &Array2<f64>, b: &Array2<f64>| {
            a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f64>()
        };
        let params: f64 = self
            .layers
            .iter()
            .zip(&tangent.layers)
            .map(|(g, t)| inner(&g.wz, &t.wz) + inner(&g.wx, &t.wx))
            .sum();
        let x = tangent.x.as_ref().map_or(0.0, |t| inner(&self.x, t));
        let z0 = match (&self.z0, &tangent.z0) {
            (Some(g), Some(t)) => inner(g, t),
            _ => 0.0,
        };
        params + x + z0 + self.lmbd * tangent.lmbd
    }

    /// Global L2 norm over the parameter gradients.
    pub fn param_norm(&self) -> f64 {
        self.param_grads()
            .map(|g| g.iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt()
    }
}

/// Back-propagate `grad_output = ∂ℓ/∂z_hat` through a recorded forward pass.
pub fn backward(
    net: &Lista,
    trace: &ForwardTrace,
    grad_output: ArrayView2<'_, f64>,
) -> Result<Gradients> {
    check_trace(net, trace)?;
    let n_layers = net.n_layers();
    let out_dim = trace.output().dim();
    if grad_output.dim() != out_dim {
        return Err(ListaError::shape("output gradient", out_dim, grad_output.dim()));
    }
    if !grad_output.iter().all(|v| v.is_finite()) {
        return Err(ListaError::non_finite("output gradient"));
    }

    let ctx = net.context();
    let x = trace.x.view();
    let t = trace.threshold;

    let mut g = grad_output.to_owned();
    let mut grad_x = Array2::zeros(x.raw_dim());
    let mut grad_z0 = None;
    let mut grad_t = 0.0;
    let mut layer_grads = Vec::with_capacity(n_layers);

    for (i, layer) in net.layers().iter().enumerate().rev() {
        let u = trace.pre_activations[i].view();
        grad_t += (&g * &threshold_derivative(u, t)).sum();
        let gu = g * &active_mask(u, t);

        let grad_wx = dispatch_matmul(x.t(), gu.view(), ctx);
        grad_x += &dispatch_matmul(gu.view(), layer.wx.view().t(), ctx);

        let z_in = trace.layer_input(i).or(trace.z0.as_ref());
        let grad_wz = match z_in {
            Some(z) => dispatch_matmul(z.t(), gu.view(), ctx),
            None => Array2::zeros(layer.wz.shape()),
        };
        let grad_in = dispatch_matmul(gu.view(), layer.wz.view().t(), ctx);
        if i == 0 && trace.z0.is_some() {
            grad_z0 = Some(grad_in.clone());
        }
        g = grad_in;

        layer_grads.push(LayerParams::new(grad_wz, grad_wx));
    }
    layer_grads.reverse();

    let grads = Gradients {
        layers: layer_grads,
        x: grad_x,
        z0: grad_z0,
        lmbd: grad_t / net.lipschitz(),
    };
    let all_finite = |m: &Array2<f64>| m.iter().all(|v| v.is_finite());
    if !grads.param_grads().all(all_finite) {
        return Err(ListaError::non_finite("parameter gradients"));
    }
    if !all_finite(&grads.x) {
        return Err(ListaError::non_finite("input gradient"));
    }
    if !grads.z0.as_ref().map_or(true, all_finite) {
        return Err(ListaError::non_finite("initial code gradient"));
    }
    if !grads.lmbd.is_finite() {
        return Err(ListaError::non_finite("regularisation gradient"));
    }
    Ok(grads)
}

/// A trace is only usable with the network whose shapes produced it.
fn check_trace(net: &Lista, trace: &ForwardTrace) -> Result<()> {
    let n_layers = net.n_layers();
    if trace.codes.len() != n_layers || trace.pre_activations.len() != n_layers {
        return Err(ListaError::shape(
            "forward trace",
            (n_layers, n_layers),
            (trace.codes.len(), trace.pre_activations.len()),
        ));
    }

    let batch = trace.x.nrows();
    if trace.x.ncols() != net.n_features() {
        return Err(ListaError::shape(
            "traced input x",
            (batch, net.n_features()),
            trace.x.dim(),
        ));
    }

    let expected = (batch, net.n_atoms());
    for (i, (u, z)) in trace.pre_activations.iter().zip(&trace.codes).enumerate() {
        if u.dim() != expected {
            return Err(ListaError::shape(
                format!("traced pre-activation {i}"),
                expected,
                u.dim(),
            ));
        }
        if z.dim() != expected {
            return Err(ListaError::shape(format!("traced code {i}"), expected, z.dim()));
        }
    }
    if let Some(z0) = &trace.z0 {
        if z0.dim() != expected {
            return Err(ListaError::shape("traced initial code z0", expected, z0.dim()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lista::ListaConfig;
    use crate::error::ErrorKind;
    use crate::learning::jvp::jvp;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng))
    }

    /// ℓ = 1/2·||z_hat - target||², returns (loss, ∂ℓ/∂z_hat).
    fn squared_error(z: &Array2<f64>, target: &Array2<f64>) -> (f64, Array2<f64>) {
        let diff = z - target;
        (0.5 * diff.iter().map(|v| v * v).sum::<f64>(), diff)
    }

    #[test]
    fn test_vjp_agrees_with_jvp() {
        let d = random_matrix(4, 7, 1);
        let x = random_matrix(5, 7, 2);
        let z0 = random_matrix(5, 4, 3);
        let lmbd = 0.25;
        let net = Lista::new(d.view(), 4, "LISTA", None).unwrap();

        let trace = net.forward_traced(&x, lmbd, Some(z0.view())).unwrap();
        let g = random_matrix(5, 4, 4);
        let grads = backward(&net, &trace, g.view()).unwrap();

        for seed in 10..14 {
            let tangent = Tangent::random(&net, 5, true, seed);
            let (_, dz) = jvp(&net, &x, lmbd, Some(z0.view()), &tangent).unwrap();
            let lhs: f64 = g.iter().zip(dz.iter()).map(|(a, b)| a * b).sum();
            let rhs = grads.dot(&tangent);
            assert!((lhs - rhs).abs() < 1e-9 * (1.0 + lhs.abs()), "{} vs {}", lhs, rhs);
        }
    }

    #[test]
    fn test_param_gradient_finite_difference() {
        let d = random_matrix(3, 5, 5);
        let x = random_matrix(4, 5, 6);
        let target = random_matrix(4, 3, 7);
        let lmbd = 0.2;
        let net = Lista::new(d.view(), 3, "LISTA", None).unwrap();

        let trace = net.forward_traced(&x, lmbd, None).unwrap();
        let (_, g) = squared_error(trace.output(), &target);
        let grads = backward(&net, &trace, g.view()).unwrap();

        let eps = 1e-6;
        let loss_with = |layer: usize, which: usize, idx: (usize, usize), delta: f64| {
            let mut warm = net.snapshot();
            let m = if which == 0 { &mut warm[layer].wz } else { &mut warm[layer].wx };
            m[[idx.0, idx.1]] += delta;
            let mut p = net.clone();
            p.init(Some(warm.as_slice())).unwrap();
            squared_error(&p.forward(&x, lmbd, None).unwrap(), &target).0
        };

        for &(layer, which, idx) in &[(0, 1, (2, 1)), (1, 0, (0, 2)), (2, 1, (4, 0)), (2, 0, (1, 1))] {
            let fd = (loss_with(layer, which, idx, eps) - loss_with(layer, which, idx, -eps))
                / (2.0 * eps);
            let analytic = if which == 0 {
                grads.layers[layer].wz[[idx.0, idx.1]]
            } else {
                grads.layers[layer].wx[[idx.0, idx.1]]
            };
            assert!(
                (fd - analytic).abs() < 1e-5 * (1.0 + fd.abs()),
                "layer {} param {}: {} vs {}",
                layer,
                which,
                fd,
                analytic
            );
        }
    }

    #[test]
    fn test_first_layer_wz_gradient_zero_without_z0() {
        let d = random_matrix(3, 4, 8);
        let x = random_matrix(2, 4, 9);
        let net = Lista::new(d.view(), 2, "LISTA", None).unwrap();
        let trace = net.forward_traced(&x, 0.1, None).unwrap();
        let g = Array2::ones(trace.output().raw_dim());
        let grads = backward(&net, &trace, g.view()).unwrap();

        assert!(grads.layers[0].wz.iter().all(|&v| v == 0.0));
        assert!(grads.z0.is_none());
        assert_eq!(grads.layers.len(), 2);
        assert_eq!(grads.param_grads().count(), net.parameters().count());
    }

    #[test]
    fn test_kink_has_zero_gradient() {
        // B = I, L = 1: u = x·Dᵀ = [0.5, 2.0] with t = 0.5 puts atom 0 on the kink.
        let d = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let x = array![[0.5, 2.0, 0.0]];
        let net = Lista::new(d.view(), 1, "LISTA", None).unwrap();
        let trace = net.forward_traced(&x, 0.5, None).unwrap();

        let g = array![[1.0, 1.0]];
        let grads = backward(&net, &trace, g.view()).unwrap();
        assert!(grads.x[[0, 0]].abs() < 1e-12);
        assert!((grads.x[[0, 1]] - 1.0).abs() < 1e-12);
        assert!(grads.x[[0, 2]].abs() < 1e-12);
        // only atom 1 is active: ∂lmbd = -sign(2.0) / L
        assert!((grads.lmbd + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_step_reduces_loss() {
        let d = random_matrix(5, 8, 11);
        let x = random_matrix(6, 8, 12);
        let target = random_matrix(6, 5, 13).mapv(|v| if v.abs() > 1.0 { v } else { 0.0 });
        let lmbd = 0.1;
        let mut net = Lista::new(d.view(), 3, "LISTA", None).unwrap();

        let trace = net.forward_traced(&x, lmbd, None).unwrap();
        let (before, g) = squared_error(trace.output(), &target);
        let grads = backward(&net, &trace, g.view()).unwrap();
        assert!(grads.param_norm() > 0.0);

        let lr = 1e-4;
        for (param, grad) in net.parameters_mut().zip(grads.param_grads()) {
            param.apply_delta(grad.view(), -lr).unwrap();
        }
        let (after, _) = squared_error(&net.forward(&x, lmbd, None).unwrap(), &target);
        assert!(after < before, "{} !< {}", after, before);
    }

    #[test]
    fn test_output_gradient_shape_checked() {
        let d = random_matrix(3, 4, 14);
        let x = random_matrix(2, 4, 15);
        let net = Lista::new(d.view(), 2, "LISTA", None).unwrap();
        let trace = net.forward_traced(&x, 0.1, None).unwrap();

        let g = Array2::<f64>::zeros((3, 3));
        let err = backward(&net, &trace, g.view()).unwrap_err();
        assert_eq!(err, ListaError::shape("output gradient", (2, 3), (3, 3)));
    }

    #[test]
    fn test_trace_from_other_network_rejected() {
        let d = random_matrix(3, 4, 16);
        let x = random_matrix(2, 4, 17);
        let shallow = Lista::new(d.view(), 1, "LISTA", None).unwrap();
        let deep = Lista::new(d.view(), 3, "LISTA", None).unwrap();
        let trace = shallow.forward_traced(&x, 0.1, None).unwrap();

        let g = Array2::<f64>::ones((2, 3));
        assert!(backward(&deep, &trace, g.view()).is_err());
    }

    #[test]
    fn test_trace_with_other_atom_count_rejected() {
        let three = Lista::new(Array2::<f64>::eye(3).view(), 2, "LISTA", None).unwrap();
        let two = Lista::new(array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]].view(), 2, "LISTA", None)
            .unwrap();
        let x = array![[0.5, -1.0, 2.0]];
        let trace = two.forward_traced(&x, 0.1, None).unwrap();

        let g = Array2::<f64>::ones((1, 2));
        let err = backward(&three, &trace, g.view()).unwrap_err();
        assert_eq!(err, ListaError::shape("traced pre-activation 0", (1, 3), (1, 2)));
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_overflowing_input_gradient_is_numeric_error() {
        // forward stays finite (u = 1e8) but ∂x = 1e308 + 1e308 overflows
        let d = array![[1.0], [1.0]];
        let config = ListaConfig {
            n_layers: 1,
            ..ListaConfig::default()
        };
        let warm = [LayerParams::new(Array2::zeros((2, 2)), array![[1e308, 1e308]])];
        let net = Lista::with_params(d.view(), &config, &warm).unwrap();

        let x = array![[1e-300]];
        let trace = net.forward_traced(&x, 0.0, None).unwrap();
        assert!(trace.output().iter().all(|v| v.is_finite()));

        let g = Array2::<f64>::ones((1, 2));
        let err = backward(&net, &trace, g.view()).unwrap_err();
        assert_eq!(err, ListaError::non_finite("input gradient"));
        assert_eq!(err.kind(), ErrorKind::NumericDomain);
    }
}
