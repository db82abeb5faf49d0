//! The LISTA network: ISTA unrolled into `n_layers` learnable layers.
//!
//! ```text
//! z₁     = softshrink(x·Wx₀ + z0·Wz₀, lmbd/L)          (z0 optional)
//! zᵢ₊₁   = softshrink(zᵢ·Wzᵢ + x·Wxᵢ, lmbd/L)          i = 1 .. n_layers-1
//! z_hat  = z_{n_layers}
//! ```
//!
//! Construction analyses the dictionary once (`B = D·Dᵀ`, `L = ||B||₂`) and
//! fills every layer with the ISTA step `(I - B/L, Dᵀ/L)` unless warm-start
//! values are supplied.  Parameters are the only state that outlives a call;
//! `forward` takes `&self`, so parameter updates (which need `&mut self`) are
//! serialised with forward passes by the borrow checker.

use ndarray::{Array2, ArrayBase, ArrayView2, Data, Ix2};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_NAME, DEFAULT_N_LAYERS};
use crate::core::dictionary::{self, Spectrum};
use crate::core::layer::{Layer, LayerParams, Param};
use crate::core::shrink::{active_mask, softshrink_inplace};
use crate::error::{ListaError, Result};
use crate::kernels::kernel_dispatch::{dispatch_matmul, select_context, Context};

/// Construction options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListaConfig {
    /// Number of unrolled iterations.
    pub n_layers: usize,

    /// Network name, used as the parameter name prefix.
    pub name: String,

    /// Execution context; `None` picks the first available one.
    pub ctx: Option<Context>,
}

impl Default for ListaConfig {
    fn default() -> Self {
        Self {
            n_layers: DEFAULT_N_LAYERS,
            name: DEFAULT_NAME.to_string(),
            ctx: None,
        }
    }
}

/// Intermediate values recorded by [`Lista::forward_traced`].
///
/// Only `forward_traced` builds one, so a trace always holds one code and one
/// pre-activation per layer.
#[derive(Clone, Debug)]
pub struct ForwardTrace {
    /// Input batch, converted to `f64`.
    pub(crate) x: Array2<f64>,

    /// Initial code, if one contributed to layer 0.
    pub(crate) z0: Option<Array2<f64>>,

    pub(crate) lmbd: f64,

    /// Shrinkage threshold `lmbd / L`.
    pub(crate) threshold: f64,

    /// `pre_activations[i]` is layer `i`'s affine output before shrinkage.
    pub(crate) pre_activations: Vec<Array2<f64>>,

    /// `codes[i]` is layer `i`'s output; the last one is `z_hat`.
    pub(crate) codes: Vec<Array2<f64>>,
}

impl ForwardTrace {
    /// Final code estimate.
    pub fn output(&self) -> &Array2<f64> {
        // n_layers >= 1 is enforced at construction
        &self.codes[self.codes.len() - 1]
    }

    /// Code entering layer `i` (`i >= 1`).
    pub fn layer_input(&self, i: usize) -> Option<&Array2<f64>> {
        i.checked_sub(1).and_then(|k| self.codes.get(k))
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn z0(&self) -> Option<&Array2<f64>> {
        self.z0.as_ref()
    }

    pub fn lmbd(&self) -> f64 {
        self.lmbd
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Per-layer outputs, `z_hat` last.
    pub fn codes(&self) -> &[Array2<f64>] {
        &self.codes
    }

    pub fn pre_activations(&self) -> &[Array2<f64>] {
        &self.pre_activations
    }
}

/// L-ISTA network for the LASSO problem `min_z 1/2||x - zD||² + lmbd||z||₁`.
#[derive(Clone, Debug)]
pub struct Lista {
    name: String,
    ctx: Context,
    n_layers: usize,

    /// Dictionary D ∈ R^{n_atoms × n_features}.
    d: Array2<f64>,

    /// Gram matrix and Lipschitz constant of `d`.
    spectrum: Spectrum,

    layers: Vec<Layer>,
}

impl Lista {
    /// Build a network with default (ISTA) initialisation.
    pub fn new(
        d: ArrayView2<'_, f64>,
        n_layers: usize,
        name: &str,
        ctx: Option<Context>,
    ) -> Result<Self> {
        if n_layers == 0 {
            return Err(ListaError::InvalidLayerCount(n_layers));
        }
        let ctx = select_context(ctx)?;

        let spectrum = dictionary::analyze(d)?;
        spectrum.ensure_nondegenerate()?;

        tracing::debug!(
            net = name,
            n_atoms = d.nrows(),
            n_features = d.ncols(),
            n_layers,
            lipschitz = spectrum.lipschitz,
            %ctx,
            "building LISTA network"
        );

        let mut net = Self {
            name: name.to_string(),
            ctx,
            n_layers,
            d: d.to_owned(),
            spectrum,
            layers: Vec::new(),
        };
        net.layers = net.build_layers(None)?;
        Ok(net)
    }

    /// Build a network from a [`ListaConfig`].
    pub fn from_config(d: ArrayView2<'_, f64>, config: &ListaConfig) -> Result<Self> {
        Self::new(d, config.n_layers, &config.name, config.ctx)
    }

    /// Build a network and warm-start it in one step.
    pub fn with_params(
        d: ArrayView2<'_, f64>,
        config: &ListaConfig,
        warm_start: &[LayerParams],
    ) -> Result<Self> {
        let mut net = Self::from_config(d, config)?;
        net.init(Some(warm_start))?;
        Ok(net)
    }

    /// Rebuild every layer, taking layer `i` from `warm_start[i]` when present
    /// and from the ISTA formula otherwise.
    ///
    /// Surplus warm-start entries are ignored.  On error the current layers
    /// are left untouched.  `warm_start` is only read, so repeated calls with
    /// the same slice give the same network.
    pub fn init(&mut self, warm_start: Option<&[LayerParams]>) -> Result<()> {
        let layers = self.build_layers(warm_start)?;
        self.layers = layers;
        Ok(())
    }

    fn build_layers(&self, warm_start: Option<&[LayerParams]>) -> Result<Vec<Layer>> {
        let (n_atoms, n_features) = (self.n_atoms(), self.n_features());
        let supplied = warm_start.unwrap_or(&[]);

        if supplied.len() > self.n_layers {
            tracing::warn!(
                supplied = supplied.len(),
                n_layers = self.n_layers,
                "ignoring surplus warm-start parameters"
            );
        }

        let mut layers = Vec::with_capacity(self.n_layers);
        for i in 0..self.n_layers {
            let params = match supplied.get(i) {
                Some(p) => {
                    p.validate(n_atoms, n_features, i)?;
                    p.clone()
                }
                None => LayerParams::ista_default(
                    self.spectrum.gram.view(),
                    self.d.view(),
                    self.spectrum.lipschitz,
                ),
            };
            layers.push(Layer::from_params(&self.name, i, params));
        }

        tracing::debug!(
            warm_started = supplied.len().min(self.n_layers),
            n_layers = self.n_layers,
            "initialised layer stack"
        );
        Ok(layers)
    }

    /// Run the unrolled iteration and return `z_hat` (`batch × n_atoms`).
    ///
    /// `x` may hold any element type convertible to `f64`; it is converted
    /// to a double-precision copy first.  An empty `z0` counts as absent.
    pub fn forward<S>(
        &self,
        x: &ArrayBase<S, Ix2>,
        lmbd: f64,
        z0: Option<ArrayView2<'_, f64>>,
    ) -> Result<Array2<f64>>
    where
        S: Data,
        S::Elem: Copy + Into<f64>,
    {
        let x: Array2<f64> = x.mapv(Into::into);
        self.run(x.view(), lmbd, z0, None)
    }

    /// Like [`forward`](Self::forward) but keeps every intermediate needed to
    /// differentiate the output.
    pub fn forward_traced<S>(
        &self,
        x: &ArrayBase<S, Ix2>,
        lmbd: f64,
        z0: Option<ArrayView2<'_, f64>>,
    ) -> Result<ForwardTrace>
    where
        S: Data,
        S::Elem: Copy + Into<f64>,
    {
        let x: Array2<f64> = x.mapv(Into::into);
        let mut trace = ForwardTrace {
            x: Array2::zeros((0, 0)),
            z0: None,
            lmbd,
            threshold: self.threshold(lmbd),
            pre_activations: Vec::with_capacity(self.n_layers),
            codes: Vec::with_capacity(self.n_layers),
        };
        self.run(x.view(), lmbd, z0, Some(&mut trace))?;
        trace.z0 = z0.filter(|z| !z.is_empty()).map(|z| z.to_owned());
        trace.x = x;
        Ok(trace)
    }

    fn run(
        &self,
        x: ArrayView2<'_, f64>,
        lmbd: f64,
        z0: Option<ArrayView2<'_, f64>>,
        mut trace: Option<&mut ForwardTrace>,
    ) -> Result<Array2<f64>> {
        let z0 = self.check_inputs(x, lmbd, z0)?;
        let t = self.threshold(lmbd);

        let mut z_hat: Option<Array2<f64>> = None;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut u = dispatch_matmul(x, layer.wx.view(), self.ctx);
            match (&z_hat, z0) {
                (Some(z), _) => u += &dispatch_matmul(z.view(), layer.wz.view(), self.ctx),
                (None, Some(z0)) => u += &dispatch_matmul(z0, layer.wz.view(), self.ctx),
                (None, None) => {}
            }

            let mut z = u.clone();
            softshrink_inplace(&mut z, t);
            if !z.iter().all(|v| v.is_finite()) {
                return Err(ListaError::non_finite(format!("output of layer {i}")));
            }

            tracing::trace!(
                layer = i,
                active = active_mask(u.view(), t).sum() as usize,
                "lista layer"
            );

            if let Some(trace) = trace.as_deref_mut() {
                trace.pre_activations.push(u);
                trace.codes.push(z.clone());
            }
            z_hat = Some(z);
        }

        // n_layers >= 1 is enforced at construction
        Ok(z_hat.unwrap_or_else(|| Array2::zeros((x.nrows(), self.n_atoms()))))
    }

    /// Validate call inputs; returns `z0` normalised so that empty is `None`.
    fn check_inputs<'a>(
        &self,
        x: ArrayView2<'_, f64>,
        lmbd: f64,
        z0: Option<ArrayView2<'a, f64>>,
    ) -> Result<Option<ArrayView2<'a, f64>>> {
        if !lmbd.is_finite() || lmbd < 0.0 {
            return Err(ListaError::InvalidRegularization(lmbd));
        }

        let n_features = self.n_features();
        if x.ncols() != n_features {
            return Err(ListaError::shape(
                "input x",
                (x.nrows(), n_features),
                x.dim(),
            ));
        }
        if !x.iter().all(|v| v.is_finite()) {
            return Err(ListaError::non_finite("input x"));
        }

        let z0 = z0.filter(|z| !z.is_empty());
        if let Some(z) = z0 {
            let expected = (x.nrows(), self.n_atoms());
            if z.dim() != expected {
                return Err(ListaError::shape("initial code z0", expected, z.dim()));
            }
            if !z.iter().all(|v| v.is_finite()) {
                return Err(ListaError::non_finite("initial code z0"));
            }
        }
        Ok(z0)
    }

    /// Shrinkage threshold `lmbd / L`.
    pub fn threshold(&self, lmbd: f64) -> f64 {
        lmbd / self.spectrum.lipschitz
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> Context {
        self.ctx
    }

    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    pub fn n_atoms(&self) -> usize {
        self.d.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.d.ncols()
    }

    pub fn dictionary(&self) -> &Array2<f64> {
        &self.d
    }

    pub fn gram(&self) -> &Array2<f64> {
        &self.spectrum.gram
    }

    pub fn lipschitz(&self) -> f64 {
        self.spectrum.lipschitz
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// All parameters in layer order: `wz₀, wx₀, wz₁, wx₁, …`.
    pub fn parameters(&self) -> impl Iterator<Item = &Param> {
        self.layers.iter().flat_map(|l| [&l.wz, &l.wx])
    }

    /// Mutable access for an external optimizer.  Writes go through
    /// [`Param::set`] / [`Param::apply_delta`], which keep shapes fixed.
    pub fn parameters_mut(&mut self) -> impl Iterator<Item = &mut Param> {
        self.layers
            .iter_mut()
            .flat_map(|l| [&mut l.wz, &mut l.wx])
    }

    /// Copy of every layer's current values, usable as a warm start.
    pub fn snapshot(&self) -> Vec<LayerParams> {
        self.layers.iter().map(Layer::to_params).collect()
    }

    /// Total trainable parameter count.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }
}
