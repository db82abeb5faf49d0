//! # LISTA
//!
//! **Learned ISTA**: sparse coding for the LASSO problem
//!
//! ```text
//! min_z  1/2·||x - z·D||² + lmbd·||z||₁
//! ```
//!
//! with a fixed number of unrolled proximal-gradient iterations whose
//! weights are learnable.
//!
//! ## Components
//!
//! 1. **Dictionary analysis**: Gram matrix `B = D·Dᵀ` and Lipschitz
//!    constant `L = ||B||₂`
//! 2. **Layer stack**: `n_layers` pairs `(Wz, Wx)`, initialised to one ISTA
//!    step `(I - B/L, Dᵀ/L)` or warm-started from trained values
//! 3. **Forward pass**: affine transform + soft-thresholding per layer
//! 4. **Differentiation**: reverse-mode (VJP) and forward-mode (JVP)
//!    derivatives for an external training loop
//! 5. **Kernels**: execution context selection and CPU GEMM dispatch

pub mod core;
pub mod error;
pub mod kernels;
pub mod learning;

pub use crate::core::layer::{Layer, LayerParams, Param};
pub use crate::core::lista::{ForwardTrace, Lista, ListaConfig};
pub use crate::error::{ErrorKind, ListaError, Result};
pub use crate::kernels::kernel_dispatch::{available_contexts, Context};

/// Crate-wide defaults.
pub mod config {
    /// Default network name (parameter name prefix).
    pub const DEFAULT_NAME: &str = "LISTA";

    /// Default number of unrolled iterations.
    pub const DEFAULT_N_LAYERS: usize = 10;

    /// Default regularisation strength used by the demo binary.
    pub const DEFAULT_LMBD: f64 = 0.1;

    /// Probability that an entry of a demo sparse code is non-zero.
    pub const DEFAULT_SPARSITY: f64 = 0.2;
}
