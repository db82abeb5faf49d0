//! Derivatives of the forward pass for an external training loop.
//!
//! - **VJP** (reverse mode): gradients of a scalar loss w.r.t. every input
//! - **JVP** (forward mode): directional derivatives of `z_hat`

pub mod jvp;
pub mod vjp;
